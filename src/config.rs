use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub push: PushConfig,
    pub notifications: NotificationConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Node bits embedded in generated IDs
    pub node_id: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Events buffered per session before new ones are dropped
    pub session_buffer: usize,
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub retention_days: i64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub session_ttl_secs: u64,
    /// Shared secret the upstream auth layer presents to issue sessions; issuing is off when unset
    pub issuer_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:data/engagement.db".to_string()),
                max_connections: env_or("DB_MAX_CONNECTIONS", 8),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("SERVER_PORT", 3000),
                node_id: env_or("NODE_ID", 1),
            },
            push: PushConfig {
                session_buffer: env_or("PUSH_SESSION_BUFFER", 64),
                heartbeat_secs: env_or("PUSH_HEARTBEAT_SECS", 30),
            },
            notifications: NotificationConfig {
                retention_days: env_or("NOTIFICATION_RETENTION_DAYS", 90),
                sweep_interval_secs: env_or("RETENTION_SWEEP_SECS", 3600),
            },
            auth: AuthConfig {
                session_ttl_secs: env_or("SESSION_TTL_SECS", 86_400),
                issuer_secret: env::var("SESSION_ISSUER_SECRET").ok().filter(|secret| !secret.is_empty()),
            },
        })
    }

    /// Defaults suited to tests: in-memory storage, short intervals
    pub fn for_tests() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                node_id: 1,
            },
            push: PushConfig {
                session_buffer: 16,
                heartbeat_secs: 30,
            },
            notifications: NotificationConfig {
                retention_days: 90,
                sweep_interval_secs: 3600,
            },
            auth: AuthConfig {
                session_ttl_secs: 3600,
                issuer_secret: Some("test-issuer-secret".to_string()),
            },
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.push.heartbeat_secs.max(1))
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.auth.session_ttl_secs)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
