use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    config::Config,
    infrastructure::{
        middleware::HasAuthenticator, Authenticator, IdGenerator, MetricsCollector, SessionRegistry,
        SqliteDatabase,
    },
    push::PushHub,
    services::{EngagementService, NotificationService},
};

/// Everything a request handler or background task needs, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: SqliteDatabase,
    pub engagement: Arc<EngagementService>,
    pub notifications: Arc<NotificationService>,
    pub hub: Arc<PushHub>,
    pub sessions: Arc<SessionRegistry>,
    pub authenticator: Arc<dyn Authenticator>,
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        ensure_database_dir(&config.database.url)?;
        let db = SqliteDatabase::connect(&config.database.url, config.database.max_connections).await?;
        Ok(Self::with_database(config, db))
    }

    pub fn with_database(config: Config, db: SqliteDatabase) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let ids = Arc::new(IdGenerator::new(config.server.node_id));
        let hub = Arc::new(PushHub::new(config.push.session_buffer, metrics.clone()));
        let sessions = Arc::new(SessionRegistry::new(config.session_ttl()));

        let notifications = Arc::new(NotificationService::new(
            db.clone(),
            ids.clone(),
            hub.clone(),
            metrics.clone(),
        ));
        let engagement = Arc::new(EngagementService::new(
            db.clone(),
            ids,
            notifications.clone(),
            metrics.clone(),
        ));

        Self {
            config,
            db,
            engagement,
            notifications,
            hub,
            authenticator: sessions.clone(),
            sessions,
            metrics,
        }
    }

    /// Start the retention sweep and session cleanup loops
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let retention = Duration::from_secs(self.config.notifications.retention_days.max(0) as u64 * 86_400);
        let every = Duration::from_secs(self.config.notifications.sweep_interval_secs.max(1));
        let sweeper = self.notifications.clone().spawn_retention_sweeper(retention, every);

        let sessions = self.sessions.clone();
        let cleanup = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = sessions.cleanup_expired_sessions().await;
                if removed > 0 {
                    debug!(removed, "Expired sessions cleaned up");
                }
            }
        });

        vec![sweeper, cleanup]
    }
}

impl HasAuthenticator for AppState {
    fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }
}

/// File databases need their directory to exist before SQLite can create the file
fn ensure_database_dir(url: &str) -> anyhow::Result<()> {
    if url.contains(":memory:") || url.contains("mode=memory") {
        return Ok(());
    }
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
