// WebSocket push connector - the remote counterpart of `HubConnector`

use async_trait::async_trait;
use futures::{future, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};
use tracing::{debug, warn};

use crate::client::push_loop::{PushConnector, PushStream};
use crate::error::{AppError, AppResult};
use crate::push::PushEvent;

/// Connects to `GET /api/v1/push` and authenticates with a bearer token at the handshake
#[derive(Debug, Clone)]
pub struct WsPushConnector {
    url: String,
    token: String,
}

impl WsPushConnector {
    /// `url` is the full push endpoint, e.g. `ws://host:3000/api/v1/push`
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl PushConnector for WsPushConnector {
    async fn connect(&self) -> AppResult<PushStream> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| AppError::Configuration(format!("Invalid push url {}: {}", self.url, e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| AppError::Configuration(format!("Invalid push token: {}", e)))?;
        request.headers_mut().insert("Authorization", bearer);

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| AppError::Storage(format!("Push connect to {} failed: {}", self.url, e)))?;
        debug!(url = %self.url, "Push socket open");

        let events = socket
            .take_while(|message| future::ready(matches!(message, Ok(m) if !m.is_close())))
            .filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<PushEvent>(&text) {
                        Ok(event) => Some(event),
                        Err(err) => {
                            warn!("Ignoring malformed push frame: {}", err);
                            None
                        }
                    },
                    _ => None,
                })
            });
        Ok(events.boxed())
    }
}
