// ViewerContext Middleware - resolves the bearer token and injects the caller into request extensions
// Handlers never see tokens, only the ViewerContext

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::error::AppError;
use crate::infrastructure::security::{parse_bearer, Authenticator};

/// Application state that can authenticate requests
pub trait HasAuthenticator {
    fn authenticator(&self) -> &Arc<dyn Authenticator>;
}

/// Reject unauthenticated requests with 401, otherwise attach `Arc<ViewerContext>`
pub async fn viewer_context_middleware<T>(
    State(app_state): State<T>,
    mut request: Request,
    next: Next,
) -> Response
where
    T: HasAuthenticator + Clone + Send + Sync + 'static,
{
    let token = match extract_bearer_token(request.headers()) {
        Ok(token) => token,
        Err(err) => return err.into_response(),
    };

    match app_state.authenticator().authenticate(&token).await {
        Ok(viewer) => {
            debug!(
                request_id = %viewer.request_id,
                tenant_id = %viewer.tenant_id,
                user_id = %viewer.user_id,
                "Viewer resolved"
            );
            request.extensions_mut().insert(Arc::new(viewer));
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// Extract the bearer token from request headers
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("Malformed authorization header".to_string()))?;

    parse_bearer(value)
        .map(str::to_string)
        .ok_or_else(|| AppError::Unauthorized("Expected a bearer token".to_string()))
}
