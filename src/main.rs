// Engagement Server - engagement, notification and push endpoints

use tokio::net::TcpListener;
use tracing::{info, warn};

use engagement_core::{
    app_state::AppState, config::Config, engagement_interface::build_app, infrastructure::init_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let config = Config::from_env()?;
    if config.auth.issuer_secret.is_none() {
        warn!("SESSION_ISSUER_SECRET is not set; POST /api/v1/sessions will refuse to issue sessions");
    }

    // Initialize application state
    let app_state = AppState::new(config.clone()).await?;
    let background = app_state.spawn_background_tasks();

    // Build main application router
    let app = build_app(app_state.clone());

    // Start server
    let addr = config.server_address();
    let listener = TcpListener::bind(&addr).await?;
    info!("Engagement server listening on http://{}", listener.local_addr()?);
    info!("  POST   /api/v1/sessions                      - Issue session (upstream auth only)");
    info!("  POST   /api/v1/entities/{{id}}/like           - Toggle like");
    info!("  POST   /api/v1/entities/{{id}}/share          - Track share");
    info!("  GET    /api/v1/posts/{{id}}/comments          - Comment threads");
    info!("  GET    /api/v1/notifications                 - Notification feed");
    info!("  GET    /api/v1/push                          - Push channel (WebSocket)");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    for task in background {
        task.abort();
    }
    app_state.db.close().await;

    Ok(())
}
