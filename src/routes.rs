use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::SessionSecret;
use crate::conversations;
use crate::directory;
use crate::messages;
use crate::session::handler as ws_handler;
use crate::state::AppState;

/// Inject the session secret into request extensions so the Claims
/// extractor can find it.
async fn inject_session_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(SessionSecret(state.session_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on the upgrade endpoint: reconnect storms are fine
    // (burst 30), sustained token-guessing is not (1/s refill per IP).
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>.
    let ws_governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(1)
            .burst_size(30)
            .finish()
            .expect("Failed to build ws governor config"),
    );
    let ws_limiter = ws_governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            ws_limiter.retain_recent();
        }
    });

    // The directory sync endpoint is service-token gated; rate limiting
    // keeps token guessing slow. 10 per minute per IP.
    let directory_governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(6)
            .burst_size(10)
            .finish()
            .expect("Failed to build directory governor config"),
    );
    let directory_limiter = directory_governor_config.limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            directory_limiter.retain_recent();
        }
    });

    // Authenticated REST routes (JWT required — Claims extractor validates)
    let conversation_routes = Router::new()
        .route(
            "/api/conversations",
            axum::routing::get(conversations::list_conversations),
        )
        .route(
            "/api/conversations",
            axum::routing::post(conversations::create_conversation),
        )
        .route(
            "/api/conversations/{room_id}/messages",
            axum::routing::get(messages::get_conversation_messages),
        );

    // Platform-internal routes (service token, not user JWT)
    let directory_routes = Router::new()
        .route(
            "/api/directory/profiles",
            axum::routing::post(directory::sync_profiles),
        )
        .layer(GovernorLayer {
            config: directory_governor_config,
        });

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new()
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade))
        .layer(GovernorLayer {
            config: ws_governor_config,
        });

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(conversation_routes)
        .merge(directory_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_session_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
