use std::net::SocketAddr;
use tokio::net::TcpListener;

use bazaar_chat::auth::token;
use bazaar_chat::config::{generate_config_template, Config};
use bazaar_chat::db;
use bazaar_chat::routes;
use bazaar_chat::session::SessionRegistry;
use bazaar_chat::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "bazaar_chat=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "bazaar_chat=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("bazaar-chat v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate the session signing key shared with the platform
    let session_secret = token::load_or_generate_session_secret(&config.data_dir)?;

    // Service token for the directory sync endpoint: config wins, else
    // load or generate one under data_dir and tell the operator.
    let service_token = if config.service_token.is_empty() {
        let token = token::load_or_generate_service_token(&config.data_dir)?;
        tracing::info!(
            "Directory sync service token: {} (configure the platform with this value)",
            token
        );
        token
    } else {
        config.service_token.clone()
    };

    // Build application state
    let app_state = AppState {
        db,
        sessions: SessionRegistry::new(),
        session_secret,
        service_token,
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
