use credential_service::config::Config;
use credential_service::handlers::AppState;
use credential_service::issuer::CredentialIssuer;
use credential_service::observability::init_metrics_recorder;
use credential_service::routes;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credential_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting credential service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        deployment = %config.deployment.kind(),
        domain = %config.deployment.domain(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    let issuer = CredentialIssuer::from_config(&config).map_err(|e| {
        error!("Failed to initialize credential issuer: {}", e);
        e
    })?;

    if !issuer.is_configured() {
        warn!(
            deployment = %config.deployment.kind(),
            "Credential issuance is not configured; requests will be answered with 503"
        );
    }

    let state = Arc::new(AppState { issuer });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Credential service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
