use gatehouse_auth::{AuthGateway, AuthorizerRegistry};
use gatehouse_server::{config::ServerConfig, error::StartupError, host};
use rootcause::Report;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(report) = run().await {
        tracing::error!("{report}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<StartupError>> {
    let config = ServerConfig::load().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!(domain = %config.domain, backends = config.backends.len(), "Loaded configuration");

    let authorizer = AuthorizerRegistry::default()
        .from_config(&config.authorizer)
        .map_err(|e| StartupError::Authorizer {
            details: e.to_string(),
        })?;
    tracing::info!(authorizer = %config.authorizer.type_name, "Constructed authorizer");

    let sessions = config.session.store(&config.domain)?;
    let gateway = AuthGateway::new(sessions, authorizer).with_https(config.https);
    let app = host::app(&config, gateway)?;

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| StartupError::Bind {
            addr: config.listen_addr.clone(),
            details: e.to_string(),
        })?;

    tracing::info!(addr = %config.listen_addr, "listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StartupError::Serve {
            details: e.to_string(),
        })?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
