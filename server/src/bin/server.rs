use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use murmur_core::{MurmurConfig, SpeechService};
use murmur_server::MurmurServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = MurmurConfig::from_env()?;
    info!(
        audio_dir = ?config.audio_dir,
        models_dir = ?config.models_dir,
        audio_backend = %config.audio_backend.describe(),
        "Loaded configuration"
    );

    // Missing voice models or an unusable audio directory stop startup here.
    let service = match SpeechService::from_config(&config).await {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    MurmurServer::new(config, service)
        .serve(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
