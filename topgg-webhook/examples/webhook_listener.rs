use std::env;
use topgg_core::{AppConfig, CoreError, ErrorExt};
use topgg_webhook::WebhookServer;
use tracing::{info, warn};

/// Serves the routes listed in a config file, `topgg.toml` by default, and
/// logs every vote until Ctrl-C.
#[tokio::main]
async fn main() -> Result<(), CoreError> {
    tracing_subscriber::fmt()
        .with_env_filter("topgg_webhook=debug")
        .init();

    let path = env::args().nth(1).unwrap_or_else(|| "topgg.toml".to_string());
    let config = AppConfig::load(&path)?;

    let server = WebhookServer::from_settings(&config.webhook);
    for route in &config.webhook.routes {
        let path = route.path.clone();
        server.register_route(route.path.clone(), route.secret.clone(), move |vote| {
            let path = path.clone();
            async move {
                info!(
                    "{} voted for {} on {} (weekend: {})",
                    vote.voter_id(),
                    vote.receiver_id(),
                    path,
                    vote.is_weekend()
                );
                anyhow::Ok(())
            }
        });
    }
    server.on_error(|error| warn!("{}", error));

    let addr = server.start(config.webhook.port.unwrap_or(5000)).await?;
    info!("Listening for votes on {}", addr);

    tokio::signal::ctrl_c().await.map_err(|e| {
        let error = CoreError::Io(e);
        error.log_error();
        error
    })?;

    server.stop().await
}
