use std::sync::Arc;
use topgg_autoposter::Autoposter;
use topgg_client::TopggClient;
use topgg_core::{AppConfig, CoreError, ErrorExt, Stats};

/// Posts a fixed server count using `TOPGG_TOKEN`, until Ctrl-C.
#[tokio::main]
async fn main() -> Result<(), CoreError> {
    tracing_subscriber::fmt()
        .with_env_filter("topgg_autoposter=debug,topgg_client=debug")
        .init();

    let config = AppConfig::from_env()?;
    let client = Arc::new(TopggClient::from_app_config(&config)?);

    let autoposter = Autoposter::new(client)
        .with_interval(config.autopost.interval())?
        .with_stats(|| async { anyhow::Ok(Stats::new(42)) })
        .on_success(|stats| tracing::info!("Posted {} servers", stats.server_count))
        .on_error(|error| tracing::error!("Autopost failed: {}", error));

    autoposter.start().await?;

    tokio::signal::ctrl_c().await.map_err(|e| {
        let error = CoreError::Io(e);
        error.log_error();
        error
    })?;

    autoposter.stop().await;
    Ok(())
}
