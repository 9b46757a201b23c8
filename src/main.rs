use anyhow::{Context, Result};
use pvsurplus::config::Config;
use pvsurplus::devices::build_devices;
use pvsurplus::logging::init_logging;
use pvsurplus::web::{self, AppState};
use pvsurplus::{SharedState, SurplusDriver};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Bad configuration is fatal before anything touches the hardware
    let config = Config::load().context("Failed to load configuration")?;
    config
        .validate()
        .context("Invalid configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!(
        "pvsurplus {} starting up in {} mode",
        pvsurplus::APP_VERSION,
        config.initial_mode
    );

    let devices = build_devices(&config).context("Failed to set up devices")?;
    let shared = SharedState::new(config.initial_mode);
    let mut driver = SurplusDriver::new(config.clone(), devices, shared.clone())
        .context("Failed to create control loop")?;
    let shutdown = driver.shutdown_handle();

    let driver_task = tokio::spawn(async move { driver.run().await });

    let (web_stop_tx, web_stop_rx) = oneshot::channel::<()>();
    let state = AppState {
        shared,
        config: Arc::new(config.clone()),
    };
    let host = config.web.host.clone();
    let port = config.web.port;
    let web_task = tokio::spawn(async move {
        let stop = async {
            let _ = web_stop_rx.await;
        };
        if let Err(e) = web::serve(state, &host, port, stop).await {
            error!("Web server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Interrupt received, shutting down");

    let _ = shutdown.send(());
    let _ = web_stop_tx.send(());

    let outcome = driver_task.await.context("Control loop task panicked")?;
    let _ = web_task.await;
    match outcome {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Control loop failed: {}", e);
            Err(anyhow::anyhow!("Control loop error: {}", e))
        }
    }
}
