use anyhow::{Context, Result};
use lib_firehose::core::{StreamConsumer, StreamEndpoint, TweetDispatcher};
use lib_firehose::notifiers::Deliveries;
use lib_firehose::retrieve::SubscriptionSource;
use lib_firehose::stream::HttpStreamTransport;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, mpsc, watch};

mod firehose_logic;
use firehose_logic::{config, control, logger, state, supervisor, wiring};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;
    let app_config = config::load_app_config(&config)?;

    let deliveries = Deliveries::new();
    let client = wiring::build_api_client(&app_config.client_app)?;
    let notifier = wiring::build_notifier(&app_config.client_app, client.clone(), deliveries.clone()).await?;
    let limiter = wiring::build_limiter(&app_config.limiter);
    let dispatcher = Arc::new(TweetDispatcher::new(notifier, limiter));

    let transport = HttpStreamTransport::new(app_config.twitter.max_reconnects).context("Failed to build stream transport")?;
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let consumer = StreamConsumer::new(transport, StreamEndpoint::from_config(&app_config.twitter), dispatcher)
        .with_signal_sink(signal_tx);

    let initial = SubscriptionSource::new(client, app_config.client_app.subscriptions_url.clone())
        .initial_filters()
        .await;

    let (shutdown_tx, _) = broadcast::channel(1);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(state::StatusSnapshot::default());
    let app_state = state::AppState::new(cmd_tx, status_rx);

    let supervisor = supervisor::Supervisor::new(
        consumer,
        cmd_rx,
        signal_rx,
        status_tx,
        config.reconnect_after_max(),
        deliveries,
    );
    let supervisor_handle = tokio::spawn(supervisor.run(initial, shutdown_tx.subscribe()));
    let control_handle = tokio::spawn(control::run(config.port(), app_state, shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for components to shut down
    let (supervisor_result, control_result) = tokio::join!(supervisor_handle, control_handle);
    supervisor_result.context("Supervisor task failed")?;
    control_result.context("Control API task failed")??;

    log::info!("Shutdown complete.");
    Ok(())
}

async fn terminate() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        // On non-unix platforms, just wait forever.
        std::future::pending::<()>().await;
    }
}
