use crate::firehose_logic::state::{AckResult, CommandError, ConsumerCommand, ConsumerRequest, StatusSnapshot};
use lib_firehose::notifiers::Deliveries;
use lib_firehose::stream::{RawFilterSpec, StreamSignal, StreamTransport};
use lib_firehose::StreamConsumer;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep_until, Instant};

/// Owns the stream consumer and serializes everything that touches it.
pub struct Supervisor<T: StreamTransport> {
    consumer: StreamConsumer<T>,
    commands: mpsc::UnboundedReceiver<ConsumerRequest>,
    signals: mpsc::UnboundedReceiver<StreamSignal>,
    status: watch::Sender<StatusSnapshot>,
    reconnect_after_max: Duration,
    deliveries: Deliveries,
}

impl<T: StreamTransport> Supervisor<T> {
    pub fn new(
        consumer: StreamConsumer<T>,
        commands: mpsc::UnboundedReceiver<ConsumerRequest>,
        signals: mpsc::UnboundedReceiver<StreamSignal>,
        status: watch::Sender<StatusSnapshot>,
        reconnect_after_max: Duration,
        deliveries: Deliveries,
    ) -> Self {
        Self {
            consumer,
            commands,
            signals,
            status,
            reconnect_after_max,
            deliveries,
        }
    }

    pub async fn run(mut self, initial: Option<RawFilterSpec>, mut shutdown: broadcast::Receiver<()>) {
        if let Err(e) = self.consumer.connect(initial.as_ref()).await {
            log::error!("Initial filters rejected: {}. Waiting for new filters.", e);
        }
        self.publish_status();

        let mut states = self.consumer.subscribe_state();
        let mut forced_reconnect: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("Supervisor shutting down...");
                    break;
                }
                Some(request) = self.commands.recv() => {
                    log::info!("Received command for consumer: {:?}", request.command);
                    let ack = self.handle(request.command).await;
                    if ack.is_ok() {
                        forced_reconnect = None;
                    }
                    self.publish_status();
                    let _ = request.responder.send(ack);
                }
                Some(signal) = self.signals.recv() => {
                    if let StreamSignal::MaxReconnects { .. } = signal {
                        log::warn!(
                            "Transport gave up. Forcing a reconnect in {}s.",
                            self.reconnect_after_max.as_secs()
                        );
                        forced_reconnect = Some(Instant::now() + self.reconnect_after_max);
                    }
                }
                Ok(()) = states.changed() => {
                    self.publish_status();
                }
                _ = wait_until(forced_reconnect) => {
                    forced_reconnect = None;
                    self.consumer.restart().await;
                    self.publish_status();
                }
            }
        }

        self.consumer.disconnect().await;
        self.publish_status();

        log::info!("Waiting for {} in-flight deliveries.", self.deliveries.in_flight());
        self.deliveries.drain().await;
    }

    async fn handle(&mut self, command: ConsumerCommand) -> AckResult {
        match command {
            ConsumerCommand::UpdateFilters(raw) => self
                .consumer
                .reconnect(Some(&raw))
                .await
                .map_err(|e| CommandError::InvalidFilter(e.to_string())),
            ConsumerCommand::Reconnect => {
                self.consumer.restart().await;
                Ok(())
            }
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(StatusSnapshot {
            state: self.consumer.state(),
            filters: self.consumer.current_filters().clone(),
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
