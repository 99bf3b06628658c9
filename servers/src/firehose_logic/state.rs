use lib_firehose::core::ConnectionState;
use lib_firehose::stream::{FilterSpec, RawFilterSpec};
use std::fmt;
use tokio::sync::{mpsc, oneshot, watch};

/// Why a command was not carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The submitted filters failed validation; nothing changed.
    InvalidFilter(String),
    /// The supervisor is gone or did not answer.
    Unavailable(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::InvalidFilter(msg) => write!(f, "Invalid filter: {}", msg),
            CommandError::Unavailable(msg) => write!(f, "{}", msg),
        }
    }
}

// Result type for acknowledgements
pub type AckResult = Result<(), CommandError>;

#[derive(Debug)]
pub enum ConsumerCommand {
    /// Reconnect with new filters.
    UpdateFilters(RawFilterSpec),
    /// Reconnect with the current filters.
    Reconnect,
}

// Struct to wrap the command and a one-time channel for the response
pub struct ConsumerRequest {
    pub command: ConsumerCommand,
    pub responder: oneshot::Sender<AckResult>,
}

/// What the control API reports about the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub filters: FilterSpec,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            filters: FilterSpec::default(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    // Channel to send commands to the supervisor
    supervisor_tx: mpsc::UnboundedSender<ConsumerRequest>,
    // Latest status published by the supervisor
    status: watch::Receiver<StatusSnapshot>,
}

impl AppState {
    pub fn new(supervisor_tx: mpsc::UnboundedSender<ConsumerRequest>, status: watch::Receiver<StatusSnapshot>) -> Self {
        Self { supervisor_tx, status }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub async fn update_filters(&self, filters: RawFilterSpec) -> AckResult {
        self.send_command(ConsumerCommand::UpdateFilters(filters)).await
    }

    pub async fn reconnect(&self) -> AckResult {
        self.send_command(ConsumerCommand::Reconnect).await
    }

    async fn send_command(&self, command: ConsumerCommand) -> AckResult {
        let (tx, rx) = oneshot::channel();
        let request = ConsumerRequest { command, responder: tx };

        if self.supervisor_tx.send(request).is_err() {
            return Err(CommandError::Unavailable("Stream supervisor not available.".to_string()));
        }

        // Wait for the response from the supervisor task
        rx.await
            .unwrap_or_else(|_| Err(CommandError::Unavailable("No response from stream supervisor.".to_string())))
    }
}
