//! # Stream Transport
//!
//! The transport owns the long-lived streaming connection and its
//! reconnect/backoff loop. A consumer opens a session with a [`StreamRequest`]
//! and receives an ordered sequence of [`TransportEvent`]s over one channel:
//! connection confirmations, raw item lines, and the named upstream signals.
//! Cancelling the session's token ends it.
//!
//! [`HttpStreamTransport`] is the production transport. It POSTs an
//! OAuth-signed filter request and splits the chunked response body on
//! newlines.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::configs::OAuthCredentials;

/// Capacity of the per-session event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything needed to open one streaming session.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Absolute URL of the filter endpoint.
    pub url: String,
    /// Form parameters (`follow`, `track`).
    pub params: Vec<(String, String)>,
    /// Static credentials used to sign the request.
    pub credentials: OAuthCredentials,
}

/// Upstream conditions reported by the transport. None of them is fatal to
/// the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    /// HTTP 401.
    Unauthorized,
    /// HTTP 403.
    Forbidden,
    /// HTTP 404.
    NotFound,
    /// HTTP 406.
    NotAcceptable,
    /// HTTP 413: the filter parameters are too long.
    TooLong,
    /// HTTP 416.
    RangeUnacceptable,
    /// HTTP 420/429: the transport is being rate limited.
    EnhanceYourCalm,
    /// The transport is about to retry.
    Reconnect {
        /// 1-based retry number since the last successful connect.
        attempt: u32,
        /// Wait before the retry.
        delay: Duration,
    },
    /// The retry budget is spent; the session has ended.
    MaxReconnects {
        /// The delay the next retry would have used.
        timeout: Duration,
        /// Retries made.
        retries: u32,
    },
    /// Any other failure.
    Error(String),
}

impl StreamSignal {
    /// Signals that need operator attention rather than routine logging.
    pub fn is_severe(&self) -> bool {
        matches!(self, StreamSignal::Error(_) | StreamSignal::MaxReconnects { .. })
    }
}

impl fmt::Display for StreamSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSignal::Unauthorized => write!(f, "Unauthorized: check the stream credentials"),
            StreamSignal::Forbidden => write!(f, "Forbidden: the account may not access this stream"),
            StreamSignal::NotFound => write!(f, "Not found: the stream endpoint does not exist"),
            StreamSignal::NotAcceptable => write!(f, "Not acceptable: invalid filter parameters"),
            StreamSignal::TooLong => write!(f, "Too long: filter parameters exceed the allowed length"),
            StreamSignal::RangeUnacceptable => write!(f, "Range unacceptable"),
            StreamSignal::EnhanceYourCalm => write!(f, "Enhance your calm: connection is rate limited"),
            StreamSignal::Reconnect { attempt, delay } => {
                write!(f, "Reconnecting (attempt {}) in {:?}", attempt, delay)
            }
            StreamSignal::MaxReconnects { timeout, retries } => write!(
                f,
                "Max reconnects reached after {} retries (next timeout {:?})",
                retries, timeout
            ),
            StreamSignal::Error(message) => write!(f, "Stream error: {}", message),
        }
    }
}

/// One event of a streaming session, in transport order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The upstream accepted the request and the body is flowing.
    Connected,
    /// One raw, non-blank line of the body.
    Item(Bytes),
    /// An upstream condition.
    Signal(StreamSignal),
}

/// The consumer's end of an open session.
pub struct TransportSession {
    /// Ordered session events. Closes when the session ends.
    pub events: mpsc::Receiver<TransportEvent>,
    /// Cancelling this stops the session.
    pub stop: CancellationToken,
}

/// Something that can open streaming sessions.
pub trait StreamTransport: Send + Sync + 'static {
    /// Opens a session for `request`. Must be called inside a tokio runtime.
    fn open(&self, request: StreamRequest) -> TransportSession;
}

/// Longest partial line a [`LineSplitter`] buffers before giving up.
pub const MAX_PENDING_LINE: usize = 1024 * 1024;

/// A line grew past the splitter's limit without a newline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Stream line exceeds {limit} bytes ({pending} pending without a newline)")]
pub struct LineTooLong {
    /// Bytes buffered when the limit was hit.
    pub pending: usize,
    /// The configured limit.
    pub limit: usize,
}

/// Splits a chunked body into trimmed, non-blank lines.
#[derive(Debug)]
pub struct LineSplitter {
    buffer: Vec<u8>,
    // Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    limit: usize,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING_LINE)
    }
}

impl LineSplitter {
    /// Creates an empty splitter bounded by [`MAX_PENDING_LINE`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty splitter that buffers at most `limit` bytes of an
    /// unfinished line.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            limit,
        }
    }

    /// Feeds one chunk and returns the lines it completed.
    ///
    /// When the unfinished tail outgrows the limit, everything buffered
    /// (including lines completed by this chunk) is dropped and the splitter
    /// starts over empty.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, LineTooLong> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            let trimmed = self.buffer[start..end].trim_ascii();
            if !trimmed.is_empty() {
                lines.push(Bytes::copy_from_slice(trimmed));
            }
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.limit {
            let pending = self.buffer.len();
            self.buffer = Vec::new();
            self.scanned = 0;
            return Err(LineTooLong { pending, limit: self.limit });
        }
        Ok(lines)
    }

    /// Bytes received after the last newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// What kind of failure preceded a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// TCP/TLS level failure or a dropped body.
    Network,
    /// A non-200 status other than rate limiting.
    Http,
    /// HTTP 420/429.
    RateLimited,
}

const NETWORK_STEP: Duration = Duration::from_millis(250);
const NETWORK_MAX: Duration = Duration::from_secs(16);
const HTTP_START: Duration = Duration::from_secs(5);
const HTTP_MAX: Duration = Duration::from_secs(320);
const RATE_LIMITED_START: Duration = Duration::from_secs(60);
const RATE_LIMITED_MAX: Duration = Duration::from_secs(16 * 60);

/// Reconnect delay bookkeeping. Network failures back off linearly, HTTP
/// failures and rate limiting exponentially.
#[derive(Debug, Default)]
pub struct Backoff {
    failures: u32,
    last: Option<(FailureKind, Duration)>,
}

impl Backoff {
    /// Records a failure and returns the delay before the next attempt.
    pub fn next(&mut self, kind: FailureKind) -> Duration {
        self.failures += 1;
        let delay = match (self.last, kind) {
            (Some((FailureKind::Network, prev)), FailureKind::Network) => (prev + NETWORK_STEP).min(NETWORK_MAX),
            (Some((FailureKind::Http, prev)), FailureKind::Http) => (prev * 2).min(HTTP_MAX),
            (Some((FailureKind::RateLimited, prev)), FailureKind::RateLimited) => {
                (prev * 2).min(RATE_LIMITED_MAX)
            }
            (_, FailureKind::Network) => NETWORK_STEP,
            (_, FailureKind::Http) => HTTP_START,
            (_, FailureKind::RateLimited) => RATE_LIMITED_START,
        };
        self.last = Some((kind, delay));
        delay
    }

    /// The delay [`Backoff::next`] would return, without recording anything.
    pub fn peek(&self, kind: FailureKind) -> Duration {
        let mut probe = Backoff { failures: self.failures, last: self.last };
        probe.next(kind)
    }

    /// Failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Called after a successful connect.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.last = None;
    }
}

/// Maps a non-200 response status to its signal and retry class.
pub fn signal_for_status(status: u16, body: &str) -> (StreamSignal, FailureKind) {
    let signal = match status {
        401 => StreamSignal::Unauthorized,
        403 => StreamSignal::Forbidden,
        404 => StreamSignal::NotFound,
        406 => StreamSignal::NotAcceptable,
        413 => StreamSignal::TooLong,
        416 => StreamSignal::RangeUnacceptable,
        420 | 429 => return (StreamSignal::EnhanceYourCalm, FailureKind::RateLimited),
        _ => StreamSignal::Error(format!("HTTP {}: {}", status, body.trim())),
    };
    (signal, FailureKind::Http)
}

#[cfg(feature = "http")]
pub use http_transport::{HttpStreamTransport, TransportError};

#[cfg(feature = "http")]
mod http_transport {
    use futures_util::StreamExt;

    use super::*;
    use crate::retrieve::oauth::OAuthSigner;

    /// Upstream sends keep-alive newlines well inside this window.
    const STALL_TIMEOUT: Duration = Duration::from_secs(90);
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Upper bound on reading the body of a rejected request.
    const ERROR_BODY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Failures building the transport.
    #[derive(Debug, Error)]
    pub enum TransportError {
        /// The HTTP client could not be created.
        #[error("Failed to build stream client: {0}")]
        Client(String),
    }

    /// Streams over a long-lived HTTP response.
    pub struct HttpStreamTransport {
        client: reqwest::Client,
        max_reconnects: u32,
    }

    impl HttpStreamTransport {
        /// Creates a transport that gives up after `max_reconnects` retries.
        pub fn new(max_reconnects: u32) -> Result<Self, TransportError> {
            let client = reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .map_err(|e| TransportError::Client(e.to_string()))?;
            Ok(Self { client, max_reconnects })
        }
    }

    impl StreamTransport for HttpStreamTransport {
        fn open(&self, request: StreamRequest) -> TransportSession {
            let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let stop = CancellationToken::new();

            tokio::spawn(run_session(
                self.client.clone(),
                request,
                self.max_reconnects,
                tx,
                stop.clone(),
            ));

            TransportSession { events, stop }
        }
    }

    enum Attempt {
        Stopped,
        Failed(FailureKind),
    }

    async fn emit(tx: &mpsc::Sender<TransportEvent>, stop: &CancellationToken, event: TransportEvent) -> bool {
        tokio::select! {
            _ = stop.cancelled() => false,
            sent = tx.send(event) => sent.is_ok(),
        }
    }

    async fn run_session(
        client: reqwest::Client,
        request: StreamRequest,
        max_reconnects: u32,
        tx: mpsc::Sender<TransportEvent>,
        stop: CancellationToken,
    ) {
        let signer = OAuthSigner::new(request.credentials.clone());
        let mut backoff = Backoff::default();

        loop {
            let kind = match attempt(&client, &signer, &request, &tx, &stop, &mut backoff).await {
                Attempt::Stopped => break,
                Attempt::Failed(kind) => kind,
            };

            if backoff.failures() >= max_reconnects {
                let signal = StreamSignal::MaxReconnects {
                    timeout: backoff.peek(kind),
                    retries: backoff.failures(),
                };
                emit(&tx, &stop, TransportEvent::Signal(signal)).await;
                break;
            }

            let delay = backoff.next(kind);
            let signal = StreamSignal::Reconnect { attempt: backoff.failures(), delay };
            if !emit(&tx, &stop, TransportEvent::Signal(signal)).await {
                break;
            }

            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        log::debug!("Stream session for {} ended", request.url);
    }

    async fn attempt(
        client: &reqwest::Client,
        signer: &OAuthSigner,
        request: &StreamRequest,
        tx: &mpsc::Sender<TransportEvent>,
        stop: &CancellationToken,
        backoff: &mut Backoff,
    ) -> Attempt {
        let header = match signer.sign("POST", &request.url, &request.params) {
            Ok(header) => header,
            Err(e) => {
                emit(tx, stop, TransportEvent::Signal(StreamSignal::Error(e.to_string()))).await;
                return Attempt::Stopped;
            }
        };

        log::info!("Connecting to stream {}", request.url);
        let send = client
            .post(&request.url)
            .header(reqwest::header::AUTHORIZATION, header)
            .form(&request.params)
            .send();

        let response = tokio::select! {
            _ = stop.cancelled() => return Attempt::Stopped,
            response = send => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Stream connection failed: {}", e);
                return Attempt::Failed(FailureKind::Network);
            }
        };

        let status = response.status().as_u16();
        if status != 200 {
            let body = tokio::select! {
                _ = stop.cancelled() => return Attempt::Stopped,
                body = tokio::time::timeout(ERROR_BODY_TIMEOUT, response.text()) => {
                    body.ok().and_then(Result::ok).unwrap_or_default()
                }
            };
            let (signal, kind) = signal_for_status(status, &body);
            if !emit(tx, stop, TransportEvent::Signal(signal)).await {
                return Attempt::Stopped;
            }
            return Attempt::Failed(kind);
        }

        backoff.reset();
        if !emit(tx, stop, TransportEvent::Connected).await {
            return Attempt::Stopped;
        }

        let mut body = response.bytes_stream();
        let mut splitter = LineSplitter::new();
        loop {
            let next = tokio::select! {
                _ = stop.cancelled() => return Attempt::Stopped,
                next = tokio::time::timeout(STALL_TIMEOUT, body.next()) => next,
            };

            match next {
                Ok(Some(Ok(chunk))) => match splitter.push(&chunk) {
                    Ok(lines) => {
                        for line in lines {
                            if !emit(tx, stop, TransportEvent::Item(line)).await {
                                return Attempt::Stopped;
                            }
                        }
                    }
                    Err(e) => {
                        if !emit(tx, stop, TransportEvent::Signal(StreamSignal::Error(e.to_string()))).await {
                            return Attempt::Stopped;
                        }
                        return Attempt::Failed(FailureKind::Network);
                    }
                },
                Ok(Some(Err(e))) => {
                    log::warn!("Stream body failed: {}", e);
                    return Attempt::Failed(FailureKind::Network);
                }
                Ok(None) => {
                    log::warn!("Stream closed by remote host.");
                    return Attempt::Failed(FailureKind::Network);
                }
                Err(_) => {
                    log::warn!("Stream stalled for {}s. Reconnecting...", STALL_TIMEOUT.as_secs());
                    return Attempt::Failed(FailureKind::Network);
                }
            }
        }
    }
}
