//! # Stream Consumer
//!
//! Owns the single live streaming session and its lifecycle:
//! `Disconnected → Connecting → Connected → (Connected ⇄ Reconnecting) → Disconnected`.
//!
//! A session is one transport connection plus the task that drains its
//! events. Items are handed to the [`TweetDispatcher`] in transport order;
//! signals are logged and forwarded to an optional supervisor channel. At most
//! one session exists at a time: `connect`, `reconnect` and `disconnect` all
//! take `&mut self` and always tear the old session down, and wait for its
//! task, before anything new starts.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::configs::{OAuthCredentials, TwitterConfig};
use crate::core::dispatcher::TweetDispatcher;
use crate::stream::filter::{normalize, FilterError, FilterSpec, RawFilterSpec};
use crate::stream::transport::{StreamRequest, StreamSignal, StreamTransport, TransportEvent};

/// Lifecycle states of the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session, or the last one ended.
    Disconnected,
    /// A session was opened; waiting for the upstream to accept it.
    Connecting,
    /// The upstream accepted the session and items are flowing.
    Connected,
    /// The previous session was replaced; waiting for the new one.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase name used in logs and the status endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct StreamEndpoint {
    /// Absolute URL of the filter endpoint.
    pub url: String,
    /// Static stream credentials.
    pub credentials: OAuthCredentials,
}

impl StreamEndpoint {
    /// Builds the endpoint from the `twitter` config section.
    pub fn from_config(config: &TwitterConfig) -> Self {
        Self {
            url: config.filter_url(),
            credentials: config.credentials(),
        }
    }
}

struct Session {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// The stream connection manager.
pub struct StreamConsumer<T: StreamTransport> {
    transport: T,
    endpoint: StreamEndpoint,
    dispatcher: Arc<TweetDispatcher>,
    state: Arc<watch::Sender<ConnectionState>>,
    filters: Arc<FilterSpec>,
    session: Option<Session>,
    signals: Option<mpsc::UnboundedSender<StreamSignal>>,
}

impl<T: StreamTransport> StreamConsumer<T> {
    /// Creates a disconnected consumer.
    pub fn new(transport: T, endpoint: StreamEndpoint, dispatcher: Arc<TweetDispatcher>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            endpoint,
            dispatcher,
            state: Arc::new(state),
            filters: Arc::new(FilterSpec::default()),
            session: None,
            signals: None,
        }
    }

    /// Forwards every transport signal to `sink`, in order.
    pub fn with_signal_sink(mut self, sink: mpsc::UnboundedSender<StreamSignal>) -> Self {
        self.signals = Some(sink);
        self
    }

    /// # Connect
    ///
    /// Normalizes `raw` and opens a session with it. A live session is
    /// replaced as by [`reconnect`](Self::reconnect), so the state never falls
    /// back to `Connecting`. An invalid filter is returned before anything
    /// changes.
    pub async fn connect(&mut self, raw: Option<&RawFilterSpec>) -> Result<(), FilterError> {
        let filters = normalize(raw)?;
        let live = self.session.as_ref().is_some_and(|s| !s.task.is_finished());
        if live {
            self.replace(filters).await;
        } else {
            self.stop_session().await;
            self.start(filters, ConnectionState::Connecting);
        }
        Ok(())
    }

    /// # Reconnect
    ///
    /// Replaces the live session with one using `raw`. The new filters are
    /// validated first; when they are invalid the current session keeps
    /// running untouched. Once this returns, nothing from the old session
    /// reaches the dispatcher.
    pub async fn reconnect(&mut self, raw: Option<&RawFilterSpec>) -> Result<(), FilterError> {
        let filters = normalize(raw)?;
        self.replace(filters).await;
        Ok(())
    }

    /// Reconnects with the filters currently in use.
    pub async fn restart(&mut self) {
        let filters = FilterSpec::clone(&self.filters);
        self.replace(filters).await;
    }

    /// Stops the live session, if any. Terminal until the next `connect`.
    pub async fn disconnect(&mut self) {
        self.stop_session().await;
        self.state.send_replace(ConnectionState::Disconnected);
        log::info!("Stream consumer disconnected");
    }

    /// Waits for the live session to end on its own (the transport closed).
    pub async fn join_session(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = (&mut session.task).await {
                log::error!("Stream session task failed: {}", e);
            }
            self.session = None;
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver observing every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The normalized filters of the current (or last) session.
    pub fn current_filters(&self) -> &FilterSpec {
        &self.filters
    }

    async fn replace(&mut self, filters: FilterSpec) {
        log::info!("Reconnecting stream");
        self.state.send_replace(ConnectionState::Reconnecting);
        self.stop_session().await;
        self.start(filters, ConnectionState::Reconnecting);
    }

    fn start(&mut self, filters: FilterSpec, initial: ConnectionState) {
        let filters = Arc::new(filters);
        let request = StreamRequest {
            url: self.endpoint.url.clone(),
            params: filters.to_params(),
            credentials: self.endpoint.credentials.clone(),
        };

        if filters.is_empty() {
            log::warn!("Opening stream session without follow ids or track terms");
        } else {
            log::info!(
                "Opening stream session: {} follow ids, {} track terms",
                filters.follow.len(),
                filters.track.len()
            );
        }
        self.state.send_replace(initial);
        let transport_session = self.transport.open(request);

        let drain = SessionDrain {
            stop: transport_session.stop.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            filters: Arc::clone(&filters),
            state: Arc::clone(&self.state),
            signals: self.signals.clone(),
        };
        let task = tokio::spawn(drain.run(transport_session.events));

        self.filters = filters;
        self.session = Some(Session {
            stop: transport_session.stop,
            task,
        });
    }

    async fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop.cancel();
            if let Err(e) = session.task.await {
                log::error!("Stream session task failed: {}", e);
            }
        }
    }
}

struct SessionDrain {
    stop: CancellationToken,
    dispatcher: Arc<TweetDispatcher>,
    filters: Arc<FilterSpec>,
    state: Arc<watch::Sender<ConnectionState>>,
    signals: Option<mpsc::UnboundedSender<StreamSignal>>,
}

impl SessionDrain {
    async fn run(self, mut events: mpsc::Receiver<TransportEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return,
                event = events.recv() => event,
            };

            match event {
                Some(TransportEvent::Connected) => {
                    log::info!("Stream connected");
                    self.state.send_replace(ConnectionState::Connected);
                }
                Some(TransportEvent::Item(raw)) => {
                    self.dispatcher.process(&raw, &self.filters);
                }
                Some(TransportEvent::Signal(signal)) => {
                    if signal.is_severe() {
                        log::error!("{}", signal);
                    } else {
                        log::debug!("{}", signal);
                    }
                    if let Some(sink) = &self.signals {
                        let _ = sink.send(signal);
                    }
                }
                None => break,
            }
        }

        log::warn!("Stream session ended by transport");
        self.state.send_replace(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::UnlimitedLimiter;
    use crate::notifiers::{Notifier, NotifierError};
    use crate::stream::item::{DeletedTweet, StreamItem, Tweet};
    use crate::stream::transport::TransportSession;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct PublishLog {
        ids: Mutex<Vec<String>>,
    }

    impl Notifier for PublishLog {
        fn notify_missed_tweets(&self, _: &StreamItem, _: u64) -> Result<(), NotifierError> {
            Ok(())
        }
        fn notify_rate_limiting_initiated(&self, _: &StreamItem, _: &[String]) -> Result<(), NotifierError> {
            Ok(())
        }
        fn delete_tweet(&self, _: &StreamItem, _: &DeletedTweet) -> Result<(), NotifierError> {
            Ok(())
        }
        fn publish_tweet(&self, _: &StreamItem, tweet: &Tweet) -> Result<(), NotifierError> {
            self.ids.lock().unwrap().push(tweet.id.clone());
            Ok(())
        }
    }

    struct Opened {
        request: StreamRequest,
        tx: mpsc::Sender<TransportEvent>,
        stop: CancellationToken,
    }

    #[derive(Clone, Default)]
    struct ScriptedTransport {
        opened: Arc<Mutex<Vec<Opened>>>,
    }

    impl ScriptedTransport {
        fn count(&self) -> usize {
            self.opened.lock().unwrap().len()
        }

        fn sender(&self, index: usize) -> mpsc::Sender<TransportEvent> {
            self.opened.lock().unwrap()[index].tx.clone()
        }

        fn stop(&self, index: usize) -> CancellationToken {
            self.opened.lock().unwrap()[index].stop.clone()
        }

        fn request(&self, index: usize) -> StreamRequest {
            self.opened.lock().unwrap()[index].request.clone()
        }

        /// Drops the transport side of a session, ending it.
        fn close(&self, index: usize) {
            let mut opened = self.opened.lock().unwrap();
            let (tx, _) = mpsc::channel(1);
            opened[index].tx = tx;
        }
    }

    impl StreamTransport for ScriptedTransport {
        fn open(&self, request: StreamRequest) -> TransportSession {
            let (tx, events) = mpsc::channel(64);
            let stop = CancellationToken::new();
            self.opened.lock().unwrap().push(Opened { request, tx, stop: stop.clone() });
            TransportSession { events, stop }
        }
    }

    fn tweet(id: &str) -> TransportEvent {
        let line = json!({"id_str": id, "text": "t", "user": {"id_str": "1"}}).to_string();
        TransportEvent::Item(Bytes::from(line))
    }

    fn consumer(transport: ScriptedTransport) -> (StreamConsumer<ScriptedTransport>, Arc<PublishLog>) {
        let log = Arc::new(PublishLog::default());
        let dispatcher = Arc::new(TweetDispatcher::new(log.clone(), Arc::new(UnlimitedLimiter)));
        let endpoint = StreamEndpoint {
            url: "https://stream.example.com/1.1/statuses/filter.json".into(),
            credentials: OAuthCredentials::default(),
        };
        (StreamConsumer::new(transport, endpoint, dispatcher), log)
    }

    fn raw(follow: serde_json::Value, track: &[&str]) -> RawFilterSpec {
        RawFilterSpec {
            follow: Some(follow.as_array().cloned().unwrap_or_default()),
            track: Some(track.iter().map(|t| t.to_string()).collect()),
        }
    }

    async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, wanted: ConnectionState) {
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == wanted))
            .await
            .expect("state change timed out")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_items_are_dispatched_in_order() {
        let transport = ScriptedTransport::default();
        let (mut consumer, log) = consumer(transport.clone());
        let mut states = consumer.subscribe_state();

        consumer.connect(Some(&raw(json!([1, "2"]), &["rust"]))).await.unwrap();
        assert_eq!(consumer.state(), ConnectionState::Connecting);

        let request = transport.request(0);
        assert_eq!(
            request.params,
            vec![("follow".to_string(), "1,2".to_string()), ("track".to_string(), "rust".to_string())]
        );

        let tx = transport.sender(0);
        tx.send(TransportEvent::Connected).await.unwrap();
        wait_for_state(&mut states, ConnectionState::Connected).await;

        for id in ["a", "b", "c"] {
            tx.send(tweet(id)).await.unwrap();
        }
        tx.send(TransportEvent::Item(Bytes::from_static(b"garbage"))).await.unwrap();
        tx.send(tweet("d")).await.unwrap();
        drop(tx);
        transport.close(0);

        consumer.join_session().await;
        assert_eq!(*log.ids.lock().unwrap(), vec!["a", "b", "c", "d"]);
        assert_eq!(consumer.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_filter_on_connect_opens_nothing() {
        let transport = ScriptedTransport::default();
        let (mut consumer, _) = consumer(transport.clone());

        let err = consumer.connect(Some(&raw(json!(["abc"]), &[]))).await.unwrap_err();
        assert!(matches!(err, FilterError::InvalidFollowId { .. }));
        assert_eq!(transport.count(), 0);
        assert_eq!(consumer.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_reconnect_leaves_session_running() {
        let transport = ScriptedTransport::default();
        let (mut consumer, _) = consumer(transport.clone());
        consumer.connect(Some(&raw(json!([5]), &[]))).await.unwrap();

        assert!(consumer.reconnect(Some(&raw(json!([1, "x"]), &[]))).await.is_err());
        assert_eq!(transport.count(), 1);
        assert!(!transport.stop(0).is_cancelled());
        assert_eq!(consumer.current_filters().follow, vec![5]);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() {
        let transport = ScriptedTransport::default();
        let (mut consumer, log) = consumer(transport.clone());
        consumer.connect(None).await.unwrap();
        assert!(transport.request(0).params.is_empty());

        consumer.reconnect(Some(&raw(json!([9]), &[]))).await.unwrap();
        assert_eq!(transport.count(), 2);
        assert!(transport.stop(0).is_cancelled());
        assert_eq!(consumer.state(), ConnectionState::Reconnecting);
        assert_eq!(transport.request(1).params, vec![("follow".to_string(), "9".to_string())]);

        // The old session's drain has finished; its items go nowhere.
        assert!(transport.sender(0).send(tweet("stale")).await.is_err());

        let tx = transport.sender(1);
        tx.send(tweet("fresh")).await.unwrap();
        drop(tx);
        transport.close(1);
        consumer.join_session().await;

        assert_eq!(*log.ids.lock().unwrap(), vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_connect_twice_keeps_one_session() {
        let transport = ScriptedTransport::default();
        let (mut consumer, _) = consumer(transport.clone());
        consumer.connect(None).await.unwrap();
        assert_eq!(consumer.state(), ConnectionState::Connecting);

        let mut states = consumer.subscribe_state();
        consumer.connect(None).await.unwrap();
        assert_eq!(consumer.state(), ConnectionState::Reconnecting);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Reconnecting);

        assert_eq!(transport.count(), 2);
        assert!(transport.stop(0).is_cancelled());
        assert!(!transport.stop(1).is_cancelled());
    }

    #[tokio::test]
    async fn test_restart_reuses_current_filters() {
        let transport = ScriptedTransport::default();
        let (mut consumer, _) = consumer(transport.clone());
        consumer.connect(Some(&raw(json!([3]), &["x"]))).await.unwrap();
        consumer.restart().await;

        assert_eq!(transport.request(1).params, transport.request(0).params);
    }

    #[tokio::test]
    async fn test_signals_are_forwarded_in_order() {
        let transport = ScriptedTransport::default();
        let (consumer, _) = consumer(transport.clone());
        let (sink, mut signals) = mpsc::unbounded_channel();
        let mut consumer = consumer.with_signal_sink(sink);
        consumer.connect(None).await.unwrap();

        let tx = transport.sender(0);
        let sent = vec![
            StreamSignal::Unauthorized,
            StreamSignal::Reconnect { attempt: 1, delay: Duration::from_secs(5) },
            StreamSignal::MaxReconnects { timeout: Duration::from_secs(10), retries: 1 },
        ];
        for signal in &sent {
            tx.send(TransportEvent::Signal(signal.clone())).await.unwrap();
        }
        drop(tx);
        transport.close(0);
        consumer.join_session().await;

        let mut received = Vec::new();
        while let Ok(signal) = signals.try_recv() {
            received.push(signal);
        }
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_disconnect_stops_session() {
        let transport = ScriptedTransport::default();
        let (mut consumer, _) = consumer(transport.clone());
        consumer.connect(None).await.unwrap();
        consumer.disconnect().await;

        assert!(transport.stop(0).is_cancelled());
        assert_eq!(consumer.state(), ConnectionState::Disconnected);

        // Idempotent.
        consumer.disconnect().await;
    }
}
