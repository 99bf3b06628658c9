//! # Stream Pipeline Integration Tests
//!
//! Runs the HTTP stream transport against a local server speaking chunked
//! HTTP/1.1, and checks that lines reach the notifier through the consumer
//! and dispatcher.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

mod support;

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use lib_firehose::configs::OAuthCredentials;
use lib_firehose::core::StreamEndpoint;
use lib_firehose::limiter::UnlimitedLimiter;
use lib_firehose::stream::{
    DeletedTweet, HttpStreamTransport, StreamRequest, TransportEvent, Tweet,
};
use lib_firehose::{
    ConnectionState, Notifier, NotifierError, RawFilterSpec, StreamConsumer, StreamItem, StreamSignal,
    StreamTransport, TweetDispatcher,
};
use serde_json::json;

use support::{read_request, CapturedRequest, MockServer};

const FILTER_PATH: &str = "/1.1/statuses/filter.json";

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), NotifierError> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl Notifier for RecordingNotifier {
    fn notify_missed_tweets(&self, _: &StreamItem, count: u64) -> Result<(), NotifierError> {
        self.record(format!("missed:{}", count))
    }

    fn notify_rate_limiting_initiated(&self, _: &StreamItem, keys: &[String]) -> Result<(), NotifierError> {
        self.record(format!("limited:{}", keys.join(",")))
    }

    fn delete_tweet(&self, _: &StreamItem, deleted: &DeletedTweet) -> Result<(), NotifierError> {
        self.record(format!("delete:{}", deleted.id))
    }

    fn publish_tweet(&self, _: &StreamItem, tweet: &Tweet) -> Result<(), NotifierError> {
        self.record(format!("publish:{}:{}", tweet.id, tweet.text))
    }
}

fn credentials() -> OAuthCredentials {
    OAuthCredentials {
        consumer_key: "ck".into(),
        consumer_secret: "cs".into(),
        access_key: "ak".into(),
        access_secret: "as".into(),
    }
}

const STREAM_OK: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n";
const STREAM_UNAVAILABLE: &str =
    "HTTP/1.1 503 Service Unavailable\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n";

/// Accepts one connection, answers with `head` and `chunks` as chunked body
/// parts, then holds the connection open (body unfinished) until the client
/// goes away.
fn start_stream_server(
    head: &'static str,
    chunks: Vec<&'static str>,
) -> (String, std_mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    let (request_tx, request_rx) = std_mpsc::channel();

    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        if let Some(request) = read_request(&mut stream) {
            let _ = request_tx.send(request);
        }

        if stream.write_all(head.as_bytes()).is_err() {
            return;
        }
        for chunk in chunks {
            let framed = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
            if stream.write_all(framed.as_bytes()).is_err() {
                return;
            }
            let _ = stream.flush();
            thread::sleep(Duration::from_millis(20));
        }

        let mut buf = [0u8; 64];
        let _ = stream.read(&mut buf);
    });

    (base_url, request_rx)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn next_event(events: &mut tokio::sync::mpsc::Receiver<TransportEvent>) -> Option<TransportEvent> {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("transport event timed out")
}

#[tokio::test]
async fn test_stream_lines_reach_the_notifier() {
    let (base_url, requests) = start_stream_server(STREAM_OK, vec![
        "{\"id_str\":\"1\",\"text\":\"hello\",\"user\":{\"id_str\":\"7\"}}\r\n{\"id_str\":\"2\",\"te",
        "xt\":\"world\",\"user\":{\"id_str\":\"8\"}}\r\n\r\n",
        "{\"delete\":{\"status\":{\"id_str\":\"1\",\"user_id_str\":\"7\"}}}\r\n{\"limit\":{\"track\":4}}\r\n",
    ]);

    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = Arc::new(TweetDispatcher::new(notifier.clone(), Arc::new(UnlimitedLimiter)));
    let endpoint = StreamEndpoint {
        url: format!("{}{}", base_url, FILTER_PATH),
        credentials: credentials(),
    };
    let transport = HttpStreamTransport::new(3).unwrap();
    let mut consumer = StreamConsumer::new(transport, endpoint, dispatcher);

    let filters: RawFilterSpec = serde_json::from_value(json!({"follow": [1, "2"], "track": ["rust"]})).unwrap();
    consumer.connect(Some(&filters)).await.unwrap();

    let probe = notifier.clone();
    eventually(move || probe.calls().len() == 4).await;
    assert_eq!(
        notifier.calls(),
        vec!["publish:1:hello", "publish:2:world", "delete:1", "missed:4"]
    );
    assert_eq!(consumer.state(), ConnectionState::Connected);

    let request = requests.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(request.method, "POST");
    assert_eq!(request.target, FILTER_PATH);
    assert_eq!(request.body, "follow=1%2C2&track=rust");
    assert!(request.header("authorization").unwrap().starts_with("OAuth "));

    consumer.disconnect().await;
    assert_eq!(consumer.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_unauthorized_with_no_retries_ends_session() {
    let server = MockServer::start(vec![(401, "Unauthorized".into())]);
    let transport = HttpStreamTransport::new(0).unwrap();

    let mut session = transport.open(StreamRequest {
        url: server.url(FILTER_PATH),
        params: vec![("follow".to_string(), "1".to_string())],
        credentials: credentials(),
    });

    assert_eq!(
        next_event(&mut session.events).await,
        Some(TransportEvent::Signal(StreamSignal::Unauthorized))
    );
    assert_eq!(
        next_event(&mut session.events).await,
        Some(TransportEvent::Signal(StreamSignal::MaxReconnects {
            timeout: Duration::from_secs(5),
            retries: 0,
        }))
    );
    assert_eq!(next_event(&mut session.events).await, None);

    let requests = server.finish();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, "follow=1");
}

#[tokio::test]
async fn test_rate_limited_schedules_long_retry_until_stopped() {
    let server = MockServer::start(vec![(420, String::new())]);
    let transport = HttpStreamTransport::new(5).unwrap();

    let mut session = transport.open(StreamRequest {
        url: server.url(FILTER_PATH),
        params: vec![("track".to_string(), "rust".to_string())],
        credentials: credentials(),
    });

    assert_eq!(
        next_event(&mut session.events).await,
        Some(TransportEvent::Signal(StreamSignal::EnhanceYourCalm))
    );
    assert_eq!(
        next_event(&mut session.events).await,
        Some(TransportEvent::Signal(StreamSignal::Reconnect {
            attempt: 1,
            delay: Duration::from_secs(60),
        }))
    );

    session.stop.cancel();
    assert_eq!(next_event(&mut session.events).await, None);
    assert_eq!(server.finish().len(), 1);
}

#[tokio::test]
async fn test_stop_interrupts_unfinished_error_body() {
    let (base_url, requests) = start_stream_server(STREAM_UNAVAILABLE, vec!["busy\n"]);
    let transport = HttpStreamTransport::new(3).unwrap();

    let mut session = transport.open(StreamRequest {
        url: format!("{}{}", base_url, FILTER_PATH),
        params: vec![("follow".to_string(), "1".to_string())],
        credentials: credentials(),
    });

    // The server has answered and is now withholding the end of the body.
    tokio::task::spawn_blocking(move || requests.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    session.stop.cancel();
    let closed = tokio::time::timeout(Duration::from_secs(2), session.events.recv()).await;
    assert_eq!(closed.expect("session did not stop"), None);
}

#[tokio::test]
async fn test_unfinished_error_body_still_signals_and_retries() {
    let (base_url, _requests) = start_stream_server(STREAM_UNAVAILABLE, vec!["busy\n"]);
    let transport = HttpStreamTransport::new(3).unwrap();

    let mut session = transport.open(StreamRequest {
        url: format!("{}{}", base_url, FILTER_PATH),
        params: vec![("follow".to_string(), "1".to_string())],
        credentials: credentials(),
    });

    let first = tokio::time::timeout(Duration::from_secs(10), session.events.recv())
        .await
        .expect("no signal for the rejected request");
    match first {
        Some(TransportEvent::Signal(StreamSignal::Error(message))) => {
            assert!(message.starts_with("HTTP 503"), "unexpected message: {message}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(
        next_event(&mut session.events).await,
        Some(TransportEvent::Signal(StreamSignal::Reconnect {
            attempt: 1,
            delay: Duration::from_secs(5),
        }))
    );

    session.stop.cancel();
    assert_eq!(next_event(&mut session.events).await, None);
}
