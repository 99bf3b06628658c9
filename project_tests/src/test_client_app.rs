//! # Client App Integration Tests
//!
//! Exercises the HTTP side of the pipeline against a local mock server:
//! `HttpNotifier` publish/delete/notice calls and the `SubscriptionSource`
//! initial-filter fetch.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

mod support;

use std::time::Duration;

use lib_firehose::configs::{ClientAppConfig, OAuthCredentials};
use lib_firehose::notifiers::{Deliveries, HttpNotifier, Notifier};
use lib_firehose::retrieve::{ApiClient, OAuthSigner, SubscriptionSource};
use lib_firehose::stream::{normalize, DeletedTweet, StreamItem, Tweet};
use serde_json::json;

use support::MockServer;

fn client(oauth: Option<OAuthCredentials>) -> ApiClient {
    ApiClient::new(Duration::from_secs(5), 0, oauth.map(OAuthSigner::new)).unwrap()
}

fn credentials() -> OAuthCredentials {
    OAuthCredentials {
        consumer_key: "app-key".into(),
        consumer_secret: "app-secret".into(),
        access_key: "token".into(),
        access_secret: "token-secret".into(),
    }
}

#[tokio::test]
async fn test_publish_and_delete_requests() {
    let server = MockServer::start(vec![(200, "{}".into()), (200, String::new())]);
    let config = ClientAppConfig {
        publish_url: server.url("/publish"),
        delete_url: server.url("/delete"),
        ..ClientAppConfig::default()
    };
    let deliveries = Deliveries::new();
    let notifier = HttpNotifier::new(client(Some(credentials())), &config, deliveries.clone());

    let item = StreamItem::new(json!({"id_str": "42", "text": "hi", "user": {"id_str": "7"}}));
    notifier
        .publish_tweet(&item, &Tweet { id: "42".into(), text: "hi".into(), user_id: "7".into() })
        .unwrap();
    deliveries.drain().await;

    let deletion = StreamItem::new(json!({"delete": {"status": {"id": "9", "user_id": "3"}}}));
    notifier
        .delete_tweet(&deletion, &DeletedTweet { id: "9".into(), user_id: "3".into() })
        .unwrap();
    deliveries.drain().await;

    let requests = server.finish();
    assert_eq!(requests.len(), 2);

    let publish = &requests[0];
    assert_eq!(publish.method, "POST");
    assert_eq!(publish.target, "/publish");
    assert_eq!(publish.body, "id=42&text=hi&twitter_user_id=7");
    assert!(publish.header("authorization").unwrap().starts_with("OAuth "));

    let delete = &requests[1];
    assert_eq!(delete.method, "DELETE");
    assert_eq!(delete.target, "/delete?id=9&twitter_user_id=3");
    assert!(delete.body.is_empty());
}

#[tokio::test]
async fn test_failed_publish_is_only_logged() {
    let server = MockServer::start(vec![(500, "{\"error\":\"boom\"}".into())]);
    let config = ClientAppConfig {
        publish_url: server.url("/publish"),
        ..ClientAppConfig::default()
    };
    let deliveries = Deliveries::new();
    let notifier = HttpNotifier::new(client(None), &config, deliveries.clone());

    let item = StreamItem::new(json!({"id_str": "1"}));
    let result = notifier.publish_tweet(&item, &Tweet { id: "1".into(), text: "t".into(), user_id: "2".into() });
    assert!(result.is_ok());
    deliveries.drain().await;

    let requests = server.finish();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].header("authorization").is_none());
}

#[tokio::test]
async fn test_notices_post_to_configured_urls() {
    let server = MockServer::start(vec![(200, String::new()), (200, String::new())]);
    let config = ClientAppConfig {
        missed_tweets_url: Some(server.url("/missed")),
        rate_limited_url: Some(server.url("/limited")),
        ..ClientAppConfig::default()
    };
    let deliveries = Deliveries::new();
    let notifier = HttpNotifier::new(client(None), &config, deliveries.clone());

    let item = StreamItem::new(json!({"limit": {"track": 12}}));
    notifier.notify_missed_tweets(&item, 12).unwrap();
    deliveries.drain().await;
    notifier
        .notify_rate_limiting_initiated(&item, &["user:7".to_string(), "track:rust".to_string()])
        .unwrap();
    deliveries.drain().await;

    let requests = server.finish();
    assert_eq!(requests[0].target, "/missed");
    assert_eq!(requests[0].body, "count=12");
    assert_eq!(requests[1].target, "/limited");
    assert_eq!(requests[1].body, "limited_keys=user%3A7%2Ctrack%3Arust");
}

#[tokio::test]
async fn test_initial_filters_from_subscriptions() {
    let body = json!({"follow": [1, "2"], "track": ["rust"]}).to_string();
    let server = MockServer::start(vec![(200, body), (503, "down".into()), (200, "not json".into())]);
    let source = SubscriptionSource::new(client(None), server.url("/subscriptions"));

    let filters = source.initial_filters().await.expect("filters on 200");
    let normalized = normalize(Some(&filters)).unwrap();
    assert_eq!(normalized.follow, vec![1, 2]);
    assert_eq!(normalized.track, vec!["rust"]);

    assert!(source.initial_filters().await.is_none());
    assert!(source.initial_filters().await.is_none());

    let requests = server.finish();
    assert!(requests.iter().all(|r| r.method == "GET" && r.target == "/subscriptions"));
}

#[tokio::test]
async fn test_signed_client_does_not_replay_requests() {
    let server = MockServer::start(vec![(503, "busy".into())]);
    let signed = ApiClient::new(Duration::from_secs(5), 2, Some(OAuthSigner::new(credentials()))).unwrap();

    let response = signed.get(&server.url("/subscriptions")).await.unwrap();
    assert_eq!(response.status, 503);
    assert!(!response.success);

    let requests = server.finish();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].header("authorization").unwrap().contains("oauth_nonce="));
}

#[tokio::test]
async fn test_unsigned_client_retries_transient_failures() {
    let server = MockServer::start(vec![(503, "busy".into()), (200, "ok".into())]);
    let unsigned = ApiClient::new(Duration::from_secs(5), 1, None).unwrap();

    let response = unsigned.get(&server.url("/subscriptions")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "ok");
    assert_eq!(server.finish().len(), 2);
}
