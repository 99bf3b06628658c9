//! # Stream Items and Classification
//!
//! A [`StreamItem`] is one decoded message from the stream. [`classify`] maps it
//! to exactly one [`Category`]; the checks run in a fixed precedence order and the
//! first top-level key that matches decides the shape. An item whose shape is
//! recognised but incomplete is [`Category::Ignorable`].

use serde::Serialize;
use serde_json::Value;

/// One decoded message from the stream transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StreamItem(Value);

impl StreamItem {
    /// Wraps an already-decoded JSON value.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Decodes one line of the stream.
    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw).map(Self)
    }

    /// Field lookup on the top-level object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The decoded payload.
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl std::fmt::Display for StreamItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A publishable tweet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tweet {
    /// Tweet id (`id_str`).
    pub id: String,
    /// Tweet text.
    pub text: String,
    /// Author id (`user.id_str`).
    pub user_id: String,
}

/// A deletion request for a previously published tweet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedTweet {
    /// Id of the tweet to remove.
    pub id: String,
    /// Id of its author.
    pub user_id: String,
}

/// The five mutually exclusive kinds of stream item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    /// `missed` tweets matching the filter were dropped upstream.
    LimitNotice {
        /// Number of undelivered tweets reported by the notice.
        missed: u64,
    },
    /// A tweet must be removed downstream.
    Deletion(DeletedTweet),
    /// A tweet eligible for rate limiting and publication.
    Publishable(Tweet),
    /// The stream is about to be closed by the server.
    DisconnectNotice {
        /// Upstream disconnect code, when present.
        code: Option<u64>,
        /// Upstream reason, when present.
        reason: Option<String>,
    },
    /// Anything else.
    Ignorable,
}

impl Category {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Category::LimitNotice { .. } => "limit_notice",
            Category::Deletion(_) => "deletion",
            Category::Publishable(_) => "publishable",
            Category::DisconnectNotice { .. } => "disconnect_notice",
            Category::Ignorable => "ignorable",
        }
    }
}

/// Classifies `item`. Pure and total: never panics, never logs.
pub fn classify(item: &StreamItem) -> Category {
    if let Some(limit) = item.get("limit") {
        return classify_limit(limit);
    }
    if let Some(delete) = item.get("delete") {
        return classify_delete(delete);
    }
    if item.get("id_str").is_some() {
        return classify_tweet(item.as_value());
    }
    if let Some(disconnect) = item.get("disconnect") {
        return classify_disconnect(disconnect);
    }
    Category::Ignorable
}

fn classify_limit(limit: &Value) -> Category {
    match limit.get("track").and_then(as_count) {
        Some(missed) => Category::LimitNotice { missed },
        None => Category::Ignorable,
    }
}

fn classify_delete(delete: &Value) -> Category {
    let Some(status) = delete.get("status") else {
        return Category::Ignorable;
    };
    let id = id_field(status, "id_str").or_else(|| id_field(status, "id"));
    let user_id = id_field(status, "user_id_str").or_else(|| id_field(status, "user_id"));
    match (id, user_id) {
        (Some(id), Some(user_id)) => Category::Deletion(DeletedTweet { id, user_id }),
        _ => Category::Ignorable,
    }
}

fn classify_tweet(tweet: &Value) -> Category {
    let id = tweet.get("id_str").and_then(Value::as_str);
    let text = tweet.get("text").and_then(Value::as_str);
    let user_id = tweet
        .get("user")
        .and_then(|user| user.get("id_str"))
        .and_then(Value::as_str);
    match (id, text, user_id) {
        (Some(id), Some(text), Some(user_id)) => Category::Publishable(Tweet {
            id: id.to_string(),
            text: text.to_string(),
            user_id: user_id.to_string(),
        }),
        _ => Category::Ignorable,
    }
}

fn classify_disconnect(disconnect: &Value) -> Category {
    if !disconnect.is_object() {
        return Category::Ignorable;
    }
    Category::DisconnectNotice {
        code: disconnect.get("code").and_then(Value::as_u64),
        reason: disconnect
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Ids arrive either as JSON strings or as bare numbers.
fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => n.as_u64().map(|n| n.to_string()),
        _ => None,
    }
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
