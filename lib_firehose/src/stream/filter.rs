//! # Filter Normalizer
//!
//! Validates and truncates subscription filters before they are sent upstream.
//! The upstream stream endpoint rejects requests that follow more than
//! [`FOLLOW_LIMIT`] users or track more than [`TRACK_LIMIT`] keywords, so the
//! kept prefix is what gets subscribed and the rest is reported.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum number of user ids a single stream connection may follow.
pub const FOLLOW_LIMIT: usize = 5000;
/// Maximum number of keywords a single stream connection may track.
pub const TRACK_LIMIT: usize = 400;

/// Errors raised while normalizing caller-supplied filters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// A `follow` entry could not be read as a numeric user id.
    #[error("Invalid follow id at position {index}: {value}")]
    InvalidFollowId {
        /// Position of the offending entry in the caller's list.
        index: usize,
        /// The entry as it was received.
        value: String,
    },
}

/// Un-normalized filter input, as received from the subscriptions endpoint or
/// the control API. Either list may be missing or `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFilterSpec {
    /// User ids, as JSON integers or numeric strings.
    #[serde(default)]
    pub follow: Option<Vec<Value>>,
    /// Keywords to track.
    #[serde(default)]
    pub track: Option<Vec<String>>,
}

/// A normalized subscription. Both fields are always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Numeric user ids to follow, in caller order.
    pub follow: Vec<u64>,
    /// Keywords to track, in caller order.
    pub track: Vec<String>,
}

/// Which list of the filter got cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    /// The `follow` list.
    Follow,
    /// The `track` list.
    Track,
}

impl FilterField {
    fn as_str(self) -> &'static str {
        match self {
            FilterField::Follow => "follow",
            FilterField::Track => "track",
        }
    }
}

/// A diagnostic produced when a list exceeded its upstream limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    /// The list that was truncated.
    pub field: FilterField,
    /// How many entries the caller supplied.
    pub original: usize,
    /// How many were kept.
    pub limit: usize,
}

impl std::fmt::Display for Truncation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Subscriptions include {} {} entries, but are limited to {}",
            self.original,
            self.field.as_str(),
            self.limit
        )
    }
}

impl FilterSpec {
    /// True when neither list has entries.
    pub fn is_empty(&self) -> bool {
        self.follow.is_empty() && self.track.is_empty()
    }

    /// Wire representation for the upstream request. Empty lists are omitted;
    /// the transport treats a missing key and an empty list the same way.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(2);
        if !self.follow.is_empty() {
            let ids: Vec<String> = self.follow.iter().map(u64::to_string).collect();
            params.push(("follow".to_string(), ids.join(",")));
        }
        if !self.track.is_empty() {
            params.push(("track".to_string(), self.track.join(",")));
        }
        params
    }
}

/// Normalizes `raw`, logging a warning for every list that had to be truncated.
pub fn normalize(raw: Option<&RawFilterSpec>) -> Result<FilterSpec, FilterError> {
    let (spec, truncations) = normalize_with_report(raw)?;
    for truncation in &truncations {
        log::warn!("{}", truncation);
    }
    Ok(spec)
}

/// Same as [`normalize`], but hands the truncation diagnostics back to the
/// caller instead of logging them.
///
/// Lists are truncated before `follow` entries are coerced, so an invalid id
/// beyond [`FOLLOW_LIMIT`] is dropped rather than reported.
pub fn normalize_with_report(
    raw: Option<&RawFilterSpec>,
) -> Result<(FilterSpec, Vec<Truncation>), FilterError> {
    let Some(raw) = raw else {
        return Ok((FilterSpec::default(), Vec::new()));
    };

    let mut truncations = Vec::new();

    let follow_raw = raw.follow.as_deref().unwrap_or_default();
    let follow_kept = keep_prefix(follow_raw, FilterField::Follow, FOLLOW_LIMIT, &mut truncations);
    let follow = follow_kept
        .iter()
        .enumerate()
        .map(|(index, value)| coerce_follow_id(index, value))
        .collect::<Result<Vec<u64>, FilterError>>()?;

    let track_raw = raw.track.as_deref().unwrap_or_default();
    let track = keep_prefix(track_raw, FilterField::Track, TRACK_LIMIT, &mut truncations).to_vec();

    Ok((FilterSpec { follow, track }, truncations))
}

fn keep_prefix<'a, T>(
    items: &'a [T],
    field: FilterField,
    limit: usize,
    truncations: &mut Vec<Truncation>,
) -> &'a [T] {
    if items.len() > limit {
        truncations.push(Truncation {
            field,
            original: items.len(),
            limit,
        });
        &items[..limit]
    } else {
        items
    }
}

fn coerce_follow_id(index: usize, value: &Value) -> Result<u64, FilterError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| FilterError::InvalidFollowId {
        index,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(follow: Option<Vec<Value>>, track: Option<Vec<&str>>) -> RawFilterSpec {
        RawFilterSpec {
            follow,
            track: track.map(|t| t.into_iter().map(String::from).collect()),
        }
    }

    #[test]
    fn test_absent_and_empty_inputs_are_equivalent() {
        let from_none = normalize(None).unwrap();
        let from_empty = normalize(Some(&RawFilterSpec::default())).unwrap();
        assert_eq!(from_none, FilterSpec::default());
        assert_eq!(from_empty, FilterSpec::default());
        assert!(from_none.to_params().is_empty());
        assert!(from_none.is_empty() && from_empty.is_empty());

        let follow_only = normalize(Some(&raw(Some(vec![json!(1)]), None))).unwrap();
        assert!(!follow_only.is_empty());
    }

    #[test]
    fn test_follow_over_limit_keeps_first_entries() {
        let follow: Vec<Value> = (1..=5001u64).map(|n| json!(n)).collect();
        let input = raw(Some(follow), Some(vec!["a", "b"]));

        let (spec, truncations) = normalize_with_report(Some(&input)).unwrap();

        assert_eq!(spec.follow.len(), FOLLOW_LIMIT);
        assert_eq!(spec.follow.first(), Some(&1));
        assert_eq!(spec.follow.last(), Some(&5000));
        assert_eq!(spec.track, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            truncations,
            vec![Truncation { field: FilterField::Follow, original: 5001, limit: 5000 }]
        );
        let message = truncations[0].to_string();
        assert!(message.contains("5001") && message.contains("5000"));
    }

    #[test]
    fn test_track_over_limit_is_truncated_in_order() {
        let terms: Vec<String> = (0..450).map(|n| format!("term{n}")).collect();
        let input = RawFilterSpec { follow: None, track: Some(terms.clone()) };

        let (spec, truncations) = normalize_with_report(Some(&input)).unwrap();

        assert_eq!(spec.track, terms[..TRACK_LIMIT].to_vec());
        assert!(spec.follow.is_empty());
        assert_eq!(truncations.len(), 1);
        assert_eq!(truncations[0].field, FilterField::Track);
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let input = raw(Some(vec![json!("12"), json!(34), json!(" 56 ")]), None);
        let spec = normalize(Some(&input)).unwrap();
        assert_eq!(spec.follow, vec![12, 34, 56]);
    }

    #[test]
    fn test_non_numeric_follow_is_an_error() {
        let input = raw(Some(vec![json!(1), json!("bob")]), None);
        let err = normalize(Some(&input)).unwrap_err();
        assert_eq!(
            err,
            FilterError::InvalidFollowId { index: 1, value: "\"bob\"".to_string() }
        );

        let negative = raw(Some(vec![json!(-4)]), None);
        assert!(normalize(Some(&negative)).is_err());
    }

    #[test]
    fn test_params_omit_empty_lists() {
        let spec = FilterSpec { follow: vec![1, 2], track: Vec::new() };
        assert_eq!(spec.to_params(), vec![("follow".to_string(), "1,2".to_string())]);

        let spec = FilterSpec { follow: Vec::new(), track: vec!["rust".into(), "tokio".into()] };
        assert_eq!(spec.to_params(), vec![("track".to_string(), "rust,tokio".to_string())]);
    }

    #[test]
    fn test_raw_spec_deserializes_with_missing_fields() {
        let parsed: RawFilterSpec = serde_json::from_str(r#"{"track":["x"]}"#).unwrap();
        assert_eq!(parsed.follow, None);
        let spec = normalize(Some(&parsed)).unwrap();
        assert_eq!(spec.track, vec!["x".to_string()]);

        let parsed: RawFilterSpec = serde_json::from_str(r#"{"follow":null}"#).unwrap();
        assert_eq!(normalize(Some(&parsed)).unwrap(), FilterSpec::default());
    }
}
