//! Helpers for transitioning metadata from flat blobs to structured state.
//!
//! Migration strategy: dual-write. Top-level keys are preserved alongside
//! `domain`/`processing` namespaces so legacy readers keep working, while new
//! code reads through the flat view produced by [`merge_runtime_metadata`].

use serde_json::{Map, Value};

const DOMAIN_KEY: &str = "domain";
const PROCESSING_KEY: &str = "processing";

/// Runtime/operational keys that live under `processing`.
const PROCESSING_FIELD_NAMES: &[&str] = &[
    "subscribe_to_feed",
    "feed_subscription",
    "detected_feed",
    "all_detected_feeds",
    "submitted_by_user_id",
    "submitted_via",
    "platform_hint",
    "content_to_summarize",
    "processing_errors",
    "tweet_enrichment",
    "tweet_only",
];

fn is_processing_field(key: &str) -> bool {
    PROCESSING_FIELD_NAMES.contains(&key)
}

fn namespace(metadata: &Map<String, Value>, key: &str) -> Map<String, Value> {
    match metadata.get(key) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// Return metadata with explicit `domain` and `processing` namespaces.
///
/// Backward-compatible: existing top-level fields remain untouched, while
/// nested namespace mirrors are materialized for new code paths.
pub fn normalize_metadata_shape(raw: &Map<String, Value>) -> Map<String, Value> {
    let mut metadata = raw.clone();
    let mut domain = namespace(&metadata, DOMAIN_KEY);
    let mut processing = namespace(&metadata, PROCESSING_KEY);

    for (key, value) in raw {
        if key == DOMAIN_KEY || key == PROCESSING_KEY {
            continue;
        }
        let target = if is_processing_field(key) {
            &mut processing
        } else {
            &mut domain
        };
        target.entry(key.clone()).or_insert_with(|| value.clone());
    }

    metadata.insert(DOMAIN_KEY.to_string(), Value::Object(domain));
    metadata.insert(PROCESSING_KEY.to_string(), Value::Object(processing));
    metadata
}

/// Return a flat compatibility view: `domain` values overlaid by
/// `processing` values.
pub fn merge_runtime_metadata(metadata: &Map<String, Value>) -> Map<String, Value> {
    let normalized = normalize_metadata_shape(metadata);
    let mut merged = namespace(&normalized, DOMAIN_KEY);
    for (key, value) in namespace(&normalized, PROCESSING_KEY) {
        merged.insert(key, value);
    }
    merged
}

/// Set processing fields in metadata while preserving compatibility.
///
/// New values land both in the `processing` namespace and at top level for
/// legacy readers.
pub fn update_processing_state(
    metadata: &Map<String, Value>,
    fields: impl IntoIterator<Item = (String, Value)>,
) -> Map<String, Value> {
    let mut normalized = normalize_metadata_shape(metadata);
    let mut processing = namespace(&normalized, PROCESSING_KEY);

    for (key, value) in fields {
        processing.insert(key.clone(), value.clone());
        normalized.insert(key, value);
    }
    normalized.insert(PROCESSING_KEY.to_string(), Value::Object(processing));
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn normalize_splits_keys_into_namespaces() {
        let raw = map(json!({
            "content": "body text",
            "subscribe_to_feed": true,
        }));
        let normalized = normalize_metadata_shape(&raw);

        assert_eq!(normalized["domain"]["content"], json!("body text"));
        assert_eq!(normalized["processing"]["subscribe_to_feed"], json!(true));
        // Legacy top-level keys are untouched.
        assert_eq!(normalized["content"], json!("body text"));
        assert_eq!(normalized["subscribe_to_feed"], json!(true));
    }

    #[test]
    fn normalize_keeps_existing_namespace_values() {
        let raw = map(json!({
            "processing": {"platform_hint": "youtube"},
            "platform_hint": "spotify",
        }));
        let normalized = normalize_metadata_shape(&raw);
        // Namespace value wins over the stale top-level duplicate.
        assert_eq!(normalized["processing"]["platform_hint"], json!("youtube"));
    }

    #[test]
    fn flat_view_overlays_processing_on_domain() {
        let raw = map(json!({
            "domain": {"title": "A", "content": "x"},
            "processing": {"content_to_summarize": "x", "title": "B"},
        }));
        let merged = merge_runtime_metadata(&raw);
        assert_eq!(merged["title"], json!("B"));
        assert_eq!(merged["content"], json!("x"));
        assert_eq!(merged["content_to_summarize"], json!("x"));
    }

    #[test]
    fn update_processing_state_dual_writes() {
        let raw = map(json!({"content": "body"}));
        let updated = update_processing_state(
            &raw,
            [("tweet_only".to_string(), json!(true))],
        );
        assert_eq!(updated["tweet_only"], json!(true));
        assert_eq!(updated["processing"]["tweet_only"], json!(true));
        assert_eq!(updated["domain"]["content"], json!("body"));
    }
}
