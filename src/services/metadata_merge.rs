//! Safe content metadata writes under interleaved task updates.
//!
//! Handlers snapshot the metadata when they begin, mutate a copy, and apply
//! only their diff onto the freshest stored snapshot before committing. This
//! is last-writer-wins scoped to the changed keys, a pragmatic reduction of
//! lost-update risk rather than a guarantee for writers of the same key.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::repository::{ContentRepository, Result};

/// Compute changed and removed keys between metadata snapshots.
///
/// Returns the keys whose values changed or were newly added, and the keys
/// removed by local mutations.
pub fn compute_metadata_patch(
    base: &Map<String, Value>,
    updated: &Map<String, Value>,
) -> (Map<String, Value>, HashSet<String>) {
    let mut updates = Map::new();
    for (key, value) in updated {
        if base.get(key) != Some(value) {
            updates.insert(key.clone(), value.clone());
        }
    }

    let removed = base
        .keys()
        .filter(|key| !updated.contains_key(*key))
        .cloned()
        .collect();

    (updates, removed)
}

/// Merge local metadata changes into the latest persisted snapshot.
///
/// Loads the current metadata for `content_id`, removes keys the local
/// mutation deleted, applies the changed keys, and optionally forces the
/// latest stored values for `preserve_latest_keys`.
pub fn refresh_merge_metadata(
    contents: &ContentRepository,
    content_id: i64,
    base: &Map<String, Value>,
    updated: &Map<String, Value>,
    preserve_latest_keys: &[&str],
) -> Result<Map<String, Value>> {
    let latest = contents
        .get_metadata(content_id)?
        .unwrap_or_else(|| updated.clone());

    let (updates, removed) = compute_metadata_patch(base, updated);

    let mut merged = latest.clone();
    for key in &removed {
        merged.remove(key);
    }
    for (key, value) in updates {
        merged.insert(key, value);
    }

    for key in preserve_latest_keys {
        match latest.get(*key) {
            Some(value) => {
                merged.insert((*key).to_string(), value.clone());
            }
            None => {
                merged.remove(*key);
            }
        }
    }

    Ok(merged)
}

/// Merge and persist in one step.
pub fn commit_metadata(
    contents: &ContentRepository,
    content_id: i64,
    base: &Map<String, Value>,
    updated: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    let merged = refresh_merge_metadata(contents, content_id, base, updated, &[])?;
    contents.set_metadata(content_id, &merged)?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewContent;
    use serde_json::json;
    use tempfile::TempDir;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn patch_detects_changes_additions_and_removals() {
        let base = map(json!({"a": 1, "b": 2, "c": 3}));
        let updated = map(json!({"a": 1, "b": 20, "d": 4}));

        let (updates, removed) = compute_metadata_patch(&base, &updated);

        assert_eq!(updates, map(json!({"b": 20, "d": 4})));
        assert_eq!(removed, HashSet::from(["c".to_string()]));
    }

    #[test]
    fn merge_preserves_unrelated_concurrent_writes() {
        let dir = TempDir::new().unwrap();
        let contents = ContentRepository::new(&dir.path().join("test.db")).unwrap();
        let (id, _) = contents
            .insert_if_new(&NewContent::new("https://a.example/m"))
            .unwrap();

        // Handler snapshots base, another writer lands `transcript` meanwhile.
        let base = map(json!({"title": "old"}));
        contents
            .set_metadata(id, &map(json!({"title": "old", "transcript": "words"})))
            .unwrap();

        let updated = map(json!({"title": "new", "summary": {"overview": "x"}}));
        let merged = refresh_merge_metadata(&contents, id, &base, &updated, &[]).unwrap();

        assert_eq!(merged["title"], json!("new"));
        assert_eq!(merged["summary"]["overview"], json!("x"));
        // The concurrent transcript write survives.
        assert_eq!(merged["transcript"], json!("words"));
    }

    #[test]
    fn merge_applies_removals_against_latest() {
        let dir = TempDir::new().unwrap();
        let contents = ContentRepository::new(&dir.path().join("test.db")).unwrap();
        let (id, _) = contents
            .insert_if_new(&NewContent::new("https://a.example/r"))
            .unwrap();
        contents
            .set_metadata(id, &map(json!({"stale": true, "keep": 1})))
            .unwrap();

        let base = map(json!({"stale": true, "keep": 1}));
        let updated = map(json!({"keep": 1}));
        let merged = refresh_merge_metadata(&contents, id, &base, &updated, &[]).unwrap();

        assert!(!merged.contains_key("stale"));
        assert_eq!(merged["keep"], json!(1));
    }

    #[test]
    fn preserve_latest_keys_win_over_local_changes() {
        let dir = TempDir::new().unwrap();
        let contents = ContentRepository::new(&dir.path().join("test.db")).unwrap();
        let (id, _) = contents
            .insert_if_new(&NewContent::new("https://a.example/p"))
            .unwrap();
        contents
            .set_metadata(id, &map(json!({"status_note": "from-db"})))
            .unwrap();

        let base = map(json!({}));
        let updated = map(json!({"status_note": "local", "other": 1}));
        let merged =
            refresh_merge_metadata(&contents, id, &base, &updated, &["status_note"]).unwrap();

        assert_eq!(merged["status_note"], json!("from-db"));
        assert_eq!(merged["other"], json!(1));
    }

    /// Patch law: for any latest ⊇ base, the merge contains every key/value
    /// changed between base and updated and no key removed between them.
    #[test]
    fn merge_patch_law_holds() {
        let dir = TempDir::new().unwrap();
        let contents = ContentRepository::new(&dir.path().join("test.db")).unwrap();
        let (id, _) = contents
            .insert_if_new(&NewContent::new("https://a.example/law"))
            .unwrap();

        let base = map(json!({"x": 1, "y": 2, "gone": 3}));
        // latest is a superset of base with extra concurrent keys.
        let latest = map(json!({"x": 1, "y": 2, "gone": 3, "extra": true}));
        contents.set_metadata(id, &latest).unwrap();

        let updated = map(json!({"x": 10, "y": 2, "fresh": "v"}));
        let merged = refresh_merge_metadata(&contents, id, &base, &updated, &[]).unwrap();

        let (expected_updates, removed) = compute_metadata_patch(&base, &updated);
        for (key, value) in &expected_updates {
            assert_eq!(merged.get(key), Some(value));
        }
        for key in &removed {
            assert!(!merged.contains_key(key));
        }
        assert_eq!(merged["extra"], json!(true));
    }
}
