use std::collections::HashMap;

use crate::record::RawRecord;
use crate::storage::{InputStore, RecordRef};
use crate::Result;

/// Literal values that mark a row as an empty placeholder. The comparison is
/// case-insensitive after trimming.
pub const PLACEHOLDER_LITERALS: [&str; 4] = ["n/a", "none", "null", "loading..."];

/// True for rows that carry no content worth normalizing. Anything else,
/// however short, is kept.
#[must_use]
pub fn is_placeholder(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return true;
    }
    PLACEHOLDER_LITERALS
        .iter()
        .any(|literal| trimmed.eq_ignore_ascii_case(literal))
}

#[derive(Debug, Default)]
pub struct LoadOutput {
    pub records: Vec<RawRecord>,
    /// Auxiliary metadata keyed by record id.
    pub refs: HashMap<String, RecordRef>,
    pub seen: usize,
    pub discarded: usize,
    pub unreadable: usize,
}

/// Stage one: stream the raw store, dropping placeholders. Failing to open
/// the store is fatal; a single unreadable row is logged and skipped.
pub struct RecordLoader<'a> {
    store: &'a InputStore,
}

impl<'a> RecordLoader<'a> {
    #[must_use]
    pub fn new(store: &'a InputStore) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<LoadOutput> {
        let mut output = LoadOutput::default();

        for (identifier, content) in self.store.all_records().await? {
            output.seen += 1;

            let Some(content) = content else {
                tracing::warn!(record = %identifier, "unreadable record skipped");
                output.unreadable += 1;
                continue;
            };

            if is_placeholder(&content) {
                output.discarded += 1;
                continue;
            }

            output.records.push(RawRecord::new(identifier, content));
        }

        for record_ref in self.store.all_refs().await? {
            output.refs.insert(record_ref.record_id.clone(), record_ref);
        }

        tracing::debug!(
            seen = output.seen,
            kept = output.records.len(),
            discarded = output.discarded,
            unreadable = output.unreadable,
            "load complete"
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_literals() {
        assert!(is_placeholder(""));
        assert!(is_placeholder("   "));
        assert!(is_placeholder("n/a"));
        assert!(is_placeholder("N/A"));
        assert!(is_placeholder(" none "));
        assert!(is_placeholder("null"));
        assert!(is_placeholder("Loading..."));
    }

    #[test]
    fn test_short_content_is_kept() {
        assert!(!is_placeholder("{}"));
        assert!(!is_placeholder("<p></p>"));
        assert!(!is_placeholder("x"));
    }

    #[tokio::test]
    async fn test_load_filters_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = InputStore::create(&dir.path().join("world.db")).await.unwrap();

        store.insert_record("a", Some("n/a")).await.unwrap();
        store.insert_record("b", Some("<p>A town.</p>")).await.unwrap();
        store.insert_record("c", None).await.unwrap();
        store.insert_record("d", Some("")).await.unwrap();

        let output = RecordLoader::new(&store).load().await.unwrap();

        assert_eq!(output.seen, 4);
        assert_eq!(output.discarded, 2);
        assert_eq!(output.unreadable, 1);
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].identifier, "b");
    }
}
