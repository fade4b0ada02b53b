use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::ingest::assembler::Assembler;
use crate::ingest::classifier::Classifier;
use crate::ingest::extractor::{Extraction, Extractor, TableFragment};
use crate::ingest::loader::RecordLoader;
use crate::ingest::normalizer::Normalizer;
use crate::oracle::{CallBudget, ClassificationOracle};
use crate::record::NormalizedRecord;
use crate::storage::{InputStore, OutputStore};
use crate::{Error, Result};

/// The run report: the primary observability surface of the pipeline.
/// Timestamps and durations live here and only here; output rows carry no
/// volatile data.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub records_seen: usize,
    pub placeholders_discarded: usize,
    pub unreadable: usize,
    /// Records per assigned kind after extraction, unclassified included.
    pub classified: BTreeMap<String, usize>,
    pub entities_emitted: usize,
    pub fragments_folded: u32,
    pub edges_emitted: usize,
    pub dropped_links: u32,
    pub broken_cycles: u32,
    pub oracle_clusters: usize,
    pub oracle_calls: u32,
    pub oracle_failures: u32,
    pub duration_ms: u64,
}

impl RunSummary {
    #[must_use]
    pub fn total_classified(&self) -> usize {
        self.classified.values().sum()
    }

    #[must_use]
    pub fn unclassified(&self) -> usize {
        self.classified.get("unclassified").copied().unwrap_or(0)
    }

    /// No record silently vanishes: everything seen was either discarded as
    /// a placeholder, unreadable, or classified.
    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.records_seen
            == self.placeholders_discarded + self.unreadable + self.total_classified()
    }
}

/// The five-stage pipeline. Stages run strictly left to right; output is
/// staged and only swapped into place once assembly has completed in full.
pub struct IngestPipeline {
    normalizer: Normalizer,
    oracle: Option<Arc<dyn ClassificationOracle>>,
    call_limit: Option<u32>,
    cancel: CancellationToken,
}

impl IngestPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            normalizer: Normalizer::new(),
            oracle: None,
            call_limit: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_oracle(mut self, oracle: Arc<dyn ClassificationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Caps the number of oracle batches dispatched in one run.
    #[must_use]
    pub fn with_call_limit(mut self, limit: u32) -> Self {
        self.call_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, input: &InputStore, output_path: &Path) -> Result<RunSummary> {
        let start = std::time::Instant::now();
        let mut summary = RunSummary {
            started_at: Some(Utc::now()),
            ..RunSummary::default()
        };

        // Stage 1: load.
        let loaded = RecordLoader::new(input).load().await?;
        summary.records_seen = loaded.seen;
        summary.placeholders_discarded = loaded.discarded;
        summary.unreadable = loaded.unreadable;

        // Stage 2: normalize, fanned out per record.
        let mut tasks: JoinSet<Option<NormalizedRecord>> = JoinSet::new();
        for record in loaded.records {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let normalizer = self.normalizer;
            let ref_type = loaded
                .refs
                .get(&record.identifier)
                .and_then(|r| r.ref_type.clone());
            tasks.spawn(async move { normalizer.normalize(&record, ref_type.as_deref()) });
        }

        let mut normalized = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined? {
                Some(record) => normalized.push(record),
                None => summary.placeholders_discarded += 1,
            }
        }
        normalized.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        // Stage 3: classify. The cluster-outcome map is complete before any
        // extraction begins.
        let budget = Arc::new(CallBudget::new(self.call_limit));
        let classifier = Classifier::new(self.oracle.clone(), budget);
        let classified = classifier.classify_all(&normalized, &self.cancel).await?;
        summary.oracle_clusters = classified.clusters;
        summary.oracle_calls = classified.oracle_calls;
        summary.oracle_failures = classified.oracle_failures;

        // Stage 4: extract, fanned out per record.
        let mut tasks: JoinSet<Extraction> = JoinSet::new();
        for record in normalized {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let kind = classified.kinds[&record.identifier];
            let anchor = loaded
                .refs
                .get(&record.identifier)
                .and_then(|r| r.anchor.clone());
            tasks.spawn(async move { Extractor::extract(&record, kind, anchor.as_deref()) });
        }

        let mut entities = Vec::new();
        let mut fragments: Vec<TableFragment> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined? {
                Extraction::Entity(entity) => {
                    *summary
                        .classified
                        .entry(entity.kind().as_str().to_string())
                        .or_default() += 1;
                    entities.push(entity);
                }
                Extraction::Fragment(fragment) => {
                    *summary
                        .classified
                        .entry(fragment.kind.as_str().to_string())
                        .or_default() += 1;
                    fragments.push(fragment);
                }
            }
        }

        // Stage 5: assemble, then publish atomically.
        let assembly = Assembler::assemble(entities, fragments);
        summary.entities_emitted = assembly.entities.len();
        summary.fragments_folded = assembly.folded_fragments;
        summary.edges_emitted = assembly.edges.len();
        summary.dropped_links = assembly.dropped_links;
        summary.broken_cycles = assembly.broken_cycles;

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let staging_path = staging_path(output_path);
        let store = OutputStore::create(&staging_path).await?;

        for entity in &assembly.entities {
            store.insert_entity(entity).await?;
        }
        for edge in &assembly.edges {
            store.insert_edge(edge).await?;
        }
        for (derived_id, source_id) in &assembly.manifest {
            store.insert_manifest(&derived_id.to_string(), source_id).await?;
        }

        if self.cancel.is_cancelled() {
            store.close().await;
            let _ = tokio::fs::remove_file(&staging_path).await;
            return Err(Error::Cancelled);
        }

        store.close().await;
        tokio::fs::rename(&staging_path, output_path).await?;

        summary.duration_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            records_seen = summary.records_seen,
            placeholders = summary.placeholders_discarded,
            unreadable = summary.unreadable,
            classified = summary.total_classified(),
            unclassified = summary.unclassified(),
            entities = summary.entities_emitted,
            edges = summary.edges_emitted,
            dropped_links = summary.dropped_links,
            oracle_calls = summary.oracle_calls,
            duration_ms = summary.duration_ms,
            "run complete"
        );

        Ok(summary)
    }
}

impl Default for IngestPipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn staging_path(output_path: &Path) -> PathBuf {
    let mut staged = output_path.as_os_str().to_owned();
    staged.push(".staging");
    PathBuf::from(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_is_sibling() {
        let staged = staging_path(Path::new("/tmp/graph.db"));
        assert_eq!(staged, Path::new("/tmp/graph.db.staging"));
    }

    #[test]
    fn test_summary_conservation() {
        let mut summary = RunSummary {
            records_seen: 10,
            placeholders_discarded: 6,
            unreadable: 1,
            ..RunSummary::default()
        };
        summary.classified.insert("settlement".into(), 2);
        summary.classified.insert("unclassified".into(), 1);

        assert!(summary.is_conserved());
        assert_eq!(summary.unclassified(), 1);

        summary.records_seen = 11;
        assert!(!summary.is_conserved());
    }

    #[tokio::test]
    async fn test_cancelled_run_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("world.db");
        let output_path = dir.path().join("graph.db");

        let input = InputStore::create(&input_path).await.unwrap();
        input.insert_record("a", Some("<p>A page.</p>")).await.unwrap();

        let pipeline = IngestPipeline::new();
        pipeline.cancellation_token().cancel();

        let result = pipeline.run(&input, &output_path).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!output_path.exists());
    }

    #[tokio::test]
    async fn test_minimal_run_without_oracle() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("world.db");
        let output_path = dir.path().join("graph.db");

        let input = InputStore::create(&input_path).await.unwrap();
        input.insert_record("a", Some("n/a")).await.unwrap();
        input
            .insert_record(
                "b",
                Some(r#"<span class="hidden-title">Town of Rivergate</span><p>A river town.</p>"#),
            )
            .await
            .unwrap();

        let summary = IngestPipeline::new().run(&input, &output_path).await.unwrap();

        assert!(summary.is_conserved());
        assert_eq!(summary.records_seen, 2);
        assert_eq!(summary.placeholders_discarded, 1);
        assert_eq!(summary.classified["settlement"], 1);
        assert!(output_path.exists());
        assert!(!staging_path(&output_path).exists());
    }
}
