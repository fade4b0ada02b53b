use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::entity::EntityKind;
use crate::oracle::{CallBudget, ClassificationOracle, ClassifyRequest};
use crate::record::{NormalizedRecord, StatBlock};
use crate::{Error, Result};

static STAT_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b({})\b\s*:?\s*\S", StatBlock::HEADERS.join("|")))
        .expect("hard-coded pattern")
});

static ROLL_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\d+(?:-\d+)?[.:]?\s+\S").expect("hard-coded pattern"));

static PAREN_CATEGORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([A-Za-z][A-Za-z ]*)\)").expect("hard-coded pattern"));

const WEATHER_WORDS: [&str; 5] = ["weather", "wind", "storm", "rain", "fog"];
const RUMOR_WORDS: [&str; 4] = ["rumor", "rumour", "hook", "whisper"];

/// How many characters of a cluster representative are sent to the oracle.
const REPRESENTATIVE_LIMIT: usize = 2000;

/// True when the text carries the fixed stat-table header set (at least
/// three distinct headers with values).
#[must_use]
pub fn has_stat_block(text: &str) -> bool {
    let mut seen = std::collections::HashSet::new();
    for caps in STAT_ENTRY.captures_iter(text) {
        seen.insert(caps[1].to_string());
    }
    seen.len() >= 3
}

/// True when at least two lines look like roll-range rows.
#[must_use]
pub fn has_roll_rows(text: &str) -> bool {
    ROLL_ROW.find_iter(text).count() >= 2
}

/// The parenthesized category word of an editable title, e.g. "Blacksmith"
/// from "Grimm Forge (Blacksmith) in Rivergate".
#[must_use]
pub fn service_subtype(record: &NormalizedRecord) -> Option<String> {
    if !record.title_editable {
        return None;
    }
    let title = record.title.as_deref()?;
    PAREN_CATEGORY
        .captures(title)
        .map(|caps| caps[1].trim().to_string())
}

fn contains_any(haystack: &str, words: &[&str]) -> bool {
    words.iter().any(|w| haystack.contains(w))
}

/// Steps one and two of the rule chain: the normalizer's hint, then the
/// plain-text heuristics. Pure; identical input always yields the same
/// answer. Returns None for records that must go to the cluster path.
#[must_use]
pub fn rule_classify(record: &NormalizedRecord) -> Option<EntityKind> {
    if let Some(hint) = record.kind_hint {
        return Some(hint);
    }

    if service_subtype(record).is_some() {
        return Some(EntityKind::Service);
    }

    if has_stat_block(&record.plain_text) {
        // A personal title alongside a stat table is a named character; a
        // bare stat table is a creature template.
        return Some(if record.title.is_some() {
            EntityKind::Character
        } else {
            EntityKind::Creature
        });
    }

    if has_roll_rows(&record.plain_text) {
        let lowered = format!(
            "{} {}",
            record.title.as_deref().unwrap_or_default().to_ascii_lowercase(),
            record.plain_text.to_ascii_lowercase()
        );
        if contains_any(&lowered, &WEATHER_WORDS) {
            return Some(EntityKind::WeatherTable);
        }
        if contains_any(&lowered, &RUMOR_WORDS) {
            return Some(EntityKind::RumorTable);
        }
    }

    None
}

/// Cheap structural fingerprint grouping unresolved records into clusters.
/// One oracle dispatch decides a whole cluster, which bounds external calls
/// by the number of distinct shapes, not the number of ambiguous records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub title_prefix: Option<String>,
    pub stat_block: bool,
    pub roll_rows: bool,
    pub structured: bool,
}

impl Fingerprint {
    #[must_use]
    pub fn of(record: &NormalizedRecord) -> Self {
        let title_prefix = record
            .title
            .as_deref()
            .and_then(|t| t.split_whitespace().next())
            .map(str::to_ascii_lowercase);

        Self {
            title_prefix,
            stat_block: has_stat_block(&record.plain_text),
            roll_rows: has_roll_rows(&record.plain_text),
            structured: record.structured_payload.is_some(),
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.title_prefix.as_deref().unwrap_or("-"),
            u8::from(self.stat_block),
            u8::from(self.roll_rows),
            u8::from(self.structured),
        )
    }
}

#[derive(Debug, Default)]
pub struct ClassifyOutput {
    /// Record identifier -> assigned kind. Every input record appears.
    pub kinds: HashMap<String, EntityKind>,
    pub clusters: usize,
    pub oracle_calls: u32,
    pub oracle_failures: u32,
}

/// Stage three. Deterministic rules first; the residue is clustered and
/// resolved by one oracle batch per cluster, with the per-cluster outcome
/// map frozen before extraction starts.
pub struct Classifier {
    oracle: Option<Arc<dyn ClassificationOracle>>,
    budget: Arc<CallBudget>,
}

impl Classifier {
    #[must_use]
    pub fn new(oracle: Option<Arc<dyn ClassificationOracle>>, budget: Arc<CallBudget>) -> Self {
        Self { oracle, budget }
    }

    #[must_use]
    pub fn without_oracle() -> Self {
        Self {
            oracle: None,
            budget: Arc::new(CallBudget::unlimited()),
        }
    }

    pub async fn classify_all(
        &self,
        records: &[NormalizedRecord],
        cancel: &CancellationToken,
    ) -> Result<ClassifyOutput> {
        let mut output = ClassifyOutput::default();

        // BTreeMap keys the clusters in a stable order across runs.
        let mut clusters: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut representatives: HashMap<String, String> = HashMap::new();

        for record in records {
            if let Some(kind) = rule_classify(record) {
                output.kinds.insert(record.identifier.clone(), kind);
                continue;
            }

            let key = Fingerprint::of(record).key();
            clusters
                .entry(key.clone())
                .or_default()
                .push(record.identifier.clone());
            representatives
                .entry(key)
                .or_insert_with(|| representative_text(record));
        }

        output.clusters = clusters.len();
        if clusters.is_empty() {
            return Ok(output);
        }

        let Some(oracle) = &self.oracle else {
            for members in clusters.values() {
                for identifier in members {
                    output.kinds.insert(identifier.clone(), EntityKind::Unclassified);
                }
            }
            return Ok(output);
        };

        let candidates: Vec<String> = EntityKind::ALL
            .iter()
            .filter(|k| **k != EntityKind::Unclassified)
            .map(|k| k.as_str().to_string())
            .collect();

        let mut tasks: JoinSet<(String, EntityKind, bool, bool)> = JoinSet::new();

        for key in clusters.keys() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let key = key.clone();
            let representative = representatives.remove(&key).unwrap_or_default();
            let candidates = candidates.clone();
            let oracle = Arc::clone(oracle);
            let budget = Arc::clone(&self.budget);

            tasks.spawn(async move {
                if !budget.try_acquire() {
                    tracing::warn!(cluster = %key, "oracle budget exhausted, degrading cluster");
                    return (key, EntityKind::Unclassified, false, false);
                }

                let request = ClassifyRequest {
                    representative,
                    candidates,
                };

                match oracle.classify(request).await {
                    Ok(response) => {
                        let answer = response.kind.trim().to_ascii_lowercase();
                        match EntityKind::from_str(&answer) {
                            Ok(kind) => (key, kind, true, false),
                            Err(_) => {
                                tracing::warn!(cluster = %key, answer = %answer, "oracle returned unknown kind");
                                (key, EntityKind::Unclassified, true, true)
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(cluster = %key, error = %e, "oracle call failed, degrading cluster");
                        (key, EntityKind::Unclassified, true, true)
                    }
                }
            });
        }

        // The immutable cluster-outcome map: built in full before any
        // extraction runs, so no shared mutable cache is needed later.
        let mut outcomes: HashMap<String, EntityKind> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (key, kind, dispatched, failed) = joined?;
            if dispatched {
                output.oracle_calls += 1;
            }
            if failed {
                output.oracle_failures += 1;
            }
            outcomes.insert(key, kind);
        }

        for (key, members) in &clusters {
            let kind = outcomes.get(key).copied().unwrap_or(EntityKind::Unclassified);
            for identifier in members {
                output.kinds.insert(identifier.clone(), kind);
            }
        }

        Ok(output)
    }
}

fn representative_text(record: &NormalizedRecord) -> String {
    let mut text = String::new();
    if let Some(title) = &record.title {
        text.push_str(title);
        text.push('\n');
    }
    text.push_str(&record.plain_text);
    if text.len() > REPRESENTATIVE_LIMIT {
        let mut end = REPRESENTATIVE_LIMIT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
