use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

/// One opaque row of the source store. Read once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub identifier: String,
    pub content: String,
}

impl RawRecord {
    #[must_use]
    pub fn new(identifier: String, content: String) -> Self {
        Self { identifier, content }
    }
}

/// Output of the normalizer: markup stripped, links harvested, structured
/// payloads parsed. Consumed by the classifier and the extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind_hint: Option<EntityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// True when the title came from the editable-title construct rather
    /// than the hidden-title element.
    #[serde(default)]
    pub title_editable: bool,
    pub plain_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedded_links: Vec<String>,
}

impl NormalizedRecord {
    #[must_use]
    pub fn new(identifier: String, plain_text: String) -> Self {
        Self {
            identifier,
            kind_hint: None,
            title: None,
            title_editable: false,
            plain_text,
            structured_payload: None,
            embedded_links: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_hint(mut self, hint: EntityKind) -> Self {
        self.kind_hint = Some(hint);
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: String, editable: bool) -> Self {
        self.title = Some(title);
        self.title_editable = editable;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.structured_payload = Some(payload);
        self
    }

    #[must_use]
    pub fn with_links(mut self, links: Vec<String>) -> Self {
        self.embedded_links = links;
        self
    }
}

/// Column/row pair parsed from the conventional four-digit hex token
/// ("Hex 0312" is column 3, row 12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HexCoord {
    pub col: u16,
    pub row: u16,
}

impl HexCoord {
    #[must_use]
    pub fn new(col: u16, row: u16) -> Self {
        Self { col, row }
    }

    /// Parses a bare four-digit token ("0312"). Longer or shorter digit runs
    /// are not coordinates.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        if token.len() != 4 || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let col = token[..2].parse().ok()?;
        let row = token[2..].parse().ok()?;
        Some(Self { col, row })
    }
}

impl std::fmt::Display for HexCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}{:02}", self.col, self.row)
    }
}

/// Numeric stat block lifted from the conventional table shape. Keys are the
/// canonical upper-case headers; BTreeMap keeps serialization order stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBlock {
    pub entries: BTreeMap<String, String>,
}

impl StatBlock {
    /// The fixed column header set that identifies a stat table.
    pub const HEADERS: [&'static str; 5] = ["AC", "HD", "MV", "ML", "ATK"];

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, header: &str) -> Option<&str> {
        self.entries.get(header).map(String::as_str)
    }
}

/// One row of a roll-range table ("1-2  Cold drizzle from the north").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollRow {
    pub range: String,
    pub text: String,
}

impl RollRow {
    #[must_use]
    pub fn new(range: String, text: String) -> Self {
        Self { range, text }
    }
}
