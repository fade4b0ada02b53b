use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::entity::EntityKind;
use crate::ingest::loader::is_placeholder;
use crate::record::{NormalizedRecord, RawRecord};

static HIDDEN_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<(?:h[1-6]|span|div)[^>]*class="[^"]*\bhidden-title\b[^"]*"[^>]*>([^<]*)"#)
        .expect("hard-coded pattern")
});

static EDITABLE_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<(?:h[1-6]|span|div)[^>]*(?:\bcontenteditable\b|class="[^"]*\beditable-title\b[^"]*")[^>]*>([^<]*)"#,
    )
    .expect("hard-coded pattern")
});

static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\s[^>]*href="([^"]+)""#).expect("hard-coded pattern")
});

static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</(?:p|div|tr|li|h[1-6]|table)>|<br\s*/?>").expect("hard-coded pattern")
});

static CELL_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</t[dh]>").expect("hard-coded pattern"));

static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("hard-coded pattern"));

static SETTLEMENT_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(Village|Town|City)\s+of\s+(.+)$").expect("hard-coded pattern")
});

static HEX_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Hex\s+(\d{4})$").expect("hard-coded pattern"));

static CATEGORY_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]+)\s*#\s*\d+$").expect("hard-coded pattern"));

/// Maps a category word from the "<Category> #<n>" title form to its kind.
fn category_kind(word: &str) -> Option<EntityKind> {
    match word.to_ascii_lowercase().as_str() {
        "region" => Some(EntityKind::Region),
        "hex" => Some(EntityKind::SubArea),
        "waypoint" => Some(EntityKind::Waypoint),
        "farmstead" | "hermitage" => Some(EntityKind::Dwelling),
        "dungeon" | "ruin" | "lair" => Some(EntityKind::Site),
        "creature" | "monster" => Some(EntityKind::Creature),
        "character" | "npc" => Some(EntityKind::Character),
        "faction" | "guild" | "order" | "cult" => Some(EntityKind::Faction),
        "weather" => Some(EntityKind::WeatherTable),
        "rumor" | "rumors" | "rumour" | "rumours" => Some(EntityKind::RumorTable),
        _ => None,
    }
}

/// Scale word and settlement name from the "Village|Town|City of <name>"
/// title form.
#[must_use]
pub fn settlement_title_parts(title: &str) -> Option<(crate::entity::SettlementScale, String)> {
    let caps = SETTLEMENT_TITLE.captures(title)?;
    let scale = crate::entity::SettlementScale::from_title_word(&caps[1])?;
    Some((scale, caps[2].trim().to_string()))
}

/// Coordinate from the "Hex <nnnn>" title form.
#[must_use]
pub fn hex_title_coord(title: &str) -> Option<crate::record::HexCoord> {
    let caps = HEX_TITLE.captures(title)?;
    crate::record::HexCoord::from_token(&caps[1])
}

/// Kind hint derived from the fixed title vocabulary. Deterministic; shared
/// with the classifier tests.
#[must_use]
pub fn title_hint(title: &str) -> Option<EntityKind> {
    if SETTLEMENT_TITLE.is_match(title) {
        return Some(EntityKind::Settlement);
    }
    if HEX_TITLE.is_match(title) {
        return Some(EntityKind::SubArea);
    }
    CATEGORY_NUMBER
        .captures(title)
        .and_then(|caps| category_kind(&caps[1]))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Strips tags to plain text. Block-level closers become line breaks and
/// table cells become column gaps so row-shaped content keeps its line
/// structure for the extractor.
#[must_use]
pub fn strip_markup(content: &str) -> String {
    let broken = BLOCK_BREAK.replace_all(content, "\n");
    let celled = CELL_BREAK.replace_all(&broken, "  ");
    let stripped = ANY_TAG.replace_all(&celled, "");
    let decoded = decode_entities(&stripped);

    let mut lines: Vec<String> = Vec::new();
    for line in decoded.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }
    lines.join("\n")
}

/// True for href values that point at other records rather than the open web.
fn is_record_target(href: &str) -> bool {
    !(href.starts_with("http://") || href.starts_with("https://") || href.starts_with("mailto:"))
}

fn normalize_link_target(href: &str) -> String {
    href.trim_start_matches("record://")
        .trim_start_matches('#')
        .to_string()
}

fn extract_links(content: &str) -> Vec<String> {
    let mut links = Vec::new();
    for caps in LINK_HREF.captures_iter(content) {
        let href = &caps[1];
        if is_record_target(href) {
            let target = normalize_link_target(href);
            if !target.is_empty() && !links.contains(&target) {
                links.push(target);
            }
        }
    }
    links
}

/// Pulls cross-reference targets out of a structured payload: values under
/// "ref"/"link"/"target" keys and string arrays under their plural forms.
fn collect_payload_links(value: &serde_json::Value, links: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                match key.as_str() {
                    "ref" | "link" | "target" => {
                        if let Some(s) = child.as_str() {
                            let target = normalize_link_target(s);
                            if !target.is_empty() && !links.contains(&target) {
                                links.push(target);
                            }
                        }
                    }
                    "refs" | "links" | "targets" => {
                        if let Some(items) = child.as_array() {
                            for item in items {
                                if let Some(s) = item.as_str() {
                                    let target = normalize_link_target(s);
                                    if !target.is_empty() && !links.contains(&target) {
                                        links.push(target);
                                    }
                                }
                            }
                        }
                    }
                    _ => collect_payload_links(child, links),
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_payload_links(item, links);
            }
        }
        _ => {}
    }
}

/// Stage two. Pure and deterministic: no IO, no randomness. Its output seeds
/// both the rule chain and the cluster fingerprints, so two records with the
/// same content always normalize identically.
#[derive(Debug, Default, Clone, Copy)]
pub struct Normalizer;

impl Normalizer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Produces one normalized record, or None for content that is provably
    /// still a placeholder after trimming. `ref_type` is the explicit type
    /// recorded in the input store's reference table, used as a hint of last
    /// resort.
    #[must_use]
    pub fn normalize(&self, record: &RawRecord, ref_type: Option<&str>) -> Option<NormalizedRecord> {
        let trimmed = record.content.trim();

        let mut normalized = if trimmed.starts_with('{') {
            match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(payload) => Self::normalize_structured(&record.identifier, payload),
                Err(e) => {
                    tracing::debug!(record = %record.identifier, error = %e, "structured parse failed, treating as markup");
                    Self::normalize_markup(&record.identifier, trimmed)
                }
            }
        } else {
            Self::normalize_markup(&record.identifier, trimmed)
        };

        if normalized.kind_hint.is_none() {
            if let Some(hint) = ref_type.and_then(|t| EntityKind::from_str(&t.to_ascii_lowercase()).ok()) {
                normalized.kind_hint = Some(hint);
            }
        }

        let still_placeholder = normalized.title.is_none()
            && normalized.structured_payload.is_none()
            && normalized.embedded_links.is_empty()
            && is_placeholder(&normalized.plain_text);

        if still_placeholder {
            return None;
        }

        Some(normalized)
    }

    fn normalize_structured(identifier: &str, payload: serde_json::Value) -> NormalizedRecord {
        let object = payload.as_object();

        // Top-level key presence decides the layout shape: a "map" key is a
        // geographic layout, a "features" key is a settlement layout.
        let kind_hint = object.and_then(|map| {
            if map.contains_key("map") {
                Some(EntityKind::Region)
            } else if map.contains_key("features") {
                Some(EntityKind::Settlement)
            } else {
                None
            }
        });

        let title = object
            .and_then(|map| map.get("name").or_else(|| map.get("title")))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let plain_text = object
            .and_then(|map| map.get("description"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_default();

        let mut links = Vec::new();
        collect_payload_links(&payload, &mut links);

        let mut normalized =
            NormalizedRecord::new(identifier.to_string(), plain_text).with_payload(payload);
        normalized.embedded_links = links;
        if let Some(title) = title {
            normalized = normalized.with_title(title, false);
        }
        if let Some(hint) = kind_hint {
            normalized = normalized.with_hint(hint);
        }
        normalized
    }

    fn normalize_markup(identifier: &str, content: &str) -> NormalizedRecord {
        let (title, editable) = match HIDDEN_TITLE.captures(content) {
            Some(caps) => (Some(decode_entities(caps[1].trim())), false),
            None => match EDITABLE_TITLE.captures(content) {
                Some(caps) => (Some(decode_entities(caps[1].trim())), true),
                None => (None, false),
            },
        };
        let title = title.filter(|t| !t.is_empty());

        let plain_text = strip_markup(content);
        let links = extract_links(content);

        let mut normalized = NormalizedRecord::new(identifier.to_string(), plain_text).with_links(links);
        if let Some(title) = title {
            let hint = title_hint(&title);
            normalized = normalized.with_title(title, editable);
            if let Some(hint) = hint {
                normalized = normalized.with_hint(hint);
            }
        }
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, content: &str) -> RawRecord {
        RawRecord::new(id.into(), content.into())
    }

    #[test]
    fn test_hidden_title_sets_settlement_hint() {
        let record = raw(
            "r1",
            r#"<span class="hidden-title">Town of Rivergate</span><p>A busy river crossing.</p>"#,
        );
        let normalized = Normalizer::new().normalize(&record, None).unwrap();

        assert_eq!(normalized.title.as_deref(), Some("Town of Rivergate"));
        assert!(!normalized.title_editable);
        assert_eq!(normalized.kind_hint, Some(EntityKind::Settlement));
        assert!(normalized.plain_text.contains("A busy river crossing."));
    }

    #[test]
    fn test_editable_title_is_flagged() {
        let record = raw(
            "r2",
            r#"<h2 contenteditable="true">Grimm Forge (Blacksmith) in Rivergate</h2>"#,
        );
        let normalized = Normalizer::new().normalize(&record, None).unwrap();

        assert!(normalized.title_editable);
        assert_eq!(
            normalized.title.as_deref(),
            Some("Grimm Forge (Blacksmith) in Rivergate")
        );
        assert_eq!(normalized.kind_hint, None);
    }

    #[test]
    fn test_hex_title_hint() {
        assert_eq!(title_hint("Hex 0312"), Some(EntityKind::SubArea));
        assert_eq!(title_hint("Hex 031"), None);
    }

    #[test]
    fn test_category_number_hints() {
        assert_eq!(title_hint("Dungeon #3"), Some(EntityKind::Site));
        assert_eq!(title_hint("Faction #12"), Some(EntityKind::Faction));
        assert_eq!(title_hint("Rumors #1"), Some(EntityKind::RumorTable));
        assert_eq!(title_hint("Widget #9"), None);
    }

    #[test]
    fn test_links_extracted_and_deduplicated() {
        let record = raw(
            "r3",
            r##"<p>See <a href="record://aaa">here</a>, <a href="#bbb">there</a>,
               <a href="record://aaa">again</a> and <a href="https://example.com">outside</a>.</p>"##,
        );
        let normalized = Normalizer::new().normalize(&record, None).unwrap();

        assert_eq!(normalized.embedded_links, vec!["aaa".to_string(), "bbb".to_string()]);
    }

    #[test]
    fn test_structured_map_payload() {
        let record = raw(
            "r4",
            r#"{"name": "The Vale", "map": {"cols": 10, "rows": 8}, "description": "Cold uplands."}"#,
        );
        let normalized = Normalizer::new().normalize(&record, None).unwrap();

        assert_eq!(normalized.kind_hint, Some(EntityKind::Region));
        assert_eq!(normalized.title.as_deref(), Some("The Vale"));
        assert_eq!(normalized.plain_text, "Cold uplands.");
        assert!(normalized.structured_payload.is_some());
    }

    #[test]
    fn test_structured_features_payload() {
        let record = raw("r5", r#"{"name": "Dunmere", "features": []}"#);
        let normalized = Normalizer::new().normalize(&record, None).unwrap();

        assert_eq!(normalized.kind_hint, Some(EntityKind::Settlement));
    }

    #[test]
    fn test_malformed_structured_falls_back_to_markup() {
        let record = raw("r6", r#"{"name": "broken"#);
        let normalized = Normalizer::new().normalize(&record, None).unwrap();

        assert!(normalized.structured_payload.is_none());
        assert!(normalized.plain_text.contains("broken"));
    }

    #[test]
    fn test_wrapped_placeholder_is_discarded() {
        let record = raw("r7", "<p>n/a</p>");
        assert!(Normalizer::new().normalize(&record, None).is_none());
    }

    #[test]
    fn test_ref_type_is_hint_of_last_resort() {
        let record = raw("r8", "<p>An unmarked page.</p>");
        let normalized = Normalizer::new().normalize(&record, Some("faction")).unwrap();
        assert_eq!(normalized.kind_hint, Some(EntityKind::Faction));

        // Title vocabulary wins over the reference table.
        let titled = raw(
            "r9",
            r#"<span class="hidden-title">City of Karsa</span><p>Walls of basalt.</p>"#,
        );
        let normalized = Normalizer::new().normalize(&titled, Some("faction")).unwrap();
        assert_eq!(normalized.kind_hint, Some(EntityKind::Settlement));
    }

    #[test]
    fn test_table_rows_keep_line_structure() {
        let record = raw(
            "r10",
            "<table><tr><td>1-2</td><td>Cold rain</td></tr><tr><td>3-6</td><td>Clear skies</td></tr></table>",
        );
        let normalized = Normalizer::new().normalize(&record, None).unwrap();

        let lines: Vec<&str> = normalized.plain_text.lines().collect();
        assert_eq!(lines, vec!["1-2 Cold rain", "3-6 Clear skies"]);
    }
}
