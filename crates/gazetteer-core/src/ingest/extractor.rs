use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::entity::{
    CharacterData, CreatureData, DwellingData, DwellingKind, EntityFields, EntityKind, FactionData,
    FactionKind, RegionData, RumorTableData, ServiceData, SettlementData, SettlementScale,
    SiteData, SiteKind, SubAreaData, TypedEntity, UnclassifiedData, WaypointData, WeatherTableData,
};
use crate::ingest::normalizer::{hex_title_coord, settlement_title_parts};
use crate::record::{HexCoord, NormalizedRecord, RollRow, StatBlock};

static STAT_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b({})\b\s*:?\s*([A-Za-z0-9+'/-]+)",
        StatBlock::HEADERS.join("|")
    ))
    .expect("hard-coded pattern")
});

static ROLL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+(?:-\d+)?)[.:]?\s+(.+)$").expect("hard-coded pattern"));

static HEX_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bHex\s+(\d{4})\b").expect("hard-coded pattern"));

static POPULATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bpopulation\b\s*:?\s*([\d,]+)").expect("hard-coded pattern")
});

static SERVICE_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)\s*\(([A-Za-z][A-Za-z ]*)\)(?:\s+in\s+(.+))?$").expect("hard-coded pattern")
});

const EXCERPT_LIMIT: usize = 200;

/// Stat entries lifted from the conventional table shape. Needs at least
/// three of the fixed headers to count as a block.
#[must_use]
pub fn parse_stat_block(text: &str) -> Option<StatBlock> {
    let mut entries = BTreeMap::new();
    for caps in STAT_PAIR.captures_iter(text) {
        entries.entry(caps[1].to_string()).or_insert_with(|| caps[2].to_string());
    }
    if entries.len() >= 3 {
        Some(StatBlock { entries })
    } else {
        None
    }
}

/// Roll-range rows from row-delimited text, one per matching line.
#[must_use]
pub fn parse_roll_rows(text: &str) -> Vec<RollRow> {
    text.lines()
        .filter_map(|line| {
            ROLL_LINE
                .captures(line)
                .map(|caps| RollRow::new(caps[1].to_string(), caps[2].trim().to_string()))
        })
        .collect()
}

/// Coordinate from the title or the first "Hex NNNN" token in the body.
#[must_use]
pub fn parse_coord(record: &NormalizedRecord) -> Option<HexCoord> {
    if let Some(coord) = record.title.as_deref().and_then(hex_title_coord) {
        return Some(coord);
    }
    HEX_TOKEN
        .captures(&record.plain_text)
        .and_then(|caps| HexCoord::from_token(&caps[1]))
}

fn parse_population(record: &NormalizedRecord) -> Option<u32> {
    if let Some(value) = payload_u32(record, "population") {
        return Some(value);
    }
    POPULATION
        .captures(&record.plain_text)
        .and_then(|caps| caps[1].replace(',', "").parse().ok())
}

fn payload_u32(record: &NormalizedRecord, key: &str) -> Option<u32> {
    record
        .structured_payload
        .as_ref()?
        .get(key)?
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
}

fn payload_map_u32(record: &NormalizedRecord, key: &str) -> Option<u32> {
    record
        .structured_payload
        .as_ref()?
        .get("map")?
        .get(key)?
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
}

fn payload_str(record: &NormalizedRecord, key: &str) -> Option<String> {
    record
        .structured_payload
        .as_ref()?
        .get(key)?
        .as_str()
        .map(str::to_string)
}

fn description(record: &NormalizedRecord) -> Option<String> {
    let text = record.plain_text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn excerpt(record: &NormalizedRecord) -> Option<String> {
    let text = record.plain_text.trim();
    if text.is_empty() {
        return None;
    }
    let mut end = text.len().min(EXCERPT_LIMIT);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(text[..end].to_string())
}

/// Short name derived from the first line of the body, for kinds where a
/// title is optional.
fn excerpt_name(record: &NormalizedRecord) -> Option<String> {
    let first_line = record.plain_text.lines().next()?.trim();
    if first_line.is_empty() {
        return None;
    }
    let words: Vec<&str> = first_line.split_whitespace().take(6).collect();
    Some(words.join(" "))
}

fn fallback_name(record: &NormalizedRecord) -> Option<String> {
    record.title.clone().or_else(|| excerpt_name(record))
}

fn contains_word(record: &NormalizedRecord, word: &str) -> bool {
    let lowered = format!(
        "{} {}",
        record.title.as_deref().unwrap_or_default().to_ascii_lowercase(),
        record.plain_text.to_ascii_lowercase()
    );
    lowered.contains(word)
}

/// Row-shaped content that belongs to a parent entity; folded during
/// assembly rather than emitted as its own row.
#[derive(Debug, Clone)]
pub struct TableFragment {
    pub source_identifier: String,
    pub kind: EntityKind,
    pub rows: Vec<RollRow>,
    pub anchor: String,
}

#[derive(Debug, Clone)]
pub enum Extraction {
    Entity(TypedEntity),
    Fragment(TableFragment),
}

impl Extraction {
    #[must_use]
    pub fn entity(self) -> Option<TypedEntity> {
        match self {
            Self::Entity(entity) => Some(entity),
            Self::Fragment(_) => None,
        }
    }
}

/// Stage four: one extraction routine per kind over the shared toolkit.
/// Never fails the pipeline; a record missing a kind-required field is
/// demoted to unclassified instead.
pub struct Extractor;

impl Extractor {
    /// `anchor` is the owning-record id from the input store's reference
    /// table, when present.
    #[must_use]
    pub fn extract(record: &NormalizedRecord, kind: EntityKind, anchor: Option<&str>) -> Extraction {
        match kind {
            EntityKind::Region => Self::extract_region(record),
            EntityKind::SubArea => Self::extract_sub_area(record),
            EntityKind::Settlement => Self::extract_settlement(record),
            EntityKind::Waypoint => Self::extract_waypoint(record),
            EntityKind::Dwelling => Self::extract_dwelling(record),
            EntityKind::Site => Self::extract_site(record),
            EntityKind::Creature => Self::extract_creature(record),
            EntityKind::Character => Self::extract_character(record),
            EntityKind::Faction => Self::extract_faction(record),
            EntityKind::Service => Self::extract_service(record),
            EntityKind::WeatherTable | EntityKind::RumorTable => {
                Self::extract_table(record, kind, anchor)
            }
            EntityKind::Unclassified => Extraction::Entity(Self::unclassified(record)),
        }
    }

    fn demote(record: &NormalizedRecord, kind: EntityKind, missing: &str) -> Extraction {
        tracing::warn!(
            record = %record.identifier,
            kind = %kind,
            missing,
            "required field missing, demoting to unclassified"
        );
        Extraction::Entity(Self::unclassified(record))
    }

    fn unclassified(record: &NormalizedRecord) -> TypedEntity {
        let name = record
            .title
            .clone()
            .unwrap_or_else(|| record.identifier.clone());
        TypedEntity::new(
            name,
            EntityFields::Unclassified(UnclassifiedData {
                excerpt: excerpt(record),
            }),
            record.identifier.clone(),
        )
        .with_links(record.embedded_links.clone())
    }

    fn extract_region(record: &NormalizedRecord) -> Extraction {
        let Some(name) = fallback_name(record) else {
            return Self::demote(record, EntityKind::Region, "name");
        };

        let fields = EntityFields::Region(RegionData {
            description: description(record),
            hex_cols: payload_map_u32(record, "cols"),
            hex_rows: payload_map_u32(record, "rows"),
        });

        Extraction::Entity(
            TypedEntity::new(name, fields, record.identifier.clone())
                .with_links(record.embedded_links.clone()),
        )
    }

    fn extract_sub_area(record: &NormalizedRecord) -> Extraction {
        let coord = parse_coord(record);
        let name = record
            .title
            .clone()
            .or_else(|| coord.map(|c| format!("Hex {c}")))
            .or_else(|| excerpt_name(record));
        let Some(name) = name else {
            return Self::demote(record, EntityKind::SubArea, "name");
        };

        let fields = EntityFields::SubArea(SubAreaData {
            coord,
            terrain: payload_str(record, "terrain"),
            description: description(record),
        });

        Extraction::Entity(
            TypedEntity::new(name, fields, record.identifier.clone())
                .with_links(record.embedded_links.clone()),
        )
    }

    fn extract_settlement(record: &NormalizedRecord) -> Extraction {
        // Title vocabulary carries both the scale and the name; structured
        // settlement layouts carry a bare name. Every settlement must be
        // named.
        let (scale, name) = match record.title.as_deref().and_then(settlement_title_parts) {
            Some((scale, name)) => (Some(scale), Some(name)),
            None => (None, record.title.clone().or_else(|| payload_str(record, "name"))),
        };

        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return Self::demote(record, EntityKind::Settlement, "name");
        };

        let scale = scale
            .or_else(|| {
                payload_str(record, "scale").and_then(|s| SettlementScale::from_title_word(&s))
            })
            .unwrap_or(SettlementScale::Village);

        let fields = EntityFields::Settlement(SettlementData {
            scale,
            population: parse_population(record),
            description: description(record),
        });

        Extraction::Entity(
            TypedEntity::new(name, fields, record.identifier.clone())
                .with_links(record.embedded_links.clone()),
        )
    }

    fn extract_waypoint(record: &NormalizedRecord) -> Extraction {
        let Some(name) = fallback_name(record) else {
            return Self::demote(record, EntityKind::Waypoint, "name");
        };

        let fields = EntityFields::Waypoint(WaypointData {
            coord: parse_coord(record),
            description: description(record),
        });

        Extraction::Entity(
            TypedEntity::new(name, fields, record.identifier.clone())
                .with_links(record.embedded_links.clone()),
        )
    }

    fn extract_dwelling(record: &NormalizedRecord) -> Extraction {
        let Some(name) = fallback_name(record) else {
            return Self::demote(record, EntityKind::Dwelling, "name");
        };

        let dwelling_kind = if contains_word(record, "hermit") {
            DwellingKind::Hermitage
        } else {
            DwellingKind::Farmstead
        };

        let fields = EntityFields::Dwelling(DwellingData {
            dwelling_kind,
            description: description(record),
        });

        Extraction::Entity(
            TypedEntity::new(name, fields, record.identifier.clone())
                .with_links(record.embedded_links.clone()),
        )
    }

    fn extract_site(record: &NormalizedRecord) -> Extraction {
        let Some(name) = fallback_name(record) else {
            return Self::demote(record, EntityKind::Site, "name");
        };

        let site_kind = if contains_word(record, "ruin") {
            SiteKind::Ruin
        } else if contains_word(record, "lair") {
            SiteKind::Lair
        } else {
            SiteKind::Dungeon
        };

        let fields = EntityFields::Site(SiteData {
            site_kind,
            coord: parse_coord(record),
            description: description(record),
        });

        Extraction::Entity(
            TypedEntity::new(name, fields, record.identifier.clone())
                .with_links(record.embedded_links.clone()),
        )
    }

    fn extract_creature(record: &NormalizedRecord) -> Extraction {
        let Some(name) = fallback_name(record) else {
            return Self::demote(record, EntityKind::Creature, "name");
        };

        let fields = EntityFields::Creature(CreatureData {
            stats: parse_stat_block(&record.plain_text),
            description: description(record),
        });

        Extraction::Entity(
            TypedEntity::new(name, fields, record.identifier.clone())
                .with_links(record.embedded_links.clone()),
        )
    }

    fn extract_character(record: &NormalizedRecord) -> Extraction {
        let Some(name) = record.title.clone() else {
            return Self::demote(record, EntityKind::Character, "name");
        };

        let fields = EntityFields::Character(CharacterData {
            stats: parse_stat_block(&record.plain_text),
            role: payload_str(record, "role"),
            description: description(record),
        });

        Extraction::Entity(
            TypedEntity::new(name, fields, record.identifier.clone())
                .with_links(record.embedded_links.clone()),
        )
    }

    fn extract_faction(record: &NormalizedRecord) -> Extraction {
        let Some(name) = fallback_name(record) else {
            return Self::demote(record, EntityKind::Faction, "name");
        };

        let faction_kind = if contains_word(record, "cult") {
            FactionKind::Cult
        } else if contains_word(record, "order") {
            FactionKind::Order
        } else {
            FactionKind::Guild
        };

        let fields = EntityFields::Faction(FactionData {
            faction_kind,
            description: description(record),
        });

        Extraction::Entity(
            TypedEntity::new(name, fields, record.identifier.clone())
                .with_links(record.embedded_links.clone()),
        )
    }

    fn extract_service(record: &NormalizedRecord) -> Extraction {
        let Some(title) = record.title.as_deref() else {
            return Self::demote(record, EntityKind::Service, "title");
        };
        let Some(caps) = SERVICE_TITLE.captures(title) else {
            return Self::demote(record, EntityKind::Service, "service_type");
        };

        let name = caps[1].trim();
        let name = if name.is_empty() {
            title.to_string()
        } else {
            name.to_string()
        };

        let fields = EntityFields::Service(ServiceData {
            service_type: caps[2].trim().to_string(),
            settlement_name: caps.get(3).map(|m| m.as_str().trim().to_string()),
            description: description(record),
        });

        Extraction::Entity(
            TypedEntity::new(name, fields, record.identifier.clone())
                .with_links(record.embedded_links.clone()),
        )
    }

    fn extract_table(record: &NormalizedRecord, kind: EntityKind, anchor: Option<&str>) -> Extraction {
        let rows = parse_roll_rows(&record.plain_text);

        // Untitled row-runs anchored to another record are fragments of that
        // record's table, not tables of their own.
        if let Some(anchor) = anchor {
            if record.title.is_none() && !rows.is_empty() {
                return Extraction::Fragment(TableFragment {
                    source_identifier: record.identifier.clone(),
                    kind,
                    rows,
                    anchor: anchor.to_string(),
                });
            }
        }

        let name = record.title.clone().unwrap_or_else(|| {
            match kind {
                EntityKind::WeatherTable => "Weather",
                _ => "Rumors",
            }
            .to_string()
        });

        let fields = match kind {
            EntityKind::WeatherTable => EntityFields::WeatherTable(WeatherTableData { rows }),
            _ => EntityFields::RumorTable(RumorTableData { rows }),
        };

        Extraction::Entity(
            TypedEntity::new(name, fields, record.identifier.clone())
                .with_links(record.embedded_links.clone()),
        )
    }
}
