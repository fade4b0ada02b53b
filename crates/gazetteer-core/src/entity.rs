use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::{HexCoord, RollRow, StatBlock};

/// Namespace for derived identifiers. Entity ids are UUIDv5 over this
/// namespace and the source record identifier, so re-runs over unchanged
/// input produce identical ids.
pub const GRAPH_NAMESPACE: Uuid = Uuid::from_u128(0x6b1d_0f42_8c3a_4e5f_9a7b_21c4_d8e6_f013);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Region,
    SubArea,
    Settlement,
    Waypoint,
    Dwelling,
    Site,
    Creature,
    Character,
    Faction,
    Service,
    WeatherTable,
    RumorTable,
    Unclassified,
}

impl EntityKind {
    pub const ALL: [Self; 13] = [
        Self::Region,
        Self::SubArea,
        Self::Settlement,
        Self::Waypoint,
        Self::Dwelling,
        Self::Site,
        Self::Creature,
        Self::Character,
        Self::Faction,
        Self::Service,
        Self::WeatherTable,
        Self::RumorTable,
        Self::Unclassified,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::SubArea => "sub_area",
            Self::Settlement => "settlement",
            Self::Waypoint => "waypoint",
            Self::Dwelling => "dwelling",
            Self::Site => "site",
            Self::Creature => "creature",
            Self::Character => "character",
            Self::Faction => "faction",
            Self::Service => "service",
            Self::WeatherTable => "weather_table",
            Self::RumorTable => "rumor_table",
            Self::Unclassified => "unclassified",
        }
    }

    /// Output-store table holding entities of this kind.
    #[must_use]
    pub fn table(&self) -> &'static str {
        match self {
            Self::Region => "regions",
            Self::SubArea => "sub_areas",
            Self::Settlement => "settlements",
            Self::Waypoint => "waypoints",
            Self::Dwelling => "dwellings",
            Self::Site => "sites",
            Self::Creature => "creatures",
            Self::Character => "characters",
            Self::Faction => "factions",
            Self::Service => "services",
            Self::WeatherTable => "weather_tables",
            Self::RumorTable => "rumor_tables",
            Self::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "region" => Ok(Self::Region),
            "sub_area" => Ok(Self::SubArea),
            "settlement" => Ok(Self::Settlement),
            "waypoint" => Ok(Self::Waypoint),
            "dwelling" => Ok(Self::Dwelling),
            "site" => Ok(Self::Site),
            "creature" => Ok(Self::Creature),
            "character" => Ok(Self::Character),
            "faction" => Ok(Self::Faction),
            "service" => Ok(Self::Service),
            "weather_table" => Ok(Self::WeatherTable),
            "rumor_table" => Ok(Self::RumorTable),
            "unclassified" => Ok(Self::Unclassified),
            _ => Err(crate::Error::InvalidEntityKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementScale {
    Village,
    Town,
    City,
}

impl SettlementScale {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Village => "village",
            Self::Town => "town",
            Self::City => "city",
        }
    }

    /// Matches the title vocabulary ("Village of ...", "Town of ...").
    #[must_use]
    pub fn from_title_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "village" => Some(Self::Village),
            "town" => Some(Self::Town),
            "city" => Some(Self::City),
            _ => None,
        }
    }
}

impl std::fmt::Display for SettlementScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DwellingKind {
    Farmstead,
    Hermitage,
}

impl DwellingKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Farmstead => "farmstead",
            Self::Hermitage => "hermitage",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteKind {
    Dungeon,
    Ruin,
    Lair,
}

impl SiteKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dungeon => "dungeon",
            Self::Ruin => "ruin",
            Self::Lair => "lair",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactionKind {
    Guild,
    Order,
    Cult,
}

impl FactionKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guild => "guild",
            Self::Order => "order",
            Self::Cult => "cult",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex_cols: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex_rows: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubAreaData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coord: Option<HexCoord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terrain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementData {
    pub scale: SettlementScale,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub population: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaypointData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coord: Option<HexCoord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DwellingData {
    pub dwelling_kind: DwellingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteData {
    pub site_kind: SiteKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coord: Option<HexCoord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatureData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactionData {
    pub faction_kind: FactionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceData {
    /// The parenthesized category word from the editable title, e.g. "Blacksmith".
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeatherTableData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<RollRow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RumorTableData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<RollRow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnclassifiedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum EntityFields {
    Region(RegionData),
    SubArea(SubAreaData),
    Settlement(SettlementData),
    Waypoint(WaypointData),
    Dwelling(DwellingData),
    Site(SiteData),
    Creature(CreatureData),
    Character(CharacterData),
    Faction(FactionData),
    Service(ServiceData),
    WeatherTable(WeatherTableData),
    RumorTable(RumorTableData),
    Unclassified(UnclassifiedData),
}

impl EntityFields {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Region(_) => EntityKind::Region,
            Self::SubArea(_) => EntityKind::SubArea,
            Self::Settlement(_) => EntityKind::Settlement,
            Self::Waypoint(_) => EntityKind::Waypoint,
            Self::Dwelling(_) => EntityKind::Dwelling,
            Self::Site(_) => EntityKind::Site,
            Self::Creature(_) => EntityKind::Creature,
            Self::Character(_) => EntityKind::Character,
            Self::Faction(_) => EntityKind::Faction,
            Self::Service(_) => EntityKind::Service,
            Self::WeatherTable(_) => EntityKind::WeatherTable,
            Self::RumorTable(_) => EntityKind::RumorTable,
            Self::Unclassified(_) => EntityKind::Unclassified,
        }
    }
}

/// One fully-typed row of the output graph, traceable to its source record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedEntity {
    pub id: Uuid,
    pub name: String,
    pub fields: EntityFields,
    pub source_identifier: String,
    /// Link targets carried over from the normalized record; resolved by the
    /// assembler once the identifier index is frozen.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
}

impl TypedEntity {
    #[must_use]
    pub fn new(name: String, fields: EntityFields, source_identifier: String) -> Self {
        let id = Uuid::new_v5(&GRAPH_NAMESPACE, source_identifier.as_bytes());
        Self {
            id,
            name,
            fields,
            source_identifier,
            links: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_links(mut self, links: Vec<String>) -> Self {
        self.links = links;
        self
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.fields.kind()
    }
}
