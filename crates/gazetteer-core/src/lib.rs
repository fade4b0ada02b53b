pub mod entity;
pub mod error;
pub mod ingest;
pub mod oracle;
pub mod record;
pub mod relationship;
pub mod storage;

pub use entity::{
    CharacterData, CreatureData, DwellingData, DwellingKind, EntityFields, EntityKind, FactionData,
    FactionKind, RegionData, RumorTableData, ServiceData, SettlementData, SettlementScale,
    SiteData, SiteKind, SubAreaData, TypedEntity, UnclassifiedData, WaypointData, WeatherTableData,
};
pub use error::{Error, Result};
pub use ingest::{IngestPipeline, RunSummary};
pub use oracle::{
    CallBudget, ClassificationOracle, ClassifyRequest, ClassifyResponse, HttpOracle, OracleError,
    RetryConfig, RetryingOracle,
};
pub use record::{HexCoord, NormalizedRecord, RawRecord, RollRow, StatBlock};
pub use relationship::{RelationKind, RelationshipEdge};
pub use storage::{InputStore, OutputStore, RecordRef, StoreCensus};
