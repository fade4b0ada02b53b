use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

use crate::entity::{EntityFields, EntityKind, TypedEntity};
use crate::relationship::RelationshipEdge;
use crate::{Error, Result};

/// Explicit type/detail/anchor metadata carried by the input store for a
/// subset of records.
#[derive(Debug, Clone)]
pub struct RecordRef {
    pub record_id: String,
    pub ref_type: Option<String>,
    pub detail: Option<String>,
    pub anchor: Option<String>,
}

const INPUT_INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    content TEXT
);

CREATE TABLE IF NOT EXISTS record_refs (
    record_id TEXT NOT NULL REFERENCES records(id),
    ref_type TEXT,
    detail TEXT,
    anchor TEXT
);

CREATE INDEX IF NOT EXISTS idx_refs_record ON record_refs(record_id);
"#;

/// The raw key-value store. The pipeline only reads it; `create` and the
/// insert methods exist for importers and test fixtures.
pub struct InputStore {
    pool: Pool<Sqlite>,
}

impl InputStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{}?mode=ro", path.display()))
            .await?;

        Ok(Self { pool })
    }

    pub async fn create(path: &Path) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{}?mode=rwc", path.display()))
            .await?;

        sqlx::query(INPUT_INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn insert_record(&self, id: &str, content: Option<&str>) -> Result<()> {
        sqlx::query("INSERT INTO records (id, content) VALUES (?, ?)")
            .bind(id)
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_ref(
        &self,
        record_id: &str,
        ref_type: Option<&str>,
        detail: Option<&str>,
        anchor: Option<&str>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO record_refs (record_id, ref_type, detail, anchor) VALUES (?, ?, ?, ?)")
            .bind(record_id)
            .bind(ref_type)
            .bind(detail)
            .bind(anchor)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Every row, content included when readable. Ordered by id so every run
    /// walks the store in the same order.
    pub async fn all_records(&self) -> Result<Vec<(String, Option<String>)>> {
        let rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT id, content FROM records ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    pub async fn all_refs(&self) -> Result<Vec<RecordRef>> {
        let rows: Vec<(String, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as("SELECT record_id, ref_type, detail, anchor FROM record_refs ORDER BY record_id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(record_id, ref_type, detail, anchor)| RecordRef {
                record_id,
                ref_type,
                detail,
                anchor,
            })
            .collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

const OUTPUT_INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS regions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    hex_cols INTEGER,
    hex_rows INTEGER
);

CREATE TABLE IF NOT EXISTS sub_areas (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    col INTEGER,
    row INTEGER,
    terrain TEXT,
    description TEXT
);

CREATE TABLE IF NOT EXISTS settlements (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    scale TEXT NOT NULL,
    population INTEGER,
    description TEXT
);

CREATE TABLE IF NOT EXISTS waypoints (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    col INTEGER,
    row INTEGER,
    description TEXT
);

CREATE TABLE IF NOT EXISTS dwellings (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    dwelling_kind TEXT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS sites (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    site_kind TEXT NOT NULL,
    col INTEGER,
    row INTEGER,
    description TEXT
);

CREATE TABLE IF NOT EXISTS creatures (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    stats TEXT,
    description TEXT
);

CREATE TABLE IF NOT EXISTS characters (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    stats TEXT,
    role TEXT,
    description TEXT
);

CREATE TABLE IF NOT EXISTS factions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    faction_kind TEXT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS services (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    service_type TEXT NOT NULL,
    settlement TEXT,
    description TEXT
);

CREATE TABLE IF NOT EXISTS weather_tables (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    rows TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rumor_tables (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    rows TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS unclassified (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    excerpt TEXT
);

CREATE TABLE IF NOT EXISTS edges (
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    relation TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);

CREATE TABLE IF NOT EXISTS manifest (
    derived_id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    PRIMARY KEY (derived_id, source_id)
);
"#;

/// Per-kind and per-relation row counts of an output store.
#[derive(Debug, Clone, Default)]
pub struct StoreCensus {
    pub entities: BTreeMap<String, i64>,
    pub edges: BTreeMap<String, i64>,
    pub manifest_rows: i64,
}

impl StoreCensus {
    #[must_use]
    pub fn total_entities(&self) -> i64 {
        self.entities.values().sum()
    }
}

/// The published graph. Built fresh at a staging path each run and renamed
/// into place once assembly has completed in full.
pub struct OutputStore {
    pool: Pool<Sqlite>,
    path: PathBuf,
}

impl OutputStore {
    /// Creates an empty store, replacing any leftover file at `path`.
    pub async fn create(path: &Path) -> Result<Self> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&format!("sqlite:{}?mode=rwc", path.display()))
            .await?;

        sqlx::query(OUTPUT_INIT_SQL).execute(&pool).await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite:{}?mode=ro", path.display()))
            .await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub async fn insert_entity(&self, entity: &TypedEntity) -> Result<()> {
        let id = entity.id.to_string();
        let name = &entity.name;

        match &entity.fields {
            EntityFields::Region(data) => {
                sqlx::query(
                    "INSERT INTO regions (id, name, description, hex_cols, hex_rows) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(name)
                .bind(&data.description)
                .bind(data.hex_cols)
                .bind(data.hex_rows)
                .execute(&self.pool)
                .await?;
            }
            EntityFields::SubArea(data) => {
                sqlx::query(
                    "INSERT INTO sub_areas (id, name, col, row, terrain, description) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(name)
                .bind(data.coord.map(|c| i64::from(c.col)))
                .bind(data.coord.map(|c| i64::from(c.row)))
                .bind(&data.terrain)
                .bind(&data.description)
                .execute(&self.pool)
                .await?;
            }
            EntityFields::Settlement(data) => {
                sqlx::query(
                    "INSERT INTO settlements (id, name, scale, population, description) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(name)
                .bind(data.scale.as_str())
                .bind(data.population)
                .bind(&data.description)
                .execute(&self.pool)
                .await?;
            }
            EntityFields::Waypoint(data) => {
                sqlx::query("INSERT INTO waypoints (id, name, col, row, description) VALUES (?, ?, ?, ?, ?)")
                    .bind(&id)
                    .bind(name)
                    .bind(data.coord.map(|c| i64::from(c.col)))
                    .bind(data.coord.map(|c| i64::from(c.row)))
                    .bind(&data.description)
                    .execute(&self.pool)
                    .await?;
            }
            EntityFields::Dwelling(data) => {
                sqlx::query("INSERT INTO dwellings (id, name, dwelling_kind, description) VALUES (?, ?, ?, ?)")
                    .bind(&id)
                    .bind(name)
                    .bind(data.dwelling_kind.as_str())
                    .bind(&data.description)
                    .execute(&self.pool)
                    .await?;
            }
            EntityFields::Site(data) => {
                sqlx::query(
                    "INSERT INTO sites (id, name, site_kind, col, row, description) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(name)
                .bind(data.site_kind.as_str())
                .bind(data.coord.map(|c| i64::from(c.col)))
                .bind(data.coord.map(|c| i64::from(c.row)))
                .bind(&data.description)
                .execute(&self.pool)
                .await?;
            }
            EntityFields::Creature(data) => {
                let stats = data.stats.as_ref().map(serde_json::to_string).transpose()?;
                sqlx::query("INSERT INTO creatures (id, name, stats, description) VALUES (?, ?, ?, ?)")
                    .bind(&id)
                    .bind(name)
                    .bind(stats)
                    .bind(&data.description)
                    .execute(&self.pool)
                    .await?;
            }
            EntityFields::Character(data) => {
                let stats = data.stats.as_ref().map(serde_json::to_string).transpose()?;
                sqlx::query("INSERT INTO characters (id, name, stats, role, description) VALUES (?, ?, ?, ?, ?)")
                    .bind(&id)
                    .bind(name)
                    .bind(stats)
                    .bind(&data.role)
                    .bind(&data.description)
                    .execute(&self.pool)
                    .await?;
            }
            EntityFields::Faction(data) => {
                sqlx::query("INSERT INTO factions (id, name, faction_kind, description) VALUES (?, ?, ?, ?)")
                    .bind(&id)
                    .bind(name)
                    .bind(data.faction_kind.as_str())
                    .bind(&data.description)
                    .execute(&self.pool)
                    .await?;
            }
            EntityFields::Service(data) => {
                sqlx::query(
                    "INSERT INTO services (id, name, service_type, settlement, description) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(name)
                .bind(&data.service_type)
                .bind(&data.settlement_name)
                .bind(&data.description)
                .execute(&self.pool)
                .await?;
            }
            EntityFields::WeatherTable(data) => {
                let rows = serde_json::to_string(&data.rows)?;
                sqlx::query("INSERT INTO weather_tables (id, name, rows) VALUES (?, ?, ?)")
                    .bind(&id)
                    .bind(name)
                    .bind(rows)
                    .execute(&self.pool)
                    .await?;
            }
            EntityFields::RumorTable(data) => {
                let rows = serde_json::to_string(&data.rows)?;
                sqlx::query("INSERT INTO rumor_tables (id, name, rows) VALUES (?, ?, ?)")
                    .bind(&id)
                    .bind(name)
                    .bind(rows)
                    .execute(&self.pool)
                    .await?;
            }
            EntityFields::Unclassified(data) => {
                sqlx::query("INSERT INTO unclassified (id, name, excerpt) VALUES (?, ?, ?)")
                    .bind(&id)
                    .bind(name)
                    .bind(&data.excerpt)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    pub async fn insert_edge(&self, edge: &RelationshipEdge) -> Result<()> {
        sqlx::query("INSERT INTO edges (source_id, target_id, relation) VALUES (?, ?, ?)")
            .bind(edge.source_id.to_string())
            .bind(edge.target_id.to_string())
            .bind(edge.relation.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_manifest(&self, derived_id: &str, source_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO manifest (derived_id, source_id) VALUES (?, ?)")
            .bind(derived_id)
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn census(&self) -> Result<StoreCensus> {
        let mut census = StoreCensus::default();

        for kind in EntityKind::ALL {
            let (count,): (i64,) =
                sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", kind.table()))
                    .fetch_one(&self.pool)
                    .await?;
            census.entities.insert(kind.as_str().to_string(), count);
        }

        let edge_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT relation, COUNT(*) FROM edges GROUP BY relation ORDER BY relation")
                .fetch_all(&self.pool)
                .await?;
        census.edges = edge_rows.into_iter().collect();

        let (manifest_rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM manifest")
            .fetch_one(&self.pool)
            .await?;
        census.manifest_rows = manifest_rows;

        Ok(census)
    }

    pub async fn manifest_rows(&self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT derived_id, source_id FROM manifest ORDER BY derived_id, source_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    pub async fn edge_rows(&self) -> Result<Vec<(String, String, String)>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT source_id, target_id, relation FROM edges ORDER BY source_id, target_id, relation",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Names in one kind table, sorted. Mostly a test/report convenience.
    pub async fn entity_names(&self, kind: EntityKind) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as(&format!("SELECT name FROM {} ORDER BY name", kind.table()))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityFields, SettlementData, SettlementScale, TypedEntity};
    use crate::relationship::{RelationKind, RelationshipEdge};

    async fn temp_output() -> (tempfile::TempDir, OutputStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::create(&dir.path().join("graph.db")).await.unwrap();
        (dir, store)
    }

    fn settlement(source: &str, name: &str) -> TypedEntity {
        TypedEntity::new(
            name.into(),
            EntityFields::Settlement(SettlementData {
                scale: SettlementScale::Town,
                population: Some(800),
                description: None,
            }),
            source.into(),
        )
    }

    #[tokio::test]
    async fn test_entity_insert_and_census() {
        let (_dir, store) = temp_output().await;

        let town = settlement("src-1", "Rivergate");
        store.insert_entity(&town).await.unwrap();
        store
            .insert_manifest(&town.id.to_string(), &town.source_identifier)
            .await
            .unwrap();

        let census = store.census().await.unwrap();
        assert_eq!(census.entities["settlement"], 1);
        assert_eq!(census.total_entities(), 1);
        assert_eq!(census.manifest_rows, 1);

        let names = store.entity_names(EntityKind::Settlement).await.unwrap();
        assert_eq!(names, vec!["Rivergate"]);
    }

    #[tokio::test]
    async fn test_edges_round_trip() {
        let (_dir, store) = temp_output().await;

        let a = settlement("src-a", "A");
        let b = settlement("src-b", "B");
        let edge = RelationshipEdge::new(a.id, b.id, RelationKind::Reference).unwrap();
        store.insert_edge(&edge).await.unwrap();

        let rows = store.edge_rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].2, "reference");
    }

    #[tokio::test]
    async fn test_input_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.db");

        let store = InputStore::create(&path).await.unwrap();
        store.insert_record("b-2", Some("<p>hello</p>")).await.unwrap();
        store.insert_record("a-1", Some("n/a")).await.unwrap();
        store
            .insert_ref("b-2", Some("settlement"), None, None)
            .await
            .unwrap();

        let records = store.all_records().await.unwrap();
        assert_eq!(records.len(), 2);
        // Ordered by id regardless of insertion order.
        assert_eq!(records[0].0, "a-1");

        let refs = store.all_refs().await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].ref_type.as_deref(), Some("settlement"));
    }
}
