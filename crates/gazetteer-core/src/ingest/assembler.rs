use std::collections::{BTreeSet, HashMap};

use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use uuid::Uuid;

use crate::entity::{EntityFields, EntityKind, RumorTableData, TypedEntity, WeatherTableData};
use crate::ingest::extractor::TableFragment;
use crate::relationship::{RelationKind, RelationshipEdge};

/// Minimum similarity for matching a service's settlement name against the
/// settlement index when no explicit link exists.
const NAME_MATCH_THRESHOLD: f64 = 0.9;

#[derive(Debug, Default)]
pub struct Assembly {
    pub entities: Vec<TypedEntity>,
    pub edges: Vec<RelationshipEdge>,
    /// (derived id, source record id); more than one source can map to the
    /// same derived id when fragments were folded in.
    pub manifest: Vec<(Uuid, String)>,
    pub dropped_links: u32,
    pub folded_fragments: u32,
    pub broken_cycles: u32,
}

/// How one resolved link becomes an edge, given the kinds at both ends.
enum EdgePlan {
    Containment { parent_is_source: bool },
    Membership { member_is_source: bool },
    Reference,
}

fn edge_plan(from: EntityKind, to: EntityKind) -> EdgePlan {
    use EntityKind::{
        Character, Dwelling, Faction, Region, RumorTable, Service, Settlement, Site, SubArea,
        Waypoint, WeatherTable,
    };

    match (from, to) {
        // Geography owns what sits inside it.
        (Region, SubArea | Settlement | Waypoint | Dwelling | Site | WeatherTable | RumorTable) => {
            EdgePlan::Containment { parent_is_source: true }
        }
        (SubArea, Settlement | Waypoint | Dwelling | Site) => {
            EdgePlan::Containment { parent_is_source: true }
        }
        (SubArea | Settlement, Region) => EdgePlan::Containment { parent_is_source: false },
        (Waypoint | Dwelling | Site, Region | SubArea) => {
            EdgePlan::Containment { parent_is_source: false }
        }
        // Settlements own their establishments.
        (Settlement, Service) => EdgePlan::Containment { parent_is_source: true },
        (Service, Settlement) => EdgePlan::Containment { parent_is_source: false },
        // Characters belong to factions, whichever side names the link.
        (Character, Faction) => EdgePlan::Membership { member_is_source: true },
        (Faction, Character) => EdgePlan::Membership { member_is_source: false },
        _ => EdgePlan::Reference,
    }
}

/// Stage five. Sequential: the identifier index is frozen before any edge is
/// resolved, and the containment forest is enforced as edges are added.
pub struct Assembler;

struct ForestState {
    graph: DiGraphMap<Uuid, ()>,
    parent_of: HashMap<Uuid, Uuid>,
}

impl ForestState {
    fn new() -> Self {
        Self {
            graph: DiGraphMap::new(),
            parent_of: HashMap::new(),
        }
    }

    /// Outcome of offering a containment edge parent -> child.
    fn offer(&mut self, parent: Uuid, child: Uuid) -> ContainmentOutcome {
        match self.parent_of.get(&child) {
            Some(existing) if *existing == parent => ContainmentOutcome::Duplicate,
            // First-matched parent is authoritative; later candidates are
            // kept as reference edges.
            Some(_) => ContainmentOutcome::SecondParent,
            None => {
                if has_path_connecting(&self.graph, child, parent, None) {
                    return ContainmentOutcome::WouldCycle;
                }
                self.graph.add_edge(parent, child, ());
                self.parent_of.insert(child, parent);
                ContainmentOutcome::Added
            }
        }
    }

    fn has_parent(&self, child: Uuid) -> bool {
        self.parent_of.contains_key(&child)
    }
}

enum ContainmentOutcome {
    Added,
    Duplicate,
    SecondParent,
    WouldCycle,
}

impl Assembler {
    #[must_use]
    pub fn assemble(entities: Vec<TypedEntity>, fragments: Vec<TableFragment>) -> Assembly {
        let mut assembly = Assembly::default();

        let mut entities = entities;
        entities.sort_by(|a, b| a.source_identifier.cmp(&b.source_identifier));

        let mut extra_manifest: Vec<(Uuid, String)> = Vec::new();
        Self::fold_fragments(&mut entities, fragments, &mut extra_manifest, &mut assembly);

        entities.sort_by(|a, b| a.source_identifier.cmp(&b.source_identifier));

        // Phase two begins only once the index covers every entity.
        let by_source: HashMap<&str, Uuid> = entities
            .iter()
            .map(|e| (e.source_identifier.as_str(), e.id))
            .collect();
        let kind_of: HashMap<Uuid, EntityKind> = entities.iter().map(|e| (e.id, e.kind())).collect();

        let mut settlements: Vec<(String, Uuid)> = entities
            .iter()
            .filter(|e| e.kind() == EntityKind::Settlement)
            .map(|e| (e.name.to_ascii_lowercase(), e.id))
            .collect();
        settlements.sort();

        let mut forest = ForestState::new();
        let mut edges: BTreeSet<RelationshipEdge> = BTreeSet::new();

        for entity in &entities {
            for link in &entity.links {
                let Some(&target) = by_source.get(link.as_str()) else {
                    tracing::warn!(
                        record = %entity.source_identifier,
                        target = %link,
                        "dangling link dropped"
                    );
                    assembly.dropped_links += 1;
                    continue;
                };

                if target == entity.id {
                    assembly.dropped_links += 1;
                    continue;
                }

                let plan = edge_plan(entity.kind(), kind_of[&target]);
                Self::apply_plan(&plan, entity.id, target, &mut forest, &mut edges, &mut assembly);
            }
        }

        // A service whose links never reached a settlement still names its
        // parent in the title; match it against the settlement index.
        for entity in &entities {
            if entity.kind() != EntityKind::Service || forest.has_parent(entity.id) {
                continue;
            }
            let EntityFields::Service(data) = &entity.fields else {
                continue;
            };
            let Some(wanted) = data.settlement_name.as_deref() else {
                continue;
            };

            if let Some(parent) = best_settlement_match(&settlements, wanted) {
                let plan = EdgePlan::Containment { parent_is_source: false };
                Self::apply_plan(&plan, entity.id, parent, &mut forest, &mut edges, &mut assembly);
            }
        }

        assembly.manifest = entities
            .iter()
            .map(|e| (e.id, e.source_identifier.clone()))
            .chain(extra_manifest)
            .collect();
        assembly.manifest.sort();

        assembly.edges = edges.into_iter().collect();
        assembly.entities = entities;
        assembly
    }

    fn apply_plan(
        plan: &EdgePlan,
        from: Uuid,
        to: Uuid,
        forest: &mut ForestState,
        edges: &mut BTreeSet<RelationshipEdge>,
        assembly: &mut Assembly,
    ) {
        let (source, target, relation) = match plan {
            EdgePlan::Containment { parent_is_source } => {
                let (parent, child) = if *parent_is_source { (from, to) } else { (to, from) };
                match forest.offer(parent, child) {
                    ContainmentOutcome::Added => (parent, child, RelationKind::Containment),
                    ContainmentOutcome::Duplicate => return,
                    ContainmentOutcome::SecondParent => (parent, child, RelationKind::Reference),
                    ContainmentOutcome::WouldCycle => {
                        tracing::warn!(parent = %parent, child = %child, "containment cycle broken at last-added edge");
                        assembly.broken_cycles += 1;
                        return;
                    }
                }
            }
            EdgePlan::Membership { member_is_source } => {
                let (member, group) = if *member_is_source { (from, to) } else { (to, from) };
                (member, group, RelationKind::Membership)
            }
            EdgePlan::Reference => (from, to, RelationKind::Reference),
        };

        if let Ok(edge) = RelationshipEdge::new(source, target, relation) {
            edges.insert(edge);
        }
    }

    fn fold_fragments(
        entities: &mut Vec<TypedEntity>,
        fragments: Vec<TableFragment>,
        extra_manifest: &mut Vec<(Uuid, String)>,
        assembly: &mut Assembly,
    ) {
        let mut fragments = fragments;
        fragments.sort_by(|a, b| a.source_identifier.cmp(&b.source_identifier));

        for fragment in fragments {
            let position = entities
                .iter()
                .position(|e| e.source_identifier == fragment.anchor && e.kind() == fragment.kind);

            match position {
                Some(idx) => {
                    let parent = &mut entities[idx];
                    match &mut parent.fields {
                        EntityFields::WeatherTable(data) => data.rows.extend(fragment.rows),
                        EntityFields::RumorTable(data) => data.rows.extend(fragment.rows),
                        _ => unreachable!("fragment anchored to a non-table entity"),
                    }
                    extra_manifest.push((parent.id, fragment.source_identifier));
                    assembly.folded_fragments += 1;
                }
                None => {
                    // No owner in the graph: the fragment becomes a table of
                    // its own rather than vanishing.
                    tracing::warn!(
                        record = %fragment.source_identifier,
                        anchor = %fragment.anchor,
                        "fragment anchor unresolved, promoting to standalone table"
                    );
                    let fields = match fragment.kind {
                        EntityKind::WeatherTable => {
                            EntityFields::WeatherTable(WeatherTableData { rows: fragment.rows })
                        }
                        _ => EntityFields::RumorTable(RumorTableData { rows: fragment.rows }),
                    };
                    let name = match fragment.kind {
                        EntityKind::WeatherTable => "Weather",
                        _ => "Rumors",
                    };
                    entities.push(TypedEntity::new(
                        name.to_string(),
                        fields,
                        fragment.source_identifier,
                    ));
                }
            }
        }
    }
}

fn best_settlement_match(settlements: &[(String, Uuid)], wanted: &str) -> Option<Uuid> {
    let wanted = wanted.to_ascii_lowercase();

    if let Some((_, id)) = settlements.iter().find(|(name, _)| *name == wanted) {
        return Some(*id);
    }

    let mut best: Option<(f64, Uuid)> = None;
    for (name, id) in settlements {
        let score = strsim::jaro_winkler(name, &wanted);
        if score >= NAME_MATCH_THRESHOLD && best.is_none_or(|(b, _)| score > b) {
            best = Some((score, *id));
        }
    }
    best.map(|(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{
        RegionData, ServiceData, SettlementData, SettlementScale, SubAreaData, UnclassifiedData,
    };

    fn region(source: &str, name: &str) -> TypedEntity {
        TypedEntity::new(
            name.into(),
            EntityFields::Region(RegionData::default()),
            source.into(),
        )
    }

    fn settlement(source: &str, name: &str) -> TypedEntity {
        TypedEntity::new(
            name.into(),
            EntityFields::Settlement(SettlementData {
                scale: SettlementScale::Town,
                population: None,
                description: None,
            }),
            source.into(),
        )
    }

    fn service(source: &str, name: &str, settlement_name: Option<&str>) -> TypedEntity {
        TypedEntity::new(
            name.into(),
            EntityFields::Service(ServiceData {
                service_type: "Blacksmith".into(),
                settlement_name: settlement_name.map(str::to_string),
                description: None,
            }),
            source.into(),
        )
    }

    #[test]
    fn test_region_link_becomes_containment() {
        let town = settlement("town-1", "Rivergate");
        let vale = region("region-1", "The Vale").with_links(vec!["town-1".into()]);
        let (region_id, town_id) = (vale.id, town.id);

        let assembly = Assembler::assemble(vec![vale, town], vec![]);

        assert_eq!(assembly.edges.len(), 1);
        let edge = assembly.edges[0];
        assert_eq!(edge.relation, RelationKind::Containment);
        assert_eq!(edge.source_id, region_id);
        assert_eq!(edge.target_id, town_id);
    }

    #[test]
    fn test_reciprocal_links_do_not_duplicate_containment() {
        let town = settlement("town-1", "Rivergate").with_links(vec!["region-1".into()]);
        let vale = region("region-1", "The Vale").with_links(vec!["town-1".into()]);

        let assembly = Assembler::assemble(vec![vale, town], vec![]);

        let containments: Vec<_> = assembly
            .edges
            .iter()
            .filter(|e| e.relation == RelationKind::Containment)
            .collect();
        assert_eq!(containments.len(), 1);
        assert_eq!(assembly.edges.len(), 1);
    }

    #[test]
    fn test_second_containment_parent_becomes_reference() {
        let waypoint = TypedEntity::new(
            "Old Milestone".into(),
            EntityFields::SubArea(SubAreaData::default()),
            "wp-1".into(),
        );
        let first = region("region-1", "The Vale").with_links(vec!["wp-1".into()]);
        let second = region("region-2", "The Marches").with_links(vec!["wp-1".into()]);

        let assembly = Assembler::assemble(vec![first, second, waypoint], vec![]);

        let containment_count = assembly
            .edges
            .iter()
            .filter(|e| e.relation == RelationKind::Containment)
            .count();
        let reference_count = assembly
            .edges
            .iter()
            .filter(|e| e.relation == RelationKind::Reference)
            .count();

        assert_eq!(containment_count, 1);
        assert_eq!(reference_count, 1);
    }

    #[test]
    fn test_forest_rejects_cycle_at_last_added_edge() {
        let (a, b, c) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        let mut forest = ForestState::new();

        assert!(matches!(forest.offer(a, b), ContainmentOutcome::Added));
        assert!(matches!(forest.offer(b, c), ContainmentOutcome::Added));
        // c -> a would close the loop; the last-added edge loses.
        assert!(matches!(forest.offer(c, a), ContainmentOutcome::WouldCycle));
        // Duplicates are absorbed, different parents are demoted.
        assert!(matches!(forest.offer(a, b), ContainmentOutcome::Duplicate));
        assert!(matches!(forest.offer(c, b), ContainmentOutcome::SecondParent));
    }

    #[test]
    fn test_dangling_link_is_counted_not_fatal() {
        let vale = region("region-1", "The Vale").with_links(vec!["missing".into()]);

        let assembly = Assembler::assemble(vec![vale], vec![]);

        assert_eq!(assembly.dropped_links, 1);
        assert!(assembly.edges.is_empty());
    }

    #[test]
    fn test_service_parent_by_settlement_name() {
        let town = settlement("town-1", "Rivergate");
        let forge = service("svc-1", "Grimm Forge", Some("Rivergate"));
        let (town_id, forge_id) = (town.id, forge.id);

        let assembly = Assembler::assemble(vec![town, forge], vec![]);

        assert_eq!(assembly.edges.len(), 1);
        let edge = assembly.edges[0];
        assert_eq!(edge.relation, RelationKind::Containment);
        assert_eq!(edge.source_id, town_id);
        assert_eq!(edge.target_id, forge_id);
    }

    #[test]
    fn test_fragment_folds_into_anchor() {
        let table = TypedEntity::new(
            "Coast Weather".into(),
            EntityFields::WeatherTable(WeatherTableData {
                rows: vec![crate::record::RollRow::new("1-2".into(), "Rain".into())],
            }),
            "table-1".into(),
        );

        let fragment = TableFragment {
            source_identifier: "frag-1".into(),
            kind: EntityKind::WeatherTable,
            rows: vec![crate::record::RollRow::new("3-4".into(), "Hail".into())],
            anchor: "table-1".into(),
        };

        let assembly = Assembler::assemble(vec![table], vec![fragment]);

        assert_eq!(assembly.folded_fragments, 1);
        assert_eq!(assembly.entities.len(), 1);
        let EntityFields::WeatherTable(data) = &assembly.entities[0].fields else {
            panic!("expected weather table");
        };
        assert_eq!(data.rows.len(), 2);
        // Both source records appear in the manifest, mapped to one row.
        assert_eq!(assembly.manifest.len(), 2);
    }

    #[test]
    fn test_orphan_fragment_is_promoted() {
        let fragment = TableFragment {
            source_identifier: "frag-1".into(),
            kind: EntityKind::RumorTable,
            rows: vec![crate::record::RollRow::new("1".into(), "Gold in the hills".into())],
            anchor: "gone".into(),
        };

        let assembly = Assembler::assemble(vec![], vec![fragment]);

        assert_eq!(assembly.folded_fragments, 0);
        assert_eq!(assembly.entities.len(), 1);
        assert_eq!(assembly.entities[0].kind(), EntityKind::RumorTable);
    }

    #[test]
    fn test_unclassified_links_are_references() {
        let town = settlement("town-1", "Rivergate");
        let odd = TypedEntity::new(
            "odd".into(),
            EntityFields::Unclassified(UnclassifiedData::default()),
            "odd-1".into(),
        )
        .with_links(vec!["town-1".into()]);

        let assembly = Assembler::assemble(vec![odd, town], vec![]);

        assert_eq!(assembly.edges.len(), 1);
        assert_eq!(assembly.edges[0].relation, RelationKind::Reference);
    }
}
