use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Parent owns child. Containment edges must form a forest.
    Containment,
    /// Non-owning pointer.
    Reference,
    /// Many-to-many association (member -> group).
    Membership,
}

impl RelationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Containment => "containment",
            Self::Reference => "reference",
            Self::Membership => "membership",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "containment" => Ok(Self::Containment),
            "reference" => Ok(Self::Reference),
            "membership" => Ok(Self::Membership),
            _ => Err(crate::Error::InvalidRelationKind(s.to_string())),
        }
    }
}

/// One row of the output edge table. For containment the source is the
/// parent; for membership the source is the member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relation: RelationKind,
}

impl RelationshipEdge {
    pub fn new(source_id: Uuid, target_id: Uuid, relation: RelationKind) -> crate::Result<Self> {
        if source_id == target_id {
            return Err(crate::Error::SelfReference);
        }
        Ok(Self {
            source_id,
            target_id,
            relation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_kind_round_trip() {
        for kind in [
            RelationKind::Containment,
            RelationKind::Reference,
            RelationKind::Membership,
        ] {
            let parsed: RelationKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_self_reference_rejected() {
        let id = Uuid::now_v7();
        let result = RelationshipEdge::new(id, id, RelationKind::Reference);
        assert!(result.is_err());
    }
}
