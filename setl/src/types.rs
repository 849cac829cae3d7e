//! Core identifier and stage-kind types shared across the node control plane.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one configured replication pipeline.
///
/// A pipeline id determines isolation between pipelines, in terms of stage
/// tasks, connection pools, and arbitration tooling.
pub type PipelineId = u64;

/// Identifier of one node in the replication cluster, assigned by the manager.
pub type NodeId = u64;

/// The four cooperating phases of a replication pipeline.
///
/// A pipeline runs up to one task per kind on a node; the controller treats
/// all kinds polymorphically through the [`crate::stage::StageTask`] seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Picks up changes from the source.
    Select,
    /// Extracts full row data for the selected changes.
    Extract,
    /// Transforms rows into the destination's shape.
    Transform,
    /// Loads transformed rows into the destination.
    Load,
}

impl StageKind {
    /// All stage kinds, in pipeline order.
    pub const ALL: [StageKind; 4] = [
        StageKind::Select,
        StageKind::Extract,
        StageKind::Transform,
        StageKind::Load,
    ];

    /// Returns the stage kind name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Select => "select",
            StageKind::Extract => "extract",
            StageKind::Transform => "transform",
            StageKind::Load => "load",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_kind_names() {
        assert_eq!(StageKind::Select.as_str(), "select");
        assert_eq!(StageKind::Extract.as_str(), "extract");
        assert_eq!(StageKind::Transform.as_str(), "transform");
        assert_eq!(StageKind::Load.as_str(), "load");
    }

    #[test]
    fn stage_kind_serde_round_trip() {
        for kind in StageKind::ALL {
            let encoded = serde_json::to_string(&kind).unwrap();
            let decoded: StageKind = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, kind);
        }
    }

    #[test]
    fn all_lists_every_kind_once() {
        assert_eq!(StageKind::ALL.len(), 4);
        for kind in StageKind::ALL {
            assert_eq!(StageKind::ALL.iter().filter(|k| **k == kind).count(), 1);
        }
    }
}
