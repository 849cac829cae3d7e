//! Manager-issued task assignment events.
//!
//! The manager pushes batches of [`TaskAssignment`] records to each node; the
//! controller consumes every batch exactly once and does not retain it.

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, NodeResult};
use crate::types::{PipelineId, StageKind};

/// Directive the manager issues for one stage of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageDirective {
    /// Construct and start a fresh stage task.
    Create,
    /// Remove and shut down the registered stage task.
    Remove,
}

/// One manager-issued assignment for a pipeline.
///
/// `stages` and `directives` are parallel lists applied strictly in order; a
/// later directive for the same stage kind supersedes the table entry left by
/// an earlier one. When `shutdown` is set the lists are ignored and the whole
/// pipeline is torn down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    /// The pipeline this assignment applies to.
    pub pipeline_id: PipelineId,
    /// Stage kinds, parallel to `directives`.
    #[serde(default)]
    pub stages: Vec<StageKind>,
    /// Directives, parallel to `stages`.
    #[serde(default)]
    pub directives: Vec<StageDirective>,
    /// When set, tear down every stage of the pipeline and release its resources.
    #[serde(default)]
    pub shutdown: bool,
}

impl TaskAssignment {
    /// Builds an activation/update assignment from (stage, directive) pairs.
    pub fn update(
        pipeline_id: PipelineId,
        pairs: impl IntoIterator<Item = (StageKind, StageDirective)>,
    ) -> Self {
        let (stages, directives) = pairs.into_iter().unzip();
        Self {
            pipeline_id,
            stages,
            directives,
            shutdown: false,
        }
    }

    /// Builds a full pipeline shutdown assignment.
    pub fn shutdown_pipeline(pipeline_id: PipelineId) -> Self {
        Self {
            pipeline_id,
            stages: Vec::new(),
            directives: Vec::new(),
            shutdown: true,
        }
    }

    /// Returns the (stage, directive) pairs of this assignment, in order.
    ///
    /// Fails when the parallel lists disagree in length, which means the
    /// assignment was corrupted in transport.
    pub fn pairs(&self) -> NodeResult<Vec<(StageKind, StageDirective)>> {
        if self.stages.len() != self.directives.len() {
            bail!(
                ErrorKind::InvalidAssignment,
                "Stage and directive lists differ in length",
                format!(
                    "pipeline {}: {} stages, {} directives",
                    self.pipeline_id,
                    self.stages.len(),
                    self.directives.len()
                )
            );
        }

        Ok(self
            .stages
            .iter()
            .copied()
            .zip(self.directives.iter().copied())
            .collect())
    }
}
