//! Concurrent registry of running stage tasks, keyed by pipeline.
//!
//! The registry is the single source of truth the controller consults before
//! issuing any start/stop action; it is never inferred from task objects.
//! Both levels are concurrent maps with per-key atomic replace/remove, so
//! monitoring reads never block behind a slow pipeline teardown.
//!
//! Invariant: a pipeline id appears in the registry if and only if at least
//! one of its stages is believed to be running. Empty stage tables are pruned
//! as soon as the last stage is removed instead of lingering.
//!
//! Across concurrent callers the registry guarantees per-key atomicity and
//! nothing more: a remove racing a create for the same (pipeline, stage) pair
//! can leave either outcome, and callers must not assume one always wins.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::stage::StageTask;
use crate::types::{PipelineId, StageKind};

/// The running stage tasks of one pipeline, keyed by stage kind.
///
/// At most one task is registered per stage kind. Clones share the same table.
#[derive(Clone, Default)]
pub struct StageTable {
    tasks: Arc<DashMap<StageKind, Arc<dyn StageTask>>>,
}

impl StageTable {
    /// Creates an empty stage table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a task under its stage kind, returning the superseded entry.
    pub fn publish(&self, task: Arc<dyn StageTask>) -> Option<Arc<dyn StageTask>> {
        self.tasks.insert(task.kind(), task)
    }

    /// Removes and returns the task registered for a stage kind.
    pub fn remove(&self, kind: StageKind) -> Option<Arc<dyn StageTask>> {
        self.tasks.remove(&kind).map(|(_, task)| task)
    }

    /// Returns the task registered for a stage kind.
    pub fn get(&self, kind: StageKind) -> Option<Arc<dyn StageTask>> {
        self.tasks.get(&kind).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns whether a task is registered for the stage kind.
    pub fn contains(&self, kind: StageKind) -> bool {
        self.tasks.contains_key(&kind)
    }

    /// Returns the registered stage kinds.
    pub fn kinds(&self) -> Vec<StageKind> {
        self.tasks.iter().map(|entry| *entry.key()).collect()
    }

    /// Removes and returns every registered task.
    pub fn take_all(&self) -> Vec<Arc<dyn StageTask>> {
        let kinds = self.kinds();
        kinds
            .into_iter()
            .filter_map(|kind| self.remove(kind))
            .collect()
    }

    /// Returns whether no task is registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns the number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

impl fmt::Debug for StageTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageTable")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Node-wide registry mapping active pipelines to their stage tables.
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: DashMap<PipelineId, StageTable>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pipeline's stage table, creating it when absent.
    ///
    /// Activation path only. Query paths must use [`PipelineRegistry::get`] so
    /// that monitoring never fabricates empty pipeline entries.
    pub fn fetch_or_create(&self, pipeline_id: PipelineId) -> StageTable {
        self.pipelines.entry(pipeline_id).or_default().clone()
    }

    /// Returns the pipeline's stage table without creating one.
    pub fn get(&self, pipeline_id: PipelineId) -> Option<StageTable> {
        self.pipelines
            .get(&pipeline_id)
            .map(|entry| entry.value().clone())
    }

    /// Atomically removes and returns the pipeline's entire stage table.
    pub fn detach(&self, pipeline_id: PipelineId) -> Option<StageTable> {
        self.pipelines.remove(&pipeline_id).map(|(_, table)| table)
    }

    /// Removes and returns every registered pipeline with its stage table.
    pub fn detach_all(&self) -> Vec<(PipelineId, StageTable)> {
        let pipeline_ids = self.pipeline_ids();
        pipeline_ids
            .into_iter()
            .filter_map(|pipeline_id| {
                self.detach(pipeline_id)
                    .map(|table| (pipeline_id, table))
            })
            .collect()
    }

    /// Drops the pipeline's entry when its stage table holds no task.
    pub fn prune_if_empty(&self, pipeline_id: PipelineId) {
        self.pipelines
            .remove_if(&pipeline_id, |_, table| table.is_empty());
    }

    /// Returns whether a task is registered for the (pipeline, stage) pair.
    pub fn is_stage_running(&self, pipeline_id: PipelineId, kind: StageKind) -> bool {
        self.get(pipeline_id)
            .is_some_and(|table| table.contains(kind))
    }

    /// Returns the ids of all registered pipelines.
    pub fn pipeline_ids(&self) -> Vec<PipelineId> {
        self.pipelines.iter().map(|entry| *entry.key()).collect()
    }

    /// Returns the number of registered pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Returns whether no pipeline is registered.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("pipelines", &self.pipeline_ids())
            .finish()
    }
}
