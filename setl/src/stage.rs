//! Stage task seam and registered-constructor factory.
//!
//! The controller treats the four stage kinds polymorphically through
//! [`StageTask`]; concrete stage implementations live outside this crate and
//! are wired in by registering a constructor per kind on a [`StageFactory`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bail;
use crate::error::{ErrorKind, NodeResult};
use crate::services::StageMetricsCollector;
use crate::types::{PipelineId, StageKind};
use crate::workers::pool::WorkerPool;

/// One running stage task of a pipeline.
///
/// An instance is owned exclusively by the stage table entry holding it, from
/// the moment [`StageTask::start`] returns until it is removed and shut down.
/// Shutdown is final: a retired instance is never restarted, a new `create`
/// directive constructs a fresh one.
#[async_trait]
pub trait StageTask: Send + Sync {
    /// The stage kind this task implements.
    fn kind(&self) -> StageKind;

    /// The pipeline this task is bound to.
    fn pipeline_id(&self) -> PipelineId;

    /// Starts the task. May block the caller for the duration of the stage's
    /// own setup.
    async fn start(&self) -> NodeResult<()>;

    /// Stops the task. May block the caller for the duration of the stage's
    /// own teardown.
    async fn shutdown(&self) -> NodeResult<()>;

    /// Whether the task considers itself running.
    fn is_alive(&self) -> bool;

    /// Snapshot of the work items currently pending in this stage.
    fn pending_work(&self) -> Vec<String>;
}

/// Shared collaborators handed to every stage constructor.
///
/// Stages consume these while registered; releasing them is the controller's
/// job, never the stage's.
#[derive(Clone)]
pub struct StageContext {
    /// Node-wide worker pool shared by all stages.
    pub workers: Arc<WorkerPool>,
    /// Collector the stage reports its timings to.
    pub collector: Arc<dyn StageMetricsCollector>,
}

/// Constructor for one stage kind.
pub type StageConstructor =
    Arc<dyn Fn(PipelineId, &StageContext) -> NodeResult<Arc<dyn StageTask>> + Send + Sync>;

/// Registered-constructor lookup table keyed by stage kind.
///
/// Adding a stage kind is a registration, not a new branch in the controller.
#[derive(Clone, Default)]
pub struct StageFactory {
    constructors: HashMap<StageKind, StageConstructor>,
}

impl StageFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the constructor for a stage kind, replacing any previous one.
    pub fn register<F>(&mut self, kind: StageKind, constructor: F)
    where
        F: Fn(PipelineId, &StageContext) -> NodeResult<Arc<dyn StageTask>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Arc::new(constructor));
    }

    /// Returns whether a constructor is registered for the kind.
    pub fn registered(&self, kind: StageKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Constructs a stage task of the given kind bound to the pipeline.
    pub fn build(
        &self,
        kind: StageKind,
        pipeline_id: PipelineId,
        context: &StageContext,
    ) -> NodeResult<Arc<dyn StageTask>> {
        let Some(constructor) = self.constructors.get(&kind) else {
            bail!(
                ErrorKind::StageNotRegistered,
                "No constructor registered for stage kind",
                format!("stage kind: {kind}")
            );
        };

        constructor(pipeline_id, context)
    }
}

impl fmt::Debug for StageFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageFactory")
            .field("registered", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
