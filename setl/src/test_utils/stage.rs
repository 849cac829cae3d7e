//! Scriptable stage task doubles.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::bail;
use crate::error::{ErrorKind, NodeResult};
use crate::stage::{StageContext, StageFactory, StageTask};
use crate::types::{PipelineId, StageKind};
use crate::workers::pool::WorkerSlot;

/// Behavior overrides for a [`MockStage`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MockStageBehavior {
    /// Fail the `start` call.
    pub fail_start: bool,
    /// Fail the `shutdown` call.
    pub fail_shutdown: bool,
}

/// A stage task double that records its lifecycle calls.
///
/// When constructed with a [`StageContext`], the mock holds one worker slot
/// while it is alive, so tests can observe pool utilization.
pub struct MockStage {
    pipeline_id: PipelineId,
    kind: StageKind,
    behavior: MockStageBehavior,
    pending: Vec<String>,
    context: Option<StageContext>,
    alive: AtomicBool,
    starts: AtomicUsize,
    shutdowns: AtomicUsize,
    slot: Mutex<Option<WorkerSlot>>,
}

impl MockStage {
    /// Creates a plain mock with default behavior and no collaborators.
    pub fn new(pipeline_id: PipelineId, kind: StageKind) -> Self {
        Self::with_context(pipeline_id, kind, None, MockStageBehavior::default(), Vec::new())
    }

    /// Creates a mock wired to collaborators with scripted behavior.
    pub fn with_context(
        pipeline_id: PipelineId,
        kind: StageKind,
        context: Option<StageContext>,
        behavior: MockStageBehavior,
        pending: Vec<String>,
    ) -> Self {
        Self {
            pipeline_id,
            kind,
            behavior,
            pending,
            context,
            alive: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            slot: Mutex::new(None),
        }
    }

    /// Number of `start` calls received.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::Acquire)
    }

    /// Number of `shutdown` calls received.
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::Acquire)
    }
}

#[async_trait]
impl StageTask for MockStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn pipeline_id(&self) -> PipelineId {
        self.pipeline_id
    }

    async fn start(&self) -> NodeResult<()> {
        self.starts.fetch_add(1, Ordering::AcqRel);

        if self.behavior.fail_start {
            bail!(
                ErrorKind::StageStartFailed,
                "Mock stage was scripted to fail on start",
                format!("pipeline {} stage {}", self.pipeline_id, self.kind)
            );
        }

        if let Some(context) = &self.context {
            *self.slot.lock().unwrap() = context.workers.try_acquire();
        }

        self.alive.store(true, Ordering::Release);
        Ok(())
    }

    async fn shutdown(&self) -> NodeResult<()> {
        self.shutdowns.fetch_add(1, Ordering::AcqRel);
        self.alive.store(false, Ordering::Release);
        self.slot.lock().unwrap().take();

        if self.behavior.fail_shutdown {
            bail!(
                ErrorKind::StageShutdownFailed,
                "Mock stage was scripted to fail on shutdown",
                format!("pipeline {} stage {}", self.pipeline_id, self.kind)
            );
        }

        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn pending_work(&self) -> Vec<String> {
        self.pending.clone()
    }
}

/// Records every [`MockStage`] a factory constructs.
#[derive(Clone, Default)]
pub struct StageRecorder {
    created: Arc<Mutex<Vec<Arc<MockStage>>>>,
}

impl StageRecorder {
    /// All constructed instances, in construction order.
    pub fn created(&self) -> Vec<Arc<MockStage>> {
        self.created.lock().unwrap().clone()
    }

    /// Number of constructed instances.
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    /// The most recently constructed instance for a (pipeline, stage) pair.
    pub fn latest(&self, pipeline_id: PipelineId, kind: StageKind) -> Option<Arc<MockStage>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|stage| stage.pipeline_id() == pipeline_id && stage.kind() == kind)
            .cloned()
    }

    fn record(&self, stage: &Arc<MockStage>) {
        self.created.lock().unwrap().push(Arc::clone(stage));
    }
}

/// Builds a factory with all four stage kinds registered to produce recording
/// mocks with per-(pipeline, stage) behavior.
pub fn factory_with<B>(recorder: &StageRecorder, behavior: B) -> StageFactory
where
    B: Fn(PipelineId, StageKind) -> MockStageBehavior + Send + Sync + Clone + 'static,
{
    let mut factory = StageFactory::new();

    for kind in StageKind::ALL {
        let recorder = recorder.clone();
        let behavior = behavior.clone();

        factory.register(kind, move |pipeline_id, context| {
            // Each instance gets a distinct pending item so tests can tell
            // superseding instances apart.
            let sequence = recorder.created_count();
            let stage = Arc::new(MockStage::with_context(
                pipeline_id,
                kind,
                Some(context.clone()),
                behavior(pipeline_id, kind),
                vec![format!("work-{sequence}")],
            ));
            recorder.record(&stage);

            Ok(stage as Arc<dyn StageTask>)
        });
    }

    factory
}

/// Builds a factory producing well-behaved recording mocks.
pub fn mock_factory(recorder: &StageRecorder) -> StageFactory {
    factory_with(recorder, |_, _| MockStageBehavior::default())
}

/// Builds a factory whose given stage kind fails on `start`.
pub fn failing_start_factory(recorder: &StageRecorder, failing: StageKind) -> StageFactory {
    factory_with(recorder, move |_, kind| MockStageBehavior {
        fail_start: kind == failing,
        ..MockStageBehavior::default()
    })
}

/// Builds a factory whose given stage kind fails on `shutdown`.
pub fn failing_shutdown_factory(recorder: &StageRecorder, failing: StageKind) -> StageFactory {
    factory_with(recorder, move |_, kind| MockStageBehavior {
        fail_shutdown: kind == failing,
        ..MockStageBehavior::default()
    })
}
