//! Recording doubles for the controller's external collaborators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::bail;
use crate::controller::NodeServices;
use crate::error::{ErrorKind, NodeResult};
use crate::services::{
    ArbitrationClient, AssignmentListener, CoordinationClient, PipelineResource,
    SessionExpiryListener, StageMetricsCollector, TaskTransport,
};
use crate::types::{NodeId, PipelineId, StageKind};

/// Recording arbitration layer double.
///
/// Calls are recorded before scripted failures are raised, so tests can
/// assert that a step was attempted even when it failed.
#[derive(Default)]
pub struct RecordingArbitration {
    inited: Mutex<Vec<NodeId>>,
    destroyed: Mutex<Vec<NodeId>>,
    tooling_releases: AtomicUsize,
    pipeline_tooling_releases: Mutex<Vec<PipelineId>>,
    /// Fail `destroy_node` calls.
    pub fail_destroy: AtomicBool,
}

impl RecordingArbitration {
    /// Node ids passed to `init_node`, in call order.
    pub fn inited(&self) -> Vec<NodeId> {
        self.inited.lock().unwrap().clone()
    }

    /// Node ids passed to `destroy_node`, in call order.
    pub fn destroyed(&self) -> Vec<NodeId> {
        self.destroyed.lock().unwrap().clone()
    }

    /// Number of node-wide tooling releases.
    pub fn tooling_releases(&self) -> usize {
        self.tooling_releases.load(Ordering::Acquire)
    }

    /// Pipeline ids whose tooling was released, in call order.
    pub fn pipeline_tooling_releases(&self) -> Vec<PipelineId> {
        self.pipeline_tooling_releases.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArbitrationClient for RecordingArbitration {
    async fn init_node(&self, node_id: NodeId) -> NodeResult<()> {
        self.inited.lock().unwrap().push(node_id);
        Ok(())
    }

    async fn destroy_node(&self, node_id: NodeId) -> NodeResult<()> {
        self.destroyed.lock().unwrap().push(node_id);

        if self.fail_destroy.load(Ordering::Acquire) {
            bail!(
                ErrorKind::ArbitrationFailed,
                "Arbitration double was scripted to fail node deregistration"
            );
        }

        Ok(())
    }

    async fn release_tooling(&self) -> NodeResult<()> {
        self.tooling_releases.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn release_pipeline_tooling(&self, pipeline_id: PipelineId) -> NodeResult<()> {
        self.pipeline_tooling_releases
            .lock()
            .unwrap()
            .push(pipeline_id);
        Ok(())
    }
}

/// Recording coordination client double.
#[derive(Default)]
pub struct RecordingCoordination {
    listener: Mutex<Option<Arc<dyn SessionExpiryListener>>>,
    shutdowns: AtomicUsize,
    /// Fail `shutdown` calls.
    pub fail_shutdown: AtomicBool,
}

impl RecordingCoordination {
    /// Whether a session-expiry listener was registered.
    pub fn has_listener(&self) -> bool {
        self.listener.lock().unwrap().is_some()
    }

    /// Number of `shutdown` calls received.
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::Acquire)
    }

    /// Fires the registered session-expiry listener, if any.
    pub fn expire_session(&self) {
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.session_expired();
        }
    }
}

#[async_trait]
impl CoordinationClient for RecordingCoordination {
    fn register_session_expiry(&self, listener: Arc<dyn SessionExpiryListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    async fn shutdown(&self) -> NodeResult<()> {
        self.shutdowns.fetch_add(1, Ordering::AcqRel);

        if self.fail_shutdown.load(Ordering::Acquire) {
            bail!(
                ErrorKind::CoordinationFailed,
                "Coordination double was scripted to fail shutdown"
            );
        }

        Ok(())
    }
}

/// Recording manager transport double.
#[derive(Default)]
pub struct RecordingTransport {
    listener: Mutex<Option<Arc<dyn AssignmentListener>>>,
    stop_calls: AtomicUsize,
    /// Fail `stop_node` calls.
    pub fail_stop: AtomicBool,
}

impl RecordingTransport {
    /// The registered assignment listener, if any.
    pub fn listener(&self) -> Option<Arc<dyn AssignmentListener>> {
        self.listener.lock().unwrap().clone()
    }

    /// Number of `stop_node` calls received.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl TaskTransport for RecordingTransport {
    fn add_listener(&self, listener: Arc<dyn AssignmentListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    async fn stop_node(&self) -> NodeResult<()> {
        self.stop_calls.fetch_add(1, Ordering::AcqRel);

        if self.fail_stop.load(Ordering::Acquire) {
            bail!(
                ErrorKind::TransportFailed,
                "Transport double was scripted to fail stop notification"
            );
        }

        Ok(())
    }
}

/// Recording pipeline resource double.
///
/// Release attempts are recorded before scripted failures are raised.
pub struct RecordingResource {
    name: String,
    releases: Mutex<Vec<PipelineId>>,
    /// Fail `release` calls.
    pub fail: AtomicBool,
}

impl RecordingResource {
    /// Creates a named resource double.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            releases: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Pipeline ids passed to `release`, in call order.
    pub fn releases(&self) -> Vec<PipelineId> {
        self.releases.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineResource for RecordingResource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn release(&self, pipeline_id: PipelineId) -> NodeResult<()> {
        self.releases.lock().unwrap().push(pipeline_id);

        if self.fail.load(Ordering::Acquire) {
            bail!(
                ErrorKind::ResourceReleaseFailed,
                "Resource double was scripted to fail release",
                format!("resource {} pipeline {pipeline_id}", self.name)
            );
        }

        Ok(())
    }
}

/// Stage aggregation collector double with a static histogram rendering.
#[derive(Default)]
pub struct StaticCollector {
    profiling: AtomicBool,
}

impl StaticCollector {
    /// Creates a collector double with profiling disabled.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StageMetricsCollector for StaticCollector {
    fn histogram(&self, pipeline_id: PipelineId, stage: StageKind) -> String {
        format!("pipeline:{pipeline_id} stage:{stage} samples:0")
    }

    fn set_profiling(&self, enabled: bool) {
        self.profiling.store(enabled, Ordering::Release);
    }

    fn profiling(&self) -> bool {
        self.profiling.load(Ordering::Acquire)
    }
}

/// Bundle of recording collaborators plus the [`NodeServices`] view handed to
/// the controller under test.
pub struct TestServices {
    pub arbitration: Arc<RecordingArbitration>,
    pub coordination: Arc<RecordingCoordination>,
    pub transport: Arc<RecordingTransport>,
    pub connection_pools: Arc<RecordingResource>,
    pub dialects: Arc<RecordingResource>,
    pub collector: Arc<StaticCollector>,
}

impl TestServices {
    /// Creates a fresh bundle of recording doubles.
    pub fn new() -> Self {
        Self {
            arbitration: Arc::new(RecordingArbitration::default()),
            coordination: Arc::new(RecordingCoordination::default()),
            transport: Arc::new(RecordingTransport::default()),
            connection_pools: Arc::new(RecordingResource::new("connection pool")),
            dialects: Arc::new(RecordingResource::new("db dialect")),
            collector: Arc::new(StaticCollector::new()),
        }
    }

    /// Returns the [`NodeServices`] view over these doubles.
    pub fn services(&self) -> NodeServices {
        NodeServices {
            arbitration: Arc::clone(&self.arbitration) as Arc<dyn ArbitrationClient>,
            coordination: Arc::clone(&self.coordination) as Arc<dyn CoordinationClient>,
            transport: Arc::clone(&self.transport) as Arc<dyn TaskTransport>,
            connection_pools: Arc::clone(&self.connection_pools) as Arc<dyn PipelineResource>,
            dialects: Arc::clone(&self.dialects) as Arc<dyn PipelineResource>,
            collector: Arc::clone(&self.collector) as Arc<dyn StageMetricsCollector>,
        }
    }
}

impl Default for TestServices {
    fn default() -> Self {
        Self::new()
    }
}
