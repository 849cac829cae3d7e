//! Trait seams for the external collaborators the controller drives.
//!
//! The node control plane does not implement distributed coordination, the
//! manager transport, or the pipeline resource services; it consumes them
//! through these interfaces. Test doubles live in [`crate::test_utils`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::assignment::TaskAssignment;
use crate::error::NodeResult;
use crate::types::{NodeId, PipelineId, StageKind};

/// Distributed arbitration layer tracking node membership and tooling locks.
#[async_trait]
pub trait ArbitrationClient: Send + Sync {
    /// Registers the node with the arbitration layer.
    async fn init_node(&self, node_id: NodeId) -> NodeResult<()>;

    /// Deregisters the node from the arbitration layer.
    async fn destroy_node(&self, node_id: NodeId) -> NodeResult<()>;

    /// Releases node-wide arbitration tooling resources.
    async fn release_tooling(&self) -> NodeResult<()>;

    /// Releases arbitration tooling scoped to one pipeline.
    async fn release_pipeline_tooling(&self, pipeline_id: PipelineId) -> NodeResult<()>;
}

/// Handler invoked when the distributed coordination session expires.
pub trait SessionExpiryListener: Send + Sync {
    fn session_expired(&self);
}

/// Client connection to the distributed coordination service.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Registers a handler invoked whenever the coordination session expires.
    fn register_session_expiry(&self, listener: Arc<dyn SessionExpiryListener>);

    /// Tears down the client connection.
    async fn shutdown(&self) -> NodeResult<()>;
}

/// Receives the task assignment batches the manager pushes to this node.
#[async_trait]
pub trait AssignmentListener: Send + Sync {
    /// Consumes one batch of assignment events.
    ///
    /// Returns the batch acceptance indicator; stage start/stop failures that
    /// are not suppressed by the teardown paths surface as the error.
    async fn process(&self, batch: &[TaskAssignment]) -> NodeResult<bool>;
}

/// Transport carrying task assignments from the manager to this node.
#[async_trait]
pub trait TaskTransport: Send + Sync {
    /// Installs the listener invoked for every arriving assignment batch.
    fn add_listener(&self, listener: Arc<dyn AssignmentListener>);

    /// Notifies the manager that this node is stopping.
    async fn stop_node(&self) -> NodeResult<()>;
}

/// A shared resource scoped to one pipeline, such as its connection pool or
/// its dialect binding.
///
/// Resources are owned by the controller's release routine; stage tasks only
/// consume them while registered and never release them directly.
#[async_trait]
pub trait PipelineResource: Send + Sync {
    /// Name of the resource, used in logs.
    fn name(&self) -> &str;

    /// Releases everything held for the pipeline. Must be idempotent: releasing
    /// a pipeline that holds nothing is a no-op.
    async fn release(&self, pipeline_id: PipelineId) -> NodeResult<()>;
}

/// Collector aggregating per-stage timing and throughput.
pub trait StageMetricsCollector: Send + Sync {
    /// Renders the duration/count histogram for one (pipeline, stage) pair.
    fn histogram(&self, pipeline_id: PipelineId, stage: StageKind) -> String;

    /// Toggles profiling on the collector.
    fn set_profiling(&self, enabled: bool);

    /// Returns whether profiling is enabled.
    fn profiling(&self) -> bool;
}
