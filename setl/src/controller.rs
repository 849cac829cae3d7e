//! Node task controller.
//!
//! [`NodeController`] owns the authoritative table of running stage tasks per
//! pipeline and applies the task assignment batches the manager pushes to the
//! node. It supervises stage start/stop ordering, teardown resource release,
//! and the node's own start/stop sequencing against the arbitration and
//! coordination layers.

use std::net::UdpSocket;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use setl_config::shared::NodeConfig;
use sysinfo::System;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::assignment::{StageDirective, TaskAssignment};
use crate::bail;
use crate::error::{ErrorKind, NodeResult};
use crate::metrics::{
    PIPELINE_ID_LABEL, SETL_NODE_ACTIVE_PIPELINES, SETL_NODE_PIPELINE_SHUTDOWNS_TOTAL,
    SETL_NODE_STAGES_STARTED_TOTAL, SETL_NODE_STAGES_STOPPED_TOTAL, STAGE_LABEL,
};
use crate::monitor::{MemoryStats, system_summary};
use crate::node_error;
use crate::registry::{PipelineRegistry, StageTable};
use crate::services::{
    ArbitrationClient, AssignmentListener, CoordinationClient, PipelineResource,
    SessionExpiryListener, StageMetricsCollector, TaskTransport,
};
use crate::stage::{StageContext, StageFactory};
use crate::types::{NodeId, PipelineId, StageKind};
use crate::workers::pool::WorkerPool;

/// Version string reported by the monitoring surface.
const NODE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// External collaborators the controller drives.
pub struct NodeServices {
    /// Distributed arbitration layer.
    pub arbitration: Arc<dyn ArbitrationClient>,
    /// Distributed coordination client connection.
    pub coordination: Arc<dyn CoordinationClient>,
    /// Transport delivering manager assignments.
    pub transport: Arc<dyn TaskTransport>,
    /// Per-pipeline database connection pools.
    pub connection_pools: Arc<dyn PipelineResource>,
    /// Per-pipeline database dialect bindings.
    pub dialects: Arc<dyn PipelineResource>,
    /// Stage aggregation collector.
    pub collector: Arc<dyn StageMetricsCollector>,
}

/// Orchestrates the S.E.T.L stage tasks running on this node.
///
/// The registry held here is the single source of truth for what is running;
/// it supports concurrent monitoring reads and concurrent structural mutation
/// without external locking. Assignment events within one batch are applied in
/// input order; batches racing each other for the same pipeline are not
/// serialized and resolve as last-write-wins.
pub struct NodeController {
    config: NodeConfig,
    registry: PipelineRegistry,
    factory: StageFactory,
    workers: Arc<WorkerPool>,
    services: NodeServices,
    drain_grace: Duration,
    system: Mutex<System>,
}

impl NodeController {
    /// Creates a controller from its configuration, stage factory, and
    /// collaborator services.
    pub fn new(config: NodeConfig, factory: StageFactory, services: NodeServices) -> Arc<Self> {
        let workers = Arc::new(WorkerPool::new(config.workers as usize));
        services.collector.set_profiling(config.profiling);

        Arc::new(Self {
            drain_grace: Duration::from_millis(config.drain_grace_ms),
            registry: PipelineRegistry::new(),
            workers,
            system: Mutex::new(System::new()),
            config,
            factory,
            services,
        })
    }

    /// Starts the node.
    ///
    /// Verifies the node identity, registers the node with the arbitration
    /// layer, installs the session-expiry handler, and registers this
    /// controller as the transport's assignment listener. Identity failures
    /// are fatal startup errors, not runtime-recoverable conditions.
    pub async fn start(self: &Arc<Self>) -> NodeResult<()> {
        let node_id = self.init_node_identity()?;

        self.services.arbitration.init_node(node_id).await?;

        let session_expired = Arc::new(NodeSessionExpired {
            arbitration: Arc::clone(&self.services.arbitration),
            node_id,
        });
        self.services
            .coordination
            .register_session_expiry(session_expired);

        self.services
            .transport
            .add_listener(Arc::clone(self) as Arc<dyn AssignmentListener>);

        info!(node_id, "node controller started");
        Ok(())
    }

    /// Stops the node.
    ///
    /// Shuts down every registered stage task, then attempts, in order:
    /// deregistering the node from arbitration, releasing arbitration tooling,
    /// notifying the manager, and tearing down the coordination client. Each
    /// step is isolated; a failing step is logged and the cascade continues so
    /// the node makes maximal progress toward releasing its resources.
    pub async fn stop(&self) {
        info!("stopping node controller");

        for (pipeline_id, table) in self.registry.detach_all() {
            for task in table.take_all() {
                let stage = task.kind();
                if let Err(err) = task.shutdown().await {
                    error!(
                        pipeline_id,
                        stage = %stage,
                        error = %err,
                        "failed to shut down stage task during node stop"
                    );
                }
            }
        }
        gauge!(SETL_NODE_ACTIVE_PIPELINES).set(0.0);

        if let Some(node_id) = self.config.id {
            record_outcome(
                "deregister node from arbitration",
                self.services.arbitration.destroy_node(node_id).await,
            );
        }
        record_outcome(
            "release arbitration tooling",
            self.services.arbitration.release_tooling().await,
        );
        record_outcome(
            "notify manager of node stop",
            self.services.transport.stop_node().await,
        );
        record_outcome(
            "shut down coordination client",
            self.services.coordination.shutdown().await,
        );
    }

    /// Verifies the node identity and returns the node id.
    fn init_node_identity(&self) -> NodeResult<NodeId> {
        let Some(node_id) = self.config.id else {
            bail!(ErrorKind::NodeIdentityUnset, "Node id is not set");
        };

        info!(node_id, "initializing node identity");
        self.check_node_address(node_id)?;

        Ok(node_id)
    }

    /// Verifies that the configured node address belongs to a local interface.
    fn check_node_address(&self, node_id: NodeId) -> NodeResult<()> {
        // Binding an ephemeral port on the address proves it is local.
        if let Err(err) = UdpSocket::bind((self.config.host, 0)) {
            bail!(
                ErrorKind::NodeAddressMismatch,
                "Configured node address does not match any local interface",
                format!(
                    "node {node_id} is configured as {}:{}",
                    self.config.host, self.config.port
                ),
                source: err
            );
        }

        Ok(())
    }

    /// Tears down a whole pipeline after its table was detached.
    async fn shutdown_pipeline(&self, pipeline_id: PipelineId) {
        let Some(table) = self.registry.detach(pipeline_id) else {
            info!(pipeline_id, "pipeline is not running on this node, nothing to shut down");
            return;
        };

        info!(pipeline_id, stages = ?table.kinds(), "shutting down pipeline");

        for task in table.take_all() {
            let stage = task.kind();
            if let Err(err) = task.shutdown().await {
                error!(
                    pipeline_id,
                    stage = %stage,
                    error = %err,
                    "stage shutdown failed, continuing with remaining stages"
                );
            }
            counter!(
                SETL_NODE_STAGES_STOPPED_TOTAL,
                PIPELINE_ID_LABEL => pipeline_id.to_string(),
                STAGE_LABEL => stage.as_str()
            )
            .increment(1);
        }

        // Give in-flight stage work a chance to drain before its shared
        // resources disappear underneath it.
        sleep(self.drain_grace).await;

        if let Err(err) = self.release_pipeline_resources(pipeline_id).await {
            error!(pipeline_id, error = %err, "failed to release pipeline resources during teardown");
        }
        if let Err(err) = self
            .services
            .arbitration
            .release_pipeline_tooling(pipeline_id)
            .await
        {
            error!(pipeline_id, error = %err, "failed to release arbitration tooling during teardown");
        }

        counter!(SETL_NODE_PIPELINE_SHUTDOWNS_TOTAL).increment(1);
        gauge!(SETL_NODE_ACTIVE_PIPELINES).set(self.registry.len() as f64);
        info!(pipeline_id, "pipeline shut down");
    }

    /// Applies one activation/update assignment.
    async fn apply_assignment(&self, assignment: &TaskAssignment) -> NodeResult<()> {
        let pipeline_id = assignment.pipeline_id;
        let pairs = assignment.pairs()?;

        // A previous run of this pipeline may have left connections behind;
        // release before starting anything so stale resources never leak into
        // the new run.
        self.release_pipeline_resources(pipeline_id).await?;

        let table = self.registry.fetch_or_create(pipeline_id);

        let result = self.apply_directives(pipeline_id, &table, pairs).await;

        // Whatever happened above, an emptied (or never-filled) table must not
        // keep the pipeline listed as active.
        self.registry.prune_if_empty(pipeline_id);
        gauge!(SETL_NODE_ACTIVE_PIPELINES).set(self.registry.len() as f64);

        result
    }

    /// Walks the (stage, directive) pairs of one assignment in order.
    async fn apply_directives(
        &self,
        pipeline_id: PipelineId,
        table: &StageTable,
        pairs: Vec<(StageKind, StageDirective)>,
    ) -> NodeResult<()> {
        for (stage, directive) in pairs {
            match directive {
                StageDirective::Create => self.start_stage(pipeline_id, table, stage).await?,
                StageDirective::Remove => self.stop_stage(pipeline_id, table, stage).await?,
            }
        }

        Ok(())
    }

    /// Constructs, starts, and publishes a fresh stage task.
    ///
    /// Start failures propagate to the caller of `process`, leaving the batch
    /// partially applied.
    async fn start_stage(
        &self,
        pipeline_id: PipelineId,
        table: &StageTable,
        stage: StageKind,
    ) -> NodeResult<()> {
        if table.get(stage).is_some_and(|task| task.is_alive()) {
            warn!(pipeline_id, stage = %stage, "stage is already running, starting a replacement anyway");
        }

        let context = StageContext {
            workers: Arc::clone(&self.workers),
            collector: Arc::clone(&self.services.collector),
        };
        let task = self.factory.build(stage, pipeline_id, &context)?;
        task.start().await?;

        if let Some(superseded) = table.publish(Arc::clone(&task)) {
            // The superseded instance is abandoned, not shut down.
            warn!(
                pipeline_id,
                stage = %stage,
                was_alive = superseded.is_alive(),
                "replaced an existing stage task entry"
            );
        }

        counter!(
            SETL_NODE_STAGES_STARTED_TOTAL,
            PIPELINE_ID_LABEL => pipeline_id.to_string(),
            STAGE_LABEL => stage.as_str()
        )
        .increment(1);
        info!(pipeline_id, stage = %stage, "stage task started");
        Ok(())
    }

    /// Removes and shuts down one stage task.
    ///
    /// Shutdown failures propagate; a missing entry is a logged no-op.
    async fn stop_stage(
        &self,
        pipeline_id: PipelineId,
        table: &StageTable,
        stage: StageKind,
    ) -> NodeResult<()> {
        let Some(task) = table.remove(stage) else {
            info!(pipeline_id, stage = %stage, "stage is not running, nothing to remove");
            return Ok(());
        };

        task.shutdown().await?;

        counter!(
            SETL_NODE_STAGES_STOPPED_TOTAL,
            PIPELINE_ID_LABEL => pipeline_id.to_string(),
            STAGE_LABEL => stage.as_str()
        )
        .increment(1);
        info!(pipeline_id, stage = %stage, "stage task shut down");
        Ok(())
    }

    /// Releases the pipeline's shared resources (connection pool, dialect
    /// binding). Idempotent; the resources tolerate releasing a pipeline that
    /// holds nothing.
    async fn release_pipeline_resources(&self, pipeline_id: PipelineId) -> NodeResult<()> {
        self.services.connection_pools.release(pipeline_id).await?;
        self.services.dialects.release(pipeline_id).await?;
        Ok(())
    }
}

#[async_trait]
impl AssignmentListener for NodeController {
    /// Applies a batch of manager assignments in input order.
    ///
    /// Pipeline shutdown events never fail: every stage shutdown and resource
    /// release in that path is isolated and logged. Activation events
    /// propagate stage start/stop and resource release failures, leaving
    /// earlier events applied and later events unattempted.
    async fn process(&self, batch: &[TaskAssignment]) -> NodeResult<bool> {
        if batch.is_empty() {
            return Ok(true);
        }

        for assignment in batch {
            if assignment.shutdown {
                self.shutdown_pipeline(assignment.pipeline_id).await;
            } else {
                self.apply_assignment(assignment).await?;
            }
        }

        Ok(true)
    }
}

// ===================== monitoring surface ======================

impl NodeController {
    /// Serialized memory usage of the node host.
    pub fn heap_memory_usage(&self) -> NodeResult<String> {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let stats = MemoryStats::from_system(&mut system);

        serde_json::to_string(&stats).map_err(|err| {
            node_error!(
                ErrorKind::SerializationFailed,
                "Failed to serialize memory stats",
                source: err
            )
        })
    }

    /// Human-readable one-line summary of the host system.
    pub fn node_system_summary(&self) -> String {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        system_summary(&mut system)
    }

    /// Version of the node control plane.
    pub fn node_version(&self) -> &'static str {
        NODE_VERSION
    }

    /// Number of pipelines with at least one running stage.
    pub fn running_pipeline_count(&self) -> usize {
        self.registry.len()
    }

    /// Ids of the pipelines with at least one running stage.
    pub fn running_pipelines(&self) -> Vec<PipelineId> {
        self.registry.pipeline_ids()
    }

    /// Whether a task is registered for the (pipeline, stage) pair.
    ///
    /// Reports `false` for unknown pipelines instead of failing, and never
    /// creates a registry entry.
    pub fn is_stage_running(&self, pipeline_id: PipelineId, stage: StageKind) -> bool {
        self.registry.is_stage_running(pipeline_id, stage)
    }

    /// Duration/count histogram for one (pipeline, stage) pair.
    pub fn stage_aggregation(&self, pipeline_id: PipelineId, stage: StageKind) -> String {
        self.services.collector.histogram(pipeline_id, stage)
    }

    /// Listing of the work items currently pending in one stage.
    ///
    /// Reports a descriptive absence for stages that are not running instead
    /// of failing.
    pub fn pending_work(&self, pipeline_id: PipelineId, stage: StageKind) -> String {
        match self
            .registry
            .get(pipeline_id)
            .and_then(|table| table.get(stage))
        {
            Some(task) => format!("stage:{stage} pending:[{}]", task.pending_work().join(",")),
            None => format!("stage {stage} is not running on this node"),
        }
    }

    /// Number of worker slots currently held.
    pub fn worker_active_count(&self) -> usize {
        self.workers.active()
    }

    /// Configured worker pool size.
    pub fn worker_pool_size(&self) -> usize {
        self.workers.size()
    }

    /// Resizes the shared worker pool.
    pub fn set_worker_pool_size(&self, size: usize) {
        info!(size, "resizing worker pool");
        self.workers.resize(size);
    }

    /// Toggles profiling on the stage aggregation collector.
    pub fn set_profiling(&self, enabled: bool) {
        self.services.collector.set_profiling(enabled);
    }

    /// Whether stage aggregation profiling is enabled.
    pub fn profiling(&self) -> bool {
        self.services.collector.profiling()
    }
}

/// Re-registers the node with the arbitration layer after the coordination
/// session expires.
struct NodeSessionExpired {
    arbitration: Arc<dyn ArbitrationClient>,
    node_id: NodeId,
}

impl SessionExpiryListener for NodeSessionExpired {
    fn session_expired(&self) {
        warn!(
            node_id = self.node_id,
            "coordination session expired, re-registering node"
        );

        let arbitration = Arc::clone(&self.arbitration);
        let node_id = self.node_id;
        tokio::spawn(async move {
            if let Err(err) = arbitration.init_node(node_id).await {
                error!(node_id, error = %err, "failed to re-register node after session expiry");
            }
        });
    }
}

/// Logs the outcome of one best-effort node-stop step.
fn record_outcome(step: &str, result: NodeResult<()>) {
    match result {
        Ok(()) => info!(step, "node stop step completed"),
        Err(err) => error!(step, error = %err, "node stop step failed, continuing"),
    }
}
