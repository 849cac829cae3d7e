//! Metrics definitions for node control-plane monitoring.

/// Label for pipeline ID in metrics.
pub const PIPELINE_ID_LABEL: &str = "pipeline_id";

/// Label for stage kind in metrics.
pub const STAGE_LABEL: &str = "stage";

/// Gauge of pipelines currently registered on this node.
pub const SETL_NODE_ACTIVE_PIPELINES: &str = "setl_node_active_pipelines";

/// Counter for stage tasks started.
pub const SETL_NODE_STAGES_STARTED_TOTAL: &str = "setl_node_stages_started_total";

/// Counter for stage tasks shut down.
pub const SETL_NODE_STAGES_STOPPED_TOTAL: &str = "setl_node_stages_stopped_total";

/// Counter for full pipeline shutdowns processed.
pub const SETL_NODE_PIPELINE_SHUTDOWNS_TOTAL: &str = "setl_node_pipeline_shutdowns_total";
