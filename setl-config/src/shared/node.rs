use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of worker slots shared by all stages on the node.
const fn default_workers() -> u16 {
    16
}

/// Default grace interval, in milliseconds, granted to stages after shutdown
/// has been issued and before pipeline resources are released.
const fn default_drain_grace_ms() -> u64 {
    1_000
}

/// Default state of the stage aggregation profiling flag.
const fn default_profiling() -> bool {
    false
}

/// Errors raised by [`NodeConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The node identity was not assigned.
    #[error("node id is not set")]
    NodeIdMissing,

    /// The worker pool must be able to hold at least one worker.
    #[error("workers must be greater than 0")]
    WorkersZero,
}

/// Configuration for one node of the replication cluster.
///
/// A node's identity is assigned by the manager and must match the machine the
/// node actually runs on; startup refuses a node whose address is not local.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// The node identity assigned by the manager.
    ///
    /// Startup fails when this is left unset.
    pub id: Option<u64>,
    /// Address the manager believes this node is reachable at.
    pub host: IpAddr,
    /// Port the manager believes this node is reachable at.
    pub port: u16,
    /// Number of worker slots shared by all stages running on this node.
    #[serde(default = "default_workers")]
    pub workers: u16,
    /// Grace interval granted to stages between shutdown and resource release,
    /// in milliseconds.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
    /// Whether stage aggregation profiling starts enabled.
    #[serde(default = "default_profiling")]
    pub profiling: bool,
}

impl NodeConfig {
    /// Validates node configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_none() {
            return Err(ValidationError::NodeIdMissing);
        }

        if self.workers == 0 {
            return Err(ValidationError::WorkersZero);
        }

        Ok(())
    }
}
