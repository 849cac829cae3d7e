//! Shared configuration types for the node control plane.

mod node;

pub use node::{NodeConfig, ValidationError};
