pub mod assignment;
pub mod concurrency;
pub mod controller;
pub mod error;
pub mod macros;
pub mod metrics;
pub mod monitor;
pub mod registry;
pub mod services;
pub mod stage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
