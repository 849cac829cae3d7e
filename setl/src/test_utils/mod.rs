//! Test doubles for the controller's collaborators and stage tasks.
//!
//! Everything here records the calls it receives so tests can assert on the
//! controller's behavior without real stages, transports, or coordination.

pub mod services;
pub mod stage;
