//! Concurrency primitives for coordinating node subsystems.
//!
//! The [`gate`] module provides the boolean broadcast gate used to park tasks
//! until a condition (authorization, readiness) becomes true and to release
//! all of them at once when it does.

pub mod gate;
