//! Boolean broadcast gate.
//!
//! A [`Gate`] holds one of two states, open or closed. Any number of tasks may
//! wait for it to open; waiting returns immediately when the gate is already
//! open and otherwise parks the task until a concurrent [`Gate::open`] call.
//! Opening releases every parked waiter at once, not just one.
//!
//! Typical use is initialization/authorization control: tasks without
//! permission park on the gate, and all of them pass quickly once permission
//! is granted.
//!
//! ```no_run
//! # async fn example() -> setl::error::NodeResult<()> {
//! use setl::concurrency::gate::Gate;
//!
//! let gate = Gate::new(true);
//! gate.wait_open().await?; // already open, returns immediately
//!
//! gate.close();
//! gate.wait_open().await?; // parks until another task calls gate.open()
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{ErrorKind, NodeResult};
use crate::node_error;

/// A two-state broadcast gate.
///
/// Clones share the same state. Transitions are idempotent: setting the gate
/// to its current state is a no-op that wakes nobody. A `close` call never
/// disturbs waiters already parked; they are released only by a later `open`.
#[derive(Debug, Clone)]
pub struct Gate {
    state: watch::Sender<bool>,
}

impl Gate {
    /// Creates a gate with an explicit initial state.
    pub fn new(open: bool) -> Self {
        let (state, _) = watch::channel(open);
        Self { state }
    }

    /// Opens the gate, releasing all currently parked waiters.
    ///
    /// A no-op when the gate is already open.
    pub fn open(&self) {
        self.state.send_if_modified(|open| {
            if *open {
                false
            } else {
                *open = true;
                true
            }
        });
    }

    /// Closes the gate so that new waiters park again.
    ///
    /// Waiters parked before this call are unaffected; a no-op when the gate
    /// is already closed.
    pub fn close(&self) {
        self.state.send_if_modified(|open| {
            if *open {
                *open = false;
                true
            } else {
                false
            }
        });
    }

    /// Returns the current state without blocking.
    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }

    /// Waits until the gate is open.
    ///
    /// Returns immediately when the gate is already open. The returned future
    /// does not borrow the gate, so waiters may outlive the handle they were
    /// created from; when every handle to the gate is dropped while a waiter
    /// is parked, the wait fails with [`ErrorKind::WaitCanceled`].
    pub fn wait_open(&self) -> impl Future<Output = NodeResult<()>> + Send + use<> {
        let mut state = self.state.subscribe();

        async move {
            state.wait_for(|open| *open).await.map(|_| ()).map_err(|_| {
                node_error!(
                    ErrorKind::WaitCanceled,
                    "Gate was dropped while waiting for it to open"
                )
            })
        }
    }

    /// Waits until the gate is open, failing once `timeout` elapses.
    ///
    /// A closed gate with a zero timeout fails immediately with
    /// [`ErrorKind::WaitTimeout`].
    pub fn wait_open_timeout(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = NodeResult<()>> + Send + use<> {
        let wait = self.wait_open();

        async move {
            match tokio::time::timeout(timeout, wait).await {
                Ok(result) => result,
                Err(_) => Err(node_error!(
                    ErrorKind::WaitTimeout,
                    "Timed out waiting for gate to open",
                    format!("timeout: {timeout:?}")
                )),
            }
        }
    }
}
