use std::fmt::Debug;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// Client life cycle:
///
/// ```ascii
/// Shutdown -> Connecting -> Connected | ConnectionFailed
/// Connected -> WaitingForSocket -> ShuttingDown -> Shutdown
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ClientState {
    Shutdown,
    Connecting,
    Connected,
    ConnectionFailed,
    WaitingForSocket,
    ShuttingDown,
}

/// Server life cycle:
///
/// ```ascii
/// Shutdown -> Running -> WaitingForSocket -> ShuttingDown -> Shutdown
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ServerState {
    Shutdown,
    Running,
    WaitingForSocket,
    ShuttingDown,
}

/// A state that is published across threads. Waiting for a state blocks until exactly that
///  state is published, there is no spinning.
pub struct StateCell<S> {
    state: Mutex<S>,
    changed: Condvar,
}

impl <S: Copy + Eq + Debug> StateCell<S> {
    pub fn new(initial: S) -> StateCell<S> {
        StateCell {
            state: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> S {
        *self.state.lock()
    }

    pub fn set(&self, state: S) {
        let mut guard = self.state.lock();
        trace!(from = ?*guard, to = ?state, "state transition");
        *guard = state;
        self.changed.notify_all();
    }

    /// Atomically transitions from `from` to `to`, returning false (and leaving the state
    ///  unchanged) if the current state is not `from`
    pub fn transition(&self, from: S, to: S) -> bool {
        let mut guard = self.state.lock();
        if *guard != from {
            return false;
        }
        trace!(from = ?from, to = ?to, "state transition");
        *guard = to;
        self.changed.notify_all();
        true
    }

    pub fn wait_for(&self, state: S) {
        let mut guard = self.state.lock();
        while *guard != state {
            self.changed.wait(&mut guard);
        }
    }

    /// Returns false if `state` was not reached within `timeout`
    pub fn wait_for_timeout(&self, state: S, timeout: Duration) -> bool {
        let mut guard = self.state.lock();
        let result = self.changed.wait_while_for(&mut guard, |s| *s != state, timeout);
        !result.timed_out() || *guard == state
    }
}
