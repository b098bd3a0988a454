//! Identity status cache with a blocking wait.
//!
//! Levels arrive asynchronously in NickServ notices. A caller that needs a
//! level sends the query and parks on the condvar until the reply lands, the
//! timeout passes or the cache is cancelled at shutdown.

use crate::error::StatusError;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Default)]
struct StatusState {
    levels: HashMap<String, i32>,
    closed: bool,
}

#[derive(Default)]
pub struct StatusCache {
    state: Mutex<StatusState>,
    changed: Condvar,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, nick: &str) -> Option<i32> {
        self.state.lock().levels.get(nick).copied()
    }

    /// Store `level` for `nick` and wake every waiter.
    pub(crate) fn update(&self, nick: &str, level: i32) {
        self.state.lock().levels.insert(nick.to_string(), level);
        debug!(%nick, level, "identity status updated");
        self.changed.notify_all();
    }

    /// Block until `nick` has a level, `timeout` passes or the cache closes.
    pub fn wait_for(&self, nick: &str, timeout: Duration) -> Result<i32, StatusError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(level) = state.levels.get(nick) {
                return Ok(*level);
            }
            if state.closed {
                return Err(StatusError::Cancelled);
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return match state.levels.get(nick) {
                    Some(level) => Ok(*level),
                    None => Err(StatusError::Timeout(nick.to_string())),
                };
            }
        }
    }

    /// Return the cached level for `nick`, or run `query` and wait for the
    /// reply. `query` is called without the lock held.
    pub fn request<Q>(&self, nick: &str, query: Q, timeout: Duration) -> Result<i32, StatusError>
    where
        Q: FnOnce(&str),
    {
        if let Some(level) = self.get(nick) {
            return Ok(level);
        }
        query(nick);
        self.wait_for(nick, timeout)
    }

    /// Fail every current and future wait with [`StatusError::Cancelled`].
    /// Cached levels stay readable.
    pub fn cancel(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }
}
