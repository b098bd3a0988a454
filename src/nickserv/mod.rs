//! NickServ identity tracking.
//!
//! Status replies from NickServ populate a [`StatusCache`]; other parts of the
//! bot block on it (from worker-pool threads) when they need to know whether
//! a user is identified.

pub mod events;
pub mod status;

pub use events::parse_notice;
pub use status::StatusCache;

use crate::error::StatusError;
use crate::protocol::{Dispatcher, HandlerSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct NickServ {
    status: Arc<StatusCache>,
    dispatcher: Dispatcher,
    protocol: HandlerSet,
    application: HandlerSet,
    timeout: Duration,
}

impl NickServ {
    pub fn new(dispatcher: Dispatcher, application: HandlerSet, timeout: Duration) -> Self {
        let status = Arc::new(StatusCache::new());
        Self {
            protocol: events::protocol_handlers(Arc::clone(&status)),
            status,
            dispatcher,
            application,
            timeout,
        }
    }

    /// Handle a notice from NickServ. Returns how many layers failed.
    pub fn process_notice(&self, sender: &str, target: &str, text: &str) -> usize {
        match parse_notice(sender, target, text) {
            Some(event) => self
                .dispatcher
                .dispatch(&[&self.protocol, &self.application], &event),
            None => {
                debug!(%sender, "blank NickServ notice ignored");
                0
            }
        }
    }

    /// Identification level of `nick`, asking NickServ through `query` if
    /// it is not cached yet. Blocks for up to the configured timeout.
    pub fn status<Q>(&self, nick: &str, query: Q) -> Result<i32, StatusError>
    where
        Q: FnOnce(&str),
    {
        self.status.request(nick, query, self.timeout)
    }

    pub fn cache(&self) -> &Arc<StatusCache> {
        &self.status
    }

    /// Release every blocked status wait.
    pub fn shutdown(&self) {
        self.status.cancel();
    }
}
