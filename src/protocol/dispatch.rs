//! Command-table dispatch shared by every protocol layer.
//!
//! A [`HandlerSet`] maps command tokens to handlers for one layer (the DCC
//! protocol internals, the bot's own DCC commands, NickServ replies, ...).
//! [`Dispatcher::invoke`] resolves `<prefix><COMMAND>`, then
//! `<prefix>Default`, then the dispatcher-wide fallback, and calls the result
//! with failures and panics contained.

use crate::error::DccError;
use crate::logging::EventLog;
use crate::protocol::event::Event;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Something that can react to an [`Event`].
///
/// Implemented for any `Fn(&Event) -> anyhow::Result<()>` closure.
pub trait Handler: Send + Sync {
    fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self(event)
    }
}

/// Explicit command table for one dispatch layer.
#[derive(Clone)]
pub struct HandlerSet {
    prefix: &'static str,
    handlers: HashMap<String, Arc<dyn Handler>>,
    default: Option<Arc<dyn Handler>>,
}

impl HandlerSet {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            handlers: HashMap::new(),
            default: None,
        }
    }

    /// Register the handler for `command` (case-sensitive).
    pub fn on<F>(mut self, command: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(command.into(), Arc::new(handler));
        self
    }

    /// Register the handler used when no command-specific one exists.
    pub fn on_default<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(handler));
        self
    }

    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    /// Find the handler for `command`, with the name it would have been given
    /// under the `on<PREFIX>_<COMMAND>` convention.
    pub fn resolve(&self, command: &str) -> Option<(String, &Arc<dyn Handler>)> {
        if let Some(handler) = self.handlers.get(command) {
            return Some((format!("{}{}", self.prefix, command), handler));
        }
        self.default
            .as_ref()
            .map(|handler| (format!("{}Default", self.prefix), handler))
    }
}

fn unhandled(event: &Event) -> anyhow::Result<()> {
    debug!(%event, "unhandled event");
    Ok(())
}

/// Records events and routes them through handler sets.
#[derive(Clone)]
pub struct Dispatcher {
    log: Arc<dyn EventLog>,
    fallback: Arc<dyn Handler>,
}

impl Dispatcher {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self {
            log,
            fallback: Arc::new(unhandled),
        }
    }

    /// Replace the handler used when a set has neither a match nor a default.
    pub fn with_fallback<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.fallback = Arc::new(handler);
        self
    }

    pub fn record(&self, event: &Event) {
        self.log.record(event);
    }

    /// Resolve and run the handler for `event` in `set`.
    ///
    /// Does not record the event; callers record once before the first layer.
    pub fn invoke(&self, set: &HandlerSet, event: &Event) -> Result<(), DccError> {
        let (name, handler) = match set.resolve(event.command()) {
            Some((name, handler)) => (name, handler),
            None => ("fallback".to_string(), &self.fallback),
        };
        trace!(handler = %name, command = event.command(), sender = event.sender(), "dispatch");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event)));
        let reason = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        Err(DccError::HandlerFailure {
            handler: name,
            command: event.command().to_string(),
            reason,
        })
    }

    /// Record `event`, then invoke each layer in order.
    ///
    /// A failing layer is logged and does not stop the following ones.
    /// Returns the number of layers that failed.
    pub fn dispatch(&self, layers: &[&HandlerSet], event: &Event) -> usize {
        self.record(event);
        layers
            .iter()
            .filter(|set| match self.invoke(set, event) {
                Ok(()) => false,
                Err(err) => {
                    error!(error = %err, sender = event.sender(), "handler failed");
                    true
                }
            })
            .count()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
