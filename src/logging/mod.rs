//! Event logging and tracing setup.
//!
//! Every event handed to the dispatcher is recorded through an [`EventLog`]
//! before any handler runs. [`FileEventLog`] writes them to daily files
//! organized by protocol, named `<protocol>_<date>.log` and stored in the
//! configured log directory (default: `~/.local/share/dccbot/logs/`).

use crate::config::LoggingConfig;
use crate::protocol::Event;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Append-only sink for dispatched events.
pub trait EventLog: Send + Sync {
    fn record(&self, event: &Event);
}

/// Emits each event as a debug-level trace and nothing else.
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn record(&self, event: &Event) {
        debug!(target: "dccbot::events", %event);
    }
}

/// Writes events to per-protocol daily log files.
///
/// File handles are cached for the lifetime of the logger to avoid repeated
/// opens. A file that cannot be opened is skipped with a warning.
pub struct FileEventLog {
    enabled: bool,
    log_dir: PathBuf,
    file_handles: Mutex<HashMap<String, fs::File>>,
}

impl FileEventLog {
    pub fn new(config: &LoggingConfig) -> Self {
        Self {
            enabled: config.events_enabled,
            log_dir: expand_home(&config.log_dir),
            file_handles: Mutex::new(HashMap::new()),
        }
    }

    fn file_name(event: &Event) -> String {
        let date = chrono::Local::now().format("%Y-%m-%d");
        format!("{}_{}.log", event.protocol().as_str().to_lowercase(), date)
    }

    fn write_line(&self, event: &Event) {
        let filename = Self::file_name(event);
        let line = format!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), event);

        let mut handles = self.file_handles.lock();
        if !handles.contains_key(&filename) {
            if let Err(e) = fs::create_dir_all(&self.log_dir) {
                warn!(dir = %self.log_dir.display(), error = %e, "cannot create event log dir");
                return;
            }
            let path = self.log_dir.join(&filename);
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    handles.insert(filename.clone(), file);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot open event log");
                    return;
                }
            }
        }
        let written = match handles.get_mut(&filename) {
            Some(handle) => writeln!(handle, "{}", line).and_then(|()| handle.flush()),
            None => return,
        };
        if let Err(e) = written {
            // Reopened on the next event.
            handles.remove(&filename);
            warn!(file = %filename, error = %e, "event log write failed");
        }
    }
}

impl EventLog for FileEventLog {
    fn record(&self, event: &Event) {
        debug!(target: "dccbot::events", %event);
        if self.enabled {
            self.write_line(event);
        }
    }
}

fn expand_home(dir: &str) -> PathBuf {
    if let Some(rest) = dir.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(dir)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `filter`.
pub fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
