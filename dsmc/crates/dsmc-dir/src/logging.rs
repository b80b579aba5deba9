//! Directory Logging and Tracing
//!
//! Records protocol events for a host so message interleavings can be
//! reconstructed after a run:
//! - Debugging a stuck handle (who holds it, who is queued)
//! - Explaining a recall chain
//! - Producing traces for the simulator
//!
//! Every event goes to the `log` facade at its level. When the event log is
//! enabled the event is also buffered with a wall clock timestamp, and in
//! verbose mode it is echoed to the console.
//!
//! Log Levels:
//! - INFO: Ownership changes (grants, writebacks)
//! - DEBUG: Requests, recalls, deferrals
//! - TRACE: Waiter notifications, state transitions

use chrono::{DateTime, Local};
use dsmc_util::{Handle, HostId, ResolveMode};
use log::Level;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// Directory event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirEvent {
    /// A request was put on the wire
    RequestSent {
        handle: Handle,
        dest: HostId,
        whom: HostId,
        mode: ResolveMode,
    },

    /// An object (or an upgrade grant) was put on the wire
    ObjectSent {
        handle: Handle,
        dest: HostId,
        mode: ResolveMode,
        bytes: usize,
    },

    /// A request arrived from the network
    RequestReceived {
        handle: Handle,
        whom: HostId,
        mode: ResolveMode,
    },

    /// An object arrived from the network
    ObjectReceived {
        handle: Handle,
        src: HostId,
        mode: ResolveMode,
    },

    /// Work on a handle was postponed
    Deferred { handle: Handle, reason: String },

    /// A requester-side state transition
    Transition {
        handle: Handle,
        from: String,
        to: String,
    },

    /// Waiters on a handle were notified
    Notified { handle: Handle, waiters: usize },

    /// A fetch was refused because the owner holds another type
    Rejected {
        handle: Handle,
        host: HostId,
        expected: String,
    },
}

impl DirEvent {
    /// Get log level for event
    pub fn level(&self) -> Level {
        match self {
            DirEvent::ObjectSent { .. } | DirEvent::ObjectReceived { .. } => Level::Info,
            DirEvent::RequestSent { .. }
            | DirEvent::RequestReceived { .. }
            | DirEvent::Deferred { .. } => Level::Debug,
            DirEvent::Transition { .. } | DirEvent::Notified { .. } => Level::Trace,
            DirEvent::Rejected { .. } => Level::Warn,
        }
    }

    pub fn handle(&self) -> Handle {
        match self {
            DirEvent::RequestSent { handle, .. }
            | DirEvent::ObjectSent { handle, .. }
            | DirEvent::RequestReceived { handle, .. }
            | DirEvent::ObjectReceived { handle, .. }
            | DirEvent::Deferred { handle, .. }
            | DirEvent::Transition { handle, .. }
            | DirEvent::Notified { handle, .. }
            | DirEvent::Rejected { handle, .. } => *handle,
        }
    }
}

impl std::fmt::Display for DirEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirEvent::RequestSent {
                handle,
                dest,
                whom,
                mode,
            } => write!(f, "request {} {} for {} -> host {}", mode, handle, whom, dest),
            DirEvent::ObjectSent {
                handle,
                dest,
                mode,
                bytes,
            } => write!(f, "object {} {} -> host {} ({} bytes)", mode, handle, dest, bytes),
            DirEvent::RequestReceived { handle, whom, mode } => {
                write!(f, "request {} {} from {}", mode, handle, whom)
            },
            DirEvent::ObjectReceived { handle, src, mode } => {
                write!(f, "object {} {} from host {}", mode, handle, src)
            },
            DirEvent::Deferred { handle, reason } => write!(f, "deferred {}: {}", handle, reason),
            DirEvent::Transition { handle, from, to } => {
                write!(f, "{} {} -> {}", handle, from, to)
            },
            DirEvent::Notified { handle, waiters } => {
                write!(f, "notified {} waiter(s) on {}", waiters, handle)
            },
            DirEvent::Rejected {
                handle,
                host,
                expected,
            } => write!(f, "rejected {} by host {}: it holds {}", handle, host, expected),
        }
    }
}

/// Directory logger configuration
#[derive(Debug, Clone)]
pub struct DirLoggerConfig {
    /// Buffer events in memory
    pub buffer: bool,

    /// Echo events to stdout
    pub console: bool,

    /// Console output as JSON lines
    pub json: bool,

    /// Prefix console output with a timestamp
    pub timestamps: bool,
}

impl Default for DirLoggerConfig {
    fn default() -> Self {
        Self {
            buffer: true,
            console: false,
            json: false,
            timestamps: true,
        }
    }
}

/// DirLogger - per-host protocol event log
pub struct DirLogger {
    host: HostId,
    config: DirLoggerConfig,
    events: Mutex<Vec<(DateTime<Local>, DirEvent)>>,
    enabled: AtomicBool,
}

impl DirLogger {
    pub fn new(host: HostId, config: DirLoggerConfig) -> Self {
        Self {
            host,
            config,
            events: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a directory event
    pub fn log(&self, event: DirEvent) {
        if !self.is_enabled() {
            return;
        }

        log::log!(target: "dsmc_dir", event.level(), "[host {}] {}", self.host, event);

        if self.config.console {
            self.output_console(&event);
        }

        if self.config.buffer {
            self.events.lock().push((Local::now(), event));
        }
    }

    fn output_console(&self, event: &DirEvent) {
        if self.config.json {
            let mut value = match serde_json::to_value(event) {
                Ok(value) => value,
                Err(_) => return,
            };
            if let Some(object) = value.as_object_mut() {
                object.insert("host".into(), serde_json::json!(self.host.0));
                if self.config.timestamps {
                    object.insert("ts".into(), serde_json::json!(Local::now().to_rfc3339()));
                }
            }
            println!("{}", value);
            return;
        }

        if self.config.timestamps {
            let now = Local::now();
            print!("[{}] ", now.format("%Y-%m-%d %H:%M:%S%.3f"));
        }
        println!("[DIR {}] {}", self.host, event);
    }

    /// Get all events
    pub fn events(&self) -> Vec<(DateTime<Local>, DirEvent)> {
        self.events.lock().clone()
    }

    /// Events touching one handle, oldest first
    pub fn events_for(&self, handle: Handle) -> Vec<DirEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(_, event)| event.handle() == handle)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Buffered events as a JSON array
    pub fn to_json(&self) -> serde_json::Value {
        let events = self.events.lock();
        serde_json::Value::Array(
            events
                .iter()
                .filter_map(|(ts, event)| {
                    let mut value = serde_json::to_value(event).ok()?;
                    value
                        .as_object_mut()?
                        .insert("ts".into(), serde_json::json!(ts.to_rfc3339()));
                    Some(value)
                })
                .collect(),
        )
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}
