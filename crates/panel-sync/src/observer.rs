//! Progress reporting for reconciliation runs
//!
//! The engine never prints. It hands every notable step to a [`SyncObserver`];
//! the default [`TracingObserver`] turns them into structured log lines and
//! [`RecordingObserver`] keeps them for assertions in tests.

use std::sync::Mutex;

use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    EndpointAttempt {
        operation: String,
        endpoint: String,
    },
    EndpointFailed {
        operation: String,
        endpoint: String,
        error: String,
    },
    ShapeUnrecognized {
        endpoint: String,
        preview: String,
    },
    SchemaProbed {
        document: String,
        routes: usize,
    },
    IndexBuilt {
        records: usize,
        identifiers: usize,
    },
    IndexUnavailable {
        error: String,
    },
    IndexRebuilt {
        records: usize,
    },
    BatchCountMismatch {
        declared: usize,
        actual: usize,
    },
    RecordUpdated {
        index: usize,
        username: String,
        remote_username: String,
    },
    RecordCreated {
        index: usize,
        username: String,
        attempts: usize,
    },
    NameCollision {
        index: usize,
        candidate: String,
    },
    RecordFailed {
        index: usize,
        username: String,
        error: String,
    },
    GroupsCleared {
        username: String,
    },
    GroupsClearFailed {
        username: String,
        error: String,
    },
    TrafficSetFailed {
        username: String,
        error: String,
    },
    TrafficLookupFailed {
        email: String,
        error: String,
    },
    InboundUpdated {
        remark: String,
        port: u16,
        id: i64,
    },
    InboundCreated {
        remark: String,
        port: u16,
        id: Option<i64>,
    },
    InboundFailed {
        remark: String,
        port: u16,
        error: String,
    },
    RunAborted {
        error: String,
    },
}

pub trait SyncObserver: Send + Sync {
    fn on_event(&self, event: &SyncEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::EndpointAttempt { operation, endpoint } => {
                debug!(operation = %operation, endpoint = %endpoint, "Trying endpoint");
            }
            SyncEvent::EndpointFailed { operation, endpoint, error } => {
                debug!(operation = %operation, endpoint = %endpoint, error = %error, "Endpoint failed");
            }
            SyncEvent::ShapeUnrecognized { endpoint, preview } => {
                warn!(endpoint = %endpoint, body = %preview, "Unrecognized response shape");
            }
            SyncEvent::SchemaProbed { document, routes } => {
                debug!(document = %document, routes = routes, "Discovered routes from API schema");
            }
            SyncEvent::IndexBuilt { records, identifiers } => {
                info!(records = records, identifiers = identifiers, "Indexed existing accounts");
            }
            SyncEvent::IndexUnavailable { error } => {
                warn!(error = %error, "Could not list existing accounts, continuing with empty index");
            }
            SyncEvent::IndexRebuilt { records } => {
                info!(records = records, "Rebuilt account index");
            }
            SyncEvent::BatchCountMismatch { declared, actual } => {
                warn!(declared = declared, actual = actual, "Snapshot count does not match its records");
            }
            SyncEvent::RecordUpdated { index, username, remote_username } => {
                info!(index = index, username = %username, remote = %remote_username, "Updated account");
            }
            SyncEvent::RecordCreated { index, username, attempts } => {
                info!(index = index, username = %username, attempts = attempts, "Created account");
            }
            SyncEvent::NameCollision { index, candidate } => {
                debug!(index = index, candidate = %candidate, "Username taken, trying next");
            }
            SyncEvent::RecordFailed { index, username, error } => {
                warn!(index = index, username = %username, error = %error, "Account failed");
            }
            SyncEvent::GroupsCleared { username } => {
                debug!(username = %username, "Cleared account groups");
            }
            SyncEvent::GroupsClearFailed { username, error } => {
                warn!(username = %username, error = %error, "Could not clear account groups");
            }
            SyncEvent::TrafficSetFailed { username, error } => {
                warn!(username = %username, error = %error, "Could not set used traffic");
            }
            SyncEvent::TrafficLookupFailed { email, error } => {
                debug!(email = %email, error = %error, "Traffic lookup failed, assuming no usage");
            }
            SyncEvent::InboundUpdated { remark, port, id } => {
                info!(remark = %remark, port = port, id = id, "Updated inbound");
            }
            SyncEvent::InboundCreated { remark, port, id } => {
                info!(remark = %remark, port = port, id = ?id, "Created inbound");
            }
            SyncEvent::InboundFailed { remark, port, error } => {
                warn!(remark = %remark, port = port, error = %error, "Inbound failed");
            }
            SyncEvent::RunAborted { error } => {
                warn!(error = %error, "Run aborted");
            }
        }
    }
}

/// Keeps every event in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, predicate: impl Fn(&SyncEvent) -> bool) -> usize {
        self.events().iter().filter(|event| predicate(event)).count()
    }
}

impl SyncObserver for RecordingObserver {
    fn on_event(&self, event: &SyncEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Trim a response body for log output.
pub(crate) fn preview(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
