pub mod clients;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod inbound;
pub mod index;
pub mod normalize;
pub mod observer;
pub mod quota;
pub mod reconcile;
pub mod record;
pub mod runner;
pub mod snapshot;
pub mod transport;
pub mod wireguard;

#[cfg(test)]
pub mod proptest;

pub use clients::{PasarGuardClient, ThreeXuiClient};
pub use config::{ClientConfig, Credentials, ReconcileOptions};
pub use error::{Result, SyncError, TransientReason};
pub use inbound::{InboundBatch, InboundPanel, InboundReconciler};
pub use index::IdentityIndex;
pub use observer::{RecordingObserver, SyncEvent, SyncObserver, TracingObserver};
pub use quota::QuotaTranslator;
pub use reconcile::{ReconciliationEngine, RecordOutcome, RecordState, Summary, UserPanel};
pub use record::{ClientRecord, Group, InboundRecord, UserRecord};
pub use snapshot::{ImportBatch, SnapshotStats};

// Re-export the shared vocabulary for callers
pub use panel_types::{PanelKind, PanelProtocol};
