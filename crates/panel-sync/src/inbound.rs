//! Listener-level reconciliation for 3X-UI
//!
//! Listeners are matched by port or tag and replaced whole. Their client
//! lists are never merged.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Result, SyncError};
use crate::observer::{SyncEvent, SyncObserver};
use crate::quota::QuotaTranslator;
use crate::reconcile::{RecordOutcome, RecordState, Summary};
use crate::record::InboundRecord;
use crate::snapshot::ImportBatch;

pub type InboundBatch = ImportBatch<InboundRecord>;

/// Listener operations the reconciler needs from a panel.
#[async_trait]
pub trait InboundPanel: Send + Sync {
    async fn fetch_inbounds(&self) -> Result<Vec<InboundRecord>>;

    /// Create a listener, returning its id when the panel reports one.
    async fn add_inbound(&self, inbound: &InboundRecord) -> Result<Option<i64>>;

    async fn update_inbound(&self, id: i64, inbound: &InboundRecord) -> Result<()>;
}

/// Where an existing listener lives. `None` means created earlier in this
/// run without a reported id.
type ListenerId = Option<i64>;

#[derive(Debug, Default)]
pub struct ListenerIndex {
    by_port: HashMap<u16, ListenerId>,
    by_tag: HashMap<String, ListenerId>,
}

impl ListenerIndex {
    pub fn build(live: &[InboundRecord]) -> Self {
        let mut index = Self::default();
        for inbound in live {
            index.insert(inbound, Some(inbound.id));
        }
        index
    }

    fn insert(&mut self, inbound: &InboundRecord, id: ListenerId) {
        self.by_port.insert(inbound.port, id);
        if !inbound.tag.is_empty() {
            self.by_tag.insert(inbound.tag.clone(), id);
        }
    }

    /// Existing listener for this record. A tag match wins over a port match.
    pub fn find(&self, inbound: &InboundRecord) -> Option<ListenerId> {
        let by_tag = match inbound.tag.is_empty() {
            true => None,
            false => self.by_tag.get(&inbound.tag).copied(),
        };
        by_tag.or_else(|| self.by_port.get(&inbound.port).copied())
    }

    pub fn record_created(&mut self, inbound: &InboundRecord, id: ListenerId) {
        self.insert(inbound, id);
    }

    pub fn len(&self) -> usize {
        self.by_port.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_port.is_empty()
    }
}

pub struct InboundReconciler<'a, P: InboundPanel + ?Sized> {
    panel: &'a P,
    observer: Arc<dyn SyncObserver>,
}

impl<'a, P: InboundPanel + ?Sized> InboundReconciler<'a, P> {
    pub fn new(panel: &'a P, observer: Arc<dyn SyncObserver>) -> Self {
        Self { panel, observer }
    }

    /// Reconcile a batch against the panel's current listeners.
    ///
    /// Without a listing every listener would look new, so any failure to
    /// fetch one aborts the run before the first write.
    pub async fn reconcile_from_panel(&self, batch: &mut InboundBatch) -> Result<Summary> {
        let live = match self.panel.fetch_inbounds().await {
            Ok(live) => live,
            Err(cause) => return Err(self.abort(cause, Summary::new(batch.len()))),
        };
        self.reconcile(batch, &live).await
    }

    pub async fn reconcile(&self, batch: &mut InboundBatch, live: &[InboundRecord]) -> Result<Summary> {
        if let Some((declared, actual)) = batch.count_mismatch() {
            self.observer.on_event(&SyncEvent::BatchCountMismatch { declared, actual });
        }
        for inbound in batch.records.iter_mut() {
            inbound.clients.iter_mut().for_each(QuotaTranslator::refill_client);
        }

        let mut index = ListenerIndex::build(live);
        self.observer.on_event(&SyncEvent::IndexBuilt {
            records: index.len(),
            identifiers: index.len(),
        });

        let mut summary = Summary::new(batch.len());
        for (position, inbound) in batch.records.iter().enumerate() {
            let result = match index.find(inbound) {
                Some(Some(id)) => self.update(id, inbound).await,
                Some(None) => Err(SyncError::Conflict(format!(
                    "listener on port {} was created earlier in this run without an id",
                    inbound.port
                ))),
                None => self.create(inbound, &mut index).await,
            };

            let state = match result {
                Ok(state) => state,
                Err(cause) if cause.is_run_fatal() => {
                    summary.record(outcome(position, inbound, RecordState::Failed {
                        error: cause.to_string(),
                    }));
                    return Err(self.abort(cause, summary));
                }
                Err(error) => {
                    self.observer.on_event(&SyncEvent::InboundFailed {
                        remark: inbound.remark.clone(),
                        port: inbound.port,
                        error: error.to_string(),
                    });
                    RecordState::Failed {
                        error: error.to_string(),
                    }
                }
            };
            summary.record(outcome(position, inbound, state));
        }

        Ok(summary)
    }

    async fn update(&self, id: i64, inbound: &InboundRecord) -> Result<RecordState> {
        self.panel.update_inbound(id, inbound).await?;
        self.observer.on_event(&SyncEvent::InboundUpdated {
            remark: inbound.remark.clone(),
            port: inbound.port,
            id,
        });
        Ok(RecordState::Updated {
            remote_username: inbound.remark.clone(),
        })
    }

    async fn create(&self, inbound: &InboundRecord, index: &mut ListenerIndex) -> Result<RecordState> {
        let id = self.panel.add_inbound(inbound).await?;
        index.record_created(inbound, id);
        self.observer.on_event(&SyncEvent::InboundCreated {
            remark: inbound.remark.clone(),
            port: inbound.port,
            id,
        });
        Ok(RecordState::Created {
            username: inbound.remark.clone(),
            attempts: 1,
        })
    }

    fn abort(&self, cause: SyncError, summary: Summary) -> SyncError {
        self.observer.on_event(&SyncEvent::RunAborted {
            error: cause.to_string(),
        });
        SyncError::RunAborted {
            cause: Box::new(cause),
            summary,
        }
    }
}

fn outcome(position: usize, inbound: &InboundRecord, state: RecordState) -> RecordOutcome {
    RecordOutcome {
        index: position,
        username: inbound.remark.clone(),
        state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use crate::record::ClientRecord;
    use panel_types::PanelProtocol;
    use std::sync::Mutex;

    fn listener(id: i64, port: u16, tag: &str) -> InboundRecord {
        InboundRecord {
            id,
            remark: format!("in-{}", port),
            protocol: PanelProtocol::Vless,
            port,
            enabled: true,
            tag: tag.into(),
            listen_address: String::new(),
            expiry: 0,
            total_quota_bytes: 0,
            transport_settings: String::new(),
            sniffing_settings: String::new(),
            original_settings: String::new(),
            clients: Vec::new(),
        }
    }

    #[derive(Default)]
    struct FakePanel {
        next_id: Option<i64>,
        writes: Mutex<Vec<String>>,
        unreachable: bool,
        listing_times_out: bool,
    }

    #[async_trait]
    impl InboundPanel for FakePanel {
        async fn fetch_inbounds(&self) -> Result<Vec<InboundRecord>> {
            if self.listing_times_out {
                return Err(SyncError::TransientEndpoint {
                    endpoint: "GET /panel/api/inbounds/list".into(),
                    reason: crate::error::TransientReason::Timeout,
                });
            }
            Ok(Vec::new())
        }

        async fn add_inbound(&self, inbound: &InboundRecord) -> Result<Option<i64>> {
            if self.unreachable {
                return Err(SyncError::PanelUnreachable("down".into()));
            }
            self.writes.lock().unwrap().push(format!("add {}", inbound.port));
            Ok(self.next_id)
        }

        async fn update_inbound(&self, id: i64, inbound: &InboundRecord) -> Result<()> {
            self.writes
                .lock()
                .unwrap()
                .push(format!("update {} {} clients={}", id, inbound.port, inbound.clients.len()));
            Ok(())
        }
    }

    #[test]
    fn tag_wins_over_port() {
        let index = ListenerIndex::build(&[listener(1, 443, "a"), listener(2, 8443, "b")]);
        assert_eq!(index.find(&listener(0, 443, "b")), Some(Some(2)));
        assert_eq!(index.find(&listener(0, 443, "")), Some(Some(1)));
        assert_eq!(index.find(&listener(0, 9000, "c")), None);
    }

    #[tokio::test]
    async fn port_or_tag_match_updates() {
        let panel = FakePanel::default();
        let observer = Arc::new(RecordingObserver::new());
        let reconciler = InboundReconciler::new(&panel, observer.clone());

        let mut incoming = listener(0, 443, "other");
        incoming.clients.push(ClientRecord {
            email: "a@x".into(),
            id: "u".into(),
            quota_bytes: 100,
            used_bytes: 40,
            remaining_bytes: 60,
            ..ClientRecord::default()
        });
        let mut batch = InboundBatch::new(vec![incoming, listener(0, 2053, "")]);

        let summary = reconciler.reconcile(&mut batch, &[listener(7, 443, "x")]).await.unwrap();

        assert_eq!((summary.updated, summary.created, summary.failed), (1, 1, 0));
        assert_eq!(
            *panel.writes.lock().unwrap(),
            vec!["update 7 443 clients=1".to_string(), "add 2053".to_string()]
        );
        assert_eq!(batch.records[0].clients[0].quota_bytes, 60);
        assert_eq!(batch.records[0].clients[0].used_bytes, 0);
    }

    #[tokio::test]
    async fn collision_with_unknown_created_id_fails_the_record() {
        let panel = FakePanel::default();
        let reconciler = InboundReconciler::new(&panel, Arc::new(RecordingObserver::new()));
        let mut batch = InboundBatch::new(vec![listener(0, 443, "a"), listener(0, 443, "b")]);

        let summary = reconciler.reconcile(&mut batch, &[]).await.unwrap();

        assert_eq!((summary.created, summary.failed), (1, 1));
        assert_eq!(panel.writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn collision_with_known_created_id_updates() {
        let panel = FakePanel {
            next_id: Some(12),
            ..FakePanel::default()
        };
        let reconciler = InboundReconciler::new(&panel, Arc::new(RecordingObserver::new()));
        let mut batch = InboundBatch::new(vec![listener(0, 443, "a"), listener(0, 443, "b")]);

        let summary = reconciler.reconcile(&mut batch, &[]).await.unwrap();

        assert_eq!((summary.created, summary.updated), (1, 1));
        assert_eq!(panel.writes.lock().unwrap()[1], "update 12 443 clients=0");
    }

    #[tokio::test]
    async fn unreachable_panel_aborts_with_partial_summary() {
        let panel = FakePanel {
            unreachable: true,
            ..FakePanel::default()
        };
        let reconciler = InboundReconciler::new(&panel, Arc::new(RecordingObserver::new()));
        let mut batch = InboundBatch::new(vec![listener(0, 443, "a"), listener(0, 8443, "b")]);

        match reconciler.reconcile(&mut batch, &[]).await {
            Err(SyncError::RunAborted { summary, .. }) => {
                assert_eq!(summary.failed, 1);
                assert_eq!(summary.processed(), 1);
                assert_eq!(summary.total, 2);
            }
            other => panic!("expected abort, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_listing_aborts_before_any_write() {
        let panel = FakePanel {
            listing_times_out: true,
            ..FakePanel::default()
        };
        let observer = Arc::new(RecordingObserver::new());
        let reconciler = InboundReconciler::new(&panel, observer.clone());
        let mut batch = InboundBatch::new(vec![listener(0, 443, "a"), listener(0, 8443, "b")]);

        match reconciler.reconcile_from_panel(&mut batch).await {
            Err(SyncError::RunAborted { cause, summary }) => {
                assert!(matches!(*cause, SyncError::TransientEndpoint { .. }));
                assert_eq!(summary.processed(), 0);
                assert_eq!(summary.total, 2);
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert!(panel.writes.lock().unwrap().is_empty());
        assert_eq!(observer.count(|e| matches!(e, SyncEvent::RunAborted { .. })), 1);
    }
}
