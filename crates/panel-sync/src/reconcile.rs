//! Account reconciliation
//!
//! Replays a batch of canonical records against a panel. Each record is
//! matched to an existing account by any of its credentials and either
//! updated in place or created under the first free name. Records move
//! through `Pending -> Classified -> {Updated, Created, Failed}` and nothing
//! leaves a terminal state.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ReconcileOptions;
use crate::error::{Result, SyncError};
use crate::index::{normalize_identifier, sanitize_username, IdentityIndex, IndexMutation};
use crate::observer::{SyncEvent, SyncObserver};
use crate::quota::{epoch_seconds, QuotaTranslator};
use crate::record::UserRecord;
use crate::snapshot::ImportBatch;

/// Account operations the engine needs from a panel.
#[async_trait]
pub trait UserPanel: Send + Sync {
    async fn fetch_listing(&self) -> Result<Vec<UserRecord>>;

    async fn create_user(&self, record: &UserRecord) -> Result<()>;

    /// Rewrite the account currently named `remote_username`.
    async fn update_user(&self, remote_username: &str, record: &UserRecord) -> Result<()>;

    async fn clear_groups(&self, username: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    Created { username: String, attempts: usize },
    Updated { remote_username: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Position in the batch
    pub index: usize,
    pub username: String,
    pub state: RecordState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub total: usize,
    pub outcomes: Vec<RecordOutcome>,
}

impl Summary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn processed(&self) -> usize {
        self.created + self.updated + self.failed
    }

    pub fn record(&mut self, outcome: RecordOutcome) {
        match outcome.state {
            RecordState::Created { .. } => self.created += 1,
            RecordState::Updated { .. } => self.updated += 1,
            RecordState::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.state, RecordState::Failed { .. }))
    }
}

pub struct ReconciliationEngine<'a, P: UserPanel + ?Sized> {
    panel: &'a P,
    observer: Arc<dyn SyncObserver>,
    options: ReconcileOptions,
}

impl<'a, P: UserPanel + ?Sized> ReconciliationEngine<'a, P> {
    pub fn new(panel: &'a P, observer: Arc<dyn SyncObserver>) -> Self {
        Self {
            panel,
            observer,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// Rewrite quotas and expiries in place before any write.
    ///
    /// Import is a refill: remaining traffic becomes the quota and usage
    /// starts at zero. Millisecond expiries become seconds.
    pub fn prepare(records: &mut [UserRecord]) {
        for record in records.iter_mut() {
            QuotaTranslator::refill(record);
            record.expiry_epoch_seconds = epoch_seconds(record.expiry_epoch_seconds);
        }
    }

    /// Index the panel's current accounts. A failed listing yields an empty
    /// index flagged for rebuild, unless the session itself is gone.
    pub async fn build_index(&self) -> Result<IdentityIndex> {
        match self.panel.fetch_listing().await {
            Ok(listing) => {
                let index = IdentityIndex::build(&listing);
                self.observer.on_event(&SyncEvent::IndexBuilt {
                    records: index.len(),
                    identifiers: index.identifier_count(),
                });
                Ok(index)
            }
            Err(SyncError::AuthExpired) => Err(SyncError::AuthExpired),
            Err(error) => {
                self.observer.on_event(&SyncEvent::IndexUnavailable {
                    error: error.to_string(),
                });
                Ok(IdentityIndex::unavailable())
            }
        }
    }

    fn check_batch(&self, batch: &mut ImportBatch<UserRecord>) {
        if let Some((declared, actual)) = batch.count_mismatch() {
            self.observer.on_event(&SyncEvent::BatchCountMismatch { declared, actual });
        }
        Self::prepare(&mut batch.records);
    }

    /// Reconcile a snapshot batch against the live panel.
    pub async fn reconcile(&self, batch: &mut ImportBatch<UserRecord>) -> Result<Summary> {
        self.check_batch(batch);

        let mut index = match self.build_index().await {
            Ok(index) => index,
            Err(cause) => return Err(self.abort(cause, Summary::new(batch.records.len()))),
        };
        self.reconcile_with_index(&batch.records, &mut index).await
    }

    /// Reconcile a snapshot batch against a listing the caller already holds.
    pub async fn reconcile_listing(&self, batch: &mut ImportBatch<UserRecord>, listing: &[UserRecord]) -> Result<Summary> {
        self.check_batch(batch);

        let mut index = IdentityIndex::build(listing);
        self.observer.on_event(&SyncEvent::IndexBuilt {
            records: index.len(),
            identifiers: index.identifier_count(),
        });
        self.reconcile_with_index(&batch.records, &mut index).await
    }

    /// Reconcile prepared records against an existing index, in order.
    pub async fn reconcile_with_index(&self, records: &[UserRecord], index: &mut IdentityIndex) -> Result<Summary> {
        let mut summary = Summary::new(records.len());

        for (position, source) in records.iter().enumerate() {
            match self.reconcile_record(position, source, index).await {
                Ok(outcome) => summary.record(outcome),
                Err(cause) => {
                    summary.record(RecordOutcome {
                        index: position,
                        username: source.username.clone(),
                        state: RecordState::Failed {
                            error: cause.to_string(),
                        },
                    });
                    return Err(self.abort(cause, summary));
                }
            }
        }

        Ok(summary)
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

    fn failed(&self, position: usize, username: &str, error: SyncError) -> RecordOutcome {
        self.observer.on_event(&SyncEvent::RecordFailed {
            index: position,
            username: username.to_string(),
            error: error.to_string(),
        });
        RecordOutcome {
            index: position,
            username: username.to_string(),
            state: RecordState::Failed {
                error: error.to_string(),
            },
        }
    }

    /// Ok carries the record's terminal state; Err only for run-fatal errors.
    async fn reconcile_record(
        &self,
        position: usize,
        source: &UserRecord,
        index: &mut IdentityIndex,
    ) -> Result<RecordOutcome> {
        let mut record = source.clone();
        record.username = sanitize_username(&source.username);
        if record.username.is_empty() {
            record.username = format!("user_{}", position + 1);
        }
        if let Some(groups) = &self.options.group_override {
            record.group_ids = groups.clone();
        }

        let identifier = normalize_identifier(&record.primary_identifier);
        if identifier.is_empty() {
            let username = record.username.clone();
            return Ok(self.failed(position, &username, SyncError::MissingIdentifier(username.clone())));
        }

        match self.lookup(index, &identifier).await? {
            Some(existing) => self.update(position, record, existing, identifier, index).await,
            None => self.create(position, record, index).await,
        }
    }

    async fn lookup(&self, index: &mut IdentityIndex, identifier: &str) -> Result<Option<UserRecord>> {
        if index.lookup(identifier).is_none() && index.is_stale() {
            match self.panel.fetch_listing().await {
                Ok(listing) => {
                    index.rebuild(&listing);
                    self.observer.on_event(&SyncEvent::IndexRebuilt { records: index.len() });
                }
                Err(error) if error.is_run_fatal() => return Err(error),
                Err(error) => {
                    index.give_up_rebuild();
                    self.observer.on_event(&SyncEvent::IndexUnavailable {
                        error: error.to_string(),
                    });
                }
            }
        }
        Ok(index.lookup(identifier).cloned())
    }

    async fn update(
        &self,
        position: usize,
        record: UserRecord,
        existing: UserRecord,
        identifier: String,
        index: &mut IdentityIndex,
    ) -> Result<RecordOutcome> {
        let remote_username = existing.username.clone();
        match self.panel.update_user(&remote_username, &record).await {
            Ok(()) => {}
            Err(error) if error.is_run_fatal() => return Err(error),
            Err(error) => return Ok(self.failed(position, &record.username, error)),
        }

        if record.group_ids.is_empty() && self.options.clear_groups_when_empty {
            match self.panel.clear_groups(&record.username).await {
                Ok(()) => self.observer.on_event(&SyncEvent::GroupsCleared {
                    username: record.username.clone(),
                }),
                Err(error) => self.observer.on_event(&SyncEvent::GroupsClearFailed {
                    username: record.username.clone(),
                    error: error.to_string(),
                }),
            }
        }

        let username = record.username.clone();
        let mut merged = record;
        merged.id = existing.id;
        if merged.subscription_url.is_empty() {
            merged.subscription_url = existing.subscription_url;
        }
        index.apply(IndexMutation::Updated {
            identifier,
            previous_username: remote_username.clone(),
            record: merged,
        });

        self.observer.on_event(&SyncEvent::RecordUpdated {
            index: position,
            username: username.clone(),
            remote_username: remote_username.clone(),
        });
        Ok(RecordOutcome {
            index: position,
            username,
            state: RecordState::Updated { remote_username },
        })
    }

    async fn create(&self, position: usize, mut record: UserRecord, index: &mut IdentityIndex) -> Result<RecordOutcome> {
        let base = record.username.clone();

        for attempt in 0..self.options.max_name_attempts {
            let candidate = match attempt {
                0 => base.clone(),
                n => format!("{}_{}", base, n),
            };

            if index.is_username_taken(&candidate) {
                self.observer.on_event(&SyncEvent::NameCollision {
                    index: position,
                    candidate,
                });
                continue;
            }

            record.username = candidate.clone();
            match self.panel.create_user(&record).await {
                Ok(()) => {
                    index.apply(IndexMutation::Created { record });
                    self.observer.on_event(&SyncEvent::RecordCreated {
                        index: position,
                        username: candidate.clone(),
                        attempts: attempt + 1,
                    });
                    return Ok(RecordOutcome {
                        index: position,
                        username: candidate.clone(),
                        state: RecordState::Created {
                            username: candidate,
                            attempts: attempt + 1,
                        },
                    });
                }
                Err(error) if error.is_conflict() => {
                    index.apply(IndexMutation::UsernameReserved {
                        username: candidate.clone(),
                    });
                    self.observer.on_event(&SyncEvent::NameCollision {
                        index: position,
                        candidate,
                    });
                }
                Err(error) if error.is_run_fatal() => return Err(error),
                Err(error) => return Ok(self.failed(position, &candidate, error)),
            }
        }

        let attempts = self.options.max_name_attempts;
        Ok(self.failed(
            position,
            &base,
            SyncError::NameAttemptsExhausted {
                username: base.clone(),
                attempts,
            },
        ))
    }
}
