//! Property-based tests for quota arithmetic, identity lookup and name
//! allocation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use panel_types::PanelProtocol;
use proptest::prelude::*;

use crate::error::{Result, SyncError};
use crate::index::{normalize_identifier, sanitize_username, IdentityIndex};
use crate::observer::RecordingObserver;
use crate::quota::{derive_remaining, QuotaTranslator, UNLIMITED_REMAINING};
use crate::reconcile::{ReconciliationEngine, RecordState, UserPanel};
use crate::record::UserRecord;
use crate::snapshot::ImportBatch;

/// Strategy for generating usernames, spaces and case included
pub fn username_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9 _]{0,15}"
}

/// Strategy for generating credential identifiers
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    "[a-f0-9]{8}-[a-f0-9]{4}"
}

pub fn protocol_strategy() -> impl Strategy<Value = PanelProtocol> {
    prop_oneof![
        Just(PanelProtocol::Vmess),
        Just(PanelProtocol::Vless),
        Just(PanelProtocol::Trojan),
        Just(PanelProtocol::Shadowsocks),
    ]
}

pub fn record_strategy() -> impl Strategy<Value = UserRecord> {
    (
        username_strategy(),
        identifier_strategy(),
        protocol_strategy(),
        0i64..1_000_000,
        0i64..1_000_000,
    )
        .prop_map(|(username, identifier, protocol, quota, used)| {
            UserRecord::new(username, identifier, protocol).with_quota(quota, used)
        })
}

/// Panel that accepts every write and refuses names it already holds.
#[derive(Default)]
struct MemoryPanel {
    names: Mutex<HashSet<String>>,
}

#[async_trait]
impl UserPanel for MemoryPanel {
    async fn fetch_listing(&self) -> Result<Vec<UserRecord>> {
        Ok(Vec::new())
    }

    async fn create_user(&self, record: &UserRecord) -> Result<()> {
        let mut names = self.names.lock().map_err(|_| SyncError::Conflict("poisoned".into()))?;
        if names.insert(record.username.clone()) {
            Ok(())
        } else {
            Err(SyncError::Conflict(record.username.clone()))
        }
    }

    async fn update_user(&self, _remote_username: &str, _record: &UserRecord) -> Result<()> {
        Ok(())
    }

    async fn clear_groups(&self, _username: &str) -> Result<()> {
        Ok(())
    }
}

fn created_names(records: &[UserRecord]) -> Vec<Option<String>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let panel = MemoryPanel::default();
    let engine = ReconciliationEngine::new(&panel, Arc::new(RecordingObserver::new()));
    let mut batch = ImportBatch::new(records.to_vec());
    let summary = runtime.block_on(engine.reconcile(&mut batch)).expect("run completes");

    summary
        .outcomes
        .into_iter()
        .map(|outcome| match outcome.state {
            RecordState::Created { username, .. } => Some(username),
            _ => None,
        })
        .collect()
}

proptest! {
    #[test]
    fn remaining_never_below_unlimited(quota in -10i64..1_000_000, used in 0i64..2_000_000) {
        let remaining = derive_remaining(quota, used);
        prop_assert!(remaining >= UNLIMITED_REMAINING);
        prop_assert_eq!(remaining == UNLIMITED_REMAINING, quota <= 0);
        if quota > 0 {
            prop_assert!(remaining <= quota);
        }
    }

    #[test]
    fn positive_remaining_becomes_quota(remaining in 1i64..1_000_000, quota in -1i64..1_000_000) {
        prop_assert_eq!(QuotaTranslator::to_canonical(remaining, quota), remaining);
    }

    #[test]
    fn refill_is_idempotent(record in record_strategy()) {
        let mut once = record.clone();
        QuotaTranslator::refill(&mut once);
        let mut twice = once.clone();
        QuotaTranslator::refill(&mut twice);

        prop_assert_eq!(once.used_bytes, 0);
        prop_assert_eq!(once.quota_bytes, twice.quota_bytes);
        prop_assert_eq!(once.remaining_bytes, twice.remaining_bytes);
    }

    #[test]
    fn sanitized_names_are_stable(name in username_strategy()) {
        let once = sanitize_username(&name);
        prop_assert_eq!(sanitize_username(&once), once.clone());
        prop_assert!(!once.contains(' '));
    }

    #[test]
    fn lookup_finds_every_listed_identifier(records in prop::collection::vec(record_strategy(), 1..20)) {
        let index = IdentityIndex::build(&records);
        for record in &records {
            let key = normalize_identifier(&record.primary_identifier);
            let found = index.lookup(&key);
            prop_assert!(found.is_some());
            prop_assert_eq!(index.lookup(&key), found);
        }
    }

    #[test]
    fn name_allocation_is_deterministic(records in prop::collection::vec(record_strategy(), 1..12)) {
        let first = created_names(&records);
        let second = created_names(&records);
        prop_assert_eq!(&first, &second);

        let created: Vec<&String> = first.iter().flatten().collect();
        let unique: HashSet<&String> = created.iter().copied().collect();
        prop_assert_eq!(created.len(), unique.len());
    }
}
