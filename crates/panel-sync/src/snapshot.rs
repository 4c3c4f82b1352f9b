//! Snapshot files
//!
//! A snapshot is indented JSON with an export timestamp, a count, and the
//! record array. Field names are fixed; older exports must keep importing.

use std::collections::BTreeMap;

use chrono::Utc;
use panel_types::PanelKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, SyncError};
use crate::quota::UNLIMITED_REMAINING;
use crate::record::{InboundRecord, ProxySettings, UserRecord};

/// Records read from a snapshot plus the metadata that came with them.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportBatch<T> {
    pub exported_at: Option<String>,
    pub source_panel: Option<String>,
    /// Count the file claims; never trusted over `records.len()`.
    pub declared_total: Option<usize>,
    pub records: Vec<T>,
}

impl<T> ImportBatch<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self {
            exported_at: None,
            source_panel: None,
            declared_total: None,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(declared, actual)` when the file's count disagrees with its records.
    pub fn count_mismatch(&self) -> Option<(usize, usize)> {
        match self.declared_total {
            Some(declared) if declared != self.records.len() => Some((declared, self.records.len())),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UsersSnapshot {
    #[serde(default)]
    export_date: String,
    #[serde(default)]
    panel_type: String,
    #[serde(default)]
    total_users: Option<usize>,
    #[serde(default)]
    users: Vec<UserRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InboundsSnapshot {
    #[serde(default)]
    export_date: String,
    #[serde(default)]
    total_inbounds: Option<usize>,
    #[serde(default)]
    total_users: usize,
    #[serde(default)]
    inbounds: Vec<InboundRecord>,
}

fn to_indented<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Serialize an account listing as a users snapshot.
pub fn export_users(panel: PanelKind, users: &[UserRecord]) -> Result<Vec<u8>> {
    to_indented(&UsersSnapshot {
        export_date: Utc::now().to_rfc3339(),
        panel_type: panel.tag().to_string(),
        total_users: Some(users.len()),
        users: users.to_vec(),
    })
}

/// Serialize listeners with their clients as an inbounds snapshot.
pub fn export_inbounds(inbounds: &[InboundRecord]) -> Result<Vec<u8>> {
    to_indented(&InboundsSnapshot {
        export_date: Utc::now().to_rfc3339(),
        total_inbounds: Some(inbounds.len()),
        total_users: inbounds.iter().map(|inbound| inbound.clients.len()).sum(),
        inbounds: inbounds.to_vec(),
    })
}

pub fn read_users_snapshot(bytes: &[u8]) -> Result<ImportBatch<UserRecord>> {
    let snapshot: UsersSnapshot = serde_json::from_slice(bytes)
        .map_err(|e| SyncError::Snapshot(format!("not a users snapshot: {}", e)))?;
    Ok(ImportBatch {
        exported_at: non_empty(snapshot.export_date),
        source_panel: non_empty(snapshot.panel_type),
        declared_total: snapshot.total_users,
        records: snapshot.users,
    })
}

pub fn read_inbounds_snapshot(bytes: &[u8]) -> Result<ImportBatch<InboundRecord>> {
    let snapshot: InboundsSnapshot = serde_json::from_slice(bytes)
        .map_err(|e| SyncError::Snapshot(format!("not an inbounds snapshot: {}", e)))?;
    Ok(ImportBatch {
        exported_at: non_empty(snapshot.export_date),
        source_panel: Some(PanelKind::ThreeXui.tag().to_string()),
        declared_total: snapshot.total_inbounds,
        records: snapshot.inbounds,
    })
}

/// Flatten listener clients into account records a PasarGuard import accepts.
pub fn inbound_clients_as_users(inbounds: &[InboundRecord]) -> Vec<UserRecord> {
    let mut users = Vec::new();
    for inbound in inbounds {
        for client in &inbound.clients {
            let mut settings = ProxySettings::new();
            if let Some(field) = inbound.protocol.credential_field() {
                let mut credential = serde_json::Map::new();
                credential.insert(field.to_string(), Value::String(client.id.clone()));
                settings.insert(inbound.protocol.as_str().to_string(), Value::Object(credential));
            }

            users.push(UserRecord {
                id: users.len() as i64 + 1,
                username: client.email.clone(),
                email: client.email.clone(),
                primary_identifier: client.id.clone(),
                enabled: client.enabled,
                quota_bytes: client.quota_bytes,
                expiry_epoch_seconds: client.expiry_time,
                ip_limit: client.limit_ip,
                used_bytes: client.used_bytes,
                remaining_bytes: client.remaining_bytes,
                protocol: inbound.protocol.clone(),
                port: inbound.port,
                remark: inbound.remark.clone(),
                subscription_url: String::new(),
                note: inbound.remark.clone(),
                raw_protocol_settings: settings,
                group_ids: Default::default(),
            });
        }
    }
    users
}

/// Aggregate traffic figures for a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotStats {
    pub total: usize,
    pub active: usize,
    pub total_used: i64,
    pub total_limit: i64,
    pub total_remaining: i64,
    pub usage_percent: f64,
    /// Heaviest users by consumed bytes, largest first.
    pub top_consumers: Vec<(String, i64)>,
}

impl SnapshotStats {
    const TOP: usize = 5;

    fn from_rows(rows: impl Iterator<Item = (String, bool, i64, i64, i64)>) -> Self {
        let mut stats = SnapshotStats {
            total: 0,
            active: 0,
            total_used: 0,
            total_limit: 0,
            total_remaining: 0,
            usage_percent: 0.0,
            top_consumers: Vec::new(),
        };
        let mut consumers = Vec::new();
        for (name, enabled, quota, used, remaining) in rows {
            stats.total += 1;
            if enabled {
                stats.active += 1;
            }
            stats.total_used += used;
            if quota > 0 {
                stats.total_limit += quota;
            }
            if remaining != UNLIMITED_REMAINING {
                stats.total_remaining += remaining;
            }
            if used > 0 {
                consumers.push((name, used));
            }
        }
        if stats.total_limit > 0 {
            stats.usage_percent = stats.total_used as f64 / stats.total_limit as f64 * 100.0;
        }
        consumers.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        consumers.truncate(Self::TOP);
        stats.top_consumers = consumers;
        stats
    }

    pub fn from_users(users: &[UserRecord]) -> Self {
        Self::from_rows(users.iter().map(|user| {
            (
                user.username.clone(),
                user.enabled,
                user.quota_bytes,
                user.used_bytes,
                user.remaining_bytes,
            )
        }))
    }

    pub fn from_inbounds(inbounds: &[InboundRecord]) -> Self {
        Self::from_rows(inbounds.iter().flat_map(|inbound| {
            inbound.clients.iter().map(|client| {
                (
                    client.email.clone(),
                    client.enabled,
                    client.quota_bytes,
                    client.used_bytes,
                    client.remaining_bytes,
                )
            })
        }))
    }
}

/// Count listeners per protocol, for summaries.
pub fn protocol_breakdown(inbounds: &[InboundRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for inbound in inbounds {
        *counts.entry(inbound.protocol.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Parse an opaque settings blob, treating blank as an empty object.
pub(crate) fn parse_blob(raw: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return Some(json!({}));
    }
    serde_json::from_str(raw).ok()
}
