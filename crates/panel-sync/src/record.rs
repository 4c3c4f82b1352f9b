use std::collections::{BTreeMap, BTreeSet};

use panel_types::de::{lenient_string, null_as_default};
use panel_types::PanelProtocol;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::quota::UNLIMITED_REMAINING;

/// Protocol name to credential fields, exactly as the panel reported them.
pub type ProxySettings = BTreeMap<String, Value>;

fn unknown_remaining() -> i64 {
    UNLIMITED_REMAINING
}

/// Canonical account record.
///
/// Field names on the wire are the snapshot file's names and must stay fixed
/// so exports made by older builds keep importing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "uuid", default)]
    pub primary_identifier: String,
    #[serde(rename = "enable", default)]
    pub enabled: bool,
    /// Bytes, 0 = unlimited
    #[serde(rename = "totalGB", default)]
    pub quota_bytes: i64,
    /// Epoch seconds, 0 = never
    #[serde(rename = "expiryTime", default)]
    pub expiry_epoch_seconds: i64,
    #[serde(rename = "limitIp", default)]
    pub ip_limit: u32,
    #[serde(rename = "usedTraffic", default)]
    pub used_bytes: i64,
    /// Bytes, -1 = unlimited or unknown
    #[serde(rename = "remainingTraffic", default = "unknown_remaining")]
    pub remaining_bytes: i64,
    #[serde(default)]
    pub protocol: PanelProtocol,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub subscription_url: String,
    #[serde(default)]
    pub note: String,
    #[serde(rename = "proxy_settings", default, deserialize_with = "null_as_default")]
    pub raw_protocol_settings: ProxySettings,
    #[serde(default, deserialize_with = "null_as_default")]
    pub group_ids: BTreeSet<i64>,
}

impl Default for UserRecord {
    fn default() -> Self {
        Self {
            id: 0,
            username: String::new(),
            email: String::new(),
            primary_identifier: String::new(),
            enabled: true,
            quota_bytes: 0,
            expiry_epoch_seconds: 0,
            ip_limit: 0,
            used_bytes: 0,
            remaining_bytes: UNLIMITED_REMAINING,
            protocol: PanelProtocol::default(),
            port: 0,
            remark: String::new(),
            subscription_url: String::new(),
            note: String::new(),
            raw_protocol_settings: ProxySettings::new(),
            group_ids: BTreeSet::new(),
        }
    }
}

impl UserRecord {
    pub fn new(username: impl Into<String>, identifier: impl Into<String>, protocol: PanelProtocol) -> Self {
        Self {
            username: username.into(),
            primary_identifier: identifier.into(),
            protocol,
            ..Self::default()
        }
    }

    pub fn with_quota(mut self, quota_bytes: i64, used_bytes: i64) -> Self {
        self.quota_bytes = quota_bytes;
        self.used_bytes = used_bytes;
        self.remaining_bytes = crate::quota::derive_remaining(quota_bytes, used_bytes);
        self
    }

    pub fn with_groups(mut self, group_ids: impl IntoIterator<Item = i64>) -> Self {
        self.group_ids = group_ids.into_iter().collect();
        self
    }

    pub fn with_settings(mut self, settings: ProxySettings) -> Self {
        self.raw_protocol_settings = settings;
        self
    }

    /// Every credential value this account exposes, normalized and without
    /// duplicates. The primary identifier comes first when present.
    pub fn all_identifiers(&self) -> Vec<String> {
        let mut identifiers = Vec::new();
        let primary = crate::index::normalize_identifier(&self.primary_identifier);
        if !primary.is_empty() {
            identifiers.push(primary);
        }
        for candidate in scan_settings_identifiers(&self.raw_protocol_settings) {
            if !identifiers.contains(&candidate) {
                identifiers.push(candidate);
            }
        }
        identifiers
    }
}

/// Collect credential values from the known protocol keys and field names.
pub fn scan_settings_identifiers(settings: &ProxySettings) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for protocol in PanelProtocol::SETTINGS_KEYS {
        let Some(Value::Object(fields)) = settings.get(protocol) else {
            continue;
        };
        for field in PanelProtocol::CREDENTIAL_FIELDS {
            let Some(Value::String(raw)) = fields.get(field) else {
                continue;
            };
            let normalized = crate::index::normalize_identifier(raw);
            if !normalized.is_empty() && !found.contains(&normalized) {
                found.push(normalized);
            }
        }
    }
    found
}

/// Pick the protocol and primary credential the way panels expose them:
/// first of vmess, vless, trojan, shadowsocks that has an entry.
pub fn primary_from_settings(settings: &ProxySettings) -> Option<(PanelProtocol, String)> {
    PanelProtocol::ACCOUNT_PROTOCOLS.iter().find_map(|protocol| {
        let Value::Object(fields) = settings.get(protocol.as_str())? else {
            return None;
        };
        let credential = protocol
            .credential_field()
            .and_then(|field| fields.get(field))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some((protocol.clone(), credential))
    })
}

/// Account group on panels that support grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

/// Listener-scoped record (3X-UI inbound) with its nested clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub protocol: PanelProtocol,
    #[serde(default)]
    pub port: u16,
    #[serde(rename = "enable", default)]
    pub enabled: bool,
    #[serde(default)]
    pub tag: String,
    #[serde(rename = "listen", default)]
    pub listen_address: String,
    #[serde(rename = "inbound_expiry_time", default)]
    pub expiry: i64,
    #[serde(rename = "inbound_total_gb_bytes", default)]
    pub total_quota_bytes: i64,
    /// Stream settings JSON, opaque
    #[serde(rename = "transmission", default)]
    pub transport_settings: String,
    /// Sniffing settings JSON, opaque
    #[serde(rename = "external_proxy", default)]
    pub sniffing_settings: String,
    /// The listener's settings JSON as the panel returned it
    #[serde(default)]
    pub original_settings: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub clients: Vec<ClientRecord>,
}

/// Per-connection credential nested under a listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    #[serde(rename = "client_email", default)]
    pub email: String,
    #[serde(rename = "client_id", default)]
    pub id: String,
    #[serde(rename = "client_enable", default)]
    pub enabled: bool,
    #[serde(rename = "client_total_gb", default)]
    pub quota_bytes: i64,
    #[serde(rename = "client_expiry_time", default)]
    pub expiry_time: i64,
    #[serde(rename = "client_sub_id", default)]
    pub sub_id: String,
    #[serde(rename = "traffic_used", default)]
    pub used_bytes: i64,
    #[serde(rename = "traffic_remaining", default = "unknown_remaining")]
    pub remaining_bytes: i64,
    #[serde(rename = "client_limit_ip", default)]
    pub limit_ip: u32,
    #[serde(rename = "client_flow", default)]
    pub flow: String,
    #[serde(rename = "client_tg_id", default, deserialize_with = "lenient_string")]
    pub tg_id: String,
    #[serde(rename = "client_reset", default)]
    pub reset: i64,
}

impl Default for ClientRecord {
    fn default() -> Self {
        Self {
            email: String::new(),
            id: String::new(),
            enabled: true,
            quota_bytes: 0,
            expiry_time: 0,
            sub_id: String::new(),
            used_bytes: 0,
            remaining_bytes: UNLIMITED_REMAINING,
            limit_ip: 0,
            flow: String::new(),
            tg_id: String::new(),
            reset: 0,
        }
    }
}
