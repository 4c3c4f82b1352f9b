//! Response normalization
//!
//! Panel responses arrive in several envelopes depending on version and
//! route. Each body is matched against an ordered set of known shapes and the
//! first match is converted into canonical records.

use chrono::DateTime;
use panel_types::de::{lenient_i64, null_as_default};
use panel_types::PanelProtocol;
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::Value;

use crate::quota::derive_remaining;
use crate::record::{primary_from_settings, Group, ProxySettings, UserRecord};

/// Which known shape a listing matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEnvelope {
    /// `[ {canonical}, ... ]`
    DirectArray,
    /// `{"success": true, "obj": [ {canonical}, ... ]}`
    SuccessWrapper,
    /// `{"users": [ {canonical}, ... ]}`
    KeyedWrapper,
    /// `{"users": [ {panel user}, ... ]}`
    PanelListing,
}

/// Body matched none of the known shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch;

/// How a panel acknowledged a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteAck {
    /// The response echoed the account or reported success.
    Confirmed,
    /// The response carried an explicit failure.
    Rejected(String),
    /// 2xx with a body that says nothing either way.
    Assumed,
}

#[derive(Deserialize)]
struct SuccessEnvelope {
    success: bool,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    obj: Value,
}

/// Account as PasarGuard's API returns it.
#[derive(Debug, Deserialize)]
struct PanelUser {
    #[serde(default, deserialize_with = "lenient_i64")]
    id: i64,
    username: String,
    #[serde(default, deserialize_with = "null_as_default")]
    status: String,
    #[serde(default)]
    expire: Option<Expire>,
    #[serde(default, deserialize_with = "lenient_i64")]
    data_limit: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    used_traffic: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    lifetime_used_traffic: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    note: String,
    #[serde(default, deserialize_with = "null_as_default")]
    group_ids: Vec<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    subscription_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    proxy_settings: ProxySettings,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expire {
    Epoch(i64),
    Text(String),
    Other(IgnoredAny),
}

impl Expire {
    fn epoch_seconds(&self) -> i64 {
        match self {
            Expire::Epoch(seconds) => *seconds,
            Expire::Text(text) => DateTime::parse_from_rfc3339(text)
                .map(|parsed| parsed.timestamp())
                .unwrap_or_default(),
            Expire::Other(_) => 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GroupWire {
    #[serde(default, deserialize_with = "lenient_i64")]
    id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    title: String,
}

impl From<GroupWire> for Group {
    fn from(wire: GroupWire) -> Self {
        let name = if wire.name.is_empty() { wire.title } else { wire.name };
        Group { id: wire.id, name }
    }
}

/// Canonical records carry the snapshot's key names.
fn is_canonical(item: &Value) -> bool {
    item.as_object()
        .map(|fields| fields.contains_key("uuid") && fields.contains_key("totalGB"))
        .unwrap_or(false)
}

fn decode_canonical(items: &[Value]) -> Option<Vec<UserRecord>> {
    if !items.iter().all(is_canonical) {
        return None;
    }
    items
        .iter()
        .map(|item| serde_json::from_value::<UserRecord>(item.clone()).ok())
        .collect()
}

fn raw_counter(raw: &Value, key: &str) -> i64 {
    match raw.get(key) {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64))
            .unwrap_or_default(),
        _ => 0,
    }
}

fn from_panel_user(raw: &Value) -> Option<UserRecord> {
    let wire: PanelUser = serde_json::from_value(raw.clone()).ok()?;

    let (mut used, mut lifetime) = (wire.used_traffic, wire.lifetime_used_traffic);
    if used == 0 && lifetime == 0 {
        used = raw_counter(raw, "used_traffic");
        lifetime = raw_counter(raw, "lifetime_used_traffic");
    }
    if used == 0 && lifetime > 0 {
        used = lifetime;
    }

    let (protocol, identifier) =
        primary_from_settings(&wire.proxy_settings).unwrap_or((PanelProtocol::default(), String::new()));
    let email = if wire.note.contains('@') { wire.note.clone() } else { String::new() };

    Some(UserRecord {
        id: wire.id,
        username: wire.username,
        email,
        primary_identifier: identifier,
        enabled: wire.status == "active",
        quota_bytes: wire.data_limit,
        expiry_epoch_seconds: wire.expire.as_ref().map(Expire::epoch_seconds).unwrap_or_default(),
        ip_limit: 0,
        used_bytes: used,
        remaining_bytes: derive_remaining(wire.data_limit, used),
        protocol,
        port: 0,
        remark: wire.note.clone(),
        subscription_url: wire.subscription_url,
        note: wire.note,
        raw_protocol_settings: wire.proxy_settings,
        group_ids: wire.group_ids.into_iter().collect(),
    })
}

pub struct ResponseNormalizer;

impl ResponseNormalizer {
    /// Convert an account listing body into canonical records.
    ///
    /// Shapes are tried in a fixed order. A bare empty array is not accepted,
    /// since several unrelated routes answer with one; the wrapped shapes may
    /// be empty.
    pub fn normalize_users(body: &str) -> Result<(UserEnvelope, Vec<UserRecord>), ShapeMismatch> {
        let value: Value = serde_json::from_str(body).map_err(|_| ShapeMismatch)?;

        if let Value::Array(items) = &value {
            if !items.is_empty() {
                if let Some(records) = decode_canonical(items) {
                    return Ok((UserEnvelope::DirectArray, records));
                }
            }
            return Err(ShapeMismatch);
        }

        if let Ok(envelope) = serde_json::from_value::<SuccessEnvelope>(value.clone()) {
            if envelope.success {
                if let Value::Array(items) = &envelope.obj {
                    if let Some(records) = decode_canonical(items) {
                        return Ok((UserEnvelope::SuccessWrapper, records));
                    }
                }
            }
        }

        let Some(Value::Array(items)) = value.get("users") else {
            return Err(ShapeMismatch);
        };
        if let Some(records) = decode_canonical(items) {
            if !records.is_empty() {
                return Ok((UserEnvelope::KeyedWrapper, records));
            }
        }

        items
            .iter()
            .map(from_panel_user)
            .collect::<Option<Vec<_>>>()
            .map(|records| (UserEnvelope::PanelListing, records))
            .ok_or(ShapeMismatch)
    }

    /// Decode a single account object, as returned by a per-user route.
    pub fn normalize_user(body: &str) -> Result<UserRecord, ShapeMismatch> {
        let value: Value = serde_json::from_str(body).map_err(|_| ShapeMismatch)?;
        if is_canonical(&value) {
            return serde_json::from_value(value).map_err(|_| ShapeMismatch);
        }
        from_panel_user(&value).ok_or(ShapeMismatch)
    }

    /// Convert a group listing body. `{"groups": []}` is an empty but valid
    /// answer; a bare empty array is not.
    pub fn normalize_groups(body: &str) -> Result<Vec<Group>, ShapeMismatch> {
        let value: Value = serde_json::from_str(body).map_err(|_| ShapeMismatch)?;

        let decode = |items: &Vec<Value>| -> Option<Vec<Group>> {
            items
                .iter()
                .map(|item| {
                    item.is_object()
                        .then(|| serde_json::from_value::<GroupWire>(item.clone()).ok())
                        .flatten()
                        .map(Group::from)
                })
                .collect()
        };

        match &value {
            Value::Array(items) if !items.is_empty() => decode(items).ok_or(ShapeMismatch),
            Value::Object(fields) => {
                if fields.get("success").and_then(Value::as_bool) == Some(true) {
                    if let Some(Value::Array(items)) = fields.get("obj") {
                        if !items.is_empty() {
                            return decode(items).ok_or(ShapeMismatch);
                        }
                    }
                }
                match fields.get("groups") {
                    Some(Value::Array(items)) => decode(items).ok_or(ShapeMismatch),
                    _ => Err(ShapeMismatch),
                }
            }
            _ => Err(ShapeMismatch),
        }
    }

    /// Interpret the body of a 2xx write response.
    pub fn write_ack(body: &str) -> WriteAck {
        let Ok(value) = serde_json::from_str::<Value>(body) else {
            return WriteAck::Assumed;
        };

        if value
            .get("username")
            .and_then(Value::as_str)
            .map(|name| !name.is_empty())
            .unwrap_or(false)
        {
            return WriteAck::Confirmed;
        }

        match serde_json::from_value::<SuccessEnvelope>(value) {
            Ok(envelope) if envelope.success => WriteAck::Confirmed,
            Ok(envelope) => WriteAck::Rejected(envelope.msg),
            Err(_) => WriteAck::Assumed,
        }
    }

    /// Unwrap a 3X-UI `{success, msg, obj}` envelope.
    pub fn success_obj(body: &str) -> Result<Value, WriteAck> {
        match serde_json::from_str::<SuccessEnvelope>(body) {
            Ok(envelope) if envelope.success => Ok(envelope.obj),
            Ok(envelope) => Err(WriteAck::Rejected(envelope.msg)),
            Err(_) => Err(WriteAck::Assumed),
        }
    }
}
