//! 3X-UI API client
//!
//! Cookie session against the `/panel/api/inbounds` surface. Accounts live
//! as clients nested inside each inbound's settings JSON string.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use panel_types::de::{lenient_string, null_as_default};
use panel_types::PanelProtocol;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::{ClientConfig, Credentials};
use crate::endpoints::{Endpoint, Operation};
use crate::error::{Result, SyncError};
use crate::inbound::InboundPanel;
use crate::normalize::{ResponseNormalizer, WriteAck};
use crate::observer::{preview, SyncEvent, SyncObserver};
use crate::quota::derive_remaining;
use crate::record::{ClientRecord, InboundRecord};
use crate::runner::EndpointRunner;
use crate::snapshot::parse_blob;
use crate::transport::{ApiRequest, HttpTransport, RequestBody, Transport};
use crate::wireguard::WireguardKeys;

/// Inbound as listed by the panel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundWire {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub settings: String,
    #[serde(default)]
    pub stream_settings: String,
    #[serde(default)]
    pub sniffing: String,
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub listen: String,
}

/// Client entry inside an inbound's settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientSetting {
    #[serde(default)]
    id: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    enable: bool,
    #[serde(rename = "totalGB", default)]
    total_gb: i64,
    #[serde(default)]
    expiry_time: i64,
    #[serde(default)]
    limit_ip: u32,
    #[serde(default)]
    flow: String,
    #[serde(default)]
    sub_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    tg_id: String,
    #[serde(default)]
    reset: i64,
}

#[derive(Deserialize)]
struct InboundSettings {
    #[serde(default, deserialize_with = "null_as_default")]
    clients: Vec<ClientSetting>,
}

#[derive(Deserialize)]
struct ClientTraffic {
    #[serde(default)]
    up: i64,
    #[serde(default)]
    down: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InboundPayload<'a> {
    remark: &'a str,
    port: u16,
    protocol: &'a str,
    settings: String,
    stream_settings: String,
    sniffing: String,
    enable: bool,
    listen: &'a str,
    total: i64,
    expiry_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsMode {
    Create,
    Update,
}

/// Field a protocol keeps its client credential under.
fn client_credential_field(protocol: &PanelProtocol) -> &'static str {
    match protocol {
        PanelProtocol::Trojan | PanelProtocol::Shadowsocks => "password",
        _ => "id",
    }
}

fn client_setting_json(protocol: &PanelProtocol, client: &ClientRecord) -> Value {
    let mut entry = Map::new();
    entry.insert(client_credential_field(protocol).into(), json!(client.id));
    entry.insert("email".into(), json!(client.email));
    entry.insert("enable".into(), json!(client.enabled));
    entry.insert("totalGB".into(), json!(client.quota_bytes));
    entry.insert("expiryTime".into(), json!(client.expiry_time));
    entry.insert("limitIp".into(), json!(client.limit_ip));
    entry.insert("flow".into(), json!(client.flow));
    entry.insert("subId".into(), json!(client.sub_id));
    let tg_id = match client.tg_id.parse::<i64>() {
        Ok(numeric) => json!(numeric),
        Err(_) => json!(client.tg_id),
    };
    entry.insert("tgId".into(), tg_id);
    entry.insert("reset".into(), json!(client.reset));
    Value::Object(entry)
}

fn blank_as_empty_object(raw: &str) -> String {
    if raw.trim().is_empty() {
        "{}".to_string()
    } else {
        raw.to_string()
    }
}

/// Settings JSON to send for a listener.
///
/// Tunnel listeners get fresh keys on create and their stored settings on
/// update. Listeners without a client list are sent unchanged. Everything
/// else has its client list rewritten in full from the record.
pub fn rebuild_settings(inbound: &InboundRecord, mode: SettingsMode) -> Result<String> {
    if inbound.protocol.is_tunnel() {
        return Ok(match mode {
            SettingsMode::Update if !inbound.original_settings.trim().is_empty() => inbound.original_settings.clone(),
            SettingsMode::Update => json!({ "peers": [] }).to_string(),
            SettingsMode::Create => tunnel_settings(inbound)?,
        });
    }

    let mut settings = match parse_blob(&inbound.original_settings) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if inbound.clients.is_empty() && !settings.contains_key("clients") {
        return Ok(blank_as_empty_object(&inbound.original_settings));
    }

    let clients: Vec<Value> = inbound
        .clients
        .iter()
        .map(|client| client_setting_json(&inbound.protocol, client))
        .collect();
    settings.insert("clients".into(), Value::Array(clients));
    if inbound.protocol == PanelProtocol::Vless {
        settings.entry("decryption").or_insert_with(|| json!("none"));
    }

    Ok(serde_json::to_string(&Value::Object(settings))?)
}

fn tunnel_settings(inbound: &InboundRecord) -> Result<String> {
    let original = match parse_blob(&inbound.original_settings) {
        Some(Value::Object(map)) => map,
        _ => {
            debug!(remark = %inbound.remark, "Unparseable tunnel settings, peers will not be carried over");
            Map::new()
        }
    };

    let keys = WireguardKeys::generate();
    let mut settings = Map::new();
    settings.insert("privateKey".into(), json!(keys.private_key));
    settings.insert("publicKey".into(), json!(keys.public_key));
    settings.insert(
        "peers".into(),
        original.get("peers").cloned().unwrap_or_else(|| json!([])),
    );
    for key in ["mtu", "listenPort"] {
        if let Some(value) = original.get(key) {
            settings.insert(key.into(), value.clone());
        }
    }
    Ok(serde_json::to_string(&Value::Object(settings))?)
}

fn inbound_payload(inbound: &InboundRecord, mode: SettingsMode) -> Result<Value> {
    let payload = InboundPayload {
        remark: &inbound.remark,
        port: inbound.port,
        protocol: inbound.protocol.as_str(),
        settings: rebuild_settings(inbound, mode)?,
        stream_settings: blank_as_empty_object(&inbound.transport_settings),
        sniffing: blank_as_empty_object(&inbound.sniffing_settings),
        enable: inbound.enabled,
        listen: &inbound.listen_address,
        total: inbound.total_quota_bytes,
        expiry_time: inbound.expiry,
    };
    Ok(serde_json::to_value(payload)?)
}

/// Listener record with its clients, without traffic figures.
pub fn inbound_record(wire: &InboundWire) -> InboundRecord {
    let settings: Option<InboundSettings> = match wire.settings.trim() {
        "" | "{}" => None,
        raw => serde_json::from_str(raw).ok(),
    };
    let clients = settings
        .map(|settings| settings.clients)
        .unwrap_or_default()
        .into_iter()
        .map(|client| ClientRecord {
            id: if client.id.is_empty() { client.password } else { client.id },
            email: client.email,
            enabled: client.enable,
            quota_bytes: client.total_gb,
            expiry_time: client.expiry_time,
            sub_id: client.sub_id,
            used_bytes: 0,
            remaining_bytes: derive_remaining(client.total_gb, 0),
            limit_ip: client.limit_ip,
            flow: client.flow,
            tg_id: client.tg_id,
            reset: client.reset,
        })
        .collect();

    InboundRecord {
        id: wire.id,
        remark: wire.remark.clone(),
        protocol: PanelProtocol::from(wire.protocol.clone()),
        port: wire.port,
        enabled: wire.enable,
        tag: wire.tag.clone(),
        listen_address: wire.listen.clone(),
        expiry: wire.expiry_time,
        total_quota_bytes: wire.total,
        transport_settings: wire.stream_settings.clone(),
        sniffing_settings: wire.sniffing.clone(),
        original_settings: wire.settings.clone(),
        clients,
    }
}

fn unwrap_obj(endpoint: &Endpoint, body: &str) -> Result<Value> {
    ResponseNormalizer::success_obj(body).map_err(|ack| match ack {
        WriteAck::Rejected(message) => SyncError::Rejected {
            endpoint: endpoint.to_string(),
            message,
        },
        _ => SyncError::UnrecognizedShape {
            endpoint: endpoint.to_string(),
            body: preview(body),
        },
    })
}

pub struct ThreeXuiClient {
    runner: EndpointRunner,
    authenticated: AtomicBool,
}

impl ThreeXuiClient {
    pub fn new(config: &ClientConfig, observer: Arc<dyn SyncObserver>) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config)?);
        Ok(Self::with_transport(transport, observer))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, observer: Arc<dyn SyncObserver>) -> Self {
        Self {
            runner: EndpointRunner::new(transport, observer),
            authenticated: AtomicBool::new(false),
        }
    }

    fn ensure_authenticated(&self) -> Result<()> {
        if self.authenticated.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::NotAuthenticated)
        }
    }

    /// Log in and keep the session cookie.
    pub async fn login(&self, credentials: &Credentials) -> Result<()> {
        let request = ApiRequest::post("/login").with_json(json!({
            "username": credentials.username,
            "password": credentials.password,
        }));
        let response = self.runner.execute(request).await.map_err(|e| match e {
            SyncError::TransientEndpoint { .. } => SyncError::PanelUnreachable(e.to_string()),
            other => other,
        })?;

        if response.status != 200 {
            return Err(SyncError::LoginFailed(format!("server returned status {}", response.status)));
        }
        match ResponseNormalizer::success_obj(&response.body) {
            Ok(_) => {}
            Err(WriteAck::Rejected(message)) => return Err(SyncError::LoginFailed(message)),
            Err(_) => {
                return Err(SyncError::LoginFailed(format!(
                    "error parsing login response: {}",
                    preview(&response.body)
                )))
            }
        }

        self.authenticated.store(true, Ordering::SeqCst);
        info!(panel = %self.runner.transport().base_url(), "Authenticated with 3X-UI");
        Ok(())
    }

    pub async fn list_inbounds(&self) -> Result<Vec<InboundWire>> {
        self.ensure_authenticated()?;
        self.runner
            .run(&Operation::ListInbounds, RequestBody::None, |endpoint, response| {
                let obj = unwrap_obj(endpoint, &response.body)?;
                if obj.is_null() {
                    return Ok(Vec::new());
                }
                serde_json::from_value(obj).map_err(|_| SyncError::UnrecognizedShape {
                    endpoint: endpoint.to_string(),
                    body: preview(&response.body),
                })
            })
            .await
    }

    /// Bytes used by the client with this email, up plus down.
    pub async fn client_traffic(&self, email: &str) -> Result<i64> {
        self.ensure_authenticated()?;
        let operation = Operation::ClientTraffic {
            email: email.to_string(),
        };
        self.runner
            .run(&operation, RequestBody::None, |endpoint, response| {
                let obj = unwrap_obj(endpoint, &response.body)?;
                if obj.is_null() {
                    return Ok(0);
                }
                let traffic: ClientTraffic = serde_json::from_value(obj).map_err(|_| SyncError::UnrecognizedShape {
                    endpoint: endpoint.to_string(),
                    body: preview(&response.body),
                })?;
                Ok(traffic.up + traffic.down)
            })
            .await
    }

    /// Listeners with clients and, when asked, each client's traffic.
    ///
    /// A failed traffic lookup leaves the client at zero usage.
    pub async fn fetch_inbounds(&self, with_traffic: bool) -> Result<Vec<InboundRecord>> {
        let wires = self.list_inbounds().await?;
        let mut records = Vec::with_capacity(wires.len());

        for wire in &wires {
            let mut record = inbound_record(wire);
            debug!(remark = %record.remark, port = record.port, clients = record.clients.len(), "Processing inbound");

            if with_traffic {
                for client in record.clients.iter_mut().filter(|client| !client.email.is_empty()) {
                    match self.client_traffic(&client.email).await {
                        Ok(used) => {
                            client.used_bytes = used;
                            client.remaining_bytes = derive_remaining(client.quota_bytes, used);
                        }
                        Err(error) if error.is_run_fatal() => return Err(error),
                        Err(error) => self.runner.observer().on_event(&SyncEvent::TrafficLookupFailed {
                            email: client.email.clone(),
                            error: error.to_string(),
                        }),
                    }
                }
            }
            records.push(record);
        }

        Ok(records)
    }

    /// Create a listener. Returns the panel-assigned id when the response
    /// carries one.
    pub async fn add_inbound(&self, inbound: &InboundRecord) -> Result<Option<i64>> {
        self.ensure_authenticated()?;
        let payload = inbound_payload(inbound, SettingsMode::Create)?;
        self.runner
            .run(&Operation::AddInbound, RequestBody::Json(payload), |endpoint, response| {
                let obj = unwrap_obj(endpoint, &response.body)?;
                Ok(obj.get("id").and_then(Value::as_i64))
            })
            .await
    }

    /// Replace a listener, including its whole client list.
    pub async fn update_inbound(&self, id: i64, inbound: &InboundRecord) -> Result<()> {
        self.ensure_authenticated()?;
        let payload = inbound_payload(inbound, SettingsMode::Update)?;
        self.runner
            .run(
                &Operation::UpdateInbound { id },
                RequestBody::Json(payload),
                |endpoint, response| match ResponseNormalizer::write_ack(&response.body) {
                    WriteAck::Rejected(message) => Err(SyncError::Rejected {
                        endpoint: endpoint.to_string(),
                        message,
                    }),
                    WriteAck::Confirmed | WriteAck::Assumed => Ok(()),
                },
            )
            .await
    }
}

#[async_trait]
impl InboundPanel for ThreeXuiClient {
    async fn fetch_inbounds(&self) -> Result<Vec<InboundRecord>> {
        ThreeXuiClient::fetch_inbounds(self, false).await
    }

    async fn add_inbound(&self, inbound: &InboundRecord) -> Result<Option<i64>> {
        ThreeXuiClient::add_inbound(self, inbound).await
    }

    async fn update_inbound(&self, id: i64, inbound: &InboundRecord) -> Result<()> {
        ThreeXuiClient::update_inbound(self, id, inbound).await
    }
}
