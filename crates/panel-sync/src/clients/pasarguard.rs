//! PasarGuard API client
//!
//! Bearer-token session over a REST surface whose routes moved between
//! releases. Every account call goes through the candidate runner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use panel_types::PanelProtocol;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::{ClientConfig, Credentials};
use crate::endpoints::Operation;
use crate::error::{Result, SyncError};
use crate::normalize::{ResponseNormalizer, WriteAck};
use crate::observer::{preview, SyncEvent, SyncObserver};
use crate::reconcile::UserPanel;
use crate::record::{Group, UserRecord};
use crate::runner::EndpointRunner;
use crate::transport::{ApiRequest, HttpTransport, RequestBody, Transport};

/// Shadowsocks cipher assigned to accounts written by this client.
pub const SHADOWSOCKS_METHOD: &str = "chacha20-ietf-poly1305";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    Create,
    Update,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

/// Credential entry for the record's protocol.
pub fn proxy_settings_payload(record: &UserRecord) -> Value {
    let credential = record.primary_identifier.clone();
    let entry = match record.protocol {
        PanelProtocol::Vmess => json!({ "id": credential }),
        PanelProtocol::Vless => json!({ "id": credential, "flow": "" }),
        PanelProtocol::Trojan => json!({ "password": credential }),
        PanelProtocol::Shadowsocks => json!({ "password": credential, "method": SHADOWSOCKS_METHOD }),
        PanelProtocol::Other(_) => return Value::Object(Map::new()),
    };
    let mut settings = Map::new();
    settings.insert(record.protocol.as_str().to_string(), entry);
    Value::Object(settings)
}

/// Request body for creating or rewriting an account.
pub fn user_payload(record: &UserRecord, mode: PayloadMode) -> Value {
    let mut payload = Map::new();
    payload.insert("username".into(), json!(record.username));
    payload.insert("proxy_settings".into(), proxy_settings_payload(record));
    payload.insert(
        "status".into(),
        json!(if record.enabled { "active" } else { "disabled" }),
    );
    payload.insert("data_limit".into(), json!(record.quota_bytes.max(0)));

    if record.expiry_epoch_seconds > 0 {
        if let Some(expire) = DateTime::from_timestamp(record.expiry_epoch_seconds, 0) {
            payload.insert("expire".into(), json!(expire.to_rfc3339()));
        }
    }
    if record.used_bytes >= 0 {
        payload.insert("used_traffic".into(), json!(record.used_bytes));
        payload.insert("lifetime_used_traffic".into(), json!(record.used_bytes));
    }
    if !record.note.is_empty() {
        payload.insert("note".into(), json!(record.note));
    }
    if record.ip_limit > 0 {
        payload.insert("limit_ip".into(), json!(record.ip_limit));
    }
    if mode == PayloadMode::Create || !record.group_ids.is_empty() {
        payload.insert("group_ids".into(), json!(record.group_ids));
    }

    Value::Object(payload)
}

fn accept_write(endpoint: String, body: &str) -> Result<()> {
    match ResponseNormalizer::write_ack(body) {
        WriteAck::Confirmed | WriteAck::Assumed => Ok(()),
        WriteAck::Rejected(message) if message.to_lowercase().contains("already exists") => {
            Err(SyncError::Conflict(message))
        }
        WriteAck::Rejected(message) => Err(SyncError::Rejected { endpoint, message }),
    }
}

pub struct PasarGuardClient {
    runner: EndpointRunner,
    authenticated: AtomicBool,
}

impl PasarGuardClient {
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

    /// Exchange credentials for a bearer token.
    pub async fn login(&self, credentials: &Credentials) -> Result<()> {
        let request = ApiRequest::post("/api/admin/token").with_form(vec![
            ("grant_type".to_string(), "password".to_string()),
            ("username".to_string(), credentials.username.clone()),
            ("password".to_string(), credentials.password.clone()),
        ]);

        let response = self.runner.execute(request).await.map_err(|e| match e {
            SyncError::TransientEndpoint { .. } => SyncError::PanelUnreachable(e.to_string()),
            other => other,
        })?;

        if response.status != 200 {
            return Err(SyncError::LoginFailed(format!(
                "server returned status {}. Response: {}",
                response.status,
                preview(&response.body)
            )));
        }

        let token: TokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| SyncError::LoginFailed(format!("error parsing token response: {}", e)))?;
        if token.access_token.is_empty() {
            return Err(SyncError::LoginFailed("no access token received in response".into()));
        }

        self.runner.transport().set_bearer_token(Some(token.access_token)).await;
        self.authenticated.store(true, Ordering::SeqCst);
        info!(panel = %self.runner.transport().base_url(), "Authenticated with PasarGuard");
        Ok(())
    }

    pub async fn fetch_listing(&self) -> Result<Vec<UserRecord>> {
        self.ensure_authenticated()?;
        let (envelope, users) = self
            .runner
            .run(&Operation::ListUsers, RequestBody::Json(json!({})), |endpoint, response| {
                ResponseNormalizer::normalize_users(&response.body).map_err(|_| SyncError::UnrecognizedShape {
                    endpoint: endpoint.to_string(),
                    body: preview(&response.body),
                })
            })
            .await?;
        debug!(envelope = ?envelope, users = users.len(), "Fetched user listing");
        Ok(users)
    }

    pub async fn fetch_groups(&self) -> Result<Vec<Group>> {
        self.ensure_authenticated()?;
        self.runner
            .run(&Operation::ListGroups, RequestBody::None, |endpoint, response| {
                ResponseNormalizer::normalize_groups(&response.body).map_err(|_| SyncError::UnrecognizedShape {
                    endpoint: endpoint.to_string(),
                    body: preview(&response.body),
                })
            })
            .await
    }

    pub async fn fetch_user(&self, username: &str) -> Result<UserRecord> {
        self.ensure_authenticated()?;
        let operation = Operation::GetUser {
            username: username.to_string(),
        };
        self.runner
            .run(&operation, RequestBody::None, |endpoint, response| {
                ResponseNormalizer::normalize_user(&response.body).map_err(|_| SyncError::UnrecognizedShape {
                    endpoint: endpoint.to_string(),
                    body: preview(&response.body),
                })
            })
            .await
    }

    pub async fn create_user(&self, record: &UserRecord) -> Result<()> {
        self.ensure_authenticated()?;
        let payload = user_payload(record, PayloadMode::Create);
        debug!(username = %record.username, payload = %payload, "Creating user");

        self.runner
            .run(&Operation::CreateUser, RequestBody::Json(payload), |endpoint, response| {
                accept_write(endpoint.to_string(), &response.body)
            })
            .await?;

        self.apply_used_traffic(record).await;
        Ok(())
    }

    pub async fn update_user(&self, remote_username: &str, record: &UserRecord) -> Result<()> {
        self.ensure_authenticated()?;
        let payload = user_payload(record, PayloadMode::Update);
        debug!(username = %record.username, remote = %remote_username, payload = %payload, "Updating user");

        let operation = Operation::UpdateUser {
            username: remote_username.to_string(),
        };
        self.runner
            .run(&operation, RequestBody::Json(payload), |endpoint, response| {
                accept_write(endpoint.to_string(), &response.body)
            })
            .await?;

        self.apply_used_traffic(record).await;
        Ok(())
    }

    /// Some releases ignore counters in the account body and need them set
    /// separately. Failure is reported and otherwise ignored.
    async fn apply_used_traffic(&self, record: &UserRecord) {
        if record.used_bytes <= 0 {
            return;
        }
        if let Err(error) = self.set_traffic(&record.username, record.used_bytes).await {
            self.runner.observer().on_event(&SyncEvent::TrafficSetFailed {
                username: record.username.clone(),
                error: error.to_string(),
            });
        }
    }

    pub async fn set_traffic(&self, username: &str, used_bytes: i64) -> Result<()> {
        self.ensure_authenticated()?;
        let operation = Operation::SetTraffic {
            username: username.to_string(),
        };
        let payload = json!({
            "used_traffic": used_bytes,
            "lifetime_used_traffic": used_bytes,
        });
        self.runner
            .run(&operation, RequestBody::Json(payload), |_, _| Ok(()))
            .await
    }

    /// Remove the account from every group on the panel.
    pub async fn clear_groups(&self, username: &str) -> Result<()> {
        self.ensure_authenticated()?;
        let groups = self.fetch_groups().await?;
        if groups.is_empty() {
            debug!(username = %username, "No groups on panel, nothing to clear");
            return Ok(());
        }

        let user = self.fetch_user(username).await?;
        let payload = json!({
            "group_ids": groups.iter().map(|group| group.id).collect::<Vec<_>>(),
            "users": [user.id],
        });
        self.runner
            .run(&Operation::RemoveGroups, RequestBody::Json(payload), |_, _| Ok(()))
            .await
    }
}

#[async_trait]
impl UserPanel for PasarGuardClient {
    async fn fetch_listing(&self) -> Result<Vec<UserRecord>> {
        PasarGuardClient::fetch_listing(self).await
    }

    async fn create_user(&self, record: &UserRecord) -> Result<()> {
        PasarGuardClient::create_user(self, record).await
    }

    async fn update_user(&self, remote_username: &str, record: &UserRecord) -> Result<()> {
        PasarGuardClient::update_user(self, remote_username, record).await
    }

    async fn clear_groups(&self, username: &str) -> Result<()> {
        PasarGuardClient::clear_groups(self, username).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_payload_always_carries_groups() {
        let record = UserRecord::new("alice", "u-1", PanelProtocol::Vless);
        let payload = user_payload(&record, PayloadMode::Create);

        assert_eq!(payload["group_ids"], json!([]));
        assert_eq!(payload["proxy_settings"]["vless"], json!({"id": "u-1", "flow": ""}));
        assert_eq!(payload["status"], "active");
        assert_eq!(payload["data_limit"], 0);
        assert!(payload.get("expire").is_none());

        let update = user_payload(&record, PayloadMode::Update);
        assert!(update.get("group_ids").is_none());
    }

    #[test]
    fn payload_fields_follow_record() {
        let mut record = UserRecord::new("bob", "pw", PanelProtocol::Shadowsocks)
            .with_quota(5_000, 0)
            .with_groups([4]);
        record.enabled = false;
        record.expiry_epoch_seconds = 1_893_456_000;
        record.note = "vip".into();
        record.ip_limit = 2;

        let payload = user_payload(&record, PayloadMode::Update);
        assert_eq!(payload["status"], "disabled");
        assert_eq!(payload["data_limit"], 5_000);
        assert_eq!(payload["expire"], "2030-01-01T00:00:00+00:00");
        assert_eq!(payload["note"], "vip");
        assert_eq!(payload["limit_ip"], 2);
        assert_eq!(payload["group_ids"], json!([4]));
        assert_eq!(payload["proxy_settings"]["shadowsocks"]["method"], SHADOWSOCKS_METHOD);
    }

    #[test]
    fn unknown_protocol_has_empty_settings() {
        let record = UserRecord::new("carol", "x", PanelProtocol::from("wireguard"));
        assert_eq!(proxy_settings_payload(&record), json!({}));
    }

    #[test]
    fn rejected_writes() {
        assert!(accept_write("POST /api/user".into(), r#"{"success": true}"#).is_ok());
        assert!(matches!(
            accept_write("POST /api/user".into(), r#"{"success": false, "msg": "User already exists"}"#),
            Err(SyncError::Conflict(_))
        ));
        assert!(matches!(
            accept_write("POST /api/user".into(), r#"{"success": false, "msg": "bad"}"#),
            Err(SyncError::Rejected { .. })
        ));
    }
}
