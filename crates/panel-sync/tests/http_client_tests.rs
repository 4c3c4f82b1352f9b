//! Panel clients against mock HTTP servers

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use panel_sync::{
    ClientConfig, Credentials, InboundRecord, PanelProtocol, PasarGuardClient, RecordingObserver, SyncError,
    SyncEvent, ThreeXuiClient, UserRecord,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn credentials() -> Credentials {
    Credentials::new("admin", "secret")
}

async fn guard_session(server: &MockServer) -> Result<(PasarGuardClient, Arc<RecordingObserver>), SyncError> {
    Mock::given(method("POST"))
        .and(path("/api/admin/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "token_type": "bearer"
        })))
        .mount(server)
        .await;

    let observer = Arc::new(RecordingObserver::new());
    let client = PasarGuardClient::new(&ClientConfig::new(server.uri()), observer.clone())?;
    client.login(&credentials()).await?;
    Ok((client, observer))
}

#[tokio::test]
async fn test_guard_listing_uses_bearer_token() -> TestResult {
    let server = MockServer::start().await;
    let (client, _) = guard_session(&server).await?;

    Mock::given(method("GET"))
        .and(path("/api/users"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [{
                "id": 4,
                "username": "alice",
                "status": "active",
                "data_limit": 1000,
                "used_traffic": 250,
                "proxy_settings": {"vless": {"id": "U1", "flow": ""}},
                "group_ids": [1, 2]
            }],
            "total": 1
        })))
        .mount(&server)
        .await;

    let users = client.fetch_listing().await?;

    assert_eq!(users.len(), 1);
    assert_eq!(users[0].username, "alice");
    assert_eq!(users[0].protocol, PanelProtocol::Vless);
    assert_eq!(users[0].remaining_bytes, 750);
    assert_eq!(users[0].group_ids.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_guard_login_rejected() -> TestResult {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/admin/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let client = PasarGuardClient::new(&ClientConfig::new(server.uri()), Arc::new(RecordingObserver::new()))?;
    match client.login(&credentials()).await {
        Err(SyncError::LoginFailed(message)) => assert!(message.contains("status 401")),
        other => panic!("expected login failure, got {:?}", other),
    }
    assert!(matches!(client.fetch_listing().await, Err(SyncError::NotAuthenticated)));
    Ok(())
}

#[tokio::test]
async fn test_listing_exhausts_every_candidate_once() -> TestResult {
    let server = MockServer::start().await;
    let (client, _) = guard_session(&server).await?;

    let result = client.fetch_listing().await;
    assert!(matches!(result, Err(SyncError::EndpointsExhausted { attempts: 20, .. })));

    let requests = server.received_requests().await.unwrap_or_default();
    let listing_calls: Vec<String> = requests
        .iter()
        .filter(|request| {
            let route = request.url.path();
            route != "/api/admin/token" && !route.contains("openapi") && !route.contains("docs") && !route.contains("swagger")
        })
        .map(|request| format!("{} {}", request.method, request.url.path()))
        .collect();
    let unique: HashSet<&String> = listing_calls.iter().collect();

    assert_eq!(listing_calls.len(), 20);
    assert_eq!(unique.len(), 20);
    Ok(())
}

#[tokio::test]
async fn test_timed_out_route_moves_to_next_candidate() -> TestResult {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/admin/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"users": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/admin/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [{"id": 9, "username": "zoe", "proxy_settings": {"vless": {"id": "z1"}}}]
        })))
        .mount(&server)
        .await;

    let observer = Arc::new(RecordingObserver::new());
    let config = ClientConfig::new(server.uri()).with_timeout(Duration::from_millis(500));
    let client = PasarGuardClient::new(&config, observer.clone())?;
    client.login(&credentials()).await?;

    let users = client.fetch_listing().await?;

    assert_eq!(users.len(), 1);
    assert_eq!(users[0].username, "zoe");
    assert_eq!(
        observer.count(|e| matches!(e, SyncEvent::EndpointFailed { error, .. } if error.contains("timed out"))),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_schema_routes_are_tried_first() -> TestResult {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/openapi.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "paths": {
                "/api/v2/users": {"get": {}},
                "/api/v2/user/{username}": {"get": {}}
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"users": []})))
        .expect(1)
        .mount(&server)
        .await;
    let (client, observer) = guard_session(&server).await?;

    let users = client.fetch_listing().await?;

    assert!(users.is_empty());
    assert_eq!(observer.count(|e| matches!(e, SyncEvent::EndpointAttempt { .. })), 1);
    Ok(())
}

#[tokio::test]
async fn test_unauthorized_listing_aborts_immediately() -> TestResult {
    let server = MockServer::start().await;
    let (client, observer) = guard_session(&server).await?;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    assert!(matches!(client.fetch_listing().await, Err(SyncError::AuthExpired)));
    assert_eq!(observer.count(|e| matches!(e, SyncEvent::EndpointAttempt { .. })), 1);
    Ok(())
}

#[tokio::test]
async fn test_create_conflict_stops_candidates() -> TestResult {
    let server = MockServer::start().await;
    let (client, _) = guard_session(&server).await?;
    Mock::given(method("POST"))
        .and(path("/api/user"))
        .and(body_partial_json(json!({"username": "bob", "group_ids": []})))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"detail": "User already exists"})))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.create_user(&UserRecord::new("bob", "u-2", PanelProtocol::Vmess)).await;

    assert!(matches!(result, Err(SyncError::Conflict(_))));
    Ok(())
}

#[tokio::test]
async fn test_update_falls_through_to_working_route() -> TestResult {
    let server = MockServer::start().await;
    let (client, _) = guard_session(&server).await?;
    Mock::given(method("PUT"))
        .and(path("/api/user/alice"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/user/alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"username": "alice"})))
        .expect(1)
        .mount(&server)
        .await;

    client
        .update_user("alice", &UserRecord::new("alice", "u-1", PanelProtocol::Trojan))
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_group_listing_shapes() -> TestResult {
    let server = MockServer::start().await;
    let (client, _) = guard_session(&server).await?;
    Mock::given(method("GET"))
        .and(path("/api/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "groups": [{"id": 1, "name": "default"}, {"id": 2, "title": "vip"}]
        })))
        .mount(&server)
        .await;

    let groups = client.fetch_groups().await?;

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[1].name, "vip");
    Ok(())
}

async fn xui_session(server: &MockServer) -> Result<(ThreeXuiClient, Arc<RecordingObserver>), SyncError> {
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_partial_json(json!({"username": "admin"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "msg": "", "obj": null})))
        .mount(server)
        .await;

    let observer = Arc::new(RecordingObserver::new());
    let client = ThreeXuiClient::new(&ClientConfig::new(server.uri()), observer.clone())?;
    client.login(&credentials()).await?;
    Ok((client, observer))
}

#[tokio::test]
async fn test_xui_inbounds_with_traffic() -> TestResult {
    let server = MockServer::start().await;
    let (client, observer) = xui_session(&server).await?;

    let settings = json!({
        "clients": [
            {"id": "u1", "email": "alpha", "enable": true, "totalGB": 1000},
            {"id": "u2", "email": "beta", "enable": true, "totalGB": 1000}
        ],
        "decryption": "none"
    });
    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "msg": "",
            "obj": [{
                "id": 1,
                "remark": "main",
                "protocol": "vless",
                "port": 443,
                "settings": settings.to_string(),
                "streamSettings": "{}",
                "sniffing": "{}",
                "enable": true,
                "tag": "inbound-443",
                "expiryTime": 0,
                "total": 0,
                "listen": ""
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/panel/api/inbounds/getClientTraffics/alpha"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "obj": {"up": 100, "down": 200}
        })))
        .mount(&server)
        .await;

    let inbounds = client.fetch_inbounds(true).await?;

    assert_eq!(inbounds.len(), 1);
    let clients = &inbounds[0].clients;
    assert_eq!((clients[0].used_bytes, clients[0].remaining_bytes), (300, 700));
    // failed lookup leaves the quota intact
    assert_eq!((clients[1].used_bytes, clients[1].remaining_bytes), (0, 1000));
    assert_eq!(observer.count(|e| matches!(e, SyncEvent::TrafficLookupFailed { .. })), 1);
    Ok(())
}

#[tokio::test]
async fn test_xui_login_rejected() -> TestResult {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false, "msg": "wrong password"})))
        .mount(&server)
        .await;

    let client = ThreeXuiClient::new(&ClientConfig::new(server.uri()), Arc::new(RecordingObserver::new()))?;
    match client.login(&credentials()).await {
        Err(SyncError::LoginFailed(message)) => assert_eq!(message, "wrong password"),
        other => panic!("expected login failure, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_xui_add_inbound_returns_id() -> TestResult {
    let server = MockServer::start().await;
    let (client, _) = xui_session(&server).await?;
    Mock::given(method("POST"))
        .and(path("/panel/api/inbounds/add"))
        .and(body_partial_json(json!({"remark": "edge", "port": 8443, "protocol": "trojan", "sniffing": "{}"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "obj": {"id": 17}})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/panel/api/inbounds/update/17"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false, "msg": "port in use"})))
        .mount(&server)
        .await;

    let inbound = InboundRecord {
        id: 0,
        remark: "edge".into(),
        protocol: PanelProtocol::Trojan,
        port: 8443,
        enabled: true,
        tag: String::new(),
        listen_address: String::new(),
        expiry: 0,
        total_quota_bytes: 0,
        transport_settings: "{\"network\":\"tcp\"}".into(),
        sniffing_settings: String::new(),
        original_settings: String::new(),
        clients: Vec::new(),
    };

    assert_eq!(client.add_inbound(&inbound).await?, Some(17));
    assert!(matches!(
        client.update_inbound(17, &inbound).await,
        Err(SyncError::EndpointsExhausted { attempts: 1, .. })
    ));
    Ok(())
}
