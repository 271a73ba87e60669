//! HTTP-level tests for `ConsulCoordinator` against a mock coordinator.

use std::time::Duration;

use cascade_coordinator::{
    ConsulCoordinator, Coordinator, KvPair, ServiceRegistration, SessionBehavior, SessionEntry,
    UserEvent,
};
use serde_json::json;
use wiremock::matchers::{body_string, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn roll_session() -> SessionEntry {
    SessionEntry {
        name: "cascade".to_string(),
        ttl: "250s".to_string(),
        behavior: SessionBehavior::Delete,
    }
}

#[tokio::test]
async fn service_nodes_passes_tag_filter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog/service/cascade"))
        .and(query_param("tag", "db"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "Node": "dbA",
                "Address": "10.0.0.1",
                "ServiceTags": ["db"],
                "ServicePort": 0
            }
        ])))
        .mount(&server)
        .await;

    let client = ConsulCoordinator::new(server.uri()).unwrap();
    let nodes = client.service_nodes("cascade", "db").await.unwrap();

    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node, "dbA");
    assert_eq!(nodes[0].service_tags, vec!["db".to_string()]);
}

#[tokio::test]
async fn catalog_node_maps_null_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog/node/ghost"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
        .mount(&server)
        .await;

    let client = ConsulCoordinator::new(server.uri()).unwrap();
    assert!(client.catalog_node("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn kv_get_decodes_base64_and_maps_404() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/cascade/roll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"Key": "cascade/roll", "Value": "YWxpY2U=", "Session": "s-1"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/kv/cascade/run_order"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = ConsulCoordinator::new(server.uri()).unwrap();

    let pair = client.kv_get("cascade/roll").await.unwrap().unwrap();
    assert_eq!(pair.value, b"alice");
    assert_eq!(pair.session.as_deref(), Some("s-1"));

    assert!(client.kv_get("cascade/run_order").await.unwrap().is_none());
}

#[tokio::test]
async fn kv_acquire_sends_session_and_value() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/cascade/roll"))
        .and(query_param("acquire", "s-1"))
        .and(body_string("alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
        .mount(&server)
        .await;

    let client = ConsulCoordinator::new(server.uri()).unwrap();
    let pair = KvPair {
        key: "cascade/roll".to_string(),
        value: b"alice".to_vec(),
        session: Some("s-1".to_string()),
    };
    assert!(client.kv_acquire(&pair).await.unwrap());
}

#[tokio::test]
async fn kv_release_reports_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/kv/cascade/roll"))
        .and(query_param("release", "s-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(false)))
        .mount(&server)
        .await;

    let client = ConsulCoordinator::new(server.uri()).unwrap();
    let pair = KvPair {
        key: "cascade/roll".to_string(),
        value: b"alice".to_vec(),
        session: Some("s-1".to_string()),
    };
    assert!(!client.kv_release(&pair).await.unwrap());
}

#[tokio::test]
async fn session_create_returns_id() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ID": "s-new"})))
        .mount(&server)
        .await;

    let client = ConsulCoordinator::new(server.uri()).unwrap();
    let id = client.session_create(&roll_session()).await.unwrap();
    assert_eq!(id, "s-new");
}

#[tokio::test]
async fn session_renew_maps_404_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/renew/s-dead"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/session/renew/s-live"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"ID": "s-live", "Name": "cascade", "TTL": "250s", "Behavior": "delete"}
        ])))
        .mount(&server)
        .await;

    let client = ConsulCoordinator::new(server.uri()).unwrap();

    assert!(client.session_renew("s-dead").await.unwrap().is_none());

    let renewed = client.session_renew("s-live").await.unwrap().unwrap();
    assert_eq!(renewed.behavior, SessionBehavior::Delete);
    assert_eq!(renewed.ttl, "250s");
}

#[tokio::test]
async fn event_fire_sends_filter_and_payload() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/event/fire/cascade.cm"))
        .and(query_param("node", "^web1"))
        .and(body_string(r#"{"source":"cascade cli","msg":"run","ref":""}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ID": "evt-1"})))
        .mount(&server)
        .await;

    let client = ConsulCoordinator::new(server.uri()).unwrap();
    let event = UserEvent {
        id: String::new(),
        name: "cascade.cm".to_string(),
        payload: br#"{"source":"cascade cli","msg":"run","ref":""}"#.to_vec(),
        node_filter: "^web1".to_string(),
    };
    assert_eq!(client.event_fire(&event).await.unwrap(), "evt-1");
}

#[tokio::test]
async fn event_list_reads_index_header_and_decodes_payloads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/event/list"))
        .and(query_param("name", "cascade.cm"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Consul-Index", "7")
                .set_body_json(json!([
                    {
                        "ID": "evt-1",
                        "Name": "cascade.cm",
                        "Payload": "eyJtc2ciOiJydW4ifQ==",
                        "NodeFilter": "^web1"
                    }
                ])),
        )
        .mount(&server)
        .await;

    let client = ConsulCoordinator::new(server.uri()).unwrap();
    let (events, index) = client
        .event_list("cascade.cm", 0, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(index, 7);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload, br#"{"msg":"run"}"#.to_vec());
    assert_eq!(events[0].node_filter, "^web1");
}

#[tokio::test]
async fn register_service_puts_registration() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/service/register"))
        .and(body_string(r#"{"Name":"cascade","Tags":["db","web"]}"#))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = ConsulCoordinator::new(server.uri()).unwrap();
    let registration = ServiceRegistration {
        name: "cascade".to_string(),
        tags: vec!["db".to_string(), "web".to_string()],
    };
    client.register_service(&registration).await.unwrap();
}

#[tokio::test]
async fn server_errors_surface_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/agent/self"))
        .respond_with(ResponseTemplate::new(500).set_body_string("agent down"))
        .mount(&server)
        .await;

    let client = ConsulCoordinator::new(server.uri()).unwrap();
    let err = client.agent_self().await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("500"), "unexpected error: {message}");
    assert!(message.contains("agent down"), "unexpected error: {message}");
}

#[tokio::test]
async fn agent_self_extracts_node_identity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/agent/self"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Config": {"NodeName": "web1", "AdvertiseAddr": "10.0.0.5"}
        })))
        .mount(&server)
        .await;

    let client = ConsulCoordinator::new(server.uri()).unwrap();
    let config = client.agent_self().await.unwrap();
    assert_eq!(config.node_name, "web1");
    assert_eq!(config.advertise_addr, "10.0.0.5");
}
