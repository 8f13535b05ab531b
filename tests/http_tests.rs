use std::net::TcpListener;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use gatemesh::api::{self, AppState};
use gatemesh::auther::GatewayAuther;
use gatemesh::lifecycle::Lifecycle;
use gatemesh::mesh::{HttpMeshConnector, MeshEngine, MeshStores};
use gatemesh::settings::{InternalCredential, Settings, SiblingConfig};
use serde_json::{json, Value};

const INTERNAL_ID: &str = "ak.mk0.00001";

struct TestNode {
    engine: Arc<MeshEngine>,
    base: String,
}

fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    (listener, base)
}

fn internal_credential() -> InternalCredential {
    InternalCredential {
        access_id: INTERNAL_ID.to_string(),
        access_key: vec![42u8; 32],
    }
}

fn start_node(
    node_id: &str,
    listener: TcpListener,
    base: &str,
    master: bool,
    siblings: Vec<SiblingConfig>,
) -> TestNode {
    let settings = Settings {
        node_id: node_id.to_string(),
        advertised_urls: vec![base.to_string()],
        is_master: master,
        siblings,
        internal_credential: Some(internal_credential()),
        ..Settings::default()
    };
    let stores = MeshStores::in_memory(&settings);
    let lifecycle = Arc::new(Lifecycle::new());
    lifecycle.register_trim(Arc::new(stores.credentials.clone()));
    let auther = GatewayAuther::new(
        stores.credentials.clone(),
        settings.internal_credential.clone(),
    );
    let connector = HttpMeshConnector::new(
        auther.clone(),
        settings.sync_connect_timeout(),
        settings.sync_read_timeout(),
    )
    .unwrap();
    let engine = Arc::new(MeshEngine::new(&settings, stores, Arc::new(connector)));

    let app = api::api(AppState::new(engine.clone(), auther, lifecycle));
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(app.into_make_service());
    tokio::spawn(server);

    TestNode {
        engine,
        base: base.to_string(),
    }
}

fn single_node(node_id: &str) -> TestNode {
    let (listener, base) = bind();
    start_node(node_id, listener, &base, true, Vec::new())
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

fn sibling(id: &str, base: &str) -> SiblingConfig {
    SiblingConfig {
        id: id.to_string(),
        urls: vec![base.to_string()],
    }
}

#[tokio::test]
async fn test_base_endpoints() {
    let node = single_node("gw-http");
    let client = http_client();

    let health = client
        .get(format!("{}/health", node.base))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");

    let about: Value = client
        .get(format!("{}/about", node.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(about["node_id"], "gw-http");

    let trim = client
        .post(format!("{}/trim-caches", node.base))
        .send()
        .await
        .unwrap();
    assert_eq!(trim.status(), 200);
}

#[tokio::test]
async fn test_access_admin_flow() {
    let node = single_node("gw-admin");
    let client = http_client();

    let resp = client
        .post(format!("{}/access/merchant-1", node.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let issued: Value = resp.json().await.unwrap();
    let id = issued["id"].as_str().unwrap().to_string();
    let key = BASE64.decode(issued["access_key"].as_str().unwrap()).unwrap();
    assert_eq!(key.len(), 32);

    let fetched: Value = client
        .get(format!("{}/access/{}", node.base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["valid"], true);
    assert!(fetched.get("access_key").is_none());

    let summary: Value = client
        .put(format!("{}/access/{}/summary", node.base, id))
        .json(&json!({"summary": "billing team"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["summary"], "billing team");

    let disabled: Value = client
        .put(format!("{}/access/{}/state", node.base, id))
        .json(&json!({"valid": false}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(disabled["valid"], false);

    let listed: Value = client
        .get(format!(
            "{}/access?group_id=merchant-1&keyword=billing",
            node.base
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let missing = client
        .get(format!("{}/access/ak.mk1.00001", node.base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_policy_and_service_endpoints() {
    let node = single_node("gw-policy");
    let client = http_client();
    let row = format!("{}/policy/right/orders", node.base);

    let put = client
        .put(&row)
        .json(&json!({"allow": ["merchant-1"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), 200);
    let got: Value = client.get(&row).send().await.unwrap().json().await.unwrap();
    assert_eq!(got["content"]["allow"][0], "merchant-1");
    assert_eq!(client.delete(&row).send().await.unwrap().status(), 204);
    assert_eq!(client.get(&row).send().await.unwrap().status(), 404);

    let bad = client
        .get(format!("{}/policy/acl/x", node.base))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    let registered = client
        .post(format!("{}/services", node.base))
        .json(&json!({"id": "svc-1", "name": "orders", "urls": ["http://10.0.0.9:9000"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(registered.status(), 201);
    let services: Value = client
        .get(format!("{}/services", node.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(services["local"][0]["node_id"], "gw-policy");
    let gone = client
        .delete(format!("{}/services/svc-1", node.base))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 204);
}

#[tokio::test]
async fn test_signed_sync_between_http_nodes() {
    let (a_listener, a_base) = bind();
    let (b_listener, b_base) = bind();
    let a = start_node("gw-a", a_listener, &a_base, true, vec![sibling("gw-b", &b_base)]);
    let b = start_node("gw-b", b_listener, &b_base, false, vec![sibling("gw-a", &a_base)]);

    let issued = a.engine.stores().credentials.issue_access("merchant-1").unwrap();
    let outcome = a.engine.gossip_once().await;
    assert_eq!(outcome.delivered, vec!["gw-b".to_string()]);

    let client = http_client();
    let fetched = client
        .get(format!("{}/access/{}", b.base, issued.id))
        .send()
        .await
        .unwrap();
    assert_eq!(fetched.status(), 200);

    // gw-b learned gw-a as the caller and credited it
    let nodes: Value = client
        .get(format!("{}/mesh/nodes", b.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(nodes["siblings"][0]["id"], "gw-a");
    assert_eq!(nodes["siblings"][0]["health"], 4);
}

#[tokio::test]
async fn test_unsigned_mesh_calls_are_rejected() {
    let node = single_node("gw-guarded");
    let client = http_client();

    let sync: Value = client
        .post(format!("{}/mesh/sync", node.base))
        .json(&json!({"caller": null, "nodes": [{"id": "intruder", "urls": []}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sync["code"], 401);
    assert!(node.engine.sibling("intruder").is_none());

    let search = client
        .post(format!("{}/mesh/search/search_master_key", node.base))
        .json(&json!({"limit": 10}))
        .send()
        .await
        .unwrap();
    assert_eq!(search.status(), 401);
}

#[tokio::test]
async fn test_bootstrap_over_http() {
    let (a_listener, a_base) = bind();
    let a = start_node("gw-a", a_listener, &a_base, true, Vec::new());
    let issued = a.engine.stores().credentials.issue_access("merchant-5").unwrap();

    let (b_listener, b_base) = bind();
    let b = start_node("gw-b", b_listener, &b_base, false, vec![sibling("gw-a", &a_base)]);
    assert_eq!(b.engine.bootstrap().await, 2);
    assert!(b
        .engine
        .stores()
        .credentials
        .get_access(&issued.id)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_dead_sibling_loses_health() {
    let (dead_listener, dead_base) = bind();
    drop(dead_listener);
    let (a_listener, a_base) = bind();
    let a = start_node("gw-a", a_listener, &a_base, true, vec![sibling("gw-dead", &dead_base)]);

    a.engine.stores().credentials.issue_access("merchant-6").unwrap();
    let outcome = a.engine.gossip_once().await;
    assert_eq!(outcome.failed, vec!["gw-dead".to_string()]);
    assert_eq!(a.engine.sibling("gw-dead").unwrap().health(), 2);
}
