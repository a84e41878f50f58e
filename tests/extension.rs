//! End-to-end: host JSON-RPC → Honeycomb (wiremock) → webhook listener → host events.

use nexus_honeycomb::extension::{Extension, JsonRpcRequest, JsonRpcResponse};
use nexus_honeycomb::triggers::TRIGGER_EVENT_TYPE;
use serde_json::{json, Value};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(method: &str, params: Value) -> JsonRpcRequest {
    serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1
    }))
    .unwrap()
}

async fn execute(ext: &Extension, operation: &str, input: Value) -> JsonRpcResponse {
    ext.handle_request(&request(
        "execute",
        json!({ "operation": operation, "input": input }),
    ))
    .await
}

fn data(resp: JsonRpcResponse) -> Value {
    assert!(resp.error.is_none(), "unexpected error: {:?}", resp.error);
    resp.result.unwrap()["data"].clone()
}

fn stored_secret(data_dir: &Path) -> String {
    let raw = std::fs::read_to_string(data_dir.join("state.json")).unwrap();
    let state: Value = serde_json::from_str(&raw).unwrap();
    state["webhook_secret"].as_str().unwrap().to_string()
}

async fn initialized(server: &MockServer, data_dir: &Path) -> Extension {
    let ext = Extension::new();
    let resp = ext
        .handle_request(&request(
            "initialize",
            json!({
                "data_dir": data_dir.to_str().unwrap(),
                "config": {
                    "api_key": "test-key",
                    "api_url": server.uri(),
                    "listen_addr": "127.0.0.1:0",
                    "poll": { "max_duration_ms": 2000, "poll_interval_ms": 20 }
                }
            }),
        ))
        .await;
    assert!(resp.error.is_none(), "initialize failed: {:?}", resp.error);
    assert_eq!(resp.result.unwrap()["ready"], true);
    ext
}

#[tokio::test]
async fn install_receive_trigger_and_uninstall() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/1/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1/recipients"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "rcpt-9" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/1/recipients/rcpt-9"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let ext = initialized(&server, dir.path()).await;

    let installed = ext
        .handle_request(&request("lifecycle.install", json!({})))
        .await;
    assert_eq!(installed.result.unwrap()["state"], "ready");

    let info = data(execute(&ext, "get_server_info", json!({})).await);
    let listen_addr = info["listen_addr"].as_str().unwrap().to_string();
    assert_eq!(info["installation"]["state"], "ready");

    let sub = data(execute(&ext, "subscribe_trigger", json!({ "trigger_id": "t1" })).await);

    let secret = stored_secret(dir.path());
    let http = reqwest::Client::new();
    let ok = http
        .post(format!("http://{listen_addr}/webhook?secret={secret}"))
        .json(&json!({ "id": "t1", "name": "latency", "status": "TRIGGERED" }))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status().as_u16(), 200);

    let denied = http
        .post(format!("http://{listen_addr}/webhook?secret=nope"))
        .json(&json!({ "id": "t1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 401);

    let events = ext.drain_pending().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, TRIGGER_EVENT_TYPE);
    assert_eq!(events[0].subject, sub["id"].as_str().unwrap());
    assert_eq!(events[0].data["name"], "latency");

    let uninstalled = ext
        .handle_request(&request("lifecycle.uninstall", json!({})))
        .await;
    assert_eq!(uninstalled.result.unwrap()["state"], "drained");
}

#[tokio::test]
async fn send_events_and_run_query_through_execute() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("POST"))
        .and(path("/1/batch/ds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "status": 202 }])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1/query_results/ds"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "r1", "complete": false })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/query_results/ds/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "r1", "complete": true, "data": { "results": [] } })))
        .mount(&server)
        .await;

    let ext = initialized(&server, dir.path()).await;

    let sent = data(
        execute(
            &ext,
            "send_events",
            json!({ "dataset": "ds", "events": [{ "data": { "x": 1 } }] }),
        )
        .await,
    );
    assert_eq!(sent["results"].as_array().unwrap().len(), 1);
    assert_eq!(sent["results"][0]["status"], 202);

    let result = data(
        execute(&ext, "run_query", json!({ "dataset_slug": "ds", "query_id": "q1" })).await,
    );
    assert_eq!(result["id"], "r1");
    assert_eq!(result["complete"], true);
}

#[tokio::test]
async fn second_initialize_is_rejected_and_first_listener_keeps_working() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/1/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1/recipients"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "rcpt-1" })))
        .mount(&server)
        .await;

    let ext = initialized(&server, dir.path()).await;
    let again = ext
        .handle_request(&request(
            "initialize",
            json!({
                "data_dir": dir.path().to_str().unwrap(),
                "config": { "api_key": "test-key", "api_url": server.uri() }
            }),
        ))
        .await;
    let err = again.error.unwrap();
    assert!(err.message.contains("already initialized"), "{}", err.message);

    ext.handle_request(&request("lifecycle.install", json!({})))
        .await;
    let info = data(execute(&ext, "get_server_info", json!({})).await);
    let listen_addr = info["listen_addr"].as_str().unwrap().to_string();
    execute(&ext, "subscribe_trigger", json!({})).await;

    let secret = stored_secret(dir.path());
    let resp = reqwest::Client::new()
        .post(format!("http://{listen_addr}/webhook?secret={secret}"))
        .json(&json!({ "id": "t1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(ext.drain_pending().await.len(), 1);
}

#[tokio::test]
async fn initialize_without_a_credential_fails() {
    if std::env::var("HONEYCOMB_API_KEY").is_ok() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let ext = Extension::new();
    let resp = ext
        .handle_request(&request(
            "initialize",
            json!({ "data_dir": dir.path().to_str().unwrap(), "config": {} }),
        ))
        .await;
    let err = resp.error.unwrap();
    assert!(err.message.contains("api_key"), "{}", err.message);
}
