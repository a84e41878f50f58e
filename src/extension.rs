//! JSON-RPC adapter between the Nexus host and the Honeycomb components.
//!
//! The host drives the extension with `initialize`, `shutdown`,
//! `lifecycle.*` and `execute` requests. Nothing below this module knows
//! about the wire format.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::http_server::{self, ServerState, WEBHOOK_PATH};
use crate::lifecycle::RecipientManager;
use crate::poller::QueryRunner;
use crate::store::{FileStore, KeyValueStore};
use crate::triggers::TriggerRegistry;
use crate::types::{Event, PendingEvent, QueryHandle};

// ─── JSON-RPC wire types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    #[serde(default)]
    jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const SERVER_ERROR: i64 = -32000;

fn raw_response(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: Some(result),
        error: None,
        id,
    }
}

pub fn ok_response(id: Value, data: Value) -> JsonRpcResponse {
    raw_response(
        id,
        json!({
            "success": true,
            "data": data,
            "message": null
        }),
    )
}

pub fn err_response(id: Value, code: i64, message: String) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: None,
        error: Some(JsonRpcError { code, message }),
        id,
    }
}

/// Outbound `event.publish` request for one matched trigger delivery.
pub fn event_publish_request(call_id: u64, event: &PendingEvent) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "event.publish",
        "params": {
            "type": event.event_type,
            "subject": event.subject,
            "data": event.data,
        },
        "id": call_id,
    })
}

// ─── Operation inputs ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SendEventsInput {
    #[serde(alias = "dataset_slug")]
    dataset: String,
    events: Vec<Event>,
}

#[derive(Deserialize)]
struct RunQueryInput {
    #[serde(alias = "dataset_slug")]
    dataset: String,
    query_id: String,
}

#[derive(Deserialize)]
struct SubscribeInput {
    #[serde(default)]
    trigger_id: Option<String>,
}

#[derive(Deserialize)]
struct UnsubscribeInput {
    subscription_id: String,
}

fn parse_input<T: serde::de::DeserializeOwned>(input: &Value) -> Result<T> {
    serde_json::from_value(input.clone()).map_err(|e| Error::Validation(e.to_string()))
}

// ─── Runtime state ──────────────────────────────────────────────────────────

/// Everything built by `initialize`.
struct Runtime {
    client: ApiClient,
    runner: QueryRunner<ApiClient>,
    manager: RecipientManager,
    listen_addr: SocketAddr,
    callback_endpoint: String,
}

#[derive(Default)]
pub struct Extension {
    runtime: RwLock<Option<Arc<Runtime>>>,
    registry: TriggerRegistry,
    /// Deliveries received by the webhook listener, not yet published to host.
    pending_rx: Mutex<Option<mpsc::UnboundedReceiver<PendingEvent>>>,
}

impl Extension {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn handle_request(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        match req.method.as_str() {
            "initialize" => match self.initialize(&req.params).await {
                Ok(()) => raw_response(req.id.clone(), json!({ "ready": true })),
                Err(e) => err_response(req.id.clone(), SERVER_ERROR, format!("Initialize failed: {e}")),
            },
            "shutdown" => raw_response(req.id.clone(), json!({})),
            "execute" => self.handle_execute(req).await,
            m if m.starts_with("lifecycle.") => self.handle_lifecycle(req).await,
            _ => err_response(
                req.id.clone(),
                METHOD_NOT_FOUND,
                format!("Unknown method: {}", req.method),
            ),
        }
    }

    async fn initialize(&self, params: &Value) -> Result<()> {
        // Held until the runtime is in place so a concurrent call cannot
        // start a second listener.
        let mut slot = self.runtime.write().await;
        if slot.is_some() {
            return Err(Error::Config("extension is already initialized".into()));
        }

        let data_dir = params
            .get("data_dir")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let config = Config::from_params(params.get("config"))?
            .with_env_fallback(|name| std::env::var(name).ok());
        config.validate()?;
        info!(?config, data_dir = %data_dir.display(), "Initializing Honeycomb extension");

        let client = ApiClient::from_config(&config)?;
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(data_dir).await?);

        let (server_state, pending_rx) = ServerState::new(
            store.clone(),
            self.registry.clone(),
            config.secret_transport.clone(),
        );
        let listen_addr = http_server::start(&config.listen_addr, server_state).await?;

        let base_url = config
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{listen_addr}"));
        let callback_endpoint = format!("{}{}", base_url.trim_end_matches('/'), WEBHOOK_PATH);

        let manager = RecipientManager::new(
            client.clone(),
            store,
            callback_endpoint.clone(),
            config.secret_transport.clone(),
        );
        let runner = QueryRunner::new(client.clone(), config.poll);

        *self.pending_rx.lock().await = Some(pending_rx);
        *slot = Some(Arc::new(Runtime {
            client,
            runner,
            manager,
            listen_addr,
            callback_endpoint,
        }));
        Ok(())
    }

    async fn runtime(&self) -> Result<Arc<Runtime>> {
        self.runtime
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Config("Extension not initialized. Send 'initialize' first.".into()))
    }

    async fn handle_lifecycle(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        let rt = match self.runtime().await {
            Ok(rt) => rt,
            Err(e) => return err_response(req.id.clone(), SERVER_ERROR, e.to_string()),
        };

        let status = match req.method.strip_prefix("lifecycle.").unwrap_or("") {
            "install" => rt.manager.install().await,
            "uninstall" => rt.manager.uninstall().await,
            "status" => rt.manager.status().await,
            other => {
                return err_response(
                    req.id.clone(),
                    METHOD_NOT_FOUND,
                    format!("Unknown lifecycle method: {other}"),
                )
            }
        };

        match serde_json::to_value(&status) {
            Ok(v) => raw_response(req.id.clone(), v),
            Err(e) => err_response(req.id.clone(), SERVER_ERROR, e.to_string()),
        }
    }

    async fn handle_execute(&self, req: &JsonRpcRequest) -> JsonRpcResponse {
        let operation = req
            .params
            .get("operation")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let input = req
            .params
            .get("input")
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        let result = match operation {
            "send_events" => self.op_send_events(&input).await,
            "run_query" => self.op_run_query(&input).await,
            "subscribe_trigger" => self.op_subscribe_trigger(&input).await,
            "unsubscribe_trigger" => self.op_unsubscribe_trigger(&input).await,
            "list_subscriptions" => self.op_list_subscriptions().await,
            "get_server_info" => self.op_get_server_info().await,
            "find_orphaned_recipients" => self.op_find_orphaned_recipients().await,
            _ => {
                return err_response(
                    req.id.clone(),
                    METHOD_NOT_FOUND,
                    format!("Unknown operation: {operation}"),
                )
            }
        };

        match result {
            Ok(data) => ok_response(req.id.clone(), data),
            Err(e @ Error::Validation(_)) => err_response(req.id.clone(), INVALID_PARAMS, e.to_string()),
            Err(e) => {
                warn!(operation, error = %e, "Operation failed");
                err_response(req.id.clone(), SERVER_ERROR, e.to_string())
            }
        }
    }

    /// Take every delivery queued by the webhook listener so far.
    pub async fn drain_pending(&self) -> Vec<PendingEvent> {
        let mut pending = Vec::new();
        if let Some(rx) = self.pending_rx.lock().await.as_mut() {
            while let Ok(event) = rx.try_recv() {
                pending.push(event);
            }
        }
        pending
    }

    // ─── Operations ─────────────────────────────────────────────────────────

    async fn op_send_events(&self, input: &Value) -> Result<Value> {
        let input: SendEventsInput = parse_input(input)?;
        if input.events.is_empty() {
            return Err(Error::Validation("events must not be empty".into()));
        }
        let rt = self.runtime().await?;
        let results = rt.client.send_events(&input.dataset, &input.events).await?;
        Ok(json!({ "results": results }))
    }

    async fn op_run_query(&self, input: &Value) -> Result<Value> {
        let input: RunQueryInput = parse_input(input)?;
        let rt = self.runtime().await?;
        let handle = QueryHandle {
            query_id: input.query_id,
            dataset_slug: input.dataset,
        };
        let result = rt.runner.run_query(&handle).await?;
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }

    async fn op_subscribe_trigger(&self, input: &Value) -> Result<Value> {
        let input: SubscribeInput = parse_input(input)?;
        let sub = self.registry.subscribe(input.trigger_id).await;
        Ok(serde_json::to_value(sub).unwrap_or(Value::Null))
    }

    async fn op_unsubscribe_trigger(&self, input: &Value) -> Result<Value> {
        let input: UnsubscribeInput = parse_input(input)?;
        if self.registry.unsubscribe(&input.subscription_id).await {
            Ok(json!({ "deleted": true }))
        } else {
            Err(Error::Validation(format!(
                "subscription not found: {}",
                input.subscription_id
            )))
        }
    }

    async fn op_list_subscriptions(&self) -> Result<Value> {
        let items = self.registry.list().await;
        Ok(json!({ "count": items.len(), "subscriptions": items }))
    }

    async fn op_get_server_info(&self) -> Result<Value> {
        let rt = self.runtime().await?;
        let installation = rt.manager.status().await;
        let subscription_count = self.registry.list().await.len();
        Ok(json!({
            "listen_addr": rt.listen_addr.to_string(),
            "callback_endpoint": rt.callback_endpoint,
            "api_url": rt.client.base_url(),
            "installation": installation,
            "subscription_count": subscription_count,
        }))
    }

    async fn op_find_orphaned_recipients(&self) -> Result<Value> {
        let rt = self.runtime().await?;
        let orphans = rt.manager.find_orphaned_recipients().await?;
        Ok(json!({ "count": orphans.len(), "recipients": orphans }))
    }
}
