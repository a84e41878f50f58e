use crate::error::{Error, Result};
use crate::store::{KeyValueStore, WEBHOOK_SECRET_KEY};
use crate::triggers::{fan_out, TriggerRegistry};
use crate::types::{PendingEvent, TriggerPayload};
use crate::verification::{self, SecretTransport};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    routing::post,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const WEBHOOK_PATH: &str = "/webhook";

#[derive(Clone)]
pub struct ServerState {
    store: Arc<dyn KeyValueStore>,
    registry: TriggerRegistry,
    transport: SecretTransport,
    event_tx: mpsc::UnboundedSender<PendingEvent>,
}

impl ServerState {
    /// Build the listener state and the receiver that collects matched
    /// trigger deliveries for the host.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        registry: TriggerRegistry,
        transport: SecretTransport,
    ) -> (Self, mpsc::UnboundedReceiver<PendingEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                registry,
                transport,
                event_tx,
            },
            event_rx,
        )
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(handle_webhook))
        .with_state(state)
}

/// Bind the webhook listener and serve it in the background. Returns the
/// bound address (useful when `addr` asks for port 0).
pub async fn start(addr: &str, state: ServerState) -> Result<SocketAddr> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind webhook listener on {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| Error::Config(format!("failed to read listener address: {e}")))?;
    info!(%local, "Webhook listener bound");

    let app = router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Webhook listener stopped");
        }
    });

    Ok(local)
}

/// Authenticate, then parse, then fan out. The body is not looked at until
/// the secret has been checked.
async fn handle_webhook(
    State(state): State<ServerState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> std::result::Result<StatusCode, Error> {
    let presented = state.transport.extract(&headers, &uri);
    let stored = state.store.get(WEBHOOK_SECRET_KEY).await?;
    if let Err(e) = verification::authenticate(presented.as_deref(), stored.as_deref()) {
        warn!("Rejected webhook with missing or invalid secret");
        return Err(e);
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::Validation("missing request body".into()));
    }

    let payload: TriggerPayload = serde_json::from_slice(&body)
        .map_err(|e| Error::Validation(format!("invalid trigger payload: {e}")))?;

    let matched = state.registry.matching(&payload).await;
    debug!(
        trigger_id = payload.id.as_deref().unwrap_or(""),
        matches = matched.len(),
        "Trigger webhook received"
    );

    for event in fan_out(&matched, &payload) {
        state
            .event_tx
            .send(event)
            .map_err(|_| Error::Delivery("host event channel is closed".into()))?;
    }

    Ok(StatusCode::OK)
}
