use nexus_honeycomb::extension::{
    err_response, event_publish_request, Extension, JsonRpcRequest, JsonRpcResponse, PARSE_ERROR,
};
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Ids for requests this extension sends to the host.
static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(20000);

#[tokio::main]
async fn main() {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let extension = Arc::new(Extension::new());
    let handle = tokio::runtime::Handle::current();

    // Stdin loop on a blocking thread to avoid blocking the async runtime.
    let result = tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let mut line = String::new();

        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                _ => {}
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    let resp = err_response(Value::from(0), PARSE_ERROR, format!("Parse error: {e}"));
                    emit_line(&mut out, &resp);
                    continue;
                }
            };

            let is_shutdown = request.method == "shutdown";

            let response = handle.block_on(extension.handle_request(&request));
            emit_line(&mut out, &response);

            if is_shutdown {
                break;
            }

            handle.block_on(publish_pending(&extension, &mut out));
        }
    })
    .await;

    if let Err(e) = result {
        tracing::error!(error = %e, "stdin loop panicked");
    }
}

fn emit_line(out: &mut impl Write, resp: &JsonRpcResponse) {
    match serde_json::to_string(resp) {
        Ok(line) => {
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
        Err(e) => tracing::error!(error = %e, "failed to serialize response"),
    }
}

/// Publish queued trigger deliveries as `event.publish` calls. Runs right
/// after a response, while the host is still in its read loop.
async fn publish_pending(extension: &Extension, out: &mut impl Write) {
    let pending = extension.drain_pending().await;
    if pending.is_empty() {
        return;
    }

    let stdin = io::stdin();
    for event in &pending {
        let call_id = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let request = event_publish_request(call_id, event);
        let _ = writeln!(out, "{request}");
        let _ = out.flush();

        // Read back the host's response to keep the protocol in sync
        let mut reply = String::new();
        let _ = stdin.lock().read_line(&mut reply);
    }
    tracing::debug!(count = pending.len(), "Published trigger events to host");
}
