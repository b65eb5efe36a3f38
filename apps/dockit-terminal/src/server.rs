use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use exec_bridge::{
    run_exec_session, BridgeReport, Direction, DockerRuntime, RemoteTarget, SessionFailure,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::gate::{check_access, serialize_request, AccessGate};
use crate::registry::SessionRegistry;
use crate::ws_io::{WsReader, WsWriter};

pub const CONTAINER_MISSING: &str = "Container does not exist";

pub struct AppState {
    pub runtime: DockerRuntime,
    pub gate: Arc<dyn AccessGate>,
    /// When set, this is the only resource that may be bridged.
    pub pinned_resource: Option<String>,
    pub registry: SessionRegistry,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    fn resolve_target(&self, resource_id: &str) -> Option<RemoteTarget> {
        if let Some(pinned) = &self.pinned_resource {
            if pinned != resource_id {
                return None;
            }
        }
        RemoteTarget::new(resource_id).ok()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/debug/sessions", get(sessions_handler))
        .route("/exec", get(missing_resource_handler))
        .route("/exec/", get(missing_resource_handler))
        .route("/exec/:resource_id", get(exec_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn sessions_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.registry.snapshot();
    Json(json!({
        "active": sessions.len(),
        "attached": state.registry.attached(),
        "sessions": sessions,
    }))
}

async fn missing_resource_handler(ws: Option<WebSocketUpgrade>) -> Response {
    record_rejection("no_such_resource");
    container_missing(ws)
}

async fn exec_handler(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Some(target) = state.resolve_target(&resource_id) else {
        record_rejection("no_such_resource");
        info!(resource_id = %resource_id, "terminal requested for unknown resource");
        return container_missing(ws);
    };

    let Some(ws) = ws else {
        record_rejection("not_websocket");
        return (StatusCode::UPGRADE_REQUIRED, "websocket upgrade required").into_response();
    };

    let serialized = serialize_request(&method, &uri, &headers);
    if let Err(rejection) =
        check_access(state.gate.as_ref(), target.resource_id(), &serialized).await
    {
        record_rejection(rejection.metric_label());
        warn!(
            resource_id = target.resource_id(),
            reason = %rejection,
            "terminal connection rejected"
        );
        return (rejection.status(), rejection.to_string()).into_response();
    }

    ws.on_upgrade(move |socket| handle_terminal(socket, state, target))
}

fn container_missing(ws: Option<WebSocketUpgrade>) -> Response {
    match ws {
        Some(ws) => ws.on_upgrade(|socket| async move {
            let (sink, _stream) = socket.split();
            send_diagnostic(sink, CONTAINER_MISSING.to_string()).await;
        }),
        None => (StatusCode::NOT_FOUND, CONTAINER_MISSING).into_response(),
    }
}

async fn send_diagnostic<S>(mut sink: S, text: String)
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    if let Err(err) = sink.send(Message::Text(text)).await {
        debug!(error = %err, "failed to send diagnostic frame");
    }
    if let Err(err) = sink.close().await {
        debug!(error = %err, "failed to close websocket after diagnostic");
    }
}

async fn handle_terminal(socket: WebSocket, state: Arc<AppState>, target: RemoteTarget) {
    let guard = state.registry.register(target.resource_id());
    let connection_id = guard.connection_id();
    counter!("dockit_connections_total", 1);
    info!(
        resource_id = target.resource_id(),
        connection_id = %connection_id,
        "terminal connected"
    );

    let (sink, stream) = socket.split();
    let started = Instant::now();
    let result = run_exec_session(
        &state.runtime,
        &target,
        state.runtime.command(),
        WsReader::new(stream),
        WsWriter::new(sink),
        || {
            guard.mark_attached();
            gauge!("dockit_bridges_active", state.registry.attached() as f64);
        },
    )
    .await;

    match result {
        Ok(report) => {
            record_bridge_finished(&report, started);
            info!(
                resource_id = target.resource_id(),
                connection_id = %connection_id,
                first_closed = %report.first_closed,
                bytes_in = report.bytes_client_to_remote,
                bytes_out = report.bytes_remote_to_client,
                "terminal session finished"
            );
        }
        Err(SessionFailure::BeforeAttach {
            error,
            client_writer,
            ..
        }) => {
            counter!("dockit_bridge_failures_total", 1, "reason" => error.metric_label());
            warn!(
                resource_id = target.resource_id(),
                connection_id = %connection_id,
                error = %error,
                "could not attach to exec session"
            );
            send_diagnostic(client_writer.into_inner(), format!("error: {error}")).await;
        }
        Err(SessionFailure::Relay(error)) => {
            counter!("dockit_bridge_failures_total", 1, "reason" => error.metric_label());
            histogram!(
                "dockit_bridge_duration_seconds",
                started.elapsed().as_secs_f64()
            );
            warn!(
                resource_id = target.resource_id(),
                connection_id = %connection_id,
                error = %error,
                "terminal session ended with error"
            );
        }
    }

    drop(guard);
    gauge!("dockit_bridges_active", state.registry.attached() as f64);
}

fn record_bridge_finished(report: &BridgeReport, started: Instant) {
    counter!(
        "dockit_bytes_relayed_total",
        report.bytes_client_to_remote,
        "direction" => Direction::ClientToRemote.as_str()
    );
    counter!(
        "dockit_bytes_relayed_total",
        report.bytes_remote_to_client,
        "direction" => Direction::RemoteToClient.as_str()
    );
    histogram!(
        "dockit_bridge_duration_seconds",
        started.elapsed().as_secs_f64()
    );
}

fn record_rejection(reason: &'static str) {
    counter!("dockit_rejections_total", 1, "reason" => reason);
}
