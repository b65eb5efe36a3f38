use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use exec_bridge::BridgeError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

static SESSION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"sessionid=([^;\s]+)").expect("SESSION_TOKEN should compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("failed to run auth program '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Decides whether the holder of `token` may open a shell in `resource_id`.
#[async_trait]
pub trait AccessGate: Send + Sync {
    async fn authorize(&self, resource_id: &str, token: &str) -> Result<AccessDecision, GateError>;
}

#[derive(Debug, Clone)]
pub enum GateConfig {
    Command { program: String, args: Vec<String> },
    Disabled,
}

impl GateConfig {
    pub fn build(&self) -> Arc<dyn AccessGate> {
        match self {
            GateConfig::Command { program, args } => {
                Arc::new(CommandGate::new(program.clone(), args.clone()))
            }
            GateConfig::Disabled => {
                warn!("authorization disabled; every session token is accepted");
                Arc::new(OpenGate)
            }
        }
    }
}

/// Delegates the decision to an external program; exit status 0 allows.
#[derive(Debug, Clone)]
pub struct CommandGate {
    program: String,
    args: Vec<String>,
}

impl CommandGate {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl AccessGate for CommandGate {
    async fn authorize(&self, resource_id: &str, token: &str) -> Result<AccessDecision, GateError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(resource_id)
            .arg(token)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| GateError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        debug!(
            resource_id,
            status = %output.status,
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "auth program finished"
        );
        if output.status.success() {
            Ok(AccessDecision::Allow)
        } else {
            Ok(AccessDecision::Deny)
        }
    }
}

/// Allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

#[async_trait]
impl AccessGate for OpenGate {
    async fn authorize(&self, _resource_id: &str, _token: &str) -> Result<AccessDecision, GateError> {
        Ok(AccessDecision::Allow)
    }
}

/// Why an inbound connection was turned away before any bridging.
#[derive(Debug, Error)]
pub enum GateRejection {
    #[error("request carries no session token")]
    MissingToken,
    #[error(transparent)]
    Denied(BridgeError),
    #[error("authorization check failed: {0}")]
    Unavailable(#[from] GateError),
}

impl GateRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            GateRejection::MissingToken => StatusCode::UNAUTHORIZED,
            GateRejection::Denied(_) => StatusCode::FORBIDDEN,
            GateRejection::Unavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            GateRejection::MissingToken => "missing_token",
            GateRejection::Denied(err) => err.metric_label(),
            GateRejection::Unavailable(_) => "gate_unavailable",
        }
    }
}

/// Renders the request head the way it would appear on the wire.
pub fn serialize_request(method: &Method, uri: &Uri, headers: &HeaderMap) -> String {
    let mut dump = format!("{method} {uri} HTTP/1.1\r\n");
    for (name, value) in headers {
        dump.push_str(name.as_str());
        dump.push_str(": ");
        dump.push_str(&String::from_utf8_lossy(value.as_bytes()));
        dump.push_str("\r\n");
    }
    dump
}

/// First `sessionid=` value found in the serialized request.
pub fn extract_token(serialized: &str) -> Option<&str> {
    SESSION_TOKEN
        .captures(serialized)
        .and_then(|captures| captures.get(1))
        .map(|token| token.as_str())
}

/// Runs the gate once for this request. A missing token is rejected without
/// consulting the gate.
pub async fn check_access(
    gate: &dyn AccessGate,
    resource_id: &str,
    serialized_request: &str,
) -> Result<(), GateRejection> {
    let token = extract_token(serialized_request).ok_or(GateRejection::MissingToken)?;
    match gate.authorize(resource_id, token).await? {
        AccessDecision::Allow => Ok(()),
        AccessDecision::Deny => Err(GateRejection::Denied(BridgeError::DenyAccess {
            resource_id: resource_id.to_string(),
        })),
    }
}
