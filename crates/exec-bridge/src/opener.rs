use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::target::{CommandSpec, RemoteTarget, SessionHandle};

/// Calls the runtime's create-exec endpoint. One request per attempt, no
/// retries.
#[derive(Clone)]
pub struct SessionOpener {
    http: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CreateExecResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct RuntimeErrorBody {
    message: Option<String>,
}

impl SessionOpener {
    /// `host` is the runtime's `host:port`.
    pub fn new(host: &str) -> Self {
        Self::with_client(Client::new(), host)
    }

    pub fn with_client(http: Client, host: &str) -> Self {
        Self {
            http,
            base_url: format!("http://{host}"),
        }
    }

    pub async fn open(
        &self,
        target: &RemoteTarget,
        spec: &CommandSpec,
    ) -> BridgeResult<SessionHandle> {
        let resource_id = target.resource_id();
        let url = format!("{}/containers/{}/exec", self.base_url, resource_id);
        let unavailable = |reason: String| BridgeError::RemoteUnavailable {
            resource_id: resource_id.to_string(),
            reason,
        };

        let res = self
            .http
            .post(url)
            .json(spec)
            .send()
            .await
            .map_err(|err| unavailable(err.to_string()))?;

        let status = res.status();
        let body = res
            .bytes()
            .await
            .map_err(|err| unavailable(err.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<RuntimeErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).trim().to_string());
            return Err(unavailable(format!("unexpected status {status}: {message}")));
        }

        let created: CreateExecResponse = serde_json::from_slice(&body)
            .map_err(|err| BridgeError::InvalidResponse(err.to_string()))?;
        if created.id.trim().is_empty() {
            return Err(BridgeError::InvalidResponse("empty exec id".into()));
        }

        debug!(resource_id, session_id = %created.id, "exec session created");
        Ok(SessionHandle::new(created.id))
    }
}
