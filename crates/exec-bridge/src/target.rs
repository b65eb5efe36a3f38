use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Container (or other workload) an exec session is opened against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    resource_id: String,
}

impl RemoteTarget {
    /// Validates the id before it is interpolated into runtime URLs.
    pub fn new(resource_id: impl Into<String>) -> BridgeResult<Self> {
        let resource_id = resource_id.into();
        if !is_valid_resource_id(&resource_id) {
            return Err(BridgeError::InvalidTarget(resource_id));
        }
        Ok(Self { resource_id })
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

pub fn is_valid_resource_id(id: &str) -> bool {
    !id.is_empty()
        && id.bytes().any(|b| b != b'.')
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// Body of the runtime's create-exec call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandSpec {
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
    pub cmd: Vec<String>,
}

impl CommandSpec {
    pub fn interactive_shell(cmd: Vec<String>) -> Self {
        Self {
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            tty: true,
            cmd,
        }
    }
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self::interactive_shell(vec!["/bin/bash".to_string()])
    }
}

/// Exec session allocated by the runtime. Consumed by a single attach.
#[derive(Debug, PartialEq, Eq)]
pub struct SessionHandle {
    session_id: String,
}

impl SessionHandle {
    pub(crate) fn new(session_id: String) -> Self {
        Self { session_id }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn into_session_id(self) -> String {
        self.session_id
    }
}

/// Body of the attach (start) call.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartExecRequest {
    pub detach: bool,
    pub tty: bool,
}

impl Default for StartExecRequest {
    fn default() -> Self {
        Self {
            detach: false,
            tty: true,
        }
    }
}
