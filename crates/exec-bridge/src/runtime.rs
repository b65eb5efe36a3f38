use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::BridgeResult;
use crate::handshake::{AttachClient, DEFAULT_CLIENT_IDENTITY, DEFAULT_KEEPALIVE};
use crate::opener::SessionOpener;
use crate::stream::RemoteStream;
use crate::target::{CommandSpec, RemoteTarget, SessionHandle};

/// Settings for talking to the container runtime, built once at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `host:port` of the runtime API.
    pub host: String,
    /// Sent as `User-Agent` on the attach request.
    pub client_identity: String,
    pub keepalive: Duration,
    pub command: CommandSpec,
}

impl RuntimeConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            client_identity: DEFAULT_CLIENT_IDENTITY.to_string(),
            keepalive: DEFAULT_KEEPALIVE,
            command: CommandSpec::default(),
        }
    }
}

/// The two runtime calls a bridge needs.
#[async_trait]
pub trait ExecRuntime: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn open(&self, target: &RemoteTarget, spec: &CommandSpec)
        -> BridgeResult<SessionHandle>;

    async fn attach(&self, session: SessionHandle) -> BridgeResult<Self::Stream>;
}

/// Docker Engine compatible runtime reached over plain TCP.
#[derive(Clone)]
pub struct DockerRuntime {
    opener: SessionOpener,
    attach: AttachClient,
    command: CommandSpec,
}

impl DockerRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let opener = SessionOpener::new(&config.host);
        let attach = AttachClient::new(config.host)
            .with_client_identity(config.client_identity)
            .with_keepalive(config.keepalive);
        Self {
            opener,
            attach,
            command: config.command,
        }
    }

    /// Command every exec session runs; never taken from the client.
    pub fn command(&self) -> &CommandSpec {
        &self.command
    }
}

#[async_trait]
impl ExecRuntime for DockerRuntime {
    type Stream = RemoteStream;

    async fn open(
        &self,
        target: &RemoteTarget,
        spec: &CommandSpec,
    ) -> BridgeResult<SessionHandle> {
        self.opener.open(target, spec).await
    }

    async fn attach(&self, session: SessionHandle) -> BridgeResult<RemoteStream> {
        self.attach.attach(session).await
    }
}
