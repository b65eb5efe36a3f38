use std::time::Duration;

use hyper::client::conn;
use hyper::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, UPGRADE, USER_AGENT};
use hyper::{Body, Method, Request, StatusCode};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::stream::RemoteStream;
use crate::target::{SessionHandle, StartExecRequest};

pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);
pub const DEFAULT_CLIENT_IDENTITY: &str = "Docker-Client";

/// Performs the start/attach request and hijacks the connection once the
/// runtime switches protocols.
#[derive(Debug, Clone)]
pub struct AttachClient {
    addr: String,
    client_identity: String,
    keepalive: Duration,
}

impl AttachClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            client_identity: DEFAULT_CLIENT_IDENTITY.to_string(),
            keepalive: DEFAULT_KEEPALIVE,
        }
    }

    pub fn with_client_identity(mut self, identity: impl Into<String>) -> Self {
        self.client_identity = identity.into();
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub async fn attach(&self, session: SessionHandle) -> BridgeResult<RemoteStream> {
        let session_id = session.into_session_id();
        let stream = self.dial().await?;

        let request = self.start_request(&session_id)?;
        let (mut sender, connection) = conn::handshake(stream)
            .await
            .map_err(|err| BridgeError::handshake(format!("http handshake: {err}")))?;
        // Drives the connection until the runtime switches protocols, then
        // hands the socket back through the upgrade future.
        let driver = tokio::spawn(connection);

        let response = match sender.send_request(request).await {
            Ok(response) => response,
            Err(err) => {
                driver.abort();
                return Err(BridgeError::handshake(format!("send attach request: {err}")));
            }
        };

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            driver.abort();
            return Err(BridgeError::handshake(format!(
                "runtime refused upgrade: {}",
                response.status()
            )));
        }

        let upgraded = match hyper::upgrade::on(response).await {
            Ok(upgraded) => upgraded,
            Err(err) => {
                driver.abort();
                return Err(BridgeError::handshake(format!("upgrade: {err}")));
            }
        };
        drop(sender);

        let parts = match upgraded.downcast::<TcpStream>() {
            Ok(parts) => parts,
            Err(_) => {
                driver.abort();
                return Err(BridgeError::handshake(
                    "upgraded connection is not a tcp stream",
                ));
            }
        };

        debug!(
            addr = %self.addr,
            session_id = %session_id,
            buffered = parts.read_buf.len(),
            "attach connection hijacked"
        );
        Ok(RemoteStream::new(parts.io, parts.read_buf))
    }

    async fn dial(&self) -> BridgeResult<TcpStream> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| BridgeError::DialFailed {
                addr: self.addr.clone(),
                source,
            })?;
        if let Err(err) = set_keepalive(&stream, self.keepalive) {
            warn!(addr = %self.addr, error = %err, "failed to enable tcp keepalive");
        }
        Ok(stream)
    }

    fn start_request(&self, session_id: &str) -> BridgeResult<Request<Body>> {
        let body = serde_json::to_vec(&StartExecRequest::default())
            .map_err(|err| BridgeError::handshake(format!("encode attach body: {err}")))?;
        Request::builder()
            .method(Method::POST)
            .uri(format!("/exec/{session_id}/start"))
            .header(HOST, self.addr.as_str())
            .header(USER_AGENT, self.client_identity.as_str())
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body.len())
            .header(CONNECTION, "Upgrade")
            .header(UPGRADE, "tcp")
            .body(Body::from(body))
            .map_err(|err| BridgeError::handshake(format!("build attach request: {err}")))
    }
}

fn set_keepalive(stream: &TcpStream, period: Duration) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(period);
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    let keepalive = keepalive.with_interval(period);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
