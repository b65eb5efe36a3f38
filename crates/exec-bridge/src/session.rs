use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use crate::bridge::{bridge, BridgeReport};
use crate::error::{BridgeError, BridgeResult};
use crate::runtime::ExecRuntime;
use crate::target::{CommandSpec, RemoteTarget};

/// Opens an exec session for `target`, attaches to it and relays the client
/// halves against it until both directions end.
///
/// `on_attached` runs once the remote connection has been hijacked; from that
/// point on the client stream carries raw TTY data only. On any earlier
/// failure the client halves are returned untouched inside the error path, so
/// the caller may still write a diagnostic.
pub async fn run_exec_session<R, CR, CW, F>(
    runtime: &R,
    target: &RemoteTarget,
    spec: &CommandSpec,
    client_reader: CR,
    client_writer: CW,
    on_attached: F,
) -> Result<BridgeReport, SessionFailure<CR, CW>>
where
    R: ExecRuntime + ?Sized,
    CR: AsyncRead + Unpin,
    CW: AsyncWrite + Unpin,
    F: FnOnce(),
{
    let remote = match attach(runtime, target, spec).await {
        Ok(remote) => remote,
        Err(error) => {
            return Err(SessionFailure::BeforeAttach {
                error,
                client_reader,
                client_writer,
            })
        }
    };
    on_attached();
    info!(resource_id = target.resource_id(), "exec session attached");

    bridge(client_reader, client_writer, remote)
        .await
        .map_err(SessionFailure::Relay)
}

async fn attach<R>(
    runtime: &R,
    target: &RemoteTarget,
    spec: &CommandSpec,
) -> BridgeResult<R::Stream>
where
    R: ExecRuntime + ?Sized,
{
    let session = runtime.open(target, spec).await?;
    runtime.attach(session).await
}

pub enum SessionFailure<CR, CW> {
    /// Nothing was hijacked; the client halves are handed back.
    BeforeAttach {
        error: BridgeError,
        client_reader: CR,
        client_writer: CW,
    },
    /// The bridge ran and ended with an I/O error.
    Relay(BridgeError),
}

impl<CR, CW> std::fmt::Debug for SessionFailure<CR, CW> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionFailure::BeforeAttach { error, .. } => {
                f.debug_tuple("BeforeAttach").field(error).finish()
            }
            SessionFailure::Relay(error) => f.debug_tuple("Relay").field(error).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BridgeStatus, SessionHandle};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// In-memory runtime whose attach hands out one end of a duplex pipe.
    struct PipeRuntime {
        open_result: Mutex<Option<BridgeResult<SessionHandle>>>,
        peer: Mutex<Option<DuplexStream>>,
        remote: Mutex<Option<DuplexStream>>,
        opens: AtomicUsize,
        attaches: AtomicUsize,
    }

    impl PipeRuntime {
        fn new(open_result: BridgeResult<SessionHandle>) -> Self {
            let (remote, peer) = duplex(256);
            Self {
                open_result: Mutex::new(Some(open_result)),
                peer: Mutex::new(Some(peer)),
                remote: Mutex::new(Some(remote)),
                opens: AtomicUsize::new(0),
                attaches: AtomicUsize::new(0),
            }
        }

        fn take_peer(&self) -> DuplexStream {
            self.peer.lock().unwrap().take().unwrap()
        }
    }

    #[async_trait]
    impl ExecRuntime for PipeRuntime {
        type Stream = DuplexStream;

        async fn open(
            &self,
            _target: &RemoteTarget,
            _spec: &CommandSpec,
        ) -> BridgeResult<SessionHandle> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.open_result.lock().unwrap().take().unwrap()
        }

        async fn attach(&self, session: SessionHandle) -> BridgeResult<DuplexStream> {
            assert_eq!(session.session_id(), "exec-1");
            self.attaches.fetch_add(1, Ordering::SeqCst);
            Ok(self.remote.lock().unwrap().take().unwrap())
        }
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn open_failure_skips_attach_and_returns_client_halves() {
        let runtime = PipeRuntime::new(Err(BridgeError::RemoteUnavailable {
            resource_id: "web".into(),
            reason: "unexpected status 404 Not Found: No such container: web".into(),
        }));
        let target = RemoteTarget::new("web").unwrap();
        let (client_reader, _input) = duplex(64);
        let (mut output, client_writer) = duplex(64);
        let mut attached = false;

        let failure = run_exec_session(
            &runtime,
            &target,
            &CommandSpec::default(),
            client_reader,
            client_writer,
            || attached = true,
        )
        .await
        .unwrap_err();

        assert!(!attached);
        assert_eq!(runtime.opens.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.attaches.load(Ordering::SeqCst), 0);

        let SessionFailure::BeforeAttach {
            error,
            mut client_writer,
            ..
        } = failure
        else {
            panic!("expected a pre-attach failure");
        };
        assert_eq!(error.metric_label(), "remote_unavailable");

        client_writer.write_all(b"error: no such container").await.unwrap();
        drop(client_writer);
        let mut diagnostic = String::new();
        output.read_to_string(&mut diagnostic).await.unwrap();
        assert_eq!(diagnostic, "error: no such container");
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn attached_session_echoes_through_peer() {
        let runtime = PipeRuntime::new(Ok(SessionHandle::new("exec-1".into())));
        let mut peer = runtime.take_peer();
        let target = RemoteTarget::new("web").unwrap();
        let (client_reader, mut input) = duplex(64);
        let (mut output, client_writer) = duplex(64);

        let echo = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                let n = peer.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                peer.write_all(&buf[..n]).await.unwrap();
            }
        });

        let session = async {
            let mut attached = 0;
            let report = run_exec_session(
                &runtime,
                &target,
                &CommandSpec::default(),
                client_reader,
                client_writer,
                || attached += 1,
            )
            .await
            .unwrap();
            (report, attached)
        };
        let client = async {
            input.write_all(b"echo hi\r").await.unwrap();
            let mut buf = [0u8; 8];
            output.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"echo hi\r");
            drop(input);
            let mut rest = Vec::new();
            output.read_to_end(&mut rest).await.unwrap();
            assert!(rest.is_empty());
        };

        let ((report, attached), ()) = tokio::join!(session, client);
        echo.await.unwrap();

        assert_eq!(attached, 1);
        assert_eq!(report.status, BridgeStatus::Terminated);
        assert_eq!(report.bytes_client_to_remote, 8);
        assert_eq!(report.bytes_remote_to_client, 8);
        assert_eq!(runtime.attaches.load(Ordering::SeqCst), 1);
    }
}
