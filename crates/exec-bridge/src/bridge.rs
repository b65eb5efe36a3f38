use std::fmt;
use std::pin::pin;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};

const RELAY_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    RemoteToClient,
    ClientToRemote,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::RemoteToClient => "remote->client",
            Direction::ClientToRemote => "client->remote",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    Active,
    /// The client stopped sending; the remote may still be producing output.
    ClientClosed,
    /// The remote stopped producing output; client input may still flow.
    RemoteClosed,
    Terminated,
}

impl BridgeStatus {
    /// Applies the end of `direction`. `Terminated` is absorbing.
    pub fn observe(self, direction: Direction) -> Self {
        match (self, direction) {
            (BridgeStatus::Active, Direction::ClientToRemote) => BridgeStatus::ClientClosed,
            (BridgeStatus::Active, Direction::RemoteToClient) => BridgeStatus::RemoteClosed,
            (BridgeStatus::ClientClosed, Direction::RemoteToClient)
            | (BridgeStatus::RemoteClosed, Direction::ClientToRemote) => BridgeStatus::Terminated,
            (status, _) => status,
        }
    }

    pub fn is_terminated(self) -> bool {
        self == BridgeStatus::Terminated
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeReport {
    pub status: BridgeStatus,
    pub bytes_remote_to_client: u64,
    pub bytes_client_to_remote: u64,
    pub first_closed: Direction,
}

/// Relays `remote` to the client writer and the client reader to `remote`
/// until both directions have ended.
///
/// End of client input half-closes `remote`; end of remote output shuts down
/// the client writer. An I/O error in either direction ends the session and
/// drops every stream half.
pub async fn bridge<CR, CW, RS>(
    client_reader: CR,
    client_writer: CW,
    remote: RS,
) -> BridgeResult<BridgeReport>
where
    CR: AsyncRead + Unpin,
    CW: AsyncWrite + Unpin,
    RS: AsyncRead + AsyncWrite + Unpin,
{
    let (remote_reader, remote_writer) = tokio::io::split(remote);

    let mut downstream = pin!(relay(remote_reader, client_writer, Direction::RemoteToClient));
    let mut upstream = pin!(relay(client_reader, remote_writer, Direction::ClientToRemote));

    let mut status = BridgeStatus::Active;
    let mut first_closed = None;
    let mut remote_to_client = None;
    let mut client_to_remote = None;

    while !status.is_terminated() {
        let (direction, bytes) = tokio::select! {
            res = &mut downstream, if remote_to_client.is_none() => {
                let bytes = res?;
                remote_to_client = Some(bytes);
                (Direction::RemoteToClient, bytes)
            }
            res = &mut upstream, if client_to_remote.is_none() => {
                let bytes = res?;
                client_to_remote = Some(bytes);
                (Direction::ClientToRemote, bytes)
            }
        };
        status = status.observe(direction);
        first_closed.get_or_insert(direction);
        debug!(%direction, bytes, status = ?status, "relay direction finished");
    }

    Ok(BridgeReport {
        status,
        bytes_remote_to_client: remote_to_client.unwrap_or_default(),
        bytes_client_to_remote: client_to_remote.unwrap_or_default(),
        first_closed: first_closed.unwrap_or(Direction::RemoteToClient),
    })
}

async fn relay<R, W>(mut reader: R, mut writer: W, direction: Direction) -> BridgeResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|err| BridgeError::relay(direction, err))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(|err| BridgeError::relay(direction, err))?;
        writer
            .flush()
            .await
            .map_err(|err| BridgeError::relay(direction, err))?;
        total += n as u64;
    }

    // Tell the other side no more data is coming without tearing down the
    // opposite direction.
    if let Err(err) = writer.shutdown().await {
        warn!(%direction, error = %err, "half-close failed; closing session");
        return Err(BridgeError::relay(direction, err));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[test]
    fn status_requires_both_directions() {
        let status = BridgeStatus::Active.observe(Direction::ClientToRemote);
        assert_eq!(status, BridgeStatus::ClientClosed);
        assert_eq!(
            status.observe(Direction::ClientToRemote),
            BridgeStatus::ClientClosed
        );
        let status = status.observe(Direction::RemoteToClient);
        assert_eq!(status, BridgeStatus::Terminated);
        assert_eq!(
            status.observe(Direction::ClientToRemote),
            BridgeStatus::Terminated
        );

        let status = BridgeStatus::Active.observe(Direction::RemoteToClient);
        assert_eq!(status, BridgeStatus::RemoteClosed);
        assert!(status.observe(Direction::ClientToRemote).is_terminated());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn client_eof_half_closes_remote_and_keeps_output_flowing() {
        let (client_reader, mut client_input) = duplex(64);
        let (mut client_output, client_writer) = duplex(64);
        let (remote, mut peer) = duplex(64);

        let bridge_task = tokio::spawn(bridge(client_reader, client_writer, remote));

        client_input.write_all(b"exit\n").await.unwrap();
        drop(client_input);

        // The peer sees the input followed by end-of-input.
        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"exit\n");

        // Output produced after the half-close still reaches the client.
        peer.write_all(b"logout\r\n").await.unwrap();
        drop(peer);

        let mut output = Vec::new();
        client_output.read_to_end(&mut output).await.unwrap();
        assert_eq!(output, b"logout\r\n");

        let report = bridge_task.await.unwrap().unwrap();
        assert_eq!(report.status, BridgeStatus::Terminated);
        assert_eq!(report.first_closed, Direction::ClientToRemote);
        assert_eq!(report.bytes_client_to_remote, 5);
        assert_eq!(report.bytes_remote_to_client, 8);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn remote_eof_does_not_stop_client_input() {
        let (client_reader, mut client_input) = duplex(64);
        let (mut client_output, client_writer) = duplex(64);
        let (remote, mut peer) = duplex(64);

        let bridge_task = tokio::spawn(bridge(client_reader, client_writer, remote));

        peer.write_all(b"bye").await.unwrap();
        peer.shutdown().await.unwrap();

        let mut output = Vec::new();
        client_output.read_to_end(&mut output).await.unwrap();
        assert_eq!(output, b"bye");

        client_input.write_all(b"late").await.unwrap();
        drop(client_input);

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"late");

        let report = bridge_task.await.unwrap().unwrap();
        assert_eq!(report.first_closed, Direction::RemoteToClient);
        assert!(report.status.is_terminated());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn write_failure_surfaces_relay_error() {
        let (client_reader, _client_input) = duplex(64);
        let (client_output, client_writer) = duplex(64);
        let (remote, mut peer) = duplex(64);
        drop(client_output);

        let bridge_task = tokio::spawn(bridge(client_reader, client_writer, remote));
        peer.write_all(b"prompt$ ").await.unwrap();

        let err = bridge_task.await.unwrap().unwrap_err();
        match err {
            BridgeError::RelayError { direction, .. } => {
                assert_eq!(direction, Direction::RemoteToClient)
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The session released its remote half, so the peer observes EOF.
        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
