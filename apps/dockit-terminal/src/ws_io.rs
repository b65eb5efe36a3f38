//! Byte-stream views over the two halves of a websocket, so the exec bridge
//! can treat a browser terminal like any other transport.

use std::fmt::Display;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Reads the payload of binary and text frames as one continuous stream.
/// A close frame or the end of the stream reads as EOF.
pub struct WsReader<S> {
    inner: S,
    pending: Vec<u8>,
    offset: usize,
    closed: bool,
}

impl<S> WsReader<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            offset: 0,
            closed: false,
        }
    }
}

impl<S, E> AsyncRead for WsReader<S>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.offset < this.pending.len() {
                let available = &this.pending[this.offset..];
                let n = available.len().min(buf.remaining());
                buf.put_slice(&available[..n]);
                this.offset += n;
                return Poll::Ready(Ok(()));
            }
            if this.closed {
                return Poll::Ready(Ok(()));
            }

            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(Message::Binary(data))) => {
                    this.pending = data;
                    this.offset = 0;
                }
                Some(Ok(Message::Text(text))) => {
                    this.pending = text.into_bytes();
                    this.offset = 0;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => this.closed = true,
                Some(Err(err)) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        err.to_string(),
                    )))
                }
            }
        }
    }
}

/// Sends every write as a single binary frame. Shutting down closes the sink,
/// which sends a close frame to the peer.
pub struct WsWriter<S> {
    inner: S,
}

impl<S> WsWriter<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

fn sink_error<E: Display>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, err.to_string())
}

impl<S> AsyncWrite for WsWriter<S>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let this = self.get_mut();
        ready!(this.inner.poll_ready_unpin(cx)).map_err(sink_error)?;
        this.inner
            .start_send_unpin(Message::Binary(buf.to_vec()))
            .map_err(sink_error)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().inner.poll_flush_unpin(cx).map_err(sink_error)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().inner.poll_close_unpin(cx).map_err(sink_error)
    }
}
