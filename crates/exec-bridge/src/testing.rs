//! In-process stand-in for a container runtime API, for tests.
//!
//! Speaks just enough HTTP/1.1 over a real `TcpListener` to answer
//! create-exec and to upgrade start/attach requests into a raw echo stream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What create-exec answers with.
#[derive(Debug, Clone)]
pub enum CreateReply {
    Id(String),
    Status(u16, String),
    RawBody(String),
}

#[derive(Debug, Clone)]
pub struct FakeBehavior {
    pub create: CreateReply,
    /// Answer start/attach with `101`; otherwise `200 OK` with no upgrade.
    pub upgrade: bool,
    /// Written in the same segment as the 101 response head.
    pub banner: Vec<u8>,
    /// Written once the client half-closes, before the runtime closes.
    pub farewell: Vec<u8>,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            create: CreateReply::Id("4b3c2a1f".into()),
            upgrade: true,
            banner: Vec::new(),
            farewell: Vec::new(),
        }
    }
}

#[derive(Default)]
struct FakeState {
    create_calls: AtomicUsize,
    attach_calls: AtomicUsize,
    saw_input_eof: AtomicBool,
    create_requests: Mutex<Vec<RecordedRequest>>,
    attach_requests: Mutex<Vec<RecordedRequest>>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub struct FakeRuntime {
    addr: SocketAddr,
    state: Arc<FakeState>,
    task: JoinHandle<()>,
}

impl FakeRuntime {
    pub async fn start(behavior: FakeBehavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(FakeState::default());
        let behavior = Arc::new(behavior);

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                let behavior = Arc::clone(&behavior);
                tokio::spawn(async move {
                    let _ = serve(socket, &state, &behavior).await;
                });
            }
        });

        Ok(Self { addr, state, task })
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn create_calls(&self) -> usize {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    pub fn attach_calls(&self) -> usize {
        self.state.attach_calls.load(Ordering::SeqCst)
    }

    /// True once an attached client half-closed its side.
    pub fn saw_input_eof(&self) -> bool {
        self.state.saw_input_eof.load(Ordering::SeqCst)
    }

    pub fn create_requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state.create_requests).clone()
    }

    pub fn attach_requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state.attach_requests).clone()
    }
}

impl Drop for FakeRuntime {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn serve(
    mut socket: TcpStream,
    state: &FakeState,
    behavior: &FakeBehavior,
) -> std::io::Result<()> {
    let request = read_request(&mut socket).await?;

    if request.path.starts_with("/containers/") && request.path.ends_with("/exec") {
        state.create_calls.fetch_add(1, Ordering::SeqCst);
        lock(&state.create_requests).push(request);
        let (status, body) = match &behavior.create {
            CreateReply::Id(id) => (201, format!(r#"{{"Id":"{id}"}}"#)),
            CreateReply::Status(status, message) => {
                (*status, format!(r#"{{"message":"{message}"}}"#))
            }
            CreateReply::RawBody(body) => (201, body.clone()),
        };
        let response = format!(
            "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            reason(status),
            body.len()
        );
        socket.write_all(response.as_bytes()).await?;
        return socket.shutdown().await;
    }

    if request.path.starts_with("/exec/") && request.path.ends_with("/start") {
        state.attach_calls.fetch_add(1, Ordering::SeqCst);
        lock(&state.attach_requests).push(request);
        if !behavior.upgrade {
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await?;
            return socket.shutdown().await;
        }
        let mut head = b"HTTP/1.1 101 UPGRADED\r\nContent-Type: application/vnd.docker.raw-stream\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n".to_vec();
        head.extend_from_slice(&behavior.banner);
        socket.write_all(&head).await?;
        echo(socket, state, &behavior.farewell).await?;
        return Ok(());
    }

    socket
        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await?;
    socket.shutdown().await
}

async fn echo<S>(mut socket: S, state: &FakeState, farewell: &[u8]) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 1024];
    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        socket.write_all(&buf[..n]).await?;
    }
    state.saw_input_eof.store(true, Ordering::SeqCst);
    socket.write_all(farewell).await?;
    socket.shutdown().await
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<RecordedRequest> {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = find_head_end(&data) {
            break pos;
        }
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        data.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&data[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or_default()
        .to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = data[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        body.extend_from_slice(&buf[..n]);
    }

    Ok(RecordedRequest {
        path,
        headers,
        body,
    })
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|window| window == b"\r\n\r\n")
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
