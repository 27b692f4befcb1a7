//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    Router,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    sync::Semaphore,
    task::JoinHandle,
};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times, subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Write `yaml` to `{dir}/{rel}`, creating parent folders.
#[allow(dead_code)]
pub fn write_map(dir: &Path, rel: &str, yaml: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, yaml).unwrap();
}

/// In-memory documents served by [serve], keyed by URL path (`/docs/xrefmap.yml`).
type Documents = Arc<HashMap<String, String>>;

async fn serve_document(
    State(documents): State<Documents>,
    uri: Uri,
) -> Result<String, StatusCode> {
    documents
        .get(uri.path())
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

/// A throwaway HTTP server on an ephemeral local port. Unknown paths answer 404.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn start<I, P, D>(documents: I) -> TestServer
    where
        I: IntoIterator<Item = (P, D)>,
        P: Into<String>,
        D: Into<String>,
    {
        let documents: Documents = Arc::new(
            documents
                .into_iter()
                .map(|(path, doc)| (path.into(), doc.into()))
                .collect(),
        );
        let app = Router::new()
            .fallback(serve_document)
            .with_state(documents);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });
        TestServer { addr, handle }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Counts requests that are inside the handler and holds them until the gate opens.
#[allow(dead_code)]
struct Gate {
    document: String,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    release: Semaphore,
}

#[allow(dead_code)]
async fn serve_gated(State(gate): State<Arc<Gate>>) -> String {
    let now = gate.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    gate.max_in_flight.fetch_max(now, Ordering::SeqCst);
    // Closing the semaphore opens the gate for every waiting request.
    let _ = gate.release.acquire().await;
    gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    gate.document.clone()
}

/// An HTTP server that answers every path with the same document, but only once
/// [GatedServer::open] is called.
#[allow(dead_code)]
pub struct GatedServer {
    pub addr: SocketAddr,
    gate: Arc<Gate>,
    handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl GatedServer {
    pub async fn start<D: Into<String>>(document: D) -> GatedServer {
        let gate = Arc::new(Gate {
            document: document.into(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            release: Semaphore::new(0),
        });
        let app = Router::new().fallback(serve_gated).with_state(gate.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });
        GatedServer { addr, gate, handle }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Requests currently held at the gate.
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight.load(Ordering::SeqCst)
    }

    /// Most requests ever held at the gate at once.
    pub fn max_in_flight(&self) -> usize {
        self.gate.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.gate.release.close();
    }
}

impl Drop for GatedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[allow(dead_code)]
async fn ftp_reply(control: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    control.write_all(format!("{line}\r\n").as_bytes()).await
}

/// One control connection: just enough of RFC 959 for an anonymous passive-mode `RETR`.
#[allow(dead_code)]
async fn ftp_session(stream: TcpStream, documents: Documents) -> std::io::Result<()> {
    let (read, mut control) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut passive: Option<TcpListener> = None;
    ftp_reply(&mut control, "220 noet-xref test server").await?;
    while let Some(line) = lines.next_line().await? {
        let (command, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        match command.to_ascii_uppercase().as_str() {
            "USER" => ftp_reply(&mut control, "331 Password required").await?,
            "PASS" => ftp_reply(&mut control, "230 Logged in").await?,
            "TYPE" => ftp_reply(&mut control, "200 Type set").await?,
            "PASV" => {
                let data = TcpListener::bind("127.0.0.1:0").await?;
                let port = data.local_addr()?.port();
                passive = Some(data);
                let reply = format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{})",
                    port >> 8,
                    port & 0xff
                );
                ftp_reply(&mut control, &reply).await?;
            }
            "RETR" => match (documents.get(arg), passive.take()) {
                (Some(document), Some(data)) => {
                    ftp_reply(&mut control, "150 Opening data connection").await?;
                    let (mut conn, _) = data.accept().await?;
                    conn.write_all(document.as_bytes()).await?;
                    conn.shutdown().await?;
                    drop(conn);
                    ftp_reply(&mut control, "226 Transfer complete").await?;
                }
                _ => ftp_reply(&mut control, "550 File not found").await?,
            },
            "QUIT" => {
                ftp_reply(&mut control, "221 Goodbye").await?;
                break;
            }
            _ => ftp_reply(&mut control, "502 Command not implemented").await?,
        }
    }
    Ok(())
}

/// A throwaway FTP server on an ephemeral local port, serving in-memory documents by path.
#[allow(dead_code)]
pub struct FtpTestServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl FtpTestServer {
    pub async fn start<I, P, D>(documents: I) -> FtpTestServer
    where
        I: IntoIterator<Item = (P, D)>,
        P: Into<String>,
        D: Into<String>,
    {
        let documents: Documents = Arc::new(
            documents
                .into_iter()
                .map(|(path, doc)| (path.into(), doc.into()))
                .collect(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(ftp_session(stream, documents.clone()));
            }
        });
        FtpTestServer { addr, handle }
    }

    pub fn url(&self, path: &str) -> String {
        format!("ftp://{}{}", self.addr, path)
    }
}

impl Drop for FtpTestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
