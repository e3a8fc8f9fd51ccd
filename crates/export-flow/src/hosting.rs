//! Local static-file server for services whose player must be hosted.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use goexport_common::config::HostingConfig;
use goexport_common::error::{ExportError, ExportResult};

const MAX_REQUEST_HEAD: usize = 16 * 1024;

/// Serves files under one root until stopped.
pub struct StaticServer {
    addr: SocketAddr,
    root: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StaticServer {
    pub async fn start(root: impl Into<PathBuf>, config: &HostingConfig) -> ExportResult<Self> {
        Self::bind(root, &format!("{}:{}", config.host, config.port)).await
    }

    /// Bind to `addr` (`host:port`, port 0 picks one).
    pub async fn bind(root: impl Into<PathBuf>, addr: &str) -> ExportResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ExportError::config(format!(
                "Server root {} is not a directory",
                root.display()
            )));
        }
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ExportError::config(format!("Cannot listen on {addr}: {e}")))?;
        let local = listener.local_addr()?;
        let (tx, mut rx) = oneshot::channel::<()>();

        let serve_root = root.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            tokio::spawn(serve(stream, serve_root.clone()));
                        }
                        Err(e) => tracing::debug!(error = %e, "Accept failed"),
                    },
                }
            }
        });

        tracing::debug!(addr = %local, root = %root.display(), "Static server started");
        Ok(Self {
            addr: local,
            root,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        tracing::debug!(addr = %self.addr, "Static server stopped");
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

async fn serve(mut stream: TcpStream, root: PathBuf) {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") && head.len() < MAX_REQUEST_HEAD {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    let request = String::from_utf8_lossy(&head);
    let mut parts = request.lines().next().unwrap_or_default().split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or("/");

    let response = match method {
        "GET" | "HEAD" => match resolve(&root, target) {
            Some(path) => match tokio::fs::read(&path).await {
                Ok(body) => response(200, "OK", content_type(&path), body, method == "HEAD"),
                Err(_) => not_found(),
            },
            None => not_found(),
        },
        _ => response(405, "Method Not Allowed", "text/plain", b"method not allowed".to_vec(), false),
    };
    let _ = stream.write_all(&response).await;
    let _ = stream.shutdown().await;
}

/// File for a request target, or `None` when it escapes the root or is missing.
pub fn resolve(root: &Path, target: &str) -> Option<PathBuf> {
    let path = target.split(&['?', '#'][..]).next().unwrap_or_default();
    let path = percent_decode(path);
    let mut resolved = root.to_path_buf();
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if resolved.is_dir() {
        resolved.push("index.html");
    }
    resolved.is_file().then_some(resolved)
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or_default();
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" => "application/javascript",
        "css" => "text/css",
        "json" => "application/json",
        "xml" => "application/xml",
        "swf" => "application/x-shockwave-flash",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

fn response(code: u16, reason: &str, content_type: &str, body: Vec<u8>, head_only: bool) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    if !head_only {
        out.extend_from_slice(&body);
    }
    out
}

fn not_found() -> Vec<u8> {
    response(404, "Not Found", "text/plain", b"not found".to_vec(), false)
}
