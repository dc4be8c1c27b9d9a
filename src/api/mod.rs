//! Prediction API for the tray inspector.
//!
//! A small HTTP/1.1 server on a background thread. Connections are handled one
//! at a time, which also serializes access to the loaded detector.
//!
//! Routes:
//! - `POST /predict` (or `/predict/`): raw image body or `multipart/form-data`
//!   with a `file` field; answers with the JSON tray report.
//! - `GET /health`: liveness and backend name.
//! - `OPTIONS *`: CORS preflight.

pub mod multipart;

use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::TrayConfig;
use crate::tray::TrayAnalyzer;

const MAX_HEADER_BYTES: usize = 8192;
const IO_CHUNK_BYTES: usize = 64 * 1024;
const IO_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
    /// Longest a single socket read or write may block.
    pub io_timeout: Duration,
    /// Budget for reading a whole request, and separately for writing its response.
    pub request_deadline: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from_tray_config(&TrayConfig::default())
    }
}

impl ApiConfig {
    pub fn from_tray_config(cfg: &TrayConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            max_upload_bytes: cfg.max_upload_bytes,
            io_timeout: IO_TIMEOUT,
            request_deadline: REQUEST_DEADLINE,
        }
    }
}

/// Wall-clock budget for one phase of a connection.
#[derive(Clone, Copy, Debug)]
struct Deadline {
    at: Instant,
    io_timeout: Duration,
}

impl Deadline {
    fn start(cfg: &ApiConfig) -> Self {
        Self {
            at: Instant::now() + cfg.request_deadline,
            io_timeout: cfg.io_timeout,
        }
    }

    /// Timeout for the next socket operation, never zero.
    fn next_timeout(&self) -> Result<Duration> {
        let left = self.at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(anyhow!("request deadline exceeded"));
        }
        Ok(left.min(self.io_timeout))
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    analyzer: TrayAnalyzer,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, analyzer: TrayAnalyzer) -> Self {
        Self { cfg, analyzer }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let analyzer = self.analyzer;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, analyzer, shutdown_thread) {
                log::error!("prediction api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    analyzer: TrayAnalyzer,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = handle_connection(stream, &analyzer, &cfg) {
                    log::warn!("prediction api request from {} failed: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, analyzer: &TrayAnalyzer, cfg: &ApiConfig) -> Result<()> {
    stream.set_nonblocking(false)?;
    let reading = Deadline::start(cfg);

    let (mut request, leftover) = read_head(&mut stream, &reading)?;
    if request.method == "POST" {
        let len = match request.content_length() {
            Some(len) => len,
            None => {
                let response = Response::error(411, "length_required", "Content-Length is required");
                return write_response(&mut stream, &response, &Deadline::start(cfg));
            }
        };
        if len > cfg.max_upload_bytes {
            let detail = format!("upload exceeds {} bytes", cfg.max_upload_bytes);
            let response = Response::error(413, "payload_too_large", &detail);
            return write_response(&mut stream, &response, &Deadline::start(cfg));
        }
        if request.header("expect").is_some_and(|v| v.eq_ignore_ascii_case("100-continue")) {
            write_bytes(&mut stream, b"HTTP/1.1 100 Continue\r\n\r\n", &reading)?;
        }
        request.body = read_body(&mut stream, leftover, len, &reading)?;
    }

    let response = route(&request, analyzer);
    log::debug!("{} {} -> {}", request.method, request.path, response.status);
    write_response(&mut stream, &response, &Deadline::start(cfg))
}

/// Dispatch a fully read request.
pub fn route(request: &HttpRequest, analyzer: &TrayAnalyzer) -> Response {
    let known_path = matches!(request.path.as_str(), "/predict" | "/predict/" | "/health");
    match (request.method.as_str(), request.path.as_str()) {
        ("OPTIONS", _) => Response::empty(204),
        ("GET", "/health") => match analyzer.backend_name() {
            Ok(name) => Response::json(200, &json!({ "status": "ok", "backend": name })),
            Err(err) => Response::error(500, err.code(), &err.to_string()),
        },
        ("POST", "/predict") | ("POST", "/predict/") => predict(request, analyzer),
        _ if known_path => Response::error(405, "method_not_allowed", "method not allowed"),
        _ => Response::error(404, "not_found", "no such route"),
    }
}

fn predict(request: &HttpRequest, analyzer: &TrayAnalyzer) -> Response {
    let image_bytes = match upload_bytes(request) {
        Ok(bytes) => bytes,
        Err(err) => return Response::error(400, "missing_file", &err.to_string()),
    };

    match analyzer.analyze(image_bytes) {
        Ok(result) => Response::json(200, &result.to_report()),
        Err(err) => {
            log::warn!("tray analysis rejected: {}", err);
            let status = if err.is_client_error() { 400 } else { 500 };
            Response::error(status, err.code(), &err.to_string())
        }
    }
}

fn upload_bytes(request: &HttpRequest) -> Result<&[u8]> {
    let content_type = request.header("content-type").unwrap_or_default();
    let bytes: &[u8] = if content_type
        .to_ascii_lowercase()
        .starts_with("multipart/form-data")
    {
        let boundary = multipart::boundary(content_type)
            .ok_or_else(|| anyhow!("multipart upload without boundary"))?;
        let parts = multipart::parse(&request.body, &boundary)?;
        multipart::file_field(&parts, "file")
            .ok_or_else(|| anyhow!("multipart upload has no file part"))?
    } else {
        &request.body
    };
    if bytes.is_empty() {
        return Err(anyhow!("empty upload"));
    }
    Ok(bytes)
}

fn read_head(stream: &mut TcpStream, deadline: &Deadline) -> Result<(HttpRequest, Vec<u8>)> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let head_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        stream.set_read_timeout(Some(deadline.next_timeout()?))?;
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let leftover = data[head_end + 4..].to_vec();
    let request = parse_head(&String::from_utf8_lossy(&data[..head_end]))?;
    Ok((request, leftover))
}

fn read_body(
    stream: &mut TcpStream,
    mut body: Vec<u8>,
    len: usize,
    deadline: &Deadline,
) -> Result<Vec<u8>> {
    body.reserve(len.saturating_sub(body.len()));
    let mut buf = vec![0u8; IO_CHUNK_BYTES];
    while body.len() < len {
        stream.set_read_timeout(Some(deadline.next_timeout()?))?;
        let want = (len - body.len()).min(buf.len());
        let n = stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(anyhow!(
                "request body truncated: expected {} bytes, received {}",
                len,
                body.len()
            ));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(len);
    Ok(body)
}

fn write_bytes(stream: &mut TcpStream, bytes: &[u8], deadline: &Deadline) -> Result<()> {
    for chunk in bytes.chunks(IO_CHUNK_BYTES) {
        stream.set_write_timeout(Some(deadline.next_timeout()?))?;
        stream.write_all(chunk)?;
    }
    Ok(())
}

fn parse_head(text: &str) -> Result<HttpRequest> {
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_uppercase(),
        path,
        headers,
        body: Vec::new(),
    })
}

fn write_response(stream: &mut TcpStream, response: &Response, deadline: &Deadline) -> Result<()> {
    let status_line = match response.status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: *\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = response.content_type,
        len = response.body.len()
    );
    write_bytes(stream, header.as_bytes(), deadline)?;
    write_bytes(stream, &response.body, deadline)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|v| v.as_str())
    }

    fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: Vec::new(),
        }
    }

    fn json<T: serde::Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(err) => Self::error(500, "serialization_failure", &err.to_string()),
        }
    }

    fn error(status: u16, code: &str, detail: &str) -> Self {
        let body = json!({ "error": code, "detail": detail }).to_string().into_bytes();
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }
}
