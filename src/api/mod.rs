//! Browser-facing HTTP server.
//!
//! A small HTTP/1.1 server on its own thread. It serves the page, the latest
//! annotated frame and status, the camera list and uploads, and forwards
//! start/stop requests to the session supervisor over a channel. Requests from
//! non-loopback peers on a loopback bind are refused.
//!
//! Requests are answered one at a time on the server thread, except uploads,
//! which are received on a thread of their own so a large file does not hold
//! up status polling or a stop request.

mod state;
mod supervisor;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ZoneWatchConfig;
use crate::ingest::{available_cameras, SourceSpec};
use crate::session::SessionCommand;

pub use state::{
    shared_snapshot, SessionState, SharedSnapshot, Snapshot, SnapshotSink, StatusSnapshot,
};
pub use supervisor::Supervisor;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_CONTROL_BODY_BYTES: usize = 4096;
const UPLOAD_READ_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];
const INDEX_HTML: &str = include_str!("index.html");

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub upload_dir: PathBuf,
    /// Largest accepted upload. Each upload streams to disk on its own thread.
    pub max_upload_bytes: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from_config(&ZoneWatchConfig::default())
    }
}

impl ApiConfig {
    pub fn from_config(config: &ZoneWatchConfig) -> Self {
        Self {
            addr: config.api_addr.clone(),
            upload_dir: config.upload_dir.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
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
    snapshot: SharedSnapshot,
    commands: Sender<SessionCommand>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, snapshot: SharedSnapshot, commands: Sender<SessionCommand>) -> Self {
        Self {
            cfg,
            snapshot,
            commands,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api addr '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind api listener on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;
        std::fs::create_dir_all(&self.cfg.upload_dir).with_context(|| {
            format!("create upload dir {}", self.cfg.upload_dir.display())
        })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &self, shutdown_thread) {
                log::error!("api: server stopped: {}", err);
            }
        });
        log::info!("api: listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, server: &ApiServer, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, server) {
                    log::warn!("api: request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, server: &ApiServer) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let mut request = read_request(&mut stream)?;
    let (method, path) = (request.method.clone(), request.path.clone());
    log::debug!("api: {} {}", method, path);
    match (method.as_str(), path.as_str()) {
        ("GET", "/") => write_response(
            &mut stream,
            200,
            "text/html; charset=utf-8",
            INDEX_HTML.as_bytes(),
        ),
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", "/status") => {
            let body = {
                let guard = lock_snapshot(&server.snapshot)?;
                serde_json::to_vec(&guard.status)?
            };
            write_response(&mut stream, 200, "application/json", &body)
        }
        ("GET", "/frame.jpg") => {
            let jpeg = lock_snapshot(&server.snapshot)?.jpeg.clone();
            match jpeg {
                Some(jpeg) => write_response(&mut stream, 200, "image/jpeg", &jpeg),
                None => write_json_response(&mut stream, 404, r#"{"error":"no_frame"}"#),
            }
        }
        ("GET", "/cameras") => {
            let body = serde_json::to_vec(&available_cameras())?;
            write_response(&mut stream, 200, "application/json", &body)
        }
        ("POST", "/session/start") => {
            let body = request.read_body(&mut stream, MAX_CONTROL_BODY_BYTES as u64)?;
            match parse_start(&body) {
                Ok(spec) => {
                    log::info!("api: start requested for {}", spec);
                    send_command(server, SessionCommand::Start(spec))?;
                    write_json_response(&mut stream, 202, r#"{"status":"starting"}"#)
                }
                Err(err) => {
                    let body = serde_json::json!({ "error": format!("{:#}", err) });
                    write_response(&mut stream, 400, "application/json", &serde_json::to_vec(&body)?)
                }
            }
        }
        ("POST", "/session/stop") => {
            send_command(server, SessionCommand::Stop)?;
            write_json_response(&mut stream, 202, r#"{"status":"stopping"}"#)
        }
        ("POST", "/upload") => {
            let cfg = server.cfg.clone();
            std::thread::Builder::new()
                .name("zonewatch-upload".to_string())
                .spawn(move || {
                    if let Err(err) = handle_upload(&mut stream, &mut request, &cfg) {
                        log::warn!("api: upload rejected: {}", err);
                    }
                })
                .context("spawn upload thread")?;
            Ok(())
        }
        (
            _,
            "/" | "/health" | "/status" | "/frame.jpg" | "/cameras" | "/session/start"
            | "/session/stop" | "/upload",
        ) => write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn lock_snapshot(shared: &SharedSnapshot) -> Result<std::sync::MutexGuard<'_, Snapshot>> {
    shared.lock().map_err(|_| anyhow!("snapshot lock poisoned"))
}

fn send_command(server: &ApiServer, command: SessionCommand) -> Result<()> {
    server
        .commands
        .send(command)
        .map_err(|_| anyhow!("session supervisor is not running"))
}

/// Body is a JSON source, e.g. `{"kind":"camera","device":"/dev/video0"}`.
fn parse_start(body: &[u8]) -> Result<SourceSpec> {
    let spec: SourceSpec = serde_json::from_slice(body).context("invalid source body")?;
    // Re-run the constructors so device and path rules apply.
    match &spec {
        SourceSpec::Camera { device } => SourceSpec::camera(device),
        SourceSpec::File { path } => SourceSpec::file(path),
    }
}

fn handle_upload(stream: &mut TcpStream, request: &mut HttpRequest, cfg: &ApiConfig) -> Result<()> {
    let Some(name) = request.query_param("name").and_then(sanitize_upload_name) else {
        return write_json_response(stream, 400, r#"{"error":"invalid_file_name"}"#);
    };
    let Some(length) = request.content_length() else {
        return write_json_response(stream, 411, r#"{"error":"length_required"}"#);
    };
    if length > cfg.max_upload_bytes {
        return write_json_response(stream, 413, r#"{"error":"upload_too_large"}"#);
    }

    let target = cfg.upload_dir.join(&name);
    let written = match save_body(stream, request, length, &target) {
        Ok(written) => written,
        Err(err) => {
            log::warn!("api: upload {} failed: {:#}", name, err);
            let body = serde_json::json!({
                "error": "upload_failed",
                "detail": format!("{:#}", err),
            });
            return write_response(stream, 400, "application/json", &serde_json::to_vec(&body)?);
        }
    };
    log::info!("api: stored upload {} ({} bytes)", target.display(), written);

    let body = serde_json::json!({
        "path": target.to_string_lossy(),
        "bytes": written,
    });
    write_response(stream, 201, "application/json", &serde_json::to_vec(&body)?)
}

/// Stream the body into `<target>.part`, then move it into place.
///
/// The partial file is removed whenever the body does not arrive in full.
fn save_body(stream: &mut TcpStream, request: &mut HttpRequest, length: u64, target: &Path) -> Result<u64> {
    let mut partial = target.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let saved = receive_body(stream, request, length, &partial).and_then(|written| {
        std::fs::rename(&partial, target)
            .with_context(|| format!("move upload into {}", target.display()))?;
        Ok(written)
    });
    if saved.is_err() {
        if let Err(err) = std::fs::remove_file(&partial) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!("api: could not remove {}: {}", partial.display(), err);
            }
        }
    }
    saved
}

fn receive_body(stream: &mut TcpStream, request: &mut HttpRequest, length: u64, partial: &Path) -> Result<u64> {
    let mut file = std::fs::File::create(partial)
        .with_context(|| format!("create upload file {}", partial.display()))?;
    stream.set_read_timeout(Some(UPLOAD_READ_TIMEOUT))?;

    let head = std::mem::take(&mut request.body_prefix);
    let head_len = (head.len() as u64).min(length);
    file.write_all(&head[..head_len as usize])?;
    let copied = std::io::copy(&mut stream.take(length - head_len), &mut file)
        .context("read upload body")?;
    let written = head_len + copied;
    if written != length {
        return Err(anyhow!("upload ended after {} of {} bytes", written, length));
    }
    file.sync_all()?;
    Ok(written)
}

/// Accept plain file names with a known video extension.
fn sanitize_upload_name(name: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,99}\.([A-Za-z0-9]{2,4})$").ok())
        .as_ref()?;
    let captures = pattern.captures(name)?;
    let extension = captures.get(1)?.as_str().to_ascii_lowercase();
    UPLOAD_EXTENSIONS
        .contains(&extension.as_str())
        .then(|| name.to_string())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers ended"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
    };
    let body_prefix = data.split_off(header_end + 4);

    let text = String::from_utf8_lossy(&data[..header_end]);
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
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (raw_path.to_string(), String::new()),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        query,
        headers,
        body_prefix,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        201 => "HTTP/1.1 201 Created",
        202 => "HTTP/1.1 202 Accepted",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: String,
    headers: HashMap<String, String>,
    /// Body bytes that arrived together with the headers.
    body_prefix: Vec<u8>,
}

impl HttpRequest {
    fn content_length(&self) -> Option<u64> {
        self.headers
            .get("content-length")
            .and_then(|value| value.parse().ok())
    }

    fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    /// Read a small body fully into memory.
    fn read_body(&mut self, stream: &mut TcpStream, limit: u64) -> Result<Vec<u8>> {
        let length = self.content_length().unwrap_or(0);
        if length > limit {
            return Err(anyhow!("request body too large"));
        }
        let mut body = std::mem::take(&mut self.body_prefix);
        body.truncate(length as usize);
        let missing = length - body.len() as u64;
        stream.take(missing).read_to_end(&mut body)?;
        if body.len() as u64 != length {
            return Err(anyhow!("request body truncated"));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_names_are_sanitized() {
        assert_eq!(sanitize_upload_name("clip.mp4").as_deref(), Some("clip.mp4"));
        assert_eq!(sanitize_upload_name("Desk_2-b.MOV").as_deref(), Some("Desk_2-b.MOV"));
        assert!(sanitize_upload_name("../etc/passwd.mp4").is_none());
        assert!(sanitize_upload_name(".hidden.mp4").is_none());
        assert!(sanitize_upload_name("notes.txt").is_none());
        assert!(sanitize_upload_name("clip.tar.mp4").is_none());
    }

    #[test]
    fn start_body_is_validated() {
        assert!(parse_start(br#"{"kind":"camera","device":"/dev/video1"}"#).is_ok());
        assert!(parse_start(br#"{"kind":"file","path":"stub://scene"}"#).is_ok());
        assert!(parse_start(br#"{"kind":"camera","device":"/dev/sda"}"#).is_err());
        assert!(parse_start(br#"{"kind":"file","path":"http://example.com/a.mp4"}"#).is_err());
        assert!(parse_start(b"camera").is_err());
    }
}
