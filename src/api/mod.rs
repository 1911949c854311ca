//! HTTP transport for the topology service.
//!
//! A deliberately small HTTP/1.1 server on a background thread; the engine
//! itself is transport-agnostic and collaborators that prefer a message bus
//! can drive `TopologyService` directly.
//!
//! Routes:
//! - `GET  /health`
//! - `POST /cameras` (register, JoinRequest body)
//! - `POST /cameras/{id}/heartbeat`
//! - `GET  /cameras/{id}/downstream[?bearing=deg]`
//! - `DELETE /cameras/{id}`

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::service::{JoinRequest, TopologyService};
use crate::TopologyError;

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8790".to_string(),
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
    service: TopologyService,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: TopologyService) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let service = self.service;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, service, shutdown_thread) {
                log::error!("topology api stopped: {}", err);
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
    service: TopologyService,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &service) {
                    log::warn!("topology api request rejected: {}", err);
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

fn handle_connection(mut stream: TcpStream, service: &TopologyService) -> Result<()> {
    let request = read_request(&mut stream)?;
    let segments: Vec<&str> = request
        .path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["health"]) => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("POST", ["cameras"]) => {
            let join: JoinRequest = match serde_json::from_slice(&request.body) {
                Ok(join) => join,
                Err(err) => {
                    write_json_response(&mut stream, 400, r#"{"error":"invalid_request"}"#)?;
                    return Err(anyhow!("invalid join request: {}", err));
                }
            };
            match service.register(&join) {
                Ok(ack) => {
                    let payload = serde_json::to_vec(&ack)?;
                    write_response(&mut stream, 200, "application/json", &payload)
                }
                Err(err) => write_error(&mut stream, err),
            }
        }
        ("POST", ["cameras", id, "heartbeat"]) => match service.heartbeat(id) {
            Ok(record) => {
                let payload = serde_json::to_vec(&record)?;
                write_response(&mut stream, 200, "application/json", &payload)
            }
            Err(err) => write_error(&mut stream, err),
        },
        ("GET", ["cameras", id, "downstream"]) => {
            let bearing = match request.query_param("bearing") {
                Some(raw) => match raw.parse::<f64>() {
                    Ok(b) => Some(b),
                    Err(_) => {
                        write_json_response(&mut stream, 400, r#"{"error":"invalid_bearing"}"#)?;
                        return Err(anyhow!("invalid bearing query: {}", raw));
                    }
                },
                None => None,
            };
            match service.downstream(id, bearing) {
                Ok(result) => {
                    let payload = serde_json::to_vec(&result)?;
                    write_response(&mut stream, 200, "application/json", &payload)
                }
                Err(err) => write_error(&mut stream, err),
            }
        }
        ("DELETE", ["cameras", id]) => match service.remove(id) {
            Ok(removed) => {
                let payload = format!(r#"{{"removed":{}}}"#, removed);
                write_json_response(&mut stream, 200, &payload)
            }
            Err(err) => write_error(&mut stream, err),
        },
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn write_error(stream: &mut TcpStream, err: anyhow::Error) -> Result<()> {
    let (status, body) = match err.downcast_ref::<TopologyError>() {
        Some(TopologyError::PlacementRejected { .. }) => {
            (409, r#"{"error":"placement_rejected"}"#)
        }
        Some(TopologyError::UnknownCamera { .. }) => (404, r#"{"error":"unknown_camera"}"#),
        _ => (500, r#"{"error":"internal"}"#),
    };
    write_json_response(stream, status, body)?;
    Err(err)
}

struct HttpRequest {
    method: String,
    path: String,
    raw_path: String,
    body: Vec<u8>,
}

impl HttpRequest {
    fn query_param(&self, name: &str) -> Option<&str> {
        let (_, query) = self.raw_path.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let mut header_end = None;
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            header_end = Some(pos + 4);
            break;
        }
    }
    let header_end = header_end.ok_or_else(|| anyhow!("truncated request"))?;

    let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .map(|v| v.parse())
        .transpose()
        .map_err(|_| anyhow!("invalid content-length"))?
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request body too large"));
    }

    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("truncated request body"));
        }
        body.extend_from_slice(&buf[..n]);
        if body.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request body too large"));
        }
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        raw_path: raw_path.to_string(),
        body,
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
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        409 => "HTTP/1.1 409 Conflict",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status_line,
        content_type,
        body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}
