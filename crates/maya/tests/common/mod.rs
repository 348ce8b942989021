//! In-process HLS origin used by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Answer every request with this status
    Always(StatusCode),
    /// Answer the next `remaining` requests with this status, then serve normally
    Times(StatusCode, usize),
}

#[derive(Default)]
struct Origin {
    files: Mutex<HashMap<String, Vec<u8>>>,
    faults: Mutex<HashMap<String, Fault>>,
    delays: Mutex<HashMap<String, Duration>>,
    hits: Mutex<HashMap<String, usize>>,
    range_requests: Mutex<Vec<(String, String)>>,
}

pub struct TestServer {
    base: Url,
    origin: Arc<Origin>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let origin = Arc::new(Origin::default());
        let app = Router::new()
            .fallback(serve)
            .with_state(Arc::clone(&origin));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base: Url::parse(&format!("http://{addr}/")).unwrap(),
            origin,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base.join(path).unwrap()
    }

    pub fn put(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.origin
            .files
            .lock()
            .unwrap()
            .insert(normalize(path), body.into());
    }

    pub fn fail_always(&self, path: &str, status: StatusCode) {
        self.origin
            .faults
            .lock()
            .unwrap()
            .insert(normalize(path), Fault::Always(status));
    }

    pub fn fail_times(&self, path: &str, status: StatusCode, times: usize) {
        self.origin
            .faults
            .lock()
            .unwrap()
            .insert(normalize(path), Fault::Times(status, times));
    }

    pub fn clear_faults(&self) {
        self.origin.faults.lock().unwrap().clear();
    }

    pub fn delay(&self, path: &str, delay: Duration) {
        self.origin
            .delays
            .lock()
            .unwrap()
            .insert(normalize(path), delay);
    }

    pub fn hits(&self, path: &str) -> usize {
        self.origin
            .hits
            .lock()
            .unwrap()
            .get(&normalize(path))
            .copied()
            .unwrap_or(0)
    }

    /// Requests whose path ends with `suffix`, summed
    pub fn hits_matching(&self, suffix: &str) -> usize {
        self.origin
            .hits
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| path.ends_with(suffix))
            .map(|(_, count)| count)
            .sum()
    }

    pub fn range_requests(&self) -> Vec<(String, String)> {
        self.origin.range_requests.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

async fn serve(State(origin): State<Arc<Origin>>, uri: Uri, headers: HeaderMap) -> Response {
    let path = uri.path().to_string();
    *origin.hits.lock().unwrap().entry(path.clone()).or_default() += 1;

    let delay = origin.delays.lock().unwrap().get(&path).copied();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let fault = {
        let mut faults = origin.faults.lock().unwrap();
        match faults.get_mut(&path) {
            Some(Fault::Always(status)) => Some(*status),
            Some(Fault::Times(status, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(*status)
            }
            _ => None,
        }
    };
    if let Some(status) = fault {
        return status.into_response();
    }

    let Some(body) = origin.files.lock().unwrap().get(&path).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    match range {
        Some(range) => {
            origin
                .range_requests
                .lock()
                .unwrap()
                .push((path, range.clone()));
            match parse_range(&range, body.len()) {
                Some((start, end)) => (
                    StatusCode::PARTIAL_CONTENT,
                    [(
                        header::CONTENT_RANGE,
                        format!("bytes {start}-{end}/{}", body.len()),
                    )],
                    body[start..=end].to_vec(),
                )
                    .into_response(),
                None => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
            }
        }
        None => (StatusCode::OK, body).into_response(),
    }
}

fn parse_range(value: &str, len: usize) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    (start <= end && end < len).then_some((start, end))
}

/// Bare TCP origin that answers every connection with the same raw bytes
/// and then closes it. Keeps the request head of each connection.
pub struct RawOrigin {
    base: Url,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl RawOrigin {
    pub async fn start(response: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                seen.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&head).into_owned());
                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
            }
        });
        Self {
            base: Url::parse(&format!("http://{addr}/")).unwrap(),
            requests,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base.join(path).unwrap()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for RawOrigin {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// `HTTP/1.1 200` head with the given extra header lines, followed by `body`.
pub fn raw_response(content_length: usize, extra_headers: &[&str], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 200 OK\r\ncontent-length: {content_length}\r\nconnection: close\r\n");
    for line in extra_headers {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    let mut out = out.into_bytes();
    out.extend_from_slice(body);
    out
}

pub fn media_playlist(segments: &[&str]) -> String {
    let mut text = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n");
    for uri in segments {
        text.push_str(&format!("#EXTINF:4.0,\n{uri}\n"));
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}

pub fn segment_body(index: usize) -> Vec<u8> {
    format!("[segment {index}:{}]", "ts".repeat(64 + index * 13)).into_bytes()
}
