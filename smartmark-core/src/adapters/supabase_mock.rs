//! Mock Supabase server for testing
//!
//! Serves the slice of the Auth and REST APIs the adapters call:
//! - GET /auth/v1/user returns the signed-in user for a valid bearer token
//! - POST /auth/v1/token?grant_type=refresh_token rotates the token pair
//! - POST /auth/v1/logout
//! - GET/POST/DELETE /rest/v1/bookmarks with PostgREST `eq.` filters

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value as JsonValue};
use url::Url;

pub const ANON_KEY: &str = "mock-anon-key";
pub const MOCK_USER_ID: &str = "8f14e45f-ceea-4e7a-9f0b-2c3d4e5f6a7b";
pub const MOCK_EMAIL: &str = "me@example.com";

/// Failure switches for the mock
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Answer every REST call with 503
    pub fail_storage: bool,
    /// Reject every refresh token
    pub fail_refresh: bool,
    /// Answer logout with 500
    pub fail_logout: bool,
}

#[derive(Debug)]
struct MockState {
    generation: u32,
    next_id: i64,
    rows: Vec<JsonValue>,
}

impl MockState {
    fn access_token(&self) -> String {
        format!("access-{}", self.generation)
    }

    fn refresh_token(&self) -> String {
        format!("refresh-{}", self.generation)
    }
}

pub struct MockSupabaseServer {
    port: u16,
    state: Arc<Mutex<MockState>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl MockSupabaseServer {
    /// Start a new mock server on a random available port
    pub fn start(config: MockConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(Mutex::new(MockState {
            generation: 1,
            next_id: 1,
            rows: Vec::new(),
        }));

        // Non-blocking so stop() can end the accept loop
        listener.set_nonblocking(true)?;

        let thread_handle = {
            let running = Arc::clone(&running);
            let state = Arc::clone(&state);
            thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let config = config.clone();
                            let state = Arc::clone(&state);
                            thread::spawn(move || handle_connection(stream, &config, &state));
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(std::time::Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        Ok(Self {
            port,
            state,
            running,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Currently valid access token
    pub fn access_token(&self) -> String {
        self.state.lock().unwrap().access_token()
    }

    /// Currently valid refresh token
    pub fn refresh_token(&self) -> String {
        self.state.lock().unwrap().refresh_token()
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockSupabaseServer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Request {
    method: String,
    url: Url,
    headers: Vec<(String, String)>,
    body: String,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn bearer(&self) -> Option<&str> {
        self.header("authorization")?.strip_prefix("Bearer ")
    }

    fn eq_filter(&self, column: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == column)
            .and_then(|(_, v)| v.strip_prefix("eq.").map(str::to_string))
    }
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    stream.set_nonblocking(false).ok()?;
    let mut data = Vec::new();
    let mut buffer = [0; 4096];

    let header_end = loop {
        let n = stream.read(&mut buffer).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buffer[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while data.len() < header_end + content_length {
        let n = stream.read(&mut buffer).ok()?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..n]);
    }
    let body = String::from_utf8_lossy(&data[header_end..]).to_string();

    Some(Request {
        method,
        url: Url::parse(&format!("http://mock{}", path)).ok()?,
        headers,
        body,
    })
}

fn handle_connection(mut stream: TcpStream, config: &MockConfig, state: &Mutex<MockState>) {
    let Some(request) = read_request(&mut stream) else {
        return;
    };

    if request.header("apikey") != Some(ANON_KEY) {
        send_response(&mut stream, 401, r#"{"message":"Invalid API key"}"#);
        return;
    }

    let mut state = state.lock().unwrap();
    let authorized = request.bearer() == Some(state.access_token().as_str());

    match (request.method.as_str(), request.url.path()) {
        ("GET", "/auth/v1/user") => {
            if authorized {
                send_json(&mut stream, 200, &json!({ "id": MOCK_USER_ID, "email": MOCK_EMAIL }));
            } else {
                send_response(&mut stream, 401, r#"{"msg":"invalid JWT"}"#);
            }
        }
        ("POST", "/auth/v1/token") => {
            let presented = serde_json::from_str::<JsonValue>(&request.body)
                .ok()
                .and_then(|v| v["refresh_token"].as_str().map(str::to_string));
            if config.fail_refresh || presented != Some(state.refresh_token()) {
                send_response(
                    &mut stream,
                    400,
                    r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token"}"#,
                );
                return;
            }
            state.generation += 1;
            send_json(
                &mut stream,
                200,
                &json!({
                    "access_token": state.access_token(),
                    "token_type": "bearer",
                    "expires_in": 3600,
                    "refresh_token": state.refresh_token(),
                    "user": { "id": MOCK_USER_ID, "email": MOCK_EMAIL }
                }),
            );
        }
        ("POST", "/auth/v1/logout") => {
            if config.fail_logout {
                send_response(&mut stream, 500, r#"{"msg":"logout failed"}"#);
            } else {
                send_response(&mut stream, 204, "");
            }
        }
        (_, "/rest/v1/bookmarks") if config.fail_storage => {
            send_response(&mut stream, 503, r#"{"message":"Service Unavailable"}"#);
        }
        (_, "/rest/v1/bookmarks") if !authorized => {
            send_response(&mut stream, 401, r#"{"message":"JWT expired"}"#);
        }
        ("GET", "/rest/v1/bookmarks") => {
            let owner = request.eq_filter("user_id");
            let mut rows: Vec<JsonValue> = state
                .rows
                .iter()
                .filter(|row| owner.as_deref().map_or(true, |o| row["user_id"] == o))
                .cloned()
                .collect();
            rows.reverse();
            send_json(&mut stream, 200, &JsonValue::Array(rows));
        }
        ("POST", "/rest/v1/bookmarks") => {
            let Ok(body) = serde_json::from_str::<JsonValue>(&request.body) else {
                send_response(&mut stream, 400, r#"{"message":"Invalid JSON"}"#);
                return;
            };
            let row = json!({
                "id": state.next_id,
                "title": body["title"],
                "url": body["url"],
                "user_id": body["user_id"],
                "created_at": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            });
            state.next_id += 1;
            state.rows.push(row.clone());
            send_json(&mut stream, 201, &row);
        }
        ("DELETE", "/rest/v1/bookmarks") => {
            let id = request.eq_filter("id");
            let owner = request.eq_filter("user_id");
            state.rows.retain(|row| {
                let same_id = id.as_deref() == Some(row["id"].to_string().trim_matches('"'));
                let same_owner = owner.as_deref().map_or(true, |o| row["user_id"] == o);
                !(same_id && same_owner)
            });
            send_response(&mut stream, 204, "");
        }
        _ => send_response(&mut stream, 404, r#"{"message":"Endpoint not found"}"#),
    }
}

fn send_json(stream: &mut TcpStream, status: u16, body: &JsonValue) {
    send_response(stream, status, &body.to_string());
}

fn send_response(stream: &mut TcpStream, status: u16, body: &str) {
    let status_text = match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}
