use gateway_js_runtime::host::{HttpClient, HttpError, HttpRequest, UreqHttpClient};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct RecordedRequest {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: String,
}

struct MockServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    fn start(status_line: &'static str, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_for_thread = Arc::clone(&requests);

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

            let mut request_line = String::new();
            reader.read_line(&mut request_line).expect("read request line");
            let mut parts = request_line.split_whitespace();
            let mut recorded = RecordedRequest {
                method: parts.next().unwrap_or_default().to_string(),
                path: parts.next().unwrap_or_default().to_string(),
                ..RecordedRequest::default()
            };

            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read header");
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    let name = name.trim().to_ascii_lowercase();
                    let value = value.trim().to_string();
                    if name == "content-length" {
                        content_length = value.parse().unwrap_or(0);
                    }
                    recorded.headers.push((name, value));
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).expect("read body");
            recorded.body = String::from_utf8(request_body).expect("utf8 body");
            requests_for_thread.lock().expect("lock").push(recorded);

            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nX-Mock: yes\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).expect("write response");
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            handle: Some(handle),
        }
    }

    fn finish(mut self) -> Vec<RecordedRequest> {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("mock server thread");
        }
        let requests = self.requests.lock().expect("lock").clone();
        requests
    }
}

#[test]
fn posts_body_and_headers() {
    let server = MockServer::start("200 OK", r#"{"ok":true}"#);
    let client = UreqHttpClient::new(Some(Duration::from_secs(5)));
    let request = HttpRequest::new("POST", format!("{}/apis/v1/logger/_rpc", server.base_url))
        .header("X-Wasm-Module", "demo");

    let response = client
        .request(&request, Some(r#"{"level":"info"}"#))
        .expect("request");

    assert_eq!(response.status, 200);
    assert_eq!(response.body, r#"{"ok":true}"#);
    assert_eq!(response.headers.get("x-mock").map(String::as_str), Some("yes"));

    let requests = server.finish();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/apis/v1/logger/_rpc");
    assert_eq!(requests[0].body, r#"{"level":"info"}"#);
    assert!(requests[0]
        .headers
        .iter()
        .any(|(name, value)| name == "x-wasm-module" && value == "demo"));
}

#[test]
fn non_success_status_is_a_response_not_an_error() {
    let server = MockServer::start("503 Service Unavailable", r#"{"error":"down"}"#);
    let client = UreqHttpClient::default();

    let response = client
        .request(&HttpRequest::new("GET", format!("{}/health", server.base_url)), None)
        .expect("request");

    assert_eq!(response.status, 503);
    assert_eq!(response.body, r#"{"error":"down"}"#);
    let requests = server.finish();
    assert_eq!(requests[0].method, "GET");
    assert!(requests[0].body.is_empty());
}

#[test]
fn connection_failure_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = UreqHttpClient::default();
    let err = client
        .request(&HttpRequest::new("GET", format!("http://{addr}/")), None)
        .expect_err("connection refused");
    assert!(matches!(err, HttpError::Transport { .. }));
}
