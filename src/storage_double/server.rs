use super::{KeyValueStore, RpcReply, StorageService};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3004";
pub const MAX_BODY_BYTES: usize = 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum StorageServerError {
    #[error("failed to bind storage double on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("storage double connection failed: {0}")]
    Connection(#[source] std::io::Error),
}

pub struct StorageDoubleServer<S: KeyValueStore> {
    listener: TcpListener,
    service: StorageService<S>,
}

impl<S: KeyValueStore> StorageDoubleServer<S> {
    pub fn bind(addr: &str, service: StorageService<S>) -> Result<Self, StorageServerError> {
        let listener = TcpListener::bind(addr).map_err(|source| StorageServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self { listener, service })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, StorageServerError> {
        self.listener
            .local_addr()
            .map_err(StorageServerError::Connection)
    }

    pub fn base_url(&self) -> Result<String, StorageServerError> {
        Ok(format!("http://{}", self.local_addr()?))
    }

    /// Serves connections one at a time; stops after `max_requests` connections
/// when given. A failing connection is logged and skipped.
    pub fn serve(mut self, max_requests: Option<usize>) -> Result<(), StorageServerError> {
        serve(&self.listener, &mut self.service, max_requests)
    }
}

pub fn serve<S: KeyValueStore>(
    listener: &TcpListener,
    service: &mut StorageService<S>,
    max_requests: Option<usize>,
) -> Result<(), StorageServerError> {
    let mut served = 0usize;
    for stream in listener.incoming() {
        let stream = stream.map_err(StorageServerError::Connection)?;
        if let Err(err) = handle_connection(stream, service) {
            service
                .log()
                .warn("storage.connection", &format!("connection dropped: {err}"));
        }
        served += 1;
        if max_requests.is_some_and(|max| served >= max) {
            break;
        }
    }
    Ok(())
}

fn handle_connection<S: KeyValueStore>(
    mut stream: TcpStream,
    service: &mut StorageService<S>,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line)? == 0 {
        // Peer closed without sending a request.
        return Ok(());
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("GET").to_string();
    let path = parts.next().unwrap_or("/").to_string();

    let mut content_length = Some(0usize);
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line == "\r\n" || line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            }
        }
    }

    let content_length = match content_length {
        Some(length) if length <= MAX_BODY_BYTES => length,
        Some(length) => {
            let reply = RpcReply::failure(
                400,
                "request_too_large",
                format!("request body of {length} bytes exceeds {MAX_BODY_BYTES}"),
            );
            service.log().warn("storage.rejected", &reply.body_string());
            return write_reply(&mut stream, &reply);
        }
        None => {
            let reply = RpcReply::failure(
                400,
                "invalid_request",
                "content-length is not a number".to_string(),
            );
            service.log().warn("storage.rejected", &reply.body_string());
            return write_reply(&mut stream, &reply);
        }
    };

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body)?;
    }
    let body = String::from_utf8_lossy(&body);

    let reply = service.route(&method, &path, &body);
    write_reply(&mut stream, &reply)
}

fn write_reply(stream: &mut TcpStream, reply: &RpcReply) -> std::io::Result<()> {
    let body = reply.body_string();
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reason_phrase(reply.status),
        body.len()
    );
    if reply.body.is_some() {
        head.push_str("Content-Type: application/json\r\n");
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())?;
    stream.write_all(body.as_bytes())?;
    stream.flush()
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Unknown",
    }
}
