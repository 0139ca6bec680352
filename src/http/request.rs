//! Bounded request-head reading.

use crate::net::Connection;

/// Cap on the bytes read while looking for the end of the head.
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// The part of a request the acceptor reads off the wire before crossing
/// into a tenant: enough to resolve routing, nothing more.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    /// Request path with any query string stripped.
    pub path: String,
    pub version: String,
    /// Host header, without the port suffix.
    pub host: Option<String>,
    /// Port carried in the Host header, when present.
    pub port: Option<u16>,
    /// Whether the client negotiated keep-alive.
    pub keep_alive: bool,
}

/// Read and parse one request head from the connection.
///
/// Reads until the blank line ending the head, bounded by
/// [`MAX_HEAD_BYTES`]; a malformed or oversized head is an
/// `InvalidData` error and the caller answers with a closed connection.
pub async fn read_request_head(conn: &Connection) -> std::io::Result<RequestHead> {
    let mut head = Vec::with_capacity(512);
    let mut buf = [0u8; 512];

    loop {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(invalid("request head too large"));
        }
    }

    parse_head(&head)
}

fn parse_head(head: &[u8]) -> std::io::Result<RequestHead> {
    let text = std::str::from_utf8(head).map_err(|_| invalid("request head is not UTF-8"))?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split(' ');
    let method = parts.next().filter(|m| !m.is_empty()).ok_or_else(|| invalid("missing method"))?;
    let target = parts.next().ok_or_else(|| invalid("missing request target"))?;
    let version = parts.next().ok_or_else(|| invalid("missing HTTP version"))?;
    if !version.starts_with("HTTP/") {
        return Err(invalid("bad HTTP version"));
    }

    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut host = None;
    let mut port = None;
    let mut connection_header = None;
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("host") {
            let (h, p) = split_host_port(value);
            host = Some(h);
            port = p;
        } else if name.eq_ignore_ascii_case("connection") {
            connection_header = Some(value.to_ascii_lowercase());
        }
    }

    let keep_alive = match connection_header.as_deref() {
        Some("close") => false,
        Some(value) if value.contains("keep-alive") => true,
        _ => version == "HTTP/1.1",
    };

    Ok(RequestHead {
        method: method.to_string(),
        path,
        version: version.to_string(),
        host,
        port,
        keep_alive,
    })
}

/// Split a Host header value into hostname and optional port.
///
/// Bracketed IPv6 literals (`[::1]:8080`) lose their brackets so the
/// hostname compares equal to a configured `::1`; a bare literal with
/// multiple colons is all hostname, never host:port.
fn split_host_port(value: &str) -> (String, Option<u16>) {
    if let Some(rest) = value.strip_prefix('[') {
        if let Some((addr, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (addr.to_string(), port);
        }
        return (value.to_string(), None);
    }
    if value.bytes().filter(|b| *b == b':').count() > 1 {
        return (value.to_string(), None);
    }
    match value.rsplit_once(':') {
        Some((h, p)) => match p.parse() {
            Ok(port) => (h.to_string(), Some(port)),
            Err(_) => (value.to_string(), None),
        },
        None => (value.to_string(), None),
    }
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}
