//! Shared helpers for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use appserver::host::channel::ChannelHostFactory;
use appserver::http::HttpWorkerFactory;
use appserver::routing::RouteTable;
use appserver::server::Server;

/// Tenant tuple: (host, port, path_prefix, physical_root).
pub type TenantSpec = (Option<&'static str>, Option<u16>, &'static str, &'static str);

/// Start a server on an ephemeral port with the given tenants registered.
pub fn start_server(tenants: &[TenantSpec]) -> (Server, SocketAddr) {
    let routes = Arc::new(RouteTable::new(Arc::new(ChannelHostFactory)));
    for (host, port, prefix, root) in tenants {
        routes.register(host.map(String::from), *port, prefix, *root);
    }
    let server = Server::new(routes, Arc::new(HttpWorkerFactory));
    let addr = server.start("127.0.0.1:0".parse().unwrap()).unwrap();
    (server, addr)
}

/// Send one raw request and read the whole response until EOF.
pub async fn request_to_eof(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Read one Content-Length-framed response off an open stream.
///
/// Used by keep-alive tests, where reading to EOF would hang.
pub async fn read_framed_response(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed before response head");
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let content_length: usize = head
        .lines()
        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(str::trim).map(String::from))
        .expect("response has no Content-Length")
        .parse()
        .unwrap();

    while data.len() < header_end + content_length {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed mid-body");
        data.extend_from_slice(&buf[..n]);
    }

    String::from_utf8_lossy(&data).into_owned()
}
