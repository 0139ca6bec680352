//! Synthesized error responses.

use chrono::Utc;

use crate::net::Connection;

/// Build the fixed HTTP/1.0 500 response written on unrecoverable startup
/// or dispatch faults: status line, date/expiry/cache-control headers, and
/// a UTF-8 HTML body carrying the fault detail, on a connection that is
/// then closed.
pub fn error_response(detail: &str) -> Vec<u8> {
    let now = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT");
    let body = format!(
        "<html><head><title>Exception: {detail}</title></head><body>\
         <h1>Exception caught.</h1>\
         <pre>{detail}</pre>\
         </body></html>"
    );
    format!(
        "HTTP/1.0 500 Server error\r\n\
         Date: {now}\r\n\
         Expires: {now}\r\n\
         Last-Modified: {now}\r\n\
         Cache-Control: private, must-revalidate, max-age=0\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         Connection: close\r\n\r\n{body}"
    )
    .into_bytes()
}

/// Best-effort write of the 500 response.
///
/// Send failures are logged, never retried; the connection is about to be
/// closed either way.
pub async fn send_error_response(conn: &Connection, detail: &str) {
    if let Err(e) = conn.write_all(&error_response(detail)).await {
        tracing::warn!(
            connection_id = %conn.id(),
            error = %e,
            detail,
            "failed to send error response"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_carries_required_lines() {
        let bytes = error_response("boom");
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("HTTP/1.0 500 Server error\r\n"));
        assert!(text.contains("\r\nDate: "));
        assert!(text.contains("\r\nExpires: "));
        assert!(text.contains("\r\nLast-Modified: "));
        assert!(text.contains("\r\nCache-Control: private, must-revalidate, max-age=0\r\n"));
        assert!(text.contains("\r\nContent-Type: text/html; charset=UTF-8\r\n"));
        assert!(text.contains("\r\nConnection: close\r\n\r\n"));
        assert!(text.ends_with("</body></html>"));
        assert!(text.contains("<pre>boom</pre>"));
    }

    #[test]
    fn date_header_is_rfc1123_shaped() {
        let text = String::from_utf8(error_response("x")).unwrap();
        let date = text
            .lines()
            .find_map(|l| l.strip_prefix("Date: "))
            .unwrap();
        // e.g. "Sat, 30 Aug 2026 12:00:00 GMT"
        assert!(date.ends_with(" GMT"));
        assert_eq!(date.split(' ').count(), 6);
    }
}
