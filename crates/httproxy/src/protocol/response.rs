//! Error-page formatting and the small set of fixed response lines the
//! handler writes directly (407, CONNECT success/failure).

pub const PROXY_AUTH_REQUIRED: &[u8] = b"HTTP/1.1 407 Proxy Authentication Required\r\n\
Proxy-Authenticate: Basic realm=\"Proxy Server\"\r\n\
Content-Length: 0\r\n\
Connection: close\r\n\r\n";

pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

pub const CONNECT_BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

fn default_reason(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

/// `HTTP/1.1 <code> <reason>` with a minimal HTML body repeating the code
/// and reason, `Content-Type: text/html`, exact `Content-Length`, and
/// `Connection: close`.
pub fn format_error_response(status: u16, reason: Option<&str>) -> Vec<u8> {
    let reason = reason.unwrap_or_else(|| default_reason(status));
    let body = format!(
        "<html><head><title>{status} {reason}</title></head>\
<body><h1>{status} {reason}</h1><p>The proxy server encountered an error processing your request.</p></body></html>"
    );

    let mut out = Vec::with_capacity(128 + body.len());
    out.extend_from_slice(format!("HTTP/1.1 {status} {reason}\r\n").as_bytes());
    out.extend_from_slice(b"Content-Type: text/html\r\n");
    out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    out.extend_from_slice(b"Connection: close\r\n\r\n");
    out.extend_from_slice(body.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_status_uses_canonical_reason() {
        let bytes = format_error_response(403, None);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(text.contains("Content-Type: text/html\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("403 Forbidden"));
    }

    #[test]
    fn unknown_status_defaults_to_error() {
        let bytes = format_error_response(599, None);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 599 Error\r\n"));
    }

    #[test]
    fn content_length_matches_body() {
        let bytes = format_error_response(502, None);
        let text = String::from_utf8(bytes).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        let declared: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(declared, body.len());
    }
}
