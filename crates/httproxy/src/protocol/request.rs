//! Wire codec: parse a request-head off a byte stream, derive the target
//! host/port, and rewrite the target for upstream forwarding.

use smol::io::AsyncReadExt;
use smol::net::TcpStream;

pub const MAX_HEAD_BYTES: usize = 8 * 1024;
pub const MAX_LINE_BYTES: usize = 4 * 1024;
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Hostname/port derived first from an absolute-URI or CONNECT
    /// authority target, then from the `Host` header. Defaults: 80 plain,
    /// 443 for https or CONNECT with no explicit port.
    pub fn hostname_port(&self) -> Option<(String, u16)> {
        if let Some(rest) = self.target.strip_prefix("https://") {
            let authority_end = rest.find('/').unwrap_or(rest.len());
            return Some(split_host_port(&rest[..authority_end], 443));
        }
        if let Some(rest) = self.target.strip_prefix("http://") {
            let authority_end = rest.find('/').unwrap_or(rest.len());
            return Some(split_host_port(&rest[..authority_end], 80));
        }
        if self.is_connect() {
            return Some(split_host_port(&self.target, 443));
        }

        let host_header = self.header("Host")?;
        Some(split_host_port(host_header, 80))
    }

    pub fn hostname(&self) -> Option<String> {
        self.hostname_port().map(|(h, _)| h)
    }

    /// For non-CONNECT absolute-URI targets, strip scheme+authority and
    /// forward only `/path?query` (`/` if empty). CONNECT and origin-form
    /// targets pass through unchanged.
    pub fn upstream_target(&self) -> String {
        if self.is_connect() {
            return self.target.clone();
        }
        if let Some(path) = strip_scheme_authority(&self.target) {
            if path.is_empty() { "/".to_string() } else { path }
        } else {
            self.target.clone()
        }
    }

    /// Serialize this request the way it should be sent upstream: rewritten
    /// target, headers in insertion order, then the body.
    pub fn format_for_upstream(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(
            format!("{} {} {}\r\n", self.method, self.upstream_target(), self.version).as_bytes(),
        );
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

fn strip_scheme_authority(target: &str) -> Option<String> {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = target.strip_prefix(scheme) {
            return Some(match rest.find('/') {
                Some(idx) => rest[idx..].to_string(),
                None => String::new(),
            });
        }
    }
    None
}

fn split_host_port(s: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = s.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let host = rest[..end].to_string();
            let after = &rest[end + 1..];
            let port = after
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host, port);
        }
    }
    match s.rsplit_once(':') {
        Some((h, p)) => match p.parse() {
            Ok(port) => (h.to_string(), port),
            Err(_) => (s.to_string(), default_port),
        },
        None => (s.to_string(), default_port),
    }
}

/// Parse a request-head (the bytes preceding the CRLF-CRLF terminator).
pub fn parse_head(head: &[u8]) -> Result<(String, String, String, Vec<(String, String)>), ParseError> {
    let mut lines = split_crlf(head);
    if lines.is_empty() {
        return Err(ParseError("empty request".into()));
    }
    let request_line = lines.remove(0);
    if request_line.len() > MAX_LINE_BYTES {
        return Err(ParseError("request line too long".into()));
    }
    let request_line = String::from_utf8_lossy(request_line);
    let mut tokens = request_line.split_whitespace();
    let method = tokens
        .next()
        .ok_or_else(|| ParseError("missing method".into()))?
        .to_ascii_uppercase();
    let target = tokens
        .next()
        .ok_or_else(|| ParseError("missing target".into()))?
        .to_string();
    let version = tokens
        .next()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "HTTP/1.1".to_string());

    let mut headers: Vec<(String, String)> = Vec::new();
    for line in lines {
        if line.len() > MAX_LINE_BYTES {
            return Err(ParseError("header line too long".into()));
        }
        let line = String::from_utf8_lossy(line);
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_string();
            let value = value.trim().to_string();
            if let Some(existing) = headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
                existing.1 = value;
            } else {
                headers.push((name, value));
            }
        }
    }

    if header_value(&headers, "transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    {
        return Err(ParseError("chunked request body not supported".into()));
    }

    Ok((method, target, version, headers))
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn content_length(headers: &[(String, String)]) -> Result<Option<usize>, ParseError> {
    let Some(v) = header_value(headers, "content-length") else {
        return Ok(None);
    };
    let v = v.trim();
    if v.is_empty() {
        return Ok(None);
    }
    v.parse::<usize>()
        .map(Some)
        .map_err(|_| ParseError("invalid Content-Length".into()))
}

fn split_crlf(buf: &[u8]) -> Vec<&[u8]> {
    if buf.is_empty() {
        return Vec::new();
    }
    buf.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read a well-formed request-head plus body (if framed by
/// `Content-Length`) off the client stream. Bounded by the caller's
/// timeout wrapper; this function itself only enforces the parser's size
/// bounds, never an I/O deadline.
pub async fn read_request(stream: &mut TcpStream) -> Result<Request, ParseError> {
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut tmp = [0u8; 4096];

    let header_end = loop {
        let n = stream
            .read(&mut tmp)
            .await
            .map_err(|e| ParseError(e.to_string()))?;
        if n == 0 {
            return Err(ParseError("connection closed before headers complete".into()));
        }
        buf.extend_from_slice(&tmp[..n]);

        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            if pos > MAX_HEAD_BYTES {
                return Err(ParseError("request head too large".into()));
            }
            break pos + 4;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ParseError("request head too large".into()));
        }
    };

    let head_len = header_end - 4;
    let (method, target, version, headers) = parse_head(&buf[..head_len])?;

    let pre_body = buf[header_end..].to_vec();

    if method.eq_ignore_ascii_case("CONNECT") {
        return Ok(Request {
            method,
            target,
            version,
            headers,
            body: pre_body,
        });
    }

    let body = match content_length(&headers)? {
        Some(len) => {
            if len > MAX_BODY_BYTES {
                return Err(ParseError(format!("request body too large: {len} bytes")));
            }
            let mut body = pre_body;
            while body.len() < len {
                let n = stream
                    .read(&mut tmp)
                    .await
                    .map_err(|e| ParseError(e.to_string()))?;
                if n == 0 {
                    return Err(ParseError("connection closed mid-body".into()));
                }
                body.extend_from_slice(&tmp[..n]);
            }
            body.truncate(len);
            body
        }
        None => Vec::new(),
    };

    Ok(Request {
        method,
        target,
        version,
        headers,
        body,
    })
}
