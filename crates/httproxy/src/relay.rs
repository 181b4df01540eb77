//! Upstream dial, streaming HTTP relay with inline cache capture, and the
//! CONNECT byte-tunnel. Nothing here buffers a whole response in memory
//! unless that response is actually being captured for the cache, and even
//! then only bounded by [`Cache::put`]'s own size check.

use std::time::Duration;

use smol::io::{AsyncReadExt, AsyncWriteExt};
use smol::net::TcpStream;

use crate::cache::Cache;

pub struct RelayOutcome {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

async fn read_with_timeout(
    stream: &mut TcpStream,
    buf: &mut [u8],
    timeout: Duration,
) -> anyhow::Result<usize> {
    let read_fut = async { stream.read(buf).await.map_err(anyhow::Error::from) };
    let timeout_fut = async {
        smol::Timer::after(timeout).await;
        Err(anyhow::anyhow!("upstream read timed out"))
    };
    smol::future::or(read_fut, timeout_fut).await
}

/// Dial `host:port`, bounded by `timeout`.
pub async fn dial_upstream(host: &str, port: u16, timeout: Duration) -> anyhow::Result<TcpStream> {
    let authority = format!("{host}:{port}");
    let connect_fut = async {
        TcpStream::connect(authority.as_str())
            .await
            .map_err(anyhow::Error::from)
    };
    let timeout_fut = async {
        smol::Timer::after(timeout).await;
        Err(anyhow::anyhow!("connect to {authority} timed out"))
    };
    smol::future::or(connect_fut, timeout_fut).await
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parse a response status line and headers. Returns the numeric status
/// code parsed from the line itself, never inferred from a text search for
/// `"200 OK"` anywhere in the response.
fn parse_status_and_headers(head: &[u8]) -> (Option<u16>, Vec<(String, String)>) {
    let mut lines = head
        .split(|&b| b == b'\n')
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l));

    let status_line = String::from_utf8_lossy(lines.next().unwrap_or(b""));
    let mut tokens = status_line.split_whitespace();
    let _version = tokens.next();
    let status = tokens.next().and_then(|s| s.parse::<u16>().ok());

    let mut headers = Vec::new();
    for line in lines {
        let line = String::from_utf8_lossy(line);
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    (status, headers)
}

fn header_lookup<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Send `request_bytes` upstream, then stream the response back to `client`
/// chunk by chunk, never holding the full response in memory. When `cache`
/// and `cache_key` are given and the method is `GET`, a copy of the
/// response is captured alongside the stream-through write and handed to
/// the cache once fully received, but only if the response is a `200`
/// framed by `Content-Length` or by `Connection: close`; a response still
/// mid chunked-transfer is never cached, even partially.
pub async fn relay_http(
    upstream: &mut TcpStream,
    client: &mut TcpStream,
    request_bytes: &[u8],
    method: &str,
    cache: Option<&Cache>,
    cache_key: Option<&str>,
    timeout: Duration,
) -> anyhow::Result<RelayOutcome> {
    upstream.write_all(request_bytes).await?;
    upstream.flush().await?;

    let should_capture = cache.is_some() && cache_key.is_some() && method.eq_ignore_ascii_case("GET");

    let mut tmp = [0u8; 4096];
    let mut bytes_sent: u64 = 0;
    let mut bytes_received: u64 = 0;

    let mut head_buf: Vec<u8> = Vec::new();
    let mut header_end: Option<usize> = None;
    let mut status: Option<u16> = None;
    let mut cacheable = false;
    let mut content_length: Option<usize> = None;
    let mut captured_headers: Vec<u8> = Vec::new();
    let mut captured_body: Vec<u8> = Vec::new();

    loop {
        let n = read_with_timeout(upstream, &mut tmp, timeout).await?;
        if n == 0 {
            break;
        }
        bytes_received += n as u64;

        client.write_all(&tmp[..n]).await?;
        bytes_sent += n as u64;

        if !should_capture {
            continue;
        }

        if header_end.is_none() {
            head_buf.extend_from_slice(&tmp[..n]);
            if let Some(pos) = find_subslice(&head_buf, b"\r\n\r\n") {
                let (parsed_status, headers) = parse_status_and_headers(&head_buf[..pos]);
                status = parsed_status;

                let chunked = header_lookup(&headers, "transfer-encoding")
                    .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
                let close = header_lookup(&headers, "connection")
                    .is_some_and(|v| v.eq_ignore_ascii_case("close"));
                content_length = header_lookup(&headers, "content-length")
                    .and_then(|v| v.trim().parse::<usize>().ok());

                cacheable = status == Some(200) && !chunked && (content_length.is_some() || close);

                if cacheable {
                    captured_headers = head_buf[..pos + 4].to_vec();
                    captured_body.extend_from_slice(&head_buf[pos + 4..]);
                }
                header_end = Some(pos);
            }
        } else if cacheable {
            captured_body.extend_from_slice(&tmp[..n]);
        }
    }

    if should_capture && cacheable {
        if let Some(len) = content_length {
            captured_body.truncate(len);
        }
        if let (Some(cache), Some(key)) = (cache, cache_key) {
            cache.put(key, status.unwrap_or(200), captured_headers, captured_body);
        }
    }

    Ok(RelayOutcome {
        bytes_sent,
        bytes_received,
    })
}

/// Bidirectional byte copy for a CONNECT tunnel. Returns
/// `(client_to_upstream, upstream_to_client)` byte counts once both
/// directions have reached EOF.
pub async fn tunnel(client: TcpStream, upstream: TcpStream) -> anyhow::Result<(u64, u64)> {
    let mut client_read = client.clone();
    let mut client_write = client;
    let mut upstream_read = upstream.clone();
    let mut upstream_write = upstream;

    let c2u =
        smol::spawn(async move { smol::io::copy(&mut client_read, &mut upstream_write).await });
    let u2c =
        smol::spawn(async move { smol::io::copy(&mut upstream_read, &mut client_write).await });

    let sent = c2u.await?;
    let received = u2c.await?;
    Ok((sent, received))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_status_not_substring() {
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n";
        let (status, headers) = parse_status_and_headers(head);
        assert_eq!(status, Some(200));
        assert_eq!(header_lookup(&headers, "content-length"), Some("5"));
    }

    #[test]
    fn a_404_body_mentioning_200_is_not_mistaken_for_success() {
        let head = b"HTTP/1.1 404 Not Found\r\nContent-Length: 40\r\n";
        let (status, _) = parse_status_and_headers(head);
        assert_eq!(status, Some(404));
    }

    #[test]
    fn missing_status_token_yields_none() {
        let head = b"garbage\r\n";
        let (status, _) = parse_status_and_headers(head);
        assert_eq!(status, None);
    }
}
