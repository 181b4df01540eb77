//! Per-client state machine: read the request head, authenticate, check
//! the blacklist, then dispatch to either the CONNECT tunnel or the HTTP
//! relay (optionally serving straight from cache).

use std::net::SocketAddr;
use std::time::Duration;

use smol::io::AsyncWriteExt;
use smol::net::TcpStream;

use crate::auth::Authenticator;
use crate::cache::Cache;
use crate::filter::Filter;
use crate::init::logger;
use crate::protocol::request::{self, Request};
use crate::protocol::response;
use crate::relay;
use crate::tracker::ConnectionTracker;

async fn read_request_with_timeout(
    stream: &mut TcpStream,
    timeout: Duration,
) -> Result<Request, String> {
    let parse_fut = async { request::read_request(stream).await.map_err(|e| e.0) };
    let timeout_fut = async {
        smol::Timer::after(timeout).await;
        Err("request head read timed out".to_string())
    };
    smol::future::or(parse_fut, timeout_fut).await
}

/// Drive one client connection end to end. Never propagates I/O errors up
/// past logging them; the accept loop only cares that this returns.
pub async fn handle_client(
    mut client: TcpStream,
    peer: SocketAddr,
    filter: Filter,
    auth: Authenticator,
    cache: Option<Cache>,
    tracker: ConnectionTracker,
    timeout: Duration,
) {
    let _guard = tracker.connection_guard();

    // A parse failure closes the connection without a response to the
    // client; it is logged to the error sink, never surfaced over the wire.
    let req = match read_request_with_timeout(&mut client, timeout).await {
        Ok(req) => req,
        Err(err) => {
            logger::log_error("PARSE_ERROR", peer, &err);
            return;
        }
    };

    if !auth.validate(req.header("Proxy-Authorization")) {
        logger::log_request_blocked(peer, &req.target, "authentication failed");
        tracker.record_blocked_request();
        let _ = client.write_all(response::PROXY_AUTH_REQUIRED).await;
        return;
    }

    let Some((host, port)) = req.hostname_port() else {
        logger::log_error("PARSE_ERROR", peer, "no Host header and no absolute target");
        return;
    };

    let (blocked, reason) = filter.is_blocked(&host);
    if blocked {
        logger::log_request_blocked(peer, &host, &reason);
        tracker.record_blocked_request();
        let _ = client.write_all(&response::format_error_response(403, None)).await;
        return;
    }

    if req.is_connect() {
        handle_connect(client, peer, &host, port, &tracker, timeout).await;
        return;
    }

    handle_http(client, peer, &req, &host, port, cache, &tracker, timeout).await;
}

async fn handle_connect(
    mut client: TcpStream,
    peer: SocketAddr,
    host: &str,
    port: u16,
    tracker: &ConnectionTracker,
    timeout: Duration,
) {
    let upstream = match relay::dial_upstream(host, port, timeout).await {
        Ok(s) => s,
        Err(err) => {
            logger::log_error("CONNECT_DIAL_FAILED", peer, &err.to_string());
            let _ = client.write_all(response::CONNECT_BAD_GATEWAY).await;
            return;
        }
    };

    if let Err(err) = client.write_all(response::CONNECTION_ESTABLISHED).await {
        logger::log_error("CONNECT_WRITE_FAILED", peer, &err.to_string());
        return;
    }

    match relay::tunnel(client, upstream).await {
        Ok((sent, received)) => {
            logger::log_request_allowed(peer, host, port, "CONNECT", false, sent as usize);
            tracker.record_allowed_request(sent, received);
        }
        Err(err) => {
            logger::log_error("TUNNEL_ERROR", peer, &err.to_string());
        }
    }
}

async fn handle_http(
    mut client: TcpStream,
    peer: SocketAddr,
    req: &Request,
    host: &str,
    port: u16,
    cache: Option<Cache>,
    tracker: &ConnectionTracker,
    timeout: Duration,
) {
    let key = req.target.as_str();
    let request_line = format!("{} {}", req.method, req.target);

    if req.method.eq_ignore_ascii_case("GET") {
        if let Some(cache) = &cache {
            if let Some(cached) = cache.get(key) {
                logger::log_debug("CACHE_HIT", key);
                let mut out = cached.headers.clone();
                out.extend_from_slice(&cached.body);
                if client.write_all(&out).await.is_ok() {
                    logger::log_request_allowed(peer, host, port, &request_line, true, out.len());
                    tracker.record_allowed_request(out.len() as u64, 0);
                }
                return;
            }
            logger::log_debug("CACHE_MISS", key);
        }
    }

    let mut upstream = match relay::dial_upstream(host, port, timeout).await {
        Ok(s) => s,
        Err(err) => {
            logger::log_error("DIAL_FAILED", peer, &err.to_string());
            let _ = client.write_all(&response::format_error_response(502, None)).await;
            return;
        }
    };

    let request_bytes = req.format_for_upstream();
    let cache_ref = cache.as_ref();
    let key_ref = if cache_ref.is_some() { Some(key) } else { None };

    match relay::relay_http(
        &mut upstream,
        &mut client,
        &request_bytes,
        &req.method,
        cache_ref,
        key_ref,
        timeout,
    )
    .await
    {
        Ok(outcome) => {
            logger::log_request_allowed(
                peer,
                host,
                port,
                &request_line,
                false,
                outcome.bytes_sent as usize,
            );
            tracker.record_allowed_request(outcome.bytes_sent, outcome.bytes_received);
        }
        Err(err) => {
            logger::log_error("RELAY_ERROR", peer, &err.to_string());
        }
    }
}
