use std::path::Path;

use anyhow::Result;
use fern::colors::{Color, ColoredLevelConfig};

/// Named log targets the core calls into at well-defined points (parse
/// error, auth fail, blocked, allowed, cache hit/miss-stored, server
/// start/stop). Each target is routed to its own file under `--log-dir`.
pub const ACCESS_TARGET: &str = "httproxy::access";
pub const ERROR_TARGET: &str = "httproxy::error";
pub const DEBUG_TARGET: &str = "httproxy::debug";

pub fn init(log_level: &str, colored: bool, log_dir: &str) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let colors = ColoredLevelConfig::new()
        .trace(Color::Magenta)
        .debug(Color::Blue)
        .info(Color::Green)
        .warn(Color::Yellow)
        .error(Color::Red);

    let console = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Utc::now().to_rfc3339(),
                if colored {
                    colors.color(record.level()).to_string()
                } else {
                    record.level().to_string()
                },
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::from_str_or_default(log_level))
        .chain(std::io::stdout());

    let access = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} | {:<8} | {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                message
            ))
        })
        .filter(|m| m.target() == ACCESS_TARGET)
        .chain(fern::log_file(Path::new(log_dir).join("access.log"))?);

    let error = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} | {:<8} | {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Error)
        .filter(|m| m.target() == ERROR_TARGET)
        .chain(fern::log_file(Path::new(log_dir).join("error.log"))?);

    let debug = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} | {:<8} | {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Debug)
        .filter(|m| m.target() == DEBUG_TARGET)
        .chain(fern::log_file(Path::new(log_dir).join("debug.log"))?);

    fern::Dispatch::new()
        .chain(console)
        .chain(access)
        .chain(error)
        .chain(debug)
        .apply()?;

    Ok(())
}

trait LevelFilterExt {
    fn from_str_or_default(s: &str) -> log::LevelFilter;
}

impl LevelFilterExt for log::LevelFilter {
    fn from_str_or_default(s: &str) -> log::LevelFilter {
        s.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// Access-log line for a request the proxy allowed through, optionally
/// served from cache.
#[allow(clippy::too_many_arguments)]
pub fn log_request_allowed(
    client_addr: std::net::SocketAddr,
    target_host: &str,
    target_port: u16,
    request_line: &str,
    from_cache: bool,
    bytes_sent: usize,
) {
    let marker = if from_cache { " [CACHE]" } else { "" };
    log::info!(
        target: ACCESS_TARGET,
        "ALLOWED | {client_addr} -> {target_host}:{target_port} | {request_line}{marker} | sent={bytes_sent}",
    );
}

/// Access-log line for a request the proxy refused (auth failure or
/// blacklist hit).
pub fn log_request_blocked(client_addr: std::net::SocketAddr, target_host: &str, reason: &str) {
    log::info!(
        target: ACCESS_TARGET,
        "BLOCKED | {client_addr} -> {target_host} | reason={reason}",
    );
}

/// Error-log line for dial failures, mid-relay I/O errors, and promoted
/// parse failures. Never surfaced to the client.
pub fn log_error(kind: &str, client_addr: std::net::SocketAddr, details: &str) {
    log::error!(target: ERROR_TARGET, "{kind} | client={client_addr} | {details}");
}

/// Debug-log line for cache hit/miss-stored events.
pub fn log_debug(event: &str, url: &str) {
    log::debug!(target: DEBUG_TARGET, "{event} | url={url}");
}

pub fn log_server_start(addr: std::net::SocketAddr) {
    log::info!(target: ACCESS_TARGET, "SERVER_START | listening on {addr}");
}

pub fn log_server_stop() {
    log::info!(target: ACCESS_TARGET, "SERVER_STOP | server shutting down");
}
