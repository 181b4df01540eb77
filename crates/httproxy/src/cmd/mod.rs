use std::{net::SocketAddr, str::FromStr};

use clap::Parser;

/// Command-line surface for the forward proxy.
///
/// Flags mirror the external interface of the proxy: bind address, policy
/// files, cache toggle, log directory, per-operation timeout and the
/// concurrent-connection cap.
#[derive(Debug, Parser)]
#[command(name = "httproxy", about = "Forward HTTP/HTTPS proxy")]
pub struct Args {
    /// Listen host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Listen port.
    #[arg(long, default_value_t = 8888)]
    pub port: u16,

    /// Path to the blacklist rule file.
    #[arg(long)]
    pub blacklist: Option<String>,

    /// Path to the `user:password` credentials file. Enables auth when set
    /// and the file yields at least one user.
    #[arg(long = "auth-file")]
    pub auth_file: Option<String>,

    /// Enable the in-memory LRU response cache for GET requests.
    #[arg(long, default_value_t = false)]
    pub cache: bool,

    /// Directory for the access/error/debug log files.
    #[arg(long = "log-dir", default_value = "logs")]
    pub log_dir: String,

    /// Seconds bounding request-head read, upstream dial, and each upstream
    /// read in the HTTP relay.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Maximum number of concurrently accepted client connections.
    #[arg(long = "max-connections", default_value_t = 10_000)]
    pub max_connections: usize,

    /// Console log level: off/error/warn/info/debug/trace, or a count of
    /// `v` characters (`-v`, `-vv`, `-vvv`).
    #[arg(short = 'v', long = "log-level", default_value = "info")]
    pub log_level: LogLevel,

    /// Colorize console log output.
    #[arg(long, default_value_t = false)]
    pub colored: bool,
}

impl Args {
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        SocketAddr::from_str(&format!("{}:{}", self.host, self.port))
            .map_err(|e| anyhow::anyhow!("invalid --host/--port: {e}"))
    }
}

#[derive(Debug, Clone)]
pub struct LogLevel(pub String);

impl FromStr for LogLevel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const VERBOSE_PAT: char = 'v';

        let level_str = match s.trim().to_ascii_lowercase().as_str() {
            "off" => "off",
            "err" | "error" => "error",
            "warn" | "warning" => "warn",
            "info" => "info",
            "debug" => "debug",
            "trace" => "trace",
            rest => {
                let count = rest
                    .chars()
                    .filter(|c| c.eq_ignore_ascii_case(&VERBOSE_PAT))
                    .count();
                match count {
                    0 => "off",
                    1 => "info",
                    2 => "debug",
                    _ => "trace",
                }
            }
        };

        Ok(LogLevel(level_str.to_string()))
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
