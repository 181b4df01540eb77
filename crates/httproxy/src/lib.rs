use std::time::Duration;

use anyhow::Result;

pub mod auth;
pub mod cache;
pub mod cmd;
pub mod config;
pub mod connection;
pub mod filter;
pub mod init;
pub mod protocol;
pub mod relay;
pub mod start;
pub mod tracker;

use auth::Authenticator;
use cache::Cache;
use config::{Blacklist, Credentials};
use filter::Filter;
use tracker::ConnectionTracker;

const CACHE_MAX_SIZE_BYTES: usize = 50 * 1024 * 1024;
const CACHE_TTL: Duration = Duration::from_secs(300);

pub async fn run() -> Result<()> {
    let shutdown = init::shutdown::init()?;
    let args = init::cmd::init()?;

    let bind_addr = args.bind_addr()?;

    let blacklist = match &args.blacklist {
        Some(path) => Blacklist::load(path)?,
        None => Blacklist::empty(),
    };
    let filter = Filter::new(blacklist);

    let credentials = match &args.auth_file {
        Some(path) => Credentials::load(path)?,
        None => Credentials::empty(),
    };
    let auth = Authenticator::new(credentials);
    if auth.is_enabled() {
        log::info!("proxy authentication enabled");
    }

    let cache = if args.cache {
        log::info!("response cache enabled (max {CACHE_MAX_SIZE_BYTES} bytes, ttl {CACHE_TTL:?})");
        Some(Cache::new(CACHE_MAX_SIZE_BYTES, CACHE_TTL))
    } else {
        None
    };

    let tracker = ConnectionTracker::new();
    let timeout = Duration::from_secs(args.timeout);

    start::handle_local_target(
        bind_addr,
        &shutdown,
        filter,
        auth,
        cache,
        tracker,
        timeout,
        args.max_connections,
    )
    .await?;

    log::info!("Shutdown complete.");
    Ok(())
}
