//! Accept loop: bind, enforce `--max-connections`, hand each accepted
//! socket to [`crate::connection::handle_client`] on its own task, and wait
//! for in-flight work to drain on shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mea::{condvar::Condvar, mutex::Mutex};
use smol::{
    future,
    net::{TcpListener, TcpStream},
};

use crate::auth::Authenticator;
use crate::cache::Cache;
use crate::connection;
use crate::filter::Filter;
use crate::init::logger;
use crate::init::shutdown::GracefulShutdown;
use crate::tracker::ConnectionTracker;

struct ConnSemaphoreInner {
    available: AtomicUsize,
    gate: Mutex<()>,
    cv: Condvar,
}

/// A counting semaphore built from the same primitives as
/// [`GracefulShutdown`]: an atomic for the count itself, a condvar only to
/// park/wake waiters.
#[derive(Clone)]
struct ConnSemaphore {
    inner: Arc<ConnSemaphoreInner>,
}

struct ConnPermit {
    inner: Arc<ConnSemaphoreInner>,
}

impl Drop for ConnPermit {
    fn drop(&mut self) {
        self.inner.available.fetch_add(1, Ordering::AcqRel);
        self.inner.cv.notify_all();
    }
}

impl ConnSemaphore {
    fn new(permits: usize) -> Self {
        Self {
            inner: Arc::new(ConnSemaphoreInner {
                available: AtomicUsize::new(permits),
                gate: Mutex::new(()),
                cv: Condvar::new(),
            }),
        }
    }

    async fn acquire(&self) -> ConnPermit {
        loop {
            let cur = self.inner.available.load(Ordering::Acquire);
            if cur > 0
                && self
                    .inner
                    .available
                    .compare_exchange(cur, cur - 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return ConnPermit {
                    inner: self.inner.clone(),
                };
            }

            let mut guard = self.inner.gate.lock().await;
            if self.inner.available.load(Ordering::Acquire) == 0 {
                guard = self.inner.cv.wait(guard).await;
            }
            drop(guard);
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_local_target(
    bind_addr: SocketAddr,
    shutdown: &GracefulShutdown,
    filter: Filter,
    auth: Authenticator,
    cache: Option<Cache>,
    tracker: ConnectionTracker,
    timeout: Duration,
    max_connections: usize,
) -> Result<()> {
    let tcp_listener = TcpListener::bind(bind_addr).await?;
    logger::log_server_start(bind_addr);

    let semaphore = ConnSemaphore::new(max_connections);

    loop {
        let Some((stream, peer)) = accept_or_shutdown(&tcp_listener, shutdown).await? else {
            break;
        };

        let permit_fut = semaphore.acquire();
        let shutdown_for_wait = shutdown.clone();
        let permit = match future::or(
            async { Some(permit_fut.await) },
            async {
                shutdown_for_wait.wait_shutting_down().await;
                None
            },
        )
        .await
        {
            Some(permit) => permit,
            None => break,
        };

        let shutdown = shutdown.clone();
        let filter = filter.clone();
        let auth = auth.clone();
        let cache = cache.clone();
        let tracker = tracker.clone();

        smol::spawn(async move {
            let _inflight = shutdown.inflight_guard();
            let _permit = permit;
            connection::handle_client(stream, peer, filter, auth, cache, tracker, timeout).await;
        })
        .detach();
    }

    shutdown.wait_inflight_zero().await;
    logger::log_server_stop();
    Ok(())
}

async fn accept_or_shutdown(
    listener: &TcpListener,
    shutdown: &GracefulShutdown,
) -> std::io::Result<Option<(TcpStream, SocketAddr)>> {
    let accept_fut = async { listener.accept().await.map(Some) };
    let shutdown_fut = async {
        shutdown.wait_shutting_down().await;
        Ok(None)
    };
    future::or(accept_fut, shutdown_fut).await
}
