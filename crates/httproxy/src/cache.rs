//! Bounded, TTL-expiring LRU cache for proxied GET responses, keyed by the
//! request's absolute target. Shared across connections behind a single
//! mutex; critical sections touch only the in-memory map and are short.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<u8>,
    pub body: Vec<u8>,
    pub timestamp: Instant,
    pub url: String,
}

impl CachedResponse {
    fn size(&self) -> usize {
        self.headers.len() + self.body.len()
    }
}

struct Inner {
    entries: IndexMap<String, CachedResponse>,
    current_size: usize,
}

#[derive(Clone)]
pub struct Cache {
    inner: Arc<Mutex<Inner>>,
    max_size: usize,
    ttl: Duration,
}

impl Cache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: IndexMap::new(),
                current_size: 0,
            })),
            max_size,
            ttl,
        }
    }

    /// `None` if absent or expired (an expired entry is evicted on this
    /// touch). Otherwise marks the entry most-recently-used.
    pub fn get(&self, url: &str) -> Option<CachedResponse> {
        let mut inner = self.inner.lock().unwrap();

        let idx = inner.entries.get_index_of(url)?;
        if inner.entries[idx].timestamp.elapsed() > self.ttl {
            let (_, evicted) = inner.entries.shift_remove_index(idx).unwrap();
            inner.current_size -= evicted.size();
            return None;
        }

        let last = inner.entries.len() - 1;
        inner.entries.move_index(idx, last);
        Some(inner.entries[last].clone())
    }

    /// No-op if `size > max_size`. Otherwise evicts any existing entry for
    /// `url`, then evicts least-recently-used entries until there is room,
    /// then inserts as most-recently-used.
    pub fn put(&self, url: &str, status: u16, headers: Vec<u8>, body: Vec<u8>) {
        let size = headers.len() + body.len();
        if size > self.max_size {
            return;
        }

        let mut inner = self.inner.lock().unwrap();

        if let Some(idx) = inner.entries.get_index_of(url) {
            let (_, evicted) = inner.entries.shift_remove_index(idx).unwrap();
            inner.current_size -= evicted.size();
        }

        while inner.current_size + size > self.max_size && !inner.entries.is_empty() {
            let (_, evicted) = inner.entries.shift_remove_index(0).unwrap();
            inner.current_size -= evicted.size();
        }

        inner.entries.insert(
            url.to_string(),
            CachedResponse {
                status,
                headers,
                body,
                timestamp: Instant::now(),
                url: url.to_string(),
            },
        );
        inner.current_size += size;
    }

    #[cfg(test)]
    fn current_size(&self) -> usize {
        self.inner.lock().unwrap().current_size
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(headers: usize, body: usize) -> (Vec<u8>, Vec<u8>) {
        (vec![b'h'; headers], vec![b'b'; body])
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = Cache::new(1024, Duration::from_secs(60));
        let (h, b) = entry(10, 20);
        cache.put("http://x/a", 200, h.clone(), b.clone());

        let got = cache.get("http://x/a").unwrap();
        assert_eq!(got.status, 200);
        assert_eq!(got.headers, h);
        assert_eq!(got.body, b);
        assert_eq!(cache.current_size(), 30);
    }

    #[test]
    fn oversized_put_is_noop() {
        let cache = Cache::new(10, Duration::from_secs(60));
        let (h, b) = entry(5, 10);
        cache.put("http://x/a", 200, h, b);
        assert!(cache.get("http://x/a").is_none());
        assert_eq!(cache.current_size(), 0);
    }

    #[test]
    fn exact_size_bound_invariant_under_eviction() {
        let cache = Cache::new(30, Duration::from_secs(60));
        let (h1, b1) = entry(5, 5); // 10
        let (h2, b2) = entry(5, 10); // 15
        let (h3, b3) = entry(5, 15); // 20
        cache.put("a", 200, h1, b1);
        cache.put("b", 200, h2, b2);
        // total now 25, fits in 30
        assert_eq!(cache.current_size(), 25);
        // inserting c (20) forces eviction of a (lru) then b, since 20+25>30
        cache.put("c", 200, h3, b3);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.current_size(), 20);
    }

    #[test]
    fn put_of_size_equal_to_max_evicts_everything_else() {
        let cache = Cache::new(20, Duration::from_secs(60));
        let (h1, b1) = entry(5, 5);
        cache.put("a", 200, h1, b1);
        let (h2, b2) = entry(10, 10); // exactly max_size
        cache.put("b", 200, h2, b2);

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert_eq!(cache.current_size(), 20);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entry_is_absent_and_evicted() {
        let cache = Cache::new(1024, Duration::from_millis(10));
        let (h, b) = entry(4, 4);
        cache.put("a", 200, h, b);
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.current_size(), 0);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn get_marks_most_recently_used() {
        let cache = Cache::new(30, Duration::from_secs(60));
        let (h1, b1) = entry(5, 5); // 10
        let (h2, b2) = entry(5, 5); // 10
        cache.put("a", 200, h1, b1);
        cache.put("b", 200, h2, b2);
        // touch a, making b the LRU
        cache.get("a");

        let (h3, b3) = entry(5, 10); // 15, forces one eviction
        cache.put("c", 200, h3, b3);

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }
}
