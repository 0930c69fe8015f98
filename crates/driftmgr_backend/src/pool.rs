//! A small connection pool for remote backends (spec §4.1 "Connection
//! pool"): bounded `max_open`/`max_idle` clients, idle reaping past
//! `idle_timeout`, and reported statistics.
//!
//! Modeled on the lifecycle a `papyrus_storage` environment handle goes
//! through (bounded concurrent handles, explicit teardown), generalized
//! here to an arbitrary pooled client type `T`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Pool sizing configuration, named to match spec §6's backend
/// configuration fields.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_open: usize,
    pub max_idle: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_open: 10, max_idle: 5, idle_timeout: Duration::from_secs(300) }
    }
}

/// Point-in-time pool statistics, reported per spec §4.1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
}

struct IdleEntry<T> {
    client: T,
    idle_since: Instant,
}

/// A bounded pool of reusable client handles of type `T`.
///
/// Callers [`ConnectionPool::acquire`] a client (reusing an idle one when
/// available, constructing one with `factory` otherwise, up to
/// `max_open`), use it, and [`ConnectionPool::release`] it back. Idle
/// clients past `idle_timeout` are dropped on the next
/// [`ConnectionPool::reap_idle`] sweep.
pub struct ConnectionPool<T> {
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleEntry<T>>>,
    open_count: Mutex<usize>,
}

impl<T> ConnectionPool<T> {
    pub fn new(config: PoolConfig) -> Self {
        Self { config, idle: Mutex::new(VecDeque::new()), open_count: Mutex::new(0) }
    }

    /// Returns an idle client if one is available, otherwise calls
    /// `factory` to build a new one, provided `max_open` has not been
    /// reached. Returns `None` when the pool is saturated.
    pub fn acquire<F: FnOnce() -> T>(&self, factory: F) -> Option<T> {
        if let Some(entry) = self.idle.lock().expect("pool mutex poisoned").pop_front() {
            return Some(entry.client);
        }
        let mut open = self.open_count.lock().expect("pool mutex poisoned");
        if *open >= self.config.max_open {
            return None;
        }
        *open += 1;
        Some(factory())
    }

    /// Returns `client` to the idle set if there is room under `max_idle`;
    /// otherwise the client is dropped and the open count decremented.
    pub fn release(&self, client: T) {
        let mut idle = self.idle.lock().expect("pool mutex poisoned");
        if idle.len() < self.config.max_idle {
            idle.push_back(IdleEntry { client, idle_since: Instant::now() });
        } else {
            drop(client);
            *self.open_count.lock().expect("pool mutex poisoned") -= 1;
        }
    }

    /// Drops idle clients that have been sitting longer than
    /// `idle_timeout`, decrementing the open count for each.
    pub fn reap_idle(&self) {
        let mut idle = self.idle.lock().expect("pool mutex poisoned");
        let timeout = self.config.idle_timeout;
        let before = idle.len();
        idle.retain(|entry| entry.idle_since.elapsed() < timeout);
        let reaped = before - idle.len();
        drop(idle);
        if reaped > 0 {
            *self.open_count.lock().expect("pool mutex poisoned") -= reaped;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().expect("pool mutex poisoned").len();
        let open = *self.open_count.lock().expect("pool mutex poisoned");
        PoolStats { open, idle, in_use: open.saturating_sub(idle) }
    }
}

#[cfg(test)]
mod pool_test {
    use super::*;

    #[test]
    fn acquire_reuses_released_client() {
        let pool: ConnectionPool<u32> = ConnectionPool::new(PoolConfig {
            max_open: 2,
            max_idle: 2,
            idle_timeout: Duration::from_secs(60),
        });
        let a = pool.acquire(|| 1).unwrap();
        assert_eq!(pool.stats().open, 1);
        pool.release(a);
        assert_eq!(pool.stats().idle, 1);
        let b = pool.acquire(|| 2).unwrap();
        assert_eq!(b, 1, "should reuse the released client rather than build a new one");
        assert_eq!(pool.stats().open, 1);
    }

    #[test]
    fn acquire_respects_max_open() {
        let pool: ConnectionPool<u32> =
            ConnectionPool::new(PoolConfig { max_open: 1, max_idle: 1, idle_timeout: Duration::from_secs(60) });
        let _a = pool.acquire(|| 1).unwrap();
        assert!(pool.acquire(|| 2).is_none());
    }

    #[test]
    fn reap_idle_drops_expired_clients() {
        let pool: ConnectionPool<u32> =
            ConnectionPool::new(PoolConfig { max_open: 2, max_idle: 2, idle_timeout: Duration::from_millis(1) });
        let a = pool.acquire(|| 1).unwrap();
        pool.release(a);
        std::thread::sleep(Duration::from_millis(5));
        pool.reap_idle();
        assert_eq!(pool.stats(), PoolStats { open: 0, idle: 0, in_use: 0 });
    }
}
