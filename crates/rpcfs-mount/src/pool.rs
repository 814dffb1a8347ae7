//! Bounded blocking pool of RPC connections.
//!
//! The pool is populated once at startup and then cycles the same items
//! between idle storage and in-flight operations. Borrowers block while the
//! pool is empty; producers block while it is full.
//!
//! # Closing
//!
//! [`ConnectionPool::close`] is irreversible and wakes every blocked caller.
//! A closed pool still hands out the items it holds, so in-flight work can
//! drain, but never blocks: once it is empty every acquire returns
//! [`PoolError::Closed`] immediately.
//!
//! # Example
//!
//! ```
//! use rpcfs_mount::{AcquirePolicy, ConnectionPool};
//!
//! let pool = ConnectionPool::new(2);
//! pool.release("a");
//! pool.release("b");
//!
//! {
//!     let conn = pool.checkout(AcquirePolicy::Block).unwrap();
//!     assert_eq!(pool.len(), 1);
//!     assert!(*conn == "a" || *conn == "b");
//! } // returned here
//!
//! assert_eq!(pool.len(), 2);
//! ```

use crate::stats::ConnectionStats;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{trace, warn};

/// Why no item was handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool is closed and holds no items.
    #[error("connection pool is closed")]
    Closed,

    /// A non-blocking acquire found the pool empty.
    #[error("no connection available")]
    Empty,

    /// A bounded acquire gave up waiting.
    #[error("timed out waiting for a connection")]
    TimedOut,
}

/// How long a borrower is willing to wait for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquirePolicy {
    /// Wait until an item is released or the pool closes.
    #[default]
    Block,
    /// Wait at most this long.
    Timeout(Duration),
    /// Never wait.
    NonBlocking,
}

impl AcquirePolicy {
    /// Maps an optional configured timeout to a policy: absent blocks,
    /// zero never waits.
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            None => AcquirePolicy::Block,
            Some(d) if d.is_zero() => AcquirePolicy::NonBlocking,
            Some(d) => AcquirePolicy::Timeout(d),
        }
    }
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Thread-safe bounded pool.
///
/// `limit == 0` means unbounded: `release` never blocks.
pub struct ConnectionPool<T> {
    state: Mutex<State<T>>,
    /// Signalled when an item is inserted or the pool closes.
    available: Condvar,
    /// Signalled when an item is removed or the pool closes.
    space: Condvar,
    limit: usize,
    stats: Option<Arc<ConnectionStats>>,
}

impl<T> fmt::Debug for ConnectionPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionPool")
            .field("idle", &state.items.len())
            .field("limit", &self.limit)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl<T> ConnectionPool<T> {
    /// Creates an empty pool holding at most `limit` items (0 = unbounded).
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(limit),
                closed: false,
            }),
            available: Condvar::new(),
            space: Condvar::new(),
            limit,
            stats: None,
        }
    }

    /// Creates an empty pool that records waits and timeouts into `stats`.
    pub fn with_stats(limit: usize, stats: Arc<ConnectionStats>) -> Self {
        Self {
            stats: Some(stats),
            ..Self::new(limit)
        }
    }

    /// Creates a pool already holding `items`, bounded by their count.
    pub fn filled(items: impl IntoIterator<Item = T>) -> Self {
        let items: VecDeque<T> = items.into_iter().collect();
        let pool = Self::new(items.len());
        pool.state.lock().items = items;
        pool
    }

    /// Blocks until an item is available or the pool is closed and empty.
    pub fn acquire(&self) -> Result<T, PoolError> {
        let mut state = self.state.lock();
        let mut waited = false;
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.space.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(PoolError::Closed);
            }
            if !waited {
                waited = true;
                self.record(ConnectionStats::record_pool_wait);
            }
            self.available.wait(&mut state);
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<T, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let mut waited = false;
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.space.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(PoolError::Closed);
            }
            if !waited {
                waited = true;
                self.record(ConnectionStats::record_pool_wait);
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                // An item may have arrived together with the deadline.
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.space.notify_one();
                    return Ok(item);
                }
                if state.closed {
                    return Err(PoolError::Closed);
                }
                self.record(ConnectionStats::record_pool_timeout);
                return Err(PoolError::TimedOut);
            }
        }
    }

    /// Takes an item without waiting.
    pub fn try_acquire(&self) -> Result<T, PoolError> {
        let mut state = self.state.lock();
        match state.items.pop_front() {
            Some(item) => {
                drop(state);
                self.space.notify_one();
                Ok(item)
            }
            None if state.closed => Err(PoolError::Closed),
            None => Err(PoolError::Empty),
        }
    }

    /// Acquires according to `policy`.
    pub fn acquire_with(&self, policy: AcquirePolicy) -> Result<T, PoolError> {
        match policy {
            AcquirePolicy::Block => self.acquire(),
            AcquirePolicy::Timeout(timeout) => self.acquire_timeout(timeout),
            AcquirePolicy::NonBlocking => self.try_acquire(),
        }
    }

    /// Acquires an item wrapped in a guard that releases it on drop.
    pub fn checkout(&self, policy: AcquirePolicy) -> Result<PoolGuard<'_, T>, PoolError> {
        let item = self.acquire_with(policy)?;
        Ok(PoolGuard {
            pool: self,
            item: Some(item),
        })
    }

    /// Returns an item to the pool.
    ///
    /// Blocks while a bounded pool is full. If the pool is closed and full
    /// the item is dropped.
    pub fn release(&self, item: T) {
        let mut state = self.state.lock();
        loop {
            if !self.is_full(&state) {
                state.items.push_back(item);
                drop(state);
                self.available.notify_one();
                return;
            }
            if state.closed {
                warn!(limit = self.limit, "Dropping item released into a full closed pool");
                return;
            }
            trace!(limit = self.limit, "Release blocked on full pool");
            self.space.wait(&mut state);
        }
    }

    /// Returns a checked-out item unless the pool has been closed, in which
    /// case the item is handed back for the caller to dispose of.
    ///
    /// Blocks while a bounded pool is full.
    pub fn checkin(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(item);
            }
            if !self.is_full(&state) {
                state.items.push_back(item);
                drop(state);
                self.available.notify_one();
                return Ok(());
            }
            self.space.wait(&mut state);
        }
    }

    /// Returns an item without waiting; hands it back if the pool is full.
    pub fn try_release(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if self.is_full(&state) {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Closes the pool and wakes every blocked caller. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.available.notify_all();
        self.space.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of idle items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Capacity limit (0 = unbounded).
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Removes and returns every idle item.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let items = state.items.drain(..).collect();
        drop(state);
        self.space.notify_all();
        items
    }

    fn is_full(&self, state: &State<T>) -> bool {
        self.limit != 0 && state.items.len() >= self.limit
    }

    fn record(&self, f: fn(&ConnectionStats)) {
        if let Some(stats) = &self.stats {
            f(stats);
        }
    }
}

/// An item checked out of a [`ConnectionPool`]. Released on drop.
pub struct PoolGuard<'a, T> {
    pool: &'a ConnectionPool<T>,
    item: Option<T>,
}

impl<T> PoolGuard<'_, T> {
    /// Removes the item from pool management. The pool shrinks by one.
    pub fn detach(mut self) -> Option<T> {
        self.item.take()
    }
}

impl<T> Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `item` is only taken by `detach`, which consumes the guard.
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for PoolGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PoolGuard").field(&self.item).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    #[test]
    fn test_acquire_release_cycle() {
        let pool = ConnectionPool::filled([1, 2, 3]);
        assert_eq!(pool.limit(), 3);
        assert_eq!(pool.len(), 3);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.len(), 1);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_try_acquire_empty() {
        let pool: ConnectionPool<u8> = ConnectionPool::new(1);
        assert_eq!(pool.try_acquire(), Err(PoolError::Empty));
        pool.release(7);
        assert_eq!(pool.try_acquire(), Ok(7));
    }

    #[test]
    fn test_acquire_timeout_expires() {
        let pool: ConnectionPool<u8> = ConnectionPool::new(1);
        let start = Instant::now();
        assert_eq!(pool.acquire_timeout(SHORT), Err(PoolError::TimedOut));
        assert!(start.elapsed() >= SHORT);
    }

    #[test]
    fn test_acquire_timeout_gets_released_item() {
        let pool = Arc::new(ConnectionPool::new(1));
        let releaser = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                thread::sleep(SHORT);
                pool.release(5u8);
            })
        };
        assert_eq!(pool.acquire_timeout(LONG), Ok(5));
        releaser.join().unwrap();
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let pool = Arc::new(ConnectionPool::filled(["only"]));
        let held = pool.acquire().unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let item = pool.acquire().unwrap();
                tx.send(item).unwrap();
            })
        };

        assert!(rx.recv_timeout(SHORT).is_err(), "second acquire must block");
        pool.release(held);
        assert_eq!(rx.recv_timeout(LONG).unwrap(), "only");
        waiter.join().unwrap();
    }

    #[test]
    fn test_close_wakes_all_waiters() {
        let pool: Arc<ConnectionPool<u8>> = Arc::new(ConnectionPool::new(4));
        let (tx, rx) = mpsc::channel();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let tx = tx.clone();
                thread::spawn(move || tx.send(pool.acquire()).unwrap())
            })
            .collect();

        thread::sleep(SHORT);
        pool.close();
        for _ in 0..4 {
            assert_eq!(rx.recv_timeout(LONG).unwrap(), Err(PoolError::Closed));
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }

        // Later acquires never block.
        let start = Instant::now();
        assert_eq!(pool.acquire(), Err(PoolError::Closed));
        assert_eq!(pool.acquire_timeout(LONG), Err(PoolError::Closed));
        assert_eq!(pool.try_acquire(), Err(PoolError::Closed));
        assert!(start.elapsed() < LONG);
    }

    #[test]
    fn test_closed_pool_still_drains_items() {
        let pool = ConnectionPool::filled([1, 2]);
        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.acquire(), Ok(1));
        assert_eq!(pool.try_acquire(), Ok(2));
        assert_eq!(pool.acquire(), Err(PoolError::Closed));
    }

    #[test]
    fn test_release_blocks_when_full() {
        let pool = Arc::new(ConnectionPool::filled([1]));
        let (tx, rx) = mpsc::channel();
        let producer = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                pool.release(2);
                tx.send(()).unwrap();
            })
        };
        assert!(rx.recv_timeout(SHORT).is_err(), "release into full pool must block");
        assert_eq!(pool.acquire(), Ok(1));
        rx.recv_timeout(LONG).unwrap();
        producer.join().unwrap();
        assert_eq!(pool.try_acquire(), Ok(2));
    }

    #[test]
    fn test_close_wakes_blocked_release() {
        let pool = Arc::new(ConnectionPool::filled([1]));
        let producer = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.release(2))
        };
        thread::sleep(SHORT);
        pool.close();
        producer.join().unwrap();
        // The extra item was dropped, not inserted.
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_checkin_refused_after_close() {
        let pool = ConnectionPool::new(2);
        assert_eq!(pool.checkin(1), Ok(()));
        pool.close();
        assert_eq!(pool.checkin(2), Err(2));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_close_wakes_blocked_checkin() {
        let pool = Arc::new(ConnectionPool::filled([1]));
        let producer = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.checkin(2))
        };
        thread::sleep(SHORT);
        pool.close();
        assert_eq!(producer.join().unwrap(), Err(2));
    }

    #[test]
    fn test_try_release_full() {
        let pool = ConnectionPool::filled([1]);
        assert_eq!(pool.try_release(9), Err(9));
        let _ = pool.acquire();
        assert_eq!(pool.try_release(9), Ok(()));
    }

    #[test]
    fn test_unbounded_pool_never_blocks_release() {
        let pool = ConnectionPool::new(0);
        for i in 0..100 {
            pool.release(i);
        }
        assert_eq!(pool.len(), 100);
    }

    #[test]
    fn test_guard_returns_item_on_drop() {
        let pool = ConnectionPool::filled([String::from("conn")]);
        {
            let mut guard = pool.checkout(AcquirePolicy::Block).unwrap();
            guard.push_str("-used");
            assert!(pool.is_empty());
        }
        assert_eq!(pool.try_acquire().unwrap(), "conn-used");
    }

    #[test]
    fn test_guard_detach() {
        let pool = ConnectionPool::filled([1]);
        let guard = pool.checkout(AcquirePolicy::NonBlocking).unwrap();
        assert_eq!(guard.detach(), Some(1));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_checkout_nonblocking_empty() {
        let pool: ConnectionPool<u8> = ConnectionPool::new(1);
        assert_eq!(
            pool.checkout(AcquirePolicy::NonBlocking).unwrap_err(),
            PoolError::Empty
        );
        assert_eq!(
            pool.checkout(AcquirePolicy::Timeout(SHORT)).unwrap_err(),
            PoolError::TimedOut
        );
    }

    #[test]
    fn test_policy_from_timeout() {
        assert_eq!(AcquirePolicy::from_timeout(None), AcquirePolicy::Block);
        assert_eq!(
            AcquirePolicy::from_timeout(Some(Duration::ZERO)),
            AcquirePolicy::NonBlocking
        );
        assert_eq!(
            AcquirePolicy::from_timeout(Some(SHORT)),
            AcquirePolicy::Timeout(SHORT)
        );
    }

    #[test]
    fn test_stats_record_waits_and_timeouts() {
        let stats = Arc::new(ConnectionStats::new());
        let pool: ConnectionPool<u8> = ConnectionPool::with_stats(1, Arc::clone(&stats));
        let _ = pool.acquire_timeout(SHORT);
        let snap = stats.snapshot();
        assert_eq!(snap.pool_waits, 1);
        assert_eq!(snap.pool_timeouts, 1);
    }

    #[test]
    fn test_never_more_than_limit_checked_out() {
        const LIMIT: usize = 3;
        let pool = Arc::new(ConnectionPool::filled(0..LIMIT));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..12)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let guard = pool.checkout(AcquirePolicy::Block).unwrap();
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        drop(guard);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= LIMIT);
        assert_eq!(pool.len(), LIMIT);
    }
}
