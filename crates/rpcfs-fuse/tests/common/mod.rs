//! Test doubles for the dispatcher tests.
//!
//! [`MockService`] is an in-process [`FileService`] whose replies come from a
//! shared [`Script`]. The script records every call and tracks how many
//! clients are connected, so tests can observe pool and reconnect behaviour.

#![allow(dead_code)]

use parking_lot::Mutex;
use rpcfs_core::{Call, FileService, FileSystemResponse, RpcError, RpcResult};
use rpcfs_fuse::RemoteFs;
use rpcfs_mount::{AcquirePolicy, ConnectionPool, ConnectionStats};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub type Responder = Box<dyn Fn(&Call) -> RpcResult + Send + Sync>;

/// Replies and bookkeeping shared by every client of one test.
pub struct Script {
    responder: Responder,
    calls: Mutex<Vec<Call>>,
    connected: AtomicUsize,
    opens: AtomicUsize,
}

impl Script {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&Call) -> RpcResult + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            connected: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        })
    }

    /// Answers every call with `response`.
    pub fn always(response: FileSystemResponse) -> Arc<Self> {
        Self::new(move |_| Ok(response.clone()))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn methods(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(Call::method).collect()
    }

    /// Clients currently open.
    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    /// Successful `open` calls over the test's lifetime.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

pub struct MockService {
    id: usize,
    open: bool,
    script: Arc<Script>,
}

impl MockService {
    /// An already-open client.
    pub fn connected(id: usize, script: &Arc<Script>) -> Self {
        let mut service = Self {
            id,
            open: false,
            script: Arc::clone(script),
        };
        service.open().unwrap();
        service
    }
}

impl FileService for MockService {
    fn id(&self) -> usize {
        self.id
    }

    fn open(&mut self) -> Result<(), RpcError> {
        if !self.open {
            self.open = true;
            self.script.connected.fetch_add(1, Ordering::SeqCst);
            self.script.opens.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.script.connected.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn invoke(&mut self, call: Call) -> RpcResult {
        if !self.open {
            return Err(RpcError::NotOpen);
        }
        let result = (self.script.responder)(&call);
        self.script.calls.lock().push(call);
        result
    }
}

/// A pool of `size` connected mock clients.
pub fn pool(size: usize, script: &Arc<Script>) -> Arc<ConnectionPool<MockService>> {
    Arc::new(ConnectionPool::filled(
        (0..size).map(|id| MockService::connected(id, script)),
    ))
}

/// A dispatcher over `size` mock clients with shared statistics.
pub fn remote(
    size: usize,
    script: &Arc<Script>,
    policy: AcquirePolicy,
) -> (RemoteFs<MockService>, Arc<ConnectionStats>) {
    let stats = Arc::new(ConnectionStats::new());
    let fs = RemoteFs::new(pool(size, script))
        .with_policy(policy)
        .with_stats(Arc::clone(&stats));
    (fs, stats)
}
