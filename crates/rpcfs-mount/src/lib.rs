//! Shared mount utilities for rpcfs.
//!
//! # Components
//!
//! - [`ConnectionPool`] - bounded blocking pool of pre-connected RPC clients,
//!   with [`AcquirePolicy`] choosing how long a borrower waits
//! - [`ConnectionStats`] - lock-free counters for calls, failures and pool
//!   pressure
//! - [`Config`] - the TOML configuration file consumed by the `rpcfs` binary

pub mod config;
pub mod pool;
pub mod stats;

pub use config::{Config, DEFAULT_ATTR_TTL, DEFAULT_POOL_SIZE, MountSection, PoolConfig, RpcConfig};
pub use pool::{AcquirePolicy, ConnectionPool, PoolError, PoolGuard};
pub use stats::{ConnectionStats, ConnectionStatsSnapshot};
