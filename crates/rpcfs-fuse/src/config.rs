//! Mount configuration for the FUSE filesystem.

use rpcfs_mount::{Config, DEFAULT_ATTR_TTL, DEFAULT_POOL_SIZE};
use std::time::Duration;

use crate::native::MountOptions;

/// Kernel-facing options for one mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Time-to-live for cached attributes and name lookups.
    ///
    /// Default: 1 second.
    pub attr_ttl: Duration,

    /// Filesystem name shown in the mount table.
    pub fsname: String,

    /// Let users other than the mounting user access the filesystem.
    pub allow_other: bool,

    /// Mount read-only.
    pub read_only: bool,

    /// Threads serving kernel requests. Defaults to the connection pool size,
    /// so each worker can hold one connection.
    pub workers: usize,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_ATTR_TTL,
            fsname: "rpcfs".to_string(),
            allow_other: false,
            read_only: false,
            workers: DEFAULT_POOL_SIZE,
        }
    }
}

impl MountConfig {
    /// Takes the `[mount]` section and pool size of a configuration file.
    pub fn from_config(config: &Config) -> Self {
        Self {
            attr_ttl: config.mount.attr_ttl,
            fsname: config.mount.fsname.clone(),
            allow_other: config.mount.allow_other,
            read_only: config.mount.read_only,
            workers: config.pool.size,
        }
    }

    /// Sets the cache TTL for attributes and entries.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    #[must_use]
    pub fn fsname(mut self, name: impl Into<String>) -> Self {
        self.fsname = name.into();
        self
    }

    #[must_use]
    pub fn allow_other(mut self, allow: bool) -> Self {
        self.allow_other = allow;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Options reported to the file service in `init`.
    pub fn mount_options(&self) -> MountOptions {
        let ttl = self.attr_ttl.as_secs_f64();
        MountOptions {
            attr_timeout: ttl,
            entry_timeout: ttl,
            ..MountOptions::default()
        }
    }
}
