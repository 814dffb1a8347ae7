//! Configuration file for an rpcfs mount.
//!
//! # Example configuration
//!
//! ```toml
//! [rpc]
//! transport = "TCP_IP"
//! target = "127.0.0.1:9090"
//! wrapper = "BUFFERED"
//! protocol = "BINARY"
//! io_timeout = "30s"
//!
//! [pool]
//! size = 8
//! acquire_timeout = "5s"
//!
//! [mount]
//! attr_ttl = "1s"
//! fsname = "rpcfs"
//! ```
//!
//! Only `[rpc] transport` and `[rpc] target` are required.

use anyhow::{Context, Result, bail};
use rpcfs_core::{ChannelConfig, Encoding, Framing, Substrate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::pool::AcquirePolicy;

/// Connections opened when `[pool] size` is not given.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Attribute cache lifetime when `[mount] attr_ttl` is not given.
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub rpc: RpcConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub mount: MountSection,
}

/// `[rpc]`: how to reach the file service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RpcConfig {
    pub transport: Substrate,
    /// Command line, socket path or `host:port`, depending on `transport`.
    pub target: String,
    #[serde(default)]
    pub wrapper: Framing,
    #[serde(default)]
    pub protocol: Encoding,
    /// Request path, required when `wrapper = "HTTP"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_path: Option<String>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub io_timeout: Option<Duration>,
}

/// `[pool]`: connection pool sizing and exhaustion policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    #[serde(default = "default_pool_size")]
    pub size: usize,
    /// Absent: wait forever. Zero: fail immediately. Otherwise: bounded wait.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            acquire_timeout: None,
        }
    }
}

/// `[mount]`: kernel-facing options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MountSection {
    #[serde(default = "default_attr_ttl", with = "humantime_serde")]
    pub attr_ttl: Duration,
    #[serde(default = "default_fsname")]
    pub fsname: String,
    #[serde(default)]
    pub allow_other: bool,
    #[serde(default)]
    pub read_only: bool,
}

impl Default for MountSection {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_ATTR_TTL,
            fsname: default_fsname(),
            allow_other: false,
            read_only: false,
        }
    }
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_attr_ttl() -> Duration {
    DEFAULT_ATTR_TTL
}

fn default_fsname() -> String {
    "rpcfs".to_string()
}

impl Config {
    /// Reads, parses and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parses and validates configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.pool.size == 0 {
            bail!("[pool] size must be greater than zero");
        }
        self.channel_config()
            .validate()
            .context("[rpc] section is not usable")?;
        Ok(())
    }

    /// Channel settings shared by every pooled client.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            substrate: self.rpc.transport,
            framing: self.rpc.wrapper,
            encoding: self.rpc.protocol,
            target: self.rpc.target.clone(),
            service_path: self.rpc.service_path.clone(),
            io_timeout: self.rpc.io_timeout,
        }
    }

    pub fn acquire_policy(&self) -> AcquirePolicy {
        AcquirePolicy::from_timeout(self.pool.acquire_timeout)
    }
}
