//! Channel configuration and the builder that validates it.
//!
//! A channel is three layers stacked on each other:
//!
//! - a [`Substrate`] moving raw bytes (child process pipe, Unix socket, TCP)
//! - a [`Framing`] delimiting messages on that byte stream
//! - an [`Encoding`] serializing each message
//!
//! [`ChannelBuilder::build`] rejects unusable combinations up front and
//! returns a client that is not yet connected. Connecting is a separate step
//! ([`FileService::open`](crate::FileService::open)) so that network failures
//! surface where the caller expects them.

use crate::error::ChannelError;
use crate::service::FileServiceClient;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

macro_rules! config_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Configuration string for this value.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ChannelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err(ChannelError::InvalidConfig(format!(
                    concat!("unknown ", $what, " '{}'"),
                    s
                )))
            }
        }

        impl TryFrom<String> for $name {
            type Error = ChannelError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(v: $name) -> String {
                v.as_str().to_string()
            }
        }
    };
}

config_enum! {
    /// Low-level byte transport.
    Substrate, "transport" {
        Pipe => "PIPE",
        SharedMemory => "SHARED_MEMORY",
        UnixSocket => "UNIX_SOCKET",
        TcpIp => "TCP_IP",
    }
}

config_enum! {
    /// Message delimiting layer.
    #[derive(Default)]
    Framing, "wrapper" {
        #[default]
        Buffered => "BUFFERED",
        Framed => "FRAMED",
        Http => "HTTP",
        Zlib => "ZLIB",
    }
}

config_enum! {
    /// Message serialization format.
    #[derive(Default)]
    Encoding, "protocol" {
        #[default]
        Binary => "BINARY",
        Compact => "COMPACT",
        Json => "JSON",
        Multiplexed => "MULTIPLEXED",
    }
}

/// Everything needed to build one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub substrate: Substrate,
    pub framing: Framing,
    pub encoding: Encoding,
    /// Command line for `PIPE`, socket path for `UNIX_SOCKET`,
    /// `host:port` for `TCP_IP`.
    pub target: String,
    /// Request path for the `HTTP` framing.
    pub service_path: Option<String>,
    /// Read/write timeout applied to socket substrates.
    pub io_timeout: Option<Duration>,
}

impl ChannelConfig {
    /// Creates a config with the default framing and encoding.
    pub fn new(substrate: Substrate, target: impl Into<String>) -> Self {
        Self {
            substrate,
            framing: Framing::default(),
            encoding: Encoding::default(),
            target: target.into(),
            service_path: None,
            io_timeout: None,
        }
    }

    #[must_use]
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_service_path(mut self, path: impl Into<String>) -> Self {
        self.service_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// Checks that the layers can be stacked.
    pub fn validate(&self) -> Result<(), ChannelError> {
        match self.substrate {
            Substrate::SharedMemory => {
                return Err(ChannelError::UnsupportedTransport(self.substrate));
            }
            Substrate::TcpIp => {
                split_host_port(&self.target)?;
            }
            Substrate::Pipe => {
                if matches!(self.framing, Framing::Http | Framing::Zlib) {
                    return Err(ChannelError::InvalidConfig(format!(
                        "{} wrapper cannot be used with the PIPE transport",
                        self.framing
                    )));
                }
                if self.target.split_whitespace().next().is_none() {
                    return Err(ChannelError::InvalidConfig(
                        "PIPE transport needs a command to launch".to_string(),
                    ));
                }
            }
            Substrate::UnixSocket => {
                if self.target.is_empty() {
                    return Err(ChannelError::InvalidConfig(
                        "UNIX_SOCKET transport needs a socket path".to_string(),
                    ));
                }
            }
        }

        if self.framing == Framing::Http
            && self.service_path.as_deref().is_none_or(str::is_empty)
        {
            return Err(ChannelError::InvalidConfig(
                "HTTP wrapper requires a service path".to_string(),
            ));
        }

        if self.encoding == Encoding::Multiplexed {
            return Err(ChannelError::UnsupportedEncoding(self.encoding));
        }

        Ok(())
    }
}

/// Splits a `host:port` target into exactly two components.
pub(crate) fn split_host_port(target: &str) -> Result<(&str, u16), ChannelError> {
    let parts: Vec<&str> = target.split(':').collect();
    let [host, port] = parts.as_slice() else {
        return Err(ChannelError::InvalidConfig(format!(
            "TCP target '{target}' must be host:port"
        )));
    };
    if host.is_empty() {
        return Err(ChannelError::InvalidConfig(format!(
            "TCP target '{target}' has an empty host"
        )));
    }
    let port = port.parse::<u16>().map_err(|_| {
        ChannelError::InvalidConfig(format!("TCP target '{target}' has a non-numeric port"))
    })?;
    Ok((*host, port))
}

/// Builds not-yet-open clients from a shared [`ChannelConfig`].
#[derive(Debug, Clone)]
pub struct ChannelBuilder {
    config: ChannelConfig,
}

impl ChannelBuilder {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Validates the configuration and returns a client tagged with `id`.
    ///
    /// The returned client is closed; call `open()` to connect it.
    pub fn build(&self, id: usize) -> Result<FileServiceClient, ChannelError> {
        self.config.validate()?;
        Ok(FileServiceClient::new(id, self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp(target: &str) -> ChannelConfig {
        ChannelConfig::new(Substrate::TcpIp, target)
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("tcp_ip".parse::<Substrate>().unwrap(), Substrate::TcpIp);
        assert_eq!("Unix_Socket".parse::<Substrate>().unwrap(), Substrate::UnixSocket);
        assert_eq!("zlib".parse::<Framing>().unwrap(), Framing::Zlib);
        assert_eq!("JSON".parse::<Encoding>().unwrap(), Encoding::Json);
    }

    #[test]
    fn test_parse_unknown_is_invalid_config() {
        let err = "carrier_pigeon".parse::<Substrate>().unwrap_err();
        assert!(matches!(err, ChannelError::InvalidConfig(ref m) if m.contains("transport")));
        assert!("XML".parse::<Encoding>().is_err());
    }

    #[test]
    fn test_display_matches_config_string() {
        assert_eq!(Substrate::SharedMemory.to_string(), "SHARED_MEMORY");
        assert_eq!(Framing::Framed.to_string(), "FRAMED");
        assert_eq!(Encoding::Compact.to_string(), "COMPACT");
    }

    #[test]
    fn test_defaults() {
        let cfg = tcp("127.0.0.1:9090");
        assert_eq!(cfg.framing, Framing::Buffered);
        assert_eq!(cfg.encoding, Encoding::Binary);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_tcp_target_must_have_two_components() {
        for bad in ["localhost", "a:b:9090", "host:", ":9090", "host:port", "::1:80"] {
            let err = tcp(bad).validate().unwrap_err();
            assert!(
                matches!(err, ChannelError::InvalidConfig(_)),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("example.org:80").unwrap(), ("example.org", 80));
    }

    #[test]
    fn test_shared_memory_unsupported() {
        let err = ChannelConfig::new(Substrate::SharedMemory, "seg")
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::UnsupportedTransport(Substrate::SharedMemory)
        ));
    }

    #[test]
    fn test_multiplexed_unsupported() {
        let err = tcp("127.0.0.1:1")
            .with_encoding(Encoding::Multiplexed)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::UnsupportedEncoding(Encoding::Multiplexed)
        ));
    }

    #[test]
    fn test_http_and_zlib_rejected_over_pipe() {
        for framing in [Framing::Http, Framing::Zlib] {
            let err = ChannelConfig::new(Substrate::Pipe, "server --stdio")
                .with_framing(framing)
                .with_service_path("/fuse")
                .validate()
                .unwrap_err();
            assert!(matches!(err, ChannelError::InvalidConfig(_)));
        }
        let ok = ChannelConfig::new(Substrate::Pipe, "server --stdio").with_framing(Framing::Framed);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_http_requires_service_path() {
        let cfg = tcp("127.0.0.1:8080").with_framing(Framing::Http);
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ChannelError::InvalidConfig(_)
        ));
        assert!(cfg.with_service_path("/fuse").validate().is_ok());
    }

    #[test]
    fn test_build_returns_closed_client() {
        use crate::FileService;

        let builder = ChannelBuilder::new(tcp("127.0.0.1:9090"));
        let client = builder.build(3).unwrap();
        assert_eq!(client.id(), 3);
        assert!(!client.is_open());
    }

    #[test]
    fn test_build_rejects_invalid() {
        let builder = ChannelBuilder::new(tcp("no-port"));
        assert!(builder.build(0).is_err());
    }
}
