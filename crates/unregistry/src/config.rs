use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

/// A container registry backed by the local Docker/containerd image store.
#[derive(Parser, Clone, Debug)]
#[command(name = "unregistry")]
pub struct Config {
    /// HTTP server address.
    #[arg(long, env = "UNREGISTRY_ADDR", default_value = ":5000")]
    pub addr: String,

    /// Log level (debug, info, warn, error).
    #[arg(long, env = "UNREGISTRY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text or json).
    #[arg(long, env = "UNREGISTRY_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Containerd namespace to store images in.
    #[arg(long, env = "UNREGISTRY_CONTAINERD_NAMESPACE", default_value = "moby")]
    pub namespace: String,

    /// Path to the containerd socket.
    #[arg(
        long,
        env = "UNREGISTRY_CONTAINERD_SOCK",
        default_value = "/run/containerd/containerd.sock"
    )]
    pub sock: PathBuf,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// The socket address to listen on. A bare `:port` binds the wildcard
    /// address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let addr = if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        };
        addr.parse()
            .with_context(|| format!("invalid listen address '{}'", self.addr))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config_with_addr(addr: &str) -> Config {
        Config::parse_from(["unregistry", "--addr", addr])
    }

    #[test]
    fn bare_port_binds_the_wildcard_address() {
        let addr = config_with_addr(":5000").listen_addr().unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:5000");
    }

    #[test]
    fn explicit_addresses_pass_through() {
        let addr = config_with_addr("127.0.0.1:8080").listen_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn garbage_addresses_fail() {
        assert!(config_with_addr("not-an-addr").listen_addr().is_err());
    }

    #[test]
    fn defaults_match_the_documented_contract() {
        let config = Config::parse_from(["unregistry"]);
        assert_eq!(config.addr, ":5000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.namespace, "moby");
        assert_eq!(
            config.sock,
            PathBuf::from("/run/containerd/containerd.sock")
        );
    }
}
