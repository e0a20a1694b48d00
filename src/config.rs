//! CLI arguments, server configuration and defaults.

use clap::Parser;
use shadow_rs::formatcp;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::build;
use crate::error::ServerError;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_ROOT_DIR: &str = "shared";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
/// Upper bound for an upload request body, multipart framing included.
pub const MAX_UPLOAD_BODY_SIZE: usize = 2 * 1024 * 1024 * 1024;
pub const DOWNLOAD_BUFFER_SIZE: usize = 64 * 1024;
pub const UPLOAD_FIELD_NAME: &str = "file";

/// CLI arguments and environment configuration.
#[derive(Parser, Debug)]
#[command(
    name = "axo-share",
    version = VERSION_INFO,
    about = "Share a directory over the local network"
)]
pub struct Args {
    #[arg(
        short = 'r',
        long,
        env = "AXO_SHARE_ROOT",
        default_value = DEFAULT_ROOT_DIR,
        help = "Directory to serve (created if missing)"
    )]
    pub root: PathBuf,
    #[arg(
        short = 'p',
        long,
        env = "AXO_SHARE_PORT",
        default_value_t = DEFAULT_PORT,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        short = 'b',
        long,
        env = "AXO_SHARE_BIND",
        default_value = DEFAULT_BIND,
        help = "Bind address"
    )]
    pub bind: IpAddr,
    #[arg(
        long,
        env = "AXO_SHARE_SHUTDOWN_GRACE_SECS",
        default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS,
        help = "Seconds to wait for in-flight requests on shutdown"
    )]
    pub shutdown_grace_secs: u64,
}

impl Args {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.root.clone(), self.port)
            .with_host(self.bind)
            .with_shutdown_grace(Duration::from_secs(self.shutdown_grace_secs))
    }
}

/// What a server instance serves and where. Fixed for the instance lifetime.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub root: PathBuf,
    pub port: u16,
    pub host: IpAddr,
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    /// Serves `root` on `port` across all IPv4 interfaces.
    pub fn new(root: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            root: root.into(),
            port,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.port == 0 {
            return Err(ServerError::InvalidInput(
                "port must be between 1 and 65535".into(),
            ));
        }
        if self.root.as_os_str().is_empty() {
            return Err(ServerError::InvalidInput("root directory is required".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_defaults_build_config() {
        let args = Args::try_parse_from(["axo-share", "--root", "/srv/share"]).expect("parse");
        let config = args.server_config();
        assert_eq!(config.root, PathBuf::from("/srv/share"));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:5000");
        assert_eq!(
            config.shutdown_grace,
            Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS)
        );
    }

    #[test]
    fn args_reject_port_zero() {
        assert!(Args::try_parse_from(["axo-share", "--port", "0"]).is_err());
        assert!(Args::try_parse_from(["axo-share", "--port", "70000"]).is_err());
    }

    #[test]
    fn validate_rejects_bad_input() {
        assert!(matches!(
            ServerConfig::new("share", 0).validate(),
            Err(ServerError::InvalidInput(_))
        ));
        assert!(matches!(
            ServerConfig::new("", 8080).validate(),
            Err(ServerError::InvalidInput(_))
        ));
        assert!(ServerConfig::new("share", 8080).validate().is_ok());
    }
}
