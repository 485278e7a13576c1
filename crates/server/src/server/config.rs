//! Server settings.

use crate::error::ServerError;
use crate::utils::ensure;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::debug;

/// Overrides the idle timeout, in seconds.
pub const IDLE_TIMEOUT_ENV: &str = "MICRO_SERVER_IDLE_TIMEOUT";

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_LISTEN_BACKLOG: u32 = 128;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 16 * 1024;
pub const DEFAULT_MAX_IOVEC: usize = 64;

const MAX_IOVEC_LIMIT: usize = 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub(crate) address: SocketAddr,
    pub(crate) listen_backlog: u32,
    pub(crate) reuse_port: bool,
    pub(crate) idle_timeout: Duration,
    pub(crate) recv_buffer_size: usize,
    pub(crate) max_iovec: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            reuse_port: false,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_iovec: DEFAULT_MAX_IOVEC,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder { config: Self::default() }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn recv_buffer_size(&self) -> usize {
        self.recv_buffer_size
    }

    pub fn max_iovec(&self) -> usize {
        self.max_iovec
    }
}

#[derive(Debug)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn address(mut self, address: impl Into<SocketAddr>) -> Self {
        self.config.address = address.into();
        self
    }

    #[must_use]
    pub fn listen_backlog(mut self, backlog: u32) -> Self {
        self.config.listen_backlog = backlog;
        self
    }

    /// Sets `SO_REUSEPORT` on the listener, where the platform has it.
    #[must_use]
    pub fn reuse_port(mut self, reuse_port: bool) -> Self {
        self.config.reuse_port = reuse_port;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.config.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    #[must_use]
    pub fn max_iovec(mut self, max_iovec: usize) -> Self {
        self.config.max_iovec = max_iovec;
        self
    }

    /// Validates the settings and applies [`IDLE_TIMEOUT_ENV`] if set.
    ///
    /// # Errors
    ///
    /// [`ServerError::InvalidConfig`] for out of range values or an
    /// unparsable environment override.
    pub fn build(mut self) -> Result<ServerConfig, ServerError> {
        if let Ok(value) = std::env::var(IDLE_TIMEOUT_ENV) {
            self.config.idle_timeout = parse_idle_timeout(&value)?;
            debug!(idle_timeout = ?self.config.idle_timeout, "idle timeout from environment");
        }

        let config = self.config;
        ensure!(!config.idle_timeout.is_zero(), ServerError::invalid_config("idle_timeout must be positive"));
        ensure!(config.recv_buffer_size > 0, ServerError::invalid_config("recv_buffer_size must be positive"));
        ensure!(config.listen_backlog > 0, ServerError::invalid_config("listen_backlog must be positive"));
        ensure!(
            (1..=MAX_IOVEC_LIMIT).contains(&config.max_iovec),
            ServerError::invalid_config(format!("max_iovec must be within 1..={MAX_IOVEC_LIMIT}"))
        );
        Ok(config)
    }
}

/// Parses an idle timeout given in (possibly fractional) seconds.
///
/// # Errors
///
/// [`ServerError::InvalidConfig`] unless `value` is a finite, positive
/// number of seconds.
pub fn parse_idle_timeout(value: &str) -> Result<Duration, ServerError> {
    let invalid = || ServerError::invalid_config(format!("{IDLE_TIMEOUT_ENV}={value:?} is not a positive number of seconds"));
    let secs: f64 = value.trim().parse().map_err(|_e: std::num::ParseFloatError| invalid())?;
    ensure!(secs.is_finite() && secs > 0.0, invalid());
    Duration::try_from_secs_f64(secs).map_err(|_e| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.address().port(), 8081);
        assert_eq!(config.listen_backlog, 128);
        assert_eq!(config.idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.recv_buffer_size(), 16 * 1024);
        assert_eq!(config.max_iovec(), 64);
        assert!(!config.reuse_port);
    }

    #[test]
    fn idle_timeout_parsing() {
        assert_eq!(parse_idle_timeout("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_idle_timeout(" 0.25 ").unwrap(), Duration::from_millis(250));
        for bad in ["", "abc", "0", "-1", "inf", "NaN"] {
            assert!(matches!(parse_idle_timeout(bad), Err(ServerError::InvalidConfig { .. })), "{bad:?}");
        }
    }

    #[test]
    fn builder_validates_ranges() {
        let zero_iovec = ServerConfig::builder().max_iovec(0).build();
        assert!(matches!(zero_iovec, Err(ServerError::InvalidConfig { .. })));
        let huge_iovec = ServerConfig::builder().max_iovec(4096).build();
        assert!(matches!(huge_iovec, Err(ServerError::InvalidConfig { .. })));
        let no_buffer = ServerConfig::builder().recv_buffer_size(0).build();
        assert!(matches!(no_buffer, Err(ServerError::InvalidConfig { .. })));
    }

    #[test]
    fn builder_sets_values() {
        let config = ServerConfig::builder()
            .address(([127, 0, 0, 1], 9000))
            .listen_backlog(16)
            .reuse_port(true)
            .recv_buffer_size(4096)
            .max_iovec(8)
            .build()
            .unwrap();
        assert_eq!(config.address(), SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.listen_backlog, 16);
        assert!(config.reuse_port);
        assert_eq!(config.recv_buffer_size(), 4096);
        assert_eq!(config.max_iovec(), 8);
    }
}
