//! Server configuration.

use std::net::{SocketAddr, ToSocketAddrs};

use crate::config::ServerSettings;
use crate::error::{Result, TrimError};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Request logging
    pub logging: bool,
    /// CORS enabled
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            max_body_size: 10 * 1024 * 1024, // 10MB
            logging: true,
            cors_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Derive from the `[server]` config section
    pub fn from_settings(settings: &ServerSettings) -> Result<Self> {
        let listen = settings.listen_addr();
        let addr = match listen.parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(_) => listen
                .to_socket_addrs()
                .ok()
                .and_then(|mut addrs| addrs.next())
                .ok_or_else(|| TrimError::Config(format!("Invalid listen address '{listen}'")))?,
        };
        Ok(Self {
            addr,
            max_body_size: settings.max_body_size,
            logging: true,
            cors_enabled: settings.cors_enabled,
        })
    }

    /// Listen on localhost at `port`
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    /// Bind to all interfaces
    pub fn bind_all(mut self) -> Self {
        self.addr = SocketAddr::from(([0, 0, 0, 0], self.addr.port()));
        self
    }

    /// Set address directly
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Set max body size
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Disable request logging
    pub fn without_logging(mut self) -> Self {
        self.logging = false;
        self
    }

    /// Disable CORS
    pub fn without_cors(mut self) -> Self {
        self.cors_enabled = false;
        self
    }
}
