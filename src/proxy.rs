//! SOCKS5 proxy configuration for monitored mailbox connections.
//!
//! A target may route its IMAP connection through a SOCKS5 proxy, either from code
//! or from the `proxy` object of a target in the configuration file:
//!
//! ```json
//! "proxy": { "host": "proxy.example.com", "port": 1080, "username": "u", "password": "p" }
//! ```
//!
//! # Example
//!
//! ```
//! use mail_aware::Socks5Proxy;
//!
//! // Without authentication
//! let proxy = Socks5Proxy::new("proxy.example.com", 1080);
//!
//! // With authentication
//! let proxy = Socks5Proxy::with_auth("proxy.example.com", 1080, "username", "password");
//! ```

use serde::Deserialize;

/// SOCKS5 proxy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawProxy")]
pub struct Socks5Proxy {
    /// Proxy server hostname or IP address.
    pub host: String,
    /// Proxy server port.
    pub port: u16,
    /// Optional authentication credentials.
    pub auth: Option<ProxyAuth>,
}

/// Authentication credentials for SOCKS5 proxy.
#[derive(Clone)]
pub struct ProxyAuth {
    /// Username for proxy authentication.
    pub username: String,
    /// Password for proxy authentication.
    pub password: String,
}

impl std::fmt::Debug for ProxyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Socks5Proxy {
    /// Creates a new SOCKS5 proxy configuration without authentication.
    ///
    /// # Example
    ///
    /// ```
    /// use mail_aware::Socks5Proxy;
    ///
    /// let proxy = Socks5Proxy::new("192.168.1.1", 1080);
    /// ```
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            auth: None,
        }
    }

    /// Creates a new SOCKS5 proxy configuration with authentication.
    ///
    /// # Example
    ///
    /// ```
    /// use mail_aware::Socks5Proxy;
    ///
    /// let proxy = Socks5Proxy::with_auth("192.168.1.1", 1080, "user", "pass");
    /// ```
    #[must_use]
    pub fn with_auth(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            auth: Some(ProxyAuth {
                username: username.into(),
                password: password.into(),
            }),
        }
    }

    /// Returns the proxy address as "host:port".
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns `true` if this proxy requires authentication.
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.auth.is_some()
    }
}

/// Flat file representation: credentials sit next to host and port.
#[derive(Deserialize)]
struct RawProxy {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

impl From<RawProxy> for Socks5Proxy {
    fn from(raw: RawProxy) -> Self {
        match raw.username {
            Some(username) => Self::with_auth(
                raw.host,
                raw.port,
                username,
                raw.password.unwrap_or_default(),
            ),
            None => Self::new(raw.host, raw.port),
        }
    }
}

impl std::fmt::Display for Socks5Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.auth {
            Some(auth) => write!(
                f,
                "socks5://{}:***@{}:{}",
                auth.username, self.host, self.port
            ),
            None => write!(f, "socks5://{}:{}", self.host, self.port),
        }
    }
}
