//! Configuration for the helm management server.
//!
//! Read from `helm.toml` (see [`discover_and_load`]), every field optional,
//! then adjusted by `HELM_*` environment variables.

pub mod loader;

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use {
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

pub use loader::{CONFIG_FILENAME, config_dir, discover_and_load, find_config_file, load};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Sections ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind, without the port.
    pub bind: String,
    pub port: u16,
    /// How often overdue server-initiated calls are swept.
    pub tick_interval_ms: u64,
    /// How long a server-initiated call waits for its response.
    pub request_timeout_ms: u64,
    /// Largest accepted WebSocket message.
    pub max_payload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 9090,
            tick_interval_ms: 1_000,
            request_timeout_ms: 5_000,
            max_payload_bytes: 524_288,
        }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token clients must present. Generated at startup when unset.
    pub token: Option<Secret<String>>,
    /// Origins allowed to authenticate through the WebSocket subprotocol
    /// header. Bearer-header clients are not origin-checked.
    pub allowed_origins: Vec<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("allowed_origins", &self.allowed_origins)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

// ── Derived values ───────────────────────────────────────────────────────────

impl HelmConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.server.bind.parse().map_err(|_| {
            Error::Invalid(format!("server.bind is not an IP address: {}", self.server.bind))
        })?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// The configured token, if any, ignoring empty strings.
    pub fn token(&self) -> Option<&Secret<String>> {
        self.auth
            .token
            .as_ref()
            .filter(|token| !token.expose_secret().is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.server.tick_interval_ms == 0 {
            return Err(Error::Invalid("server.tick_interval_ms must be positive".into()));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(Error::Invalid("server.request_timeout_ms must be positive".into()));
        }
        if self.server.max_payload_bytes == 0 {
            return Err(Error::Invalid("server.max_payload_bytes must be positive".into()));
        }
        if let Some(tls) = &self.tls
            && (tls.cert_path.as_os_str().is_empty() || tls.key_path.as_os_str().is_empty())
        {
            return Err(Error::Invalid("tls needs both cert_path and key_path".into()));
        }
        Ok(())
    }

    /// Apply `HELM_TOKEN`, `HELM_BIND` and `HELM_PORT` from the process
    /// environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(token) = lookup("HELM_TOKEN") {
            self.auth.token = Some(Secret::new(token));
        }
        if let Some(bind) = lookup("HELM_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = lookup("HELM_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Invalid(format!("HELM_PORT is not a port number: {port}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, std::collections::HashMap};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = HelmConfig::default();
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:9090");
        assert_eq!(config.server.tick_interval_ms, 1_000);
        assert_eq!(config.server.request_timeout_ms, 5_000);
        assert!(config.token().is_none());
        assert!(config.tls.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides() {
        let mut config = HelmConfig::default();
        config
            .apply_overrides(env(&[
                ("HELM_TOKEN", "s3cret"),
                ("HELM_BIND", "0.0.0.0"),
                ("HELM_PORT", "7000"),
            ]))
            .unwrap();
        assert_eq!(config.token().unwrap().expose_secret(), "s3cret");
        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:7000");
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut config = HelmConfig::default();
        let err = config
            .apply_overrides(env(&[("HELM_PORT", "http")]))
            .unwrap_err();
        assert!(err.to_string().contains("HELM_PORT"));
    }

    #[test]
    fn empty_token_counts_as_unset() {
        let mut config = HelmConfig::default();
        config.apply_overrides(env(&[("HELM_TOKEN", "")])).unwrap();
        assert!(config.token().is_none());
    }

    #[test]
    fn validation() {
        let mut config = HelmConfig::default();
        config.server.bind = "localhost".into();
        assert!(config.validate().is_err());

        let mut config = HelmConfig::default();
        config.server.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = HelmConfig::default();
        config.tls = Some(TlsConfig {
            cert_path: "cert.pem".into(),
            key_path: PathBuf::new(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let auth = AuthConfig {
            token: Some(Secret::new("hunter2".into())),
            allowed_origins: vec![],
        };
        let printed = format!("{auth:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("REDACTED"));
    }
}
