//! Instance options: defaults, TOML config file and environment overrides.

use std::path::Path;

use serde::Deserialize;

use crate::limits::{DEFAULT_END_PORT, DEFAULT_START_PORT};

/// Where a new instance gets its persistent state from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Savedata {
    /// Generate a new identity.
    #[default]
    Fresh,
    /// Resume from a blob produced by `Tox::savedata`.
    Snapshot(Vec<u8>),
    /// Reuse only a raw 32-byte secret key.
    SecretKey(Vec<u8>),
}

/// Instance configuration. Config file fields: `ipv6_enabled`, `udp_enabled`,
/// `local_discovery_enabled`, `start_port`, `end_port`, `tcp_port`, `thread_safe`.
/// Env overrides: TOXIDE_UDP_ENABLED, TOXIDE_LOCAL_DISCOVERY, TOXIDE_START_PORT,
/// TOXIDE_END_PORT, TOXIDE_TCP_PORT.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    pub ipv6_enabled: bool,
    pub udp_enabled: bool,
    /// Link automatically with other instances on the same local network.
    pub local_discovery_enabled: bool,
    /// UDP port range to bind in; `0` means the default range.
    pub start_port: u16,
    pub end_port: u16,
    /// TCP relay port to serve on; `0` runs no relay.
    pub tcp_port: u16,
    /// Allow wrapping the instance in a `SharedTox` for use from several threads.
    pub thread_safe: bool,
    #[serde(skip)]
    pub savedata: Savedata,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ipv6_enabled: true,
            udp_enabled: true,
            local_discovery_enabled: true,
            start_port: 0,
            end_port: 0,
            tcp_port: 0,
            thread_safe: false,
            savedata: Savedata::Fresh,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Options {
    pub fn from_toml_str(s: &str) -> Result<Self, OptionsError> {
        Ok(toml::from_str(s)?)
    }

    /// Load: config file, then env vars on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&s)?.with_env())
    }

    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key/value source. Unparseable values are skipped.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            match value.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, %value, "ignoring unparseable override");
                    None
                }
            }
        }
        if let Some(v) = parsed("TOXIDE_UDP_ENABLED", lookup("TOXIDE_UDP_ENABLED")) {
            self.udp_enabled = v;
        }
        if let Some(v) = parsed("TOXIDE_LOCAL_DISCOVERY", lookup("TOXIDE_LOCAL_DISCOVERY")) {
            self.local_discovery_enabled = v;
        }
        if let Some(v) = parsed("TOXIDE_START_PORT", lookup("TOXIDE_START_PORT")) {
            self.start_port = v;
        }
        if let Some(v) = parsed("TOXIDE_END_PORT", lookup("TOXIDE_END_PORT")) {
            self.end_port = v;
        }
        if let Some(v) = parsed("TOXIDE_TCP_PORT", lookup("TOXIDE_TCP_PORT")) {
            self.tcp_port = v;
        }
        self
    }

    /// Effective inclusive UDP port range.
    pub fn udp_port_range(&self) -> (u16, u16) {
        match (self.start_port, self.end_port) {
            (0, 0) => (DEFAULT_START_PORT, DEFAULT_END_PORT),
            (s, 0) => (s, s),
            (0, e) => (e, e),
            (s, e) if s > e => (e, s),
            (s, e) => (s, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = Options::default();
        assert!(opts.udp_enabled);
        assert!(opts.local_discovery_enabled);
        assert_eq!(opts.udp_port_range(), (DEFAULT_START_PORT, DEFAULT_END_PORT));
        assert_eq!(opts.savedata, Savedata::Fresh);
    }

    #[test]
    fn toml_partial_fills_defaults() {
        let opts = Options::from_toml_str("tcp_port = 44577\nlocal_discovery_enabled = false\n")
            .unwrap();
        assert_eq!(opts.tcp_port, 44577);
        assert!(!opts.local_discovery_enabled);
        assert!(opts.udp_enabled);
    }

    #[test]
    fn toml_unknown_field_rejected() {
        assert!(matches!(
            Options::from_toml_str("proxy_port = 3128\n"),
            Err(OptionsError::Parse(_))
        ));
    }

    #[test]
    fn overrides_apply_and_skip_garbage() {
        let opts = Options::default().with_overrides(|key| match key {
            "TOXIDE_TCP_PORT" => Some("33500".into()),
            "TOXIDE_START_PORT" => Some("not-a-port".into()),
            "TOXIDE_UDP_ENABLED" => Some("false".into()),
            _ => None,
        });
        assert_eq!(opts.tcp_port, 33500);
        assert_eq!(opts.start_port, 0);
        assert!(!opts.udp_enabled);
    }

    #[test]
    fn port_range_normalised() {
        let mut opts = Options::default();
        opts.start_port = 40010;
        opts.end_port = 40000;
        assert_eq!(opts.udp_port_range(), (40000, 40010));
        opts.end_port = 0;
        assert_eq!(opts.udp_port_range(), (40010, 40010));
    }
}
