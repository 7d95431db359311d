use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for a single peer endpoint. Key names follow the JSON
/// config files the signalling deployment ships; the `id` is overwritten
/// by the server-assigned value during signalling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(rename = "SignallingIP", default = "default_signalling_ip")]
    pub signalling_ip: String,
    #[serde(rename = "SignallingPort", default = "default_signalling_port")]
    pub signalling_port: u16,
    #[serde(default)]
    pub id: u32,
}

/// Configuration for the bridge process: the signalling server plus the
/// UDP sockets towards the renderer back-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(rename = "SignallingIP", default = "default_signalling_ip")]
    pub signalling_ip: String,
    #[serde(rename = "SignallingPort", default = "default_signalling_port")]
    pub signalling_port: u16,
    /// Bind of the bridge OUT socket (JSON control towards the back-end).
    #[serde(rename = "LocalAddress", default = "default_address")]
    pub local_address: String,
    #[serde(rename = "LocalPort", default = "default_local_port")]
    pub local_port: u16,
    /// Bind of the bridge IN socket (control responses from the back-end).
    #[serde(rename = "RemoteAddress", default = "default_address")]
    pub remote_address: String,
    #[serde(rename = "RemotePort", default = "default_remote_port")]
    pub remote_port: u16,
    /// RTP ingress port for the dispatcher; defaults to `RemotePort + 1`.
    #[serde(rename = "DataInPort", default)]
    pub data_in_port: Option<u16>,
    /// RTP/data egress port; defaults to `LocalPort + 1`.
    #[serde(rename = "DataOutPort", default)]
    pub data_out_port: Option<u16>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("could not parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            signalling_ip: default_signalling_ip(),
            signalling_port: default_signalling_port(),
            id: 0,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            signalling_ip: default_signalling_ip(),
            signalling_port: default_signalling_port(),
            local_address: default_address(),
            local_port: default_local_port(),
            remote_address: default_address(),
            remote_port: default_remote_port(),
            data_in_port: None,
            data_out_port: None,
        }
    }
}

impl EndpointConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }

    /// WebSocket URL of the signalling server.
    pub fn signalling_url(&self) -> String {
        format!("ws://{}:{}", self.signalling_ip, self.signalling_port)
    }
}

impl BridgeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }

    pub fn signalling_url(&self) -> String {
        format!("ws://{}:{}", self.signalling_ip, self.signalling_port)
    }

    pub fn data_in_port(&self) -> u16 {
        self.data_in_port.unwrap_or(self.remote_port + 1)
    }

    pub fn data_out_port(&self) -> u16 {
        self.data_out_port.unwrap_or(self.local_port + 1)
    }

    /// Validate the configuration, returning all issues found. Entries are
    /// prefixed `ERROR:` (do not start) or `WARNING:` (advisory).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.signalling_ip.is_empty() {
            issues.push("ERROR: SignallingIP must not be empty.".to_string());
        }
        if self.signalling_port == 0 {
            issues.push("ERROR: SignallingPort must be between 1 and 65535, got 0.".to_string());
        }
        for (name, port) in [
            ("LocalPort", self.local_port),
            ("RemotePort", self.remote_port),
        ] {
            if port == 0 {
                issues.push(format!(
                    "ERROR: {name} must be between 1 and 65535, got 0."
                ));
            }
        }
        if self.local_port == self.remote_port {
            issues.push(format!(
                "WARNING: LocalPort and RemotePort are both {} — the OUT and IN \
                 sockets will fight over the same bind.",
                self.local_port
            ));
        }
        if self.data_in_port == self.data_out_port && self.data_in_port.is_some() {
            issues.push(format!(
                "WARNING: DataInPort and DataOutPort are both {:?}.",
                self.data_in_port
            ));
        }

        if issues.is_empty() { Ok(()) } else { Err(issues) }
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn default_signalling_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_signalling_port() -> u16 {
    8080
}
fn default_address() -> String {
    "127.0.0.1".to_string()
}
fn default_local_port() -> u16 {
    5535
}
fn default_remote_port() -> u16 {
    5545
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults_from_empty_object() {
        let config: EndpointConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.signalling_ip, "127.0.0.1");
        assert_eq!(config.signalling_port, 8080);
        assert_eq!(config.id, 0);
        assert_eq!(config.signalling_url(), "ws://127.0.0.1:8080");
    }

    #[test]
    fn endpoint_parses_deployment_keys() {
        let config: EndpointConfig = serde_json::from_str(
            r#"{"SignallingIP":"10.0.0.7","SignallingPort":8889,"id":12}"#,
        )
        .unwrap();
        assert_eq!(config.signalling_ip, "10.0.0.7");
        assert_eq!(config.signalling_port, 8889);
        assert_eq!(config.id, 12);
    }

    #[test]
    fn bridge_defaults_and_derived_ports() {
        let config: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.local_port, 5535);
        assert_eq!(config.remote_port, 5545);
        assert_eq!(config.data_in_port(), 5546);
        assert_eq!(config.data_out_port(), 5536);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bridge_explicit_data_ports_win() {
        let config: BridgeConfig = serde_json::from_str(
            r#"{"DataInPort": 7001, "DataOutPort": 7002}"#,
        )
        .unwrap();
        assert_eq!(config.data_in_port(), 7001);
        assert_eq!(config.data_out_port(), 7002);
    }

    #[test]
    fn validate_flags_zero_ports() {
        let mut config = BridgeConfig::default();
        config.local_port = 0;
        config.signalling_port = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("LocalPort")));
        assert!(issues.iter().any(|i| i.contains("SignallingPort")));
        assert!(issues.iter().all(|i| i.starts_with("ERROR:")));
    }

    #[test]
    fn validate_warns_on_colliding_ports() {
        let mut config = BridgeConfig::default();
        config.remote_port = config.local_port;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.starts_with("WARNING:")));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = BridgeConfig::load("/nonexistent/tether.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
