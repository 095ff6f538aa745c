use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const MIN_PING_INTERVAL_MS: u64 = 100;
const MIN_FRAME_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Editor-facing WebSocket listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_bridge_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_bridge_port(),
            request_timeout_ms: default_request_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl BridgeConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

/// Browser-facing visualization listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_public_host")]
    pub public_host: String,
    #[serde(default = "default_relay_start_port")]
    pub start_port: u16,
    #[serde(default = "default_relay_port_span")]
    pub port_span: u16,
    #[serde(default = "default_open_browser")]
    pub open_browser: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_host: default_public_host(),
            start_port: default_relay_start_port(),
            port_span: default_relay_port_span(),
            open_browser: default_open_browser(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed reading config file {}", path.display()))?;
            toml::from_str::<Config>(&text)
                .with_context(|| format!("failed parsing TOML config {}", path.display()))?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_cli_overrides(
        &mut self,
        port: Option<u16>,
        relay_port: Option<u16>,
        timeout_ms: Option<u64>,
        no_browser: bool,
    ) -> Result<()> {
        if let Some(port) = port {
            self.bridge.port = port;
        }
        if let Some(port) = relay_port {
            self.relay.start_port = port;
        }
        if let Some(timeout_ms) = timeout_ms {
            self.bridge.request_timeout_ms = timeout_ms;
        }
        if no_browser {
            self.relay.open_browser = false;
        }
        self.validate()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GODOT_MCP_BRIDGE_BIND") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                self.bridge.bind = trimmed.to_owned();
            }
        }
        if let Some(v) = lookup("GODOT_MCP_BRIDGE_PORT") {
            if let Ok(n) = v.trim().parse::<u16>() {
                self.bridge.port = n;
            }
        }
        if let Some(v) = lookup("GODOT_MCP_TIMEOUT_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                self.bridge.request_timeout_ms = n;
            }
        }
        if let Some(v) = lookup("GODOT_MCP_PING_INTERVAL_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                self.bridge.ping_interval_ms = n.max(MIN_PING_INTERVAL_MS);
            }
        }
        if let Some(v) = lookup("GODOT_MCP_RELAY_PORT") {
            if let Ok(n) = v.trim().parse::<u16>() {
                self.relay.start_port = n;
            }
        }
        if let Some(v) = lookup("GODOT_MCP_OPEN_BROWSER") {
            self.relay.open_browser = parse_bool(&v);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.bridge.bind.trim().is_empty() {
            anyhow::bail!("bridge.bind must not be empty");
        }
        if self.bridge.request_timeout_ms == 0 {
            anyhow::bail!("bridge.request_timeout_ms must be > 0");
        }
        if self.bridge.ping_interval_ms < MIN_PING_INTERVAL_MS {
            anyhow::bail!("bridge.ping_interval_ms must be >= {MIN_PING_INTERVAL_MS}");
        }
        if self.bridge.max_frame_bytes < MIN_FRAME_BYTES {
            anyhow::bail!("bridge.max_frame_bytes must be >= {MIN_FRAME_BYTES}");
        }
        if self.relay.bind.trim().is_empty() {
            anyhow::bail!("relay.bind must not be empty");
        }
        if self.relay.public_host.trim().is_empty() {
            anyhow::bail!("relay.public_host must not be empty");
        }
        if self.relay.port_span == 0 {
            anyhow::bail!("relay.port_span must be > 0");
        }
        Ok(())
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn default_bind() -> String {
    "127.0.0.1".to_owned()
}

fn default_bridge_port() -> u16 {
    6505
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_ping_interval_ms() -> u64 {
    10_000
}

fn default_max_frame_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_public_host() -> String {
    "localhost".to_owned()
}

fn default_relay_start_port() -> u16 {
    6510
}

fn default_relay_port_span() -> u16 {
    100
}

fn default_open_browser() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::Config;

    #[test]
    fn defaults_match_documented_ports_and_limits() {
        let cfg = Config::default();
        assert_eq!(cfg.bridge.listen_addr(), "127.0.0.1:6505");
        assert_eq!(cfg.bridge.request_timeout().as_secs(), 30);
        assert_eq!(cfg.bridge.ping_interval().as_secs(), 10);
        assert_eq!(cfg.bridge.max_frame_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.relay.start_port, 6510);
        assert_eq!(cfg.relay.port_span, 100);
        assert!(cfg.relay.open_browser);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_keys() {
        let cfg: Config = toml::from_str(
            r#"
[bridge]
port = 7000

[relay]
open_browser = false
"#,
        )
        .expect("parse");
        assert_eq!(cfg.bridge.port, 7000);
        assert_eq!(cfg.bridge.request_timeout_ms, 30_000);
        assert!(!cfg.relay.open_browser);
        assert_eq!(cfg.relay.public_host, "localhost");
    }

    #[test]
    fn load_reads_file_and_missing_file_falls_back_to_defaults() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("godot-mcp-config-{stamp}.toml"));
        std::fs::write(&path, "[bridge]\nrequest_timeout_ms = 1500\n").expect("write");
        let cfg = Config::load(&path).expect("load");
        assert_eq!(cfg.bridge.request_timeout_ms, 1500);
        let _ = std::fs::remove_file(&path);

        let missing = Config::load(&path).expect("defaults");
        assert_eq!(missing.bridge.request_timeout_ms, 30_000);
    }

    #[test]
    fn env_style_overrides_apply_and_clamp() {
        let vars = HashMap::from([
            ("GODOT_MCP_BRIDGE_PORT", "7100"),
            ("GODOT_MCP_BRIDGE_BIND", "  "),
            ("GODOT_MCP_TIMEOUT_MS", "250"),
            ("GODOT_MCP_PING_INTERVAL_MS", "5"),
            ("GODOT_MCP_RELAY_PORT", "not-a-port"),
            ("GODOT_MCP_OPEN_BROWSER", "no"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_overrides_from(|key| vars.get(key).map(|v| (*v).to_owned()));

        assert_eq!(cfg.bridge.port, 7100);
        assert_eq!(cfg.bridge.bind, "127.0.0.1");
        assert_eq!(cfg.bridge.request_timeout_ms, 250);
        assert_eq!(cfg.bridge.ping_interval_ms, 100);
        assert_eq!(cfg.relay.start_port, 6510);
        assert!(!cfg.relay.open_browser);
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let mut cfg = Config::default();
        cfg.bridge.request_timeout_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.bridge.max_frame_bytes = 1024;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.relay.port_span = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        assert!(cfg.apply_cli_overrides(Some(0), Some(0), Some(0), true).is_err());
    }

    #[test]
    fn cli_overrides_win() {
        let mut cfg = Config::default();
        cfg.apply_cli_overrides(Some(0), Some(7200), Some(5_000), true)
            .expect("valid");
        assert_eq!(cfg.bridge.port, 0);
        assert_eq!(cfg.relay.start_port, 7200);
        assert_eq!(cfg.bridge.request_timeout_ms, 5_000);
        assert!(!cfg.relay.open_browser);
    }
}
