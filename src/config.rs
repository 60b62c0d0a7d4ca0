//! Proxy configuration module
//!
//! Parses and manages proxy configuration from YAML files.
//!
//! Uses serde_yaml for automatic parsing - just define the struct and serde
//! handles all the parsing, validation, and type conversion. Every field has
//! a default, so an empty file (or no file at all) yields a working config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    // ============================================
    // Backend Display Server
    // ============================================
    /// VNC server address
    #[serde(default = "default_vnc_host")]
    pub vnc_host: String,

    /// VNC server port
    #[serde(default = "default_vnc_port")]
    pub vnc_port: u16,

    // ============================================
    // Inbound Listener
    // ============================================
    /// Port the proxy listens on. Defaults to `vnc_port + 1`.
    #[serde(default)]
    pub listen_port: Option<u16>,

    // ============================================
    // Admission Policy
    // ============================================
    /// Suppress the interactive prompt; contention always keeps the
    /// current session.
    #[serde(default)]
    pub headless: bool,

    /// Cooldown window for refused clients, in seconds.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// How long the operator has to answer a contention prompt, in seconds.
    #[serde(default = "default_decision_secs")]
    pub decision_secs: u64,
}

// ============================================
// Default value functions
// These are called by serde when a field is missing
// ============================================

fn default_vnc_host() -> String {
    "127.0.0.1".to_string()
}

fn default_vnc_port() -> u16 {
    5900
}

fn default_grace_secs() -> u64 {
    60
}

fn default_decision_secs() -> u64 {
    5
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            vnc_host: default_vnc_host(),
            vnc_port: default_vnc_port(),
            listen_port: None,
            headless: false,
            grace_secs: default_grace_secs(),
            decision_secs: default_decision_secs(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ProxyConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML in {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string
    ///
    /// Useful for testing
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: ProxyConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Public so callers applying CLI overrides can re-check the result.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.vnc_host.is_empty(), "vnc_host cannot be empty");
        anyhow::ensure!(self.vnc_port != 0, "vnc_port cannot be 0");

        if self.listen_port.is_none() {
            anyhow::ensure!(
                self.vnc_port < u16::MAX,
                "cannot derive listen_port from vnc_port {}",
                self.vnc_port
            );
        }
        if let Some(port) = self.listen_port {
            anyhow::ensure!(port != 0, "listen_port cannot be 0");
        }

        anyhow::ensure!(self.grace_secs > 0, "grace_secs cannot be 0");
        anyhow::ensure!(self.decision_secs > 0, "decision_secs cannot be 0");

        Ok(())
    }

    /// Effective listen port (`vnc_port + 1` unless set explicitly).
    pub fn listen_port(&self) -> u16 {
        self.listen_port.unwrap_or_else(|| self.vnc_port + 1)
    }

    /// Cooldown window for refused clients.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    /// Bounded wait for a contention decision.
    pub fn decision_window(&self) -> Duration {
        Duration::from_secs(self.decision_secs)
    }

    /// Save configuration to a YAML file
    ///
    /// Useful for generating config templates
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self).context("Failed to serialize config to YAML")?;

        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;

        Ok(())
    }
}
