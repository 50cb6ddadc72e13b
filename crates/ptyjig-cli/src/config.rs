//! Optional configuration at `<config_dir>/ptyjig/config.toml`.
//!
//! Every key is optional; anything left out keeps the library default.
//! CLI flags always override config file values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use ptyjig_core::config::seconds;
use ptyjig_core::{SessionConfig, TimingConfig};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub session: SessionSection,
}

/// `[timing]`: durations in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingSection {
    /// Fractional seconds between keystrokes.
    pub keystroke_delay: Option<f64>,
    /// Whole seconds of silence tolerated after input runs out. 0 disables.
    pub idle_timeout: Option<u64>,
    /// Fractional seconds before the first keystroke.
    pub start_delay: Option<f64>,
}

/// `[session]`: relay switches.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSection {
    pub send_eof: Option<bool>,
    pub suppress_interrupts: Option<bool>,
    pub mirror_output: Option<bool>,
}

/// Default config file location, if the platform has a config directory.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ptyjig").join("config.toml"))
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Session settings from this file layered over the library defaults.
    pub fn session_config(&self, command: Vec<String>) -> Result<SessionConfig> {
        let mut cfg = SessionConfig {
            command,
            ..SessionConfig::default()
        };

        let timing = &self.timing;
        if let Some(delay) = timing.keystroke_delay {
            cfg.timing.keystroke_delay =
                seconds(delay).context("invalid timing.keystroke_delay")?;
        }
        if let Some(delay) = timing.start_delay {
            cfg.timing.start_delay = seconds(delay).context("invalid timing.start_delay")?;
        }
        if let Some(secs) = timing.idle_timeout {
            cfg.timing.idle_timeout = TimingConfig::idle_timeout_secs(secs);
        }

        let session = &self.session;
        if let Some(send_eof) = session.send_eof {
            cfg.send_eof = send_eof;
        }
        if let Some(suppress) = session.suppress_interrupts {
            cfg.suppress_interrupts = suppress;
        }
        if let Some(mirror) = session.mirror_output {
            cfg.mirror_output = mirror;
        }

        Ok(cfg)
    }
}
