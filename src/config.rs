use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SnifferError;
use crate::smc::CLC_HEADER_LEN;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub reassembly: ReassemblyConfig,

    #[serde(default)]
    pub decoder: DecoderConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or fall back to defaults
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/smcsniff/config.toml"),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> std::result::Result<(), SnifferError> {
        if self.capture.interface.is_empty() {
            return Err(SnifferError::ConfigError("capture.interface is empty".into()));
        }
        if self.capture.snaplen <= 0 {
            return Err(SnifferError::ConfigError("capture.snaplen must be > 0".into()));
        }
        if self.decoder.scratch_capacity < CLC_HEADER_LEN {
            return Err(SnifferError::ConfigError(format!(
                "decoder.scratch_capacity must be at least {} bytes",
                CLC_HEADER_LEN
            )));
        }
        if self.reassembly.max_buffered_bytes == 0 {
            return Err(SnifferError::ConfigError(
                "reassembly.max_buffered_bytes must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Packet capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Interface to listen on
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Enable promiscuous mode
    #[serde(default = "default_true")]
    pub promiscuous: bool,

    /// Snapshot length
    #[serde(default = "default_snaplen")]
    pub snaplen: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            promiscuous: true,
            snaplen: default_snaplen(),
        }
    }
}

/// TCP reassembly settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassemblyConfig {
    /// Out-of-order bytes buffered per stream before the gap is skipped
    #[serde(default = "default_max_buffered_bytes")]
    pub max_buffered_bytes: usize,

    /// Close streams idle for this long, measured in capture time (0 = never)
    #[serde(default)]
    pub stream_idle_timeout_secs: u64,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            max_buffered_bytes: default_max_buffered_bytes(),
            stream_idle_timeout_secs: 0,
        }
    }
}

/// CLC decoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Per-stream scratch buffer size
    #[serde(default = "default_scratch_capacity")]
    pub scratch_capacity: usize,

    /// Consecutive stream errors tolerated before the decoder gives up
    #[serde(default = "default_max_stream_errors")]
    pub max_stream_errors: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            scratch_capacity: default_scratch_capacity(),
            max_stream_errors: default_max_stream_errors(),
        }
    }
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_snaplen() -> i32 {
    1024
}

fn default_max_buffered_bytes() -> usize {
    1024 * 1024 // 1 MB
}

fn default_scratch_capacity() -> usize {
    2048
}

fn default_max_stream_errors() -> u32 {
    8
}
