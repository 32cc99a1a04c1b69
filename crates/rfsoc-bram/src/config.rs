//! # Configuration
//!
//! YAML configuration for the BRAM server: listening socket, memory
//! device, the region address table and logging.
//!
//! The address table is one of the built-in presets (`rfsoc4x2`, `8192ch`,
//! `32768ch`) unless `regions` lists entries explicitly. `sizes` replaces
//! the preset's size rules as a whole.
//!
//! ## Search Path
//!
//! Configuration is loaded from the first file found:
//! 1. Path given by the `RFSOC_BRAM_CONFIG` environment variable
//! 2. `./rfsoc-bram.yaml`
//! 3. `/etc/rfsoc-bram/config.yaml`
//!
//! Defaults (the `rfsoc4x2` preset) are used otherwise.
//!
//! ## Example
//!
//! ```yaml
//! server:
//!   port: 12345
//!   accept_policy: forever
//!   write_timeout_ms: 10000
//!
//! preset: 8192ch
//! ```
//!
//! or, with a hand-written table:
//!
//! ```yaml
//! sizes:
//!   counter_name: acc_cnt
//!   small_prefix: re_bin_
//!   small_size: 256
//!   large_size: 4096
//!
//! regions:
//!   - name: re_bin_synth0_0
//!     address: 0xA0160000
//!   - name: acc_cnt
//!     address: 0xA0170000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BramError, BramResult};
use crate::logging::LogConfig;
use crate::protocol::MAX_REQUEST_LEN;
use crate::server::{AcceptPolicy, DEFAULT_PORT};
use crate::table::{RegionEntry, RegionTable, SizeRules, TablePreset};

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "RFSOC_BRAM_CONFIG";

/// Listening socket and connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind_address: String,
    /// TCP port
    pub port: u16,
    /// Serve one client then exit, or keep accepting
    pub accept_policy: AcceptPolicy,
    /// Per-read timeout on accepted connections (none blocks forever)
    pub read_timeout_ms: Option<u64>,
    /// Per-write timeout on accepted connections
    pub write_timeout_ms: Option<u64>,
    /// Receive buffer size; one request must fit in one receive
    pub max_request_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            accept_policy: AcceptPolicy::Forever,
            read_timeout_ms: None,
            write_timeout_ms: Some(10_000),
            max_request_len: MAX_REQUEST_LEN,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    /// `bind_address:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Physical memory device settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device node to map
    pub path: PathBuf,
    /// Serve zero-filled in-memory regions instead of the device
    pub simulate: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/mem"),
            simulate: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BramConfig {
    pub server: ServerConfig,
    pub device: DeviceConfig,
    /// Built-in address table used when `regions` is empty
    pub preset: TablePreset,
    /// Size rules (the preset's when omitted)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sizes: Option<SizeRules>,
    /// Explicit address table
    pub regions: Vec<RegionEntry>,
    pub logging: LogConfig,
}

impl Default for BramConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            device: DeviceConfig::default(),
            preset: TablePreset::default(),
            sizes: None,
            regions: Vec::new(),
            logging: LogConfig::default(),
        }
    }
}

impl BramConfig {
    /// Load from the search path, falling back to defaults.
    pub fn load() -> BramResult<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if Path::new(&path).exists() {
                return Self::load_from(Path::new(&path));
            }
            tracing::warn!("{} points to missing file {}", CONFIG_ENV, path);
        }

        for path in Self::config_search_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load from a specific file.
    pub fn load_from(path: &Path) -> BramResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BramError::Config(format!("{}: {}", path.display(), e)))?;

        Self::parse(&content)
            .map_err(|e| BramError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse from a YAML string.
    pub fn parse(yaml: &str) -> BramResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| BramError::Config(e.to_string()))
    }

    /// Save to a file.
    pub fn save(&self, path: &Path) -> BramResult<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| BramError::Config(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| BramError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn config_search_paths() -> Vec<PathBuf> {
        vec![
            PathBuf::from("./rfsoc-bram.yaml"),
            PathBuf::from("/etc/rfsoc-bram/config.yaml"),
        ]
    }

    pub fn validate(&self) -> BramResult<()> {
        if self.server.max_request_len == 0 {
            return Err(BramError::Config("max_request_len must be > 0".to_string()));
        }

        // A zero duration is rejected by the socket API
        if self.server.read_timeout_ms == Some(0) || self.server.write_timeout_ms == Some(0) {
            return Err(BramError::Config(
                "timeouts must be > 0 ms or omitted".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.regions {
            if !seen.insert(entry.name.as_str()) {
                return Err(BramError::Config(format!(
                    "duplicate region '{}'",
                    entry.name
                )));
            }
        }

        self.size_rules().validate()
    }

    /// Size rules in effect
    pub fn size_rules(&self) -> SizeRules {
        self.sizes.clone().unwrap_or_else(|| self.preset.rules())
    }

    /// Switch to a built-in table, dropping explicit regions and sizes
    pub fn use_preset(&mut self, preset: TablePreset) {
        self.preset = preset;
        self.sizes = None;
        self.regions.clear();
    }

    /// Build the region table described by this configuration.
    pub fn region_table(&self) -> BramResult<RegionTable> {
        if self.regions.is_empty() {
            RegionTable::from_entries(self.size_rules(), &self.preset.entries())
        } else {
            RegionTable::from_entries(self.size_rules(), &self.regions)
        }
    }

    /// Example configuration YAML with the default table spelled out.
    pub fn example_yaml() -> String {
        let preset = TablePreset::default();
        let example = Self {
            sizes: Some(preset.rules()),
            regions: preset.entries(),
            ..Default::default()
        };
        serde_yaml::to_string(&example).unwrap_or_default()
    }
}
