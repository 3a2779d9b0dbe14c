use rhal_types::BackendKind;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Top-level RHAL configuration, loaded from rhal.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RhalConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub software: SoftwareConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Which driver family to bring up
    #[serde(default)]
    pub backend: BackendKind,
    /// Forward resource names to the driver's labeling hook
    #[serde(default)]
    pub debug: bool,
    /// Maximum number of pooled wait-handle arrays kept per device
    #[serde(default = "default_wait_pool_limit")]
    pub wait_pool_limit: usize,
}

/// Knobs for the software reference driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoftwareConfig {
    /// Row pitch alignment (bytes) applied to mapped texture rows.
    /// `None` uses the profile's own default.
    pub row_alignment: Option<u32>,
    /// Complete batches on a worker thread instead of inline.
    /// `None` uses the profile's own default.
    pub async_completion: Option<bool>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            debug: false,
            wait_pool_limit: default_wait_pool_limit(),
        }
    }
}

impl RhalConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let config: RhalConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("using default configuration ({}): {}", path, e);
                Self::default()
            }
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        if let Some(alignment) = self.software.row_alignment {
            if alignment == 0 || !alignment.is_power_of_two() {
                return Err(CoreError::Config(format!(
                    "software.row_alignment must be a power of two, got {}",
                    alignment
                )));
            }
        }
        Ok(())
    }
}

/// Returns the default config file path based on platform conventions.
/// Search order:
/// 1. System-wide config: `%PROGRAMDATA%\RHAL\rhal.toml` (Windows) or `/etc/rhal/rhal.toml` (Linux/macOS)
/// 2. Local fallback: `./rhal.toml`
pub fn default_config_path() -> String {
    #[cfg(windows)]
    {
        let programdata = std::env::var("PROGRAMDATA")
            .unwrap_or_else(|_| r"C:\ProgramData".to_string());
        let system_path = format!(r"{}\RHAL\rhal.toml", programdata);
        if std::path::Path::new(&system_path).exists() {
            return system_path;
        }
    }
    #[cfg(not(windows))]
    {
        let system_path = "/etc/rhal/rhal.toml";
        if std::path::Path::new(system_path).exists() {
            return system_path.to_string();
        }
    }
    "rhal.toml".to_string()
}

fn default_wait_pool_limit() -> usize {
    32
}
