use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding the database, lock file, config and exports.
pub const TICKETDROP_DIR: &str = ".ticketdrop";

/// Project configuration loaded from `.ticketdrop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// IANA zone used to resolve ticket dates and local timestamps.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Fixed value of the export `Company` column.
    #[serde(default = "default_company")]
    pub company: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            company: default_company(),
        }
    }
}

impl DispatchConfig {
    /// Parse the configured zone.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid dispatch timezone '{}': {e}", self.timezone))
    }
}

/// Reference lists that creation-stage validation resolves against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceConfig {
    #[serde(default)]
    pub customers: Vec<String>,
    #[serde(default)]
    pub drivers: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub trucks: Vec<String>,
    #[serde(default)]
    pub trailers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Actual volume above this many units warns.
    #[serde(default = "default_volume_warning_threshold")]
    pub volume_warning_threshold: u32,
    /// Deviation from the estimated volume, in percent, that warns.
    #[serde(default = "default_volume_deviation_pct")]
    pub volume_deviation_pct: u32,
    /// T4 − T1 longer than this many hours warns.
    #[serde(default = "default_max_shift_hours")]
    pub max_shift_hours: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            volume_warning_threshold: default_volume_warning_threshold(),
            volume_deviation_pct: default_volume_deviation_pct(),
            max_shift_hours: default_max_shift_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: default_base_backoff_ms(),
            max_attempts: default_max_attempts(),
            drain_interval_ms: default_drain_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Relative paths resolve against the project root.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

/// Well-known locations under a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
}

impl ProjectPaths {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn dir(&self) -> PathBuf {
        self.root.join(TICKETDROP_DIR)
    }

    #[must_use]
    pub fn config(&self) -> PathBuf {
        self.dir().join("config.toml")
    }

    #[must_use]
    pub fn database(&self) -> PathBuf {
        self.dir().join("tickets.db")
    }

    #[must_use]
    pub fn lock(&self) -> PathBuf {
        self.dir().join("lock")
    }

    /// Export directory from config, anchored at the root when relative.
    #[must_use]
    pub fn exports(&self, config: &ExportConfig) -> PathBuf {
        if config.output_dir.is_absolute() {
            config.output_dir.clone()
        } else {
            self.root.join(&config.output_dir)
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.dir().is_dir()
    }
}

pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = ProjectPaths::new(project_root).config();
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config.dispatch.tz()?;
    Ok(config)
}

/// Render the default config as TOML, used by `td init`.
pub fn default_config_toml() -> Result<String> {
    toml::to_string_pretty(&ProjectConfig::default()).context("Failed to serialize default config")
}

fn default_timezone() -> String {
    "America/Edmonton".to_string()
}

fn default_company() -> String {
    "Rick's Oilfield Hauling".to_string()
}

const fn default_volume_warning_threshold() -> u32 {
    500
}

const fn default_volume_deviation_pct() -> u32 {
    20
}

const fn default_max_shift_hours() -> u32 {
    24
}

const fn default_base_backoff_ms() -> u64 {
    1000
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_drain_interval_ms() -> u64 {
    5000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(TICKETDROP_DIR).join("exports")
}
