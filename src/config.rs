use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LogConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite database path
    pub database_path: PathBuf,

    /// Configuration metadata
    pub metadata: ConfigMetadata,

    /// Personal sleep settings
    pub sleep: SleepSettings,

    /// Ingestion and scheduling settings
    pub sync: SyncSettings,

    /// Recovery baseline settings
    pub baseline: BaselineSettings,

    /// Which provider samples take part in grouping
    pub filter: SampleFilterSettings,

    /// Logging settings
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

/// Personal sleep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepSettings {
    /// Nightly sleep need in hours, the target for the duration score
    pub sleep_need_hours: f64,

    /// Local hour at which one ownership day ends and the next begins
    ///
    /// With 18, the session for March 2nd covers 18:00 March 1st to
    /// 18:00 March 2nd.
    pub day_boundary_hour: u32,
}

/// Ingestion and scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Largest gap in seconds that still joins two samples or periods
    pub merge_gap_seconds: i64,

    /// Minimum spacing between background runs, in seconds
    pub min_resync_interval_seconds: i64,

    /// Upper bound for a single provider fetch, in seconds
    pub fetch_timeout_seconds: u64,

    /// Days of history pulled by a full sync without an explicit range
    pub history_days: i64,
}

/// Recovery baseline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineSettings {
    /// Rolling window of prior sessions, in days
    pub window_days: i64,

    /// Valid historical values required before a baseline is reported
    pub min_valid_samples: usize,
}

/// Sample filter applied before grouping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleFilterSettings {
    /// Accepted source identifier prefixes (health-platform bundles)
    pub bundle_prefixes: Vec<String>,

    /// Accepted device product class prefixes (wearables)
    pub product_classes: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let now = Utc::now();

        AppConfig {
            database_path: default_data_dir().join("sleeprs.db"),
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            sleep: SleepSettings::default(),
            sync: SyncSettings::default(),
            baseline: BaselineSettings::default(),
            filter: SampleFilterSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for SleepSettings {
    fn default() -> Self {
        SleepSettings {
            sleep_need_hours: 8.0,
            day_boundary_hour: 18,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            merge_gap_seconds: 900,
            min_resync_interval_seconds: 300,
            fetch_timeout_seconds: 30,
            history_days: 365,
        }
    }
}

impl Default for BaselineSettings {
    fn default() -> Self {
        BaselineSettings {
            window_days: 90,
            min_valid_samples: 7,
        }
    }
}

impl Default for SampleFilterSettings {
    fn default() -> Self {
        SampleFilterSettings {
            bundle_prefixes: vec!["com.apple.health".to_string()],
            product_classes: vec!["Watch".to_string()],
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sleeprs")
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sleeprs")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::debug!(
                    path = %config_path.display(),
                    error = %err,
                    "Config file not loaded, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(self.sleep.sleep_need_hours > 0.0 && self.sleep.sleep_need_hours <= 24.0) {
            bail!(
                "sleep_need_hours must be within (0, 24], got {}",
                self.sleep.sleep_need_hours
            );
        }
        if self.sleep.day_boundary_hour > 23 {
            bail!(
                "day_boundary_hour must be within 0-23, got {}",
                self.sleep.day_boundary_hour
            );
        }
        if self.sync.merge_gap_seconds < 0 {
            bail!("merge_gap_seconds must not be negative");
        }
        if self.sync.fetch_timeout_seconds == 0 {
            bail!("fetch_timeout_seconds must be positive");
        }
        if self.sync.history_days <= 0 || self.baseline.window_days <= 0 {
            bail!("history_days and window_days must be positive");
        }
        if self.baseline.min_valid_samples < 2 {
            bail!("min_valid_samples must be at least 2 for a sample standard deviation");
        }
        Ok(())
    }

    /// Sleep need in seconds
    pub fn target_sleep_seconds(&self) -> f64 {
        self.sleep.sleep_need_hours * 3600.0
    }
}
