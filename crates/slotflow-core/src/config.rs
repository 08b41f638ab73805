use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SlotflowError};

/// Top-level configuration for the slotflow engine and binary.
///
/// Loaded from `~/.slotflow/config.toml` by default. Every section falls back
/// to its defaults when omitted, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotflowConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub workout: WorkoutConfig,
}

impl SlotflowConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SlotflowConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        check_unit_interval("router.min_confidence", self.router.min_confidence)?;
        check_unit_interval("extraction.min_confidence", self.extraction.min_confidence)?;
        check_unit_interval(
            "confirmation.min_confidence",
            self.confirmation.min_confidence,
        )?;
        if self.extraction.max_attempts == 0 {
            return Err(SlotflowError::Config(
                "extraction.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.extraction.timeout_ms == 0 || self.persistence.timeout_ms == 0 {
            return Err(SlotflowError::Config(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if !matches!(self.workout.default_weight_unit.as_str(), "lbs" | "kg") {
            return Err(SlotflowError::Config(format!(
                "workout.default_weight_unit must be \"lbs\" or \"kg\", got {:?}",
                self.workout.default_weight_unit
            )));
        }
        if self.session.max_utterance_chars == 0 {
            return Err(SlotflowError::Config(
                "session.max_utterance_chars must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SlotflowError::Config(format!(
            "{} must be within 0.0..=1.0, got {}",
            name, value
        )))
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.slotflow/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minutes without a turn before a session is considered idle.
    pub idle_timeout_minutes: u32,
    /// Longest utterance accepted, in characters.
    pub max_utterance_chars: usize,
    /// Number of recent turns retained per session.
    pub history_turns: usize,
    /// Interval between idle-session sweeps in the binary.
    pub purge_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 30,
            max_utterance_chars: 2000,
            history_turns: 10,
            purge_interval_secs: 60,
        }
    }
}

/// Router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Minimum intent confidence for a domain to be selected.
    pub min_confidence: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
        }
    }
}

/// Retry, timeout and confidence policy applied to every extractor call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Attempts made for transient failures before giving up.
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds.
    pub retry_backoff_ms: u64,
    /// Values extracted below this confidence are discarded.
    pub min_confidence: f32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 8_000,
            max_attempts: 2,
            retry_backoff_ms: 50,
            min_confidence: 0.5,
        }
    }
}

/// When the confirmation step runs before a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationMode {
    /// Every record is read back to the user before it is saved.
    Always,
    /// Only records containing a value below `min_confidence` are read back.
    LowConfidence,
}

/// Confirmation step settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub mode: ConfirmationMode,
    /// Threshold used by [`ConfirmationMode::LowConfidence`].
    pub min_confidence: f32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            mode: ConfirmationMode::Always,
            min_confidence: 0.85,
        }
    }
}

/// Persistence gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Timeout for a single save call in milliseconds.
    pub timeout_ms: u64,
    /// Database file name inside `general.data_dir`.
    pub database_file: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            database_file: "slotflow.db".to_string(),
        }
    }
}

/// Workout domain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkoutConfig {
    /// Unit assumed when a weight is given without one: "lbs" or "kg".
    pub default_weight_unit: String,
}

impl Default for WorkoutConfig {
    fn default() -> Self {
        Self {
            default_weight_unit: "lbs".to_string(),
        }
    }
}
