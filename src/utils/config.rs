use crate::utils::error::{SwarmError, SwarmResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Process-wide configuration for the swarm kernel.
///
/// Loaded once from a JSON document and handed to the components that
/// need each section. Components never reach for globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub token_budget: TokenBudgetConfig,
    pub consensus: ConsensusConfig,
    pub heartbeat: HeartbeatConfig,
    pub pattern: PatternConfig,
    pub predictive: PredictiveConfig,
    pub patterns_storage: PatternStorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBudgetConfig {
    /// Global token ceiling shared by all swarms.
    pub total_budget: u64,
    /// Global WARNING threshold (absolute tokens).
    pub warning_threshold_1: u64,
    /// Global CRITICAL threshold (absolute tokens).
    pub warning_threshold_2: u64,
    /// Default per-swarm allocation when none is requested.
    pub default_swarm_limit: u64,
    /// Headroom that can never be allocated.
    pub reserve_buffer: u64,
    pub enable_auto_rebalance: bool,
    pub enable_warnings: bool,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            total_budget: 200_000,
            warning_threshold_1: 150_000,
            warning_threshold_2: 180_000,
            default_swarm_limit: 50_000,
            reserve_buffer: 10_000,
            enable_auto_rebalance: true,
            enable_warnings: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// `quorum`, `weighted`, or `byzantine`.
    pub default_algorithm: String,
    pub threshold: f64,
    pub default_timeout_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            default_algorithm: "quorum".to_string(),
            threshold: 0.5,
            default_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    /// Missed intervals before an agent is considered failed.
    pub failure_threshold: u32,
    pub history_size: usize,
    pub check_interval_ms: u64,
    /// When false, an agent with no heartbeat yet reports Unknown
    /// instead of Healthy.
    pub initial_state_healthy: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            failure_threshold: 3,
            history_size: 100,
            check_interval_ms: 1_000,
            initial_state_healthy: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub min_occurrences: usize,
    pub confidence_threshold: f64,
    pub match_threshold: f64,
    pub sequence_length: usize,
    pub correlation_window_ms: i64,
    pub max_sequence_length: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_occurrences: 3,
            confidence_threshold: 0.6,
            match_threshold: 0.8,
            sequence_length: 3,
            correlation_window_ms: 5_000,
            max_sequence_length: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictiveConfig {
    /// Minimum prediction confidence that triggers preventive healing.
    pub confidence_threshold: f64,
    pub auto_apply: bool,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            auto_apply: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternStorageConfig {
    pub enabled: bool,
    /// Root directory; memory files live under `<root>/memory/`,
    /// pattern files under `<root>/patterns/`.
    pub root: String,
    pub retention_days: u32,
    pub compression_threshold_days: u32,
}

impl Default for PatternStorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: ".swarmflow".to_string(),
            retention_days: 90,
            compression_threshold_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            token_budget: TokenBudgetConfig::default(),
            consensus: ConsensusConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            pattern: PatternConfig::default(),
            predictive: PredictiveConfig::default(),
            patterns_storage: PatternStorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SwarmConfig {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file is absent. Unknown keys are ignored; known keys override
    /// defaults section by section.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SwarmResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("Config file not found: {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|e| SwarmError::Configuration {
                reason: format!("{}: {}", path.display(), e),
            })?;

        config.validate()?;
        tracing::info!(
            "Loaded config from {}: total_budget={}",
            path.display(),
            config.token_budget.total_budget
        );
        Ok(config)
    }

    /// Load from environment with `SWARMFLOW_CONFIG` naming the file.
    pub fn from_env() -> SwarmResult<Self> {
        match env::var("SWARMFLOW_CONFIG") {
            Ok(path) => Self::from_file(path),
            Err(_) => {
                let mut config = Self::default();
                if let Ok(level) = env::var("SWARMFLOW_LOG") {
                    config.logging.level = level;
                }
                Ok(config)
            }
        }
    }

    pub fn validate(&self) -> SwarmResult<()> {
        if self.token_budget.reserve_buffer >= self.token_budget.total_budget {
            return Err(SwarmError::Configuration {
                reason: "reserve_buffer must be smaller than total_budget".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.consensus.threshold) {
            return Err(SwarmError::Configuration {
                reason: format!(
                    "consensus.threshold must be 0.0-1.0, got {}",
                    self.consensus.threshold
                ),
            });
        }
        if self.heartbeat.interval_ms < 100 {
            return Err(SwarmError::Configuration {
                reason: "heartbeat.interval_ms must be >= 100".to_string(),
            });
        }
        if self.heartbeat.failure_threshold < 1 {
            return Err(SwarmError::Configuration {
                reason: "heartbeat.failure_threshold must be >= 1".to_string(),
            });
        }
        if self.heartbeat.check_interval_ms < 100 {
            return Err(SwarmError::Configuration {
                reason: "heartbeat.check_interval_ms must be >= 100".to_string(),
            });
        }
        Ok(())
    }
}
