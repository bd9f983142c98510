mod env_manager;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consensus::ConsensusMethod;
use crate::error::{AgentError, Result};

pub use env_manager::apply_env_overrides;

/// Main configuration struct for the agent core
///
/// Every section falls back to its defaults when missing from the TOML file,
/// so a config file only needs to name the knobs it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default log level when `RUST_LOG` is not set
    pub log_level: String,
    /// Scheduling, retry and timeout settings
    pub orchestrator: OrchestratorConfig,
    /// Event bus settings
    pub events: EventConfig,
    /// Case memory settings
    pub memory: MemoryConfig,
    /// Anomaly detection thresholds
    pub monitoring: MonitoringConfig,
    /// Confidence loop and language-model settings
    pub judge: JudgeConfig,
    /// Consensus defaults
    pub consensus: ConsensusConfig,
    /// Adaptive weight learning settings
    pub learning: LearningConfig,
}

/// Orchestrator scheduling and recovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum attempts per agent, first try included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound for the exponential backoff
    pub max_delay_ms: u64,
    /// Time budget for a single agent attempt
    pub agent_timeout_ms: u64,
    /// Time budget for a whole pipeline run
    pub pipeline_timeout_ms: u64,
    /// Maximum agents dispatched concurrently within one run
    pub max_parallel: usize,
}

/// Event bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Ring buffer size for event history
    pub history_capacity: usize,
}

/// Case memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Cases scoring below this similarity are not returned
    pub similarity_floor: f64,
    /// Experience gap (years) at which the experience similarity reaches zero
    pub experience_span_years: f64,
}

/// Anomaly detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Samples retained per agent
    pub window_size: usize,
    /// Samples required before success-rate and confidence checks fire
    pub min_samples: usize,
    /// Success rate below this raises a warning
    pub warning_success_rate: f64,
    /// Success rate below this raises a critical alert
    pub critical_success_rate: f64,
    /// Mean duration above this raises a warning
    pub duration_ceiling_ms: u64,
    /// Mean confidence below this raises a warning
    pub min_mean_confidence: f64,
}

/// Confidence loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Confidence at which the loop stops refining
    pub confidence_threshold: f64,
    /// Hard cap on judge calls per evaluation
    pub max_iterations: u32,
    /// Temperature of the first judge call
    pub base_temperature: f32,
    /// Temperature increase for each consistency re-ask
    pub temperature_step: f32,
    /// Optional language-model endpoint; rule-based judging when absent
    pub llm: Option<LlmConfig>,
}

/// Language-model endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Chat-completions compatible endpoint URL
    pub endpoint: String,
    /// Model name sent with each request
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Request timeout
    pub timeout_ms: u64,
}

/// Consensus defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Method used when the caller does not pick one
    pub default_method: ConsensusMethod,
    /// Maximum opinions dropped by the debate method
    pub debate_max_rounds: usize,
    /// Debate stops once the score range falls under this value
    pub debate_tolerance: f64,
    /// Agreement below this flags the result as low agreement
    pub low_agreement_threshold: f64,
}

/// Adaptive weight learning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Multiplier applied to the summed review signal
    pub learning_rate: f64,
    /// Lower bound for any component weight before renormalisation
    pub min_weight: f64,
    /// Upper bound for any component weight before renormalisation
    pub max_weight: f64,
    /// Largest change proposed in one learning pass
    pub max_change: f64,
    /// Changes at or below this magnitude are not proposed
    pub min_change: f64,
    /// Reviews required before anything is proposed
    pub min_reviews: usize,
    /// Review count at which a proposal reaches full confidence
    pub full_confidence_reviews: usize,
    /// Default confidence gate for applying proposals
    pub min_apply_confidence: f64,
}

impl Config {
    /// Loads configuration from the default config file location
    ///
    /// If the config file doesn't exist, returns the default configuration.
    /// Environment overrides are applied in both cases.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_path()
            .ok_or_else(|| AgentError::Config("Could not find config directory".into()))?;

        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Applies `FAIRFOUND_*` environment overrides in place
    pub fn apply_env(&mut self) {
        apply_env_overrides(self);
    }

    /// Reads and validates a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file path, if the platform has a config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("fairfound-agents").join("config.toml"))
    }

    /// Rejects settings that would make the core misbehave
    pub fn validate(&self) -> Result<()> {
        let o = &self.orchestrator;
        if o.max_attempts == 0 {
            return Err(AgentError::Config("orchestrator.max_attempts must be at least 1".into()));
        }
        if o.max_parallel == 0 {
            return Err(AgentError::Config("orchestrator.max_parallel must be at least 1".into()));
        }
        if o.base_delay_ms > o.max_delay_ms {
            return Err(AgentError::Config("orchestrator.base_delay_ms exceeds max_delay_ms".into()));
        }
        if self.events.history_capacity == 0 {
            return Err(AgentError::Config("events.history_capacity must be at least 1".into()));
        }
        let m = &self.monitoring;
        if m.window_size == 0 {
            return Err(AgentError::Config("monitoring.window_size must be at least 1".into()));
        }
        if m.critical_success_rate > m.warning_success_rate {
            return Err(AgentError::Config(
                "monitoring.critical_success_rate must not exceed warning_success_rate".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.judge.confidence_threshold) {
            return Err(AgentError::Config("judge.confidence_threshold must be within [0, 1]".into()));
        }
        if self.judge.max_iterations == 0 {
            return Err(AgentError::Config("judge.max_iterations must be at least 1".into()));
        }
        // every judge call of one confidence loop runs inside a single agent attempt
        if let Some(llm) = &self.judge.llm {
            let loop_budget = llm.timeout_ms.saturating_mul(u64::from(self.judge.max_iterations));
            if loop_budget > o.agent_timeout_ms {
                return Err(AgentError::Config(format!(
                    "judge.llm.timeout_ms × judge.max_iterations ({}ms) exceeds orchestrator.agent_timeout_ms ({}ms)",
                    loop_budget, o.agent_timeout_ms
                )));
            }
        }
        let l = &self.learning;
        if l.min_weight > l.max_weight {
            return Err(AgentError::Config("learning.min_weight exceeds max_weight".into()));
        }
        Ok(())
    }

    /// Serializes the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AgentError::Config(e.to_string()))
    }
}

impl OrchestratorConfig {
    /// Per-attempt timeout as a `Duration`
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }

    /// Whole-run timeout as a `Duration`
    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            orchestrator: OrchestratorConfig::default(),
            events: EventConfig::default(),
            memory: MemoryConfig::default(),
            monitoring: MonitoringConfig::default(),
            judge: JudgeConfig::default(),
            consensus: ConsensusConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            agent_timeout_ms: 30_000,
            pipeline_timeout_ms: 120_000,
            max_parallel: 4,
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { history_capacity: 1000 }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            similarity_floor: 0.3,
            experience_span_years: 5.0,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            min_samples: 10,
            warning_success_rate: 0.90,
            critical_success_rate: 0.75,
            duration_ceiling_ms: 5_000,
            min_mean_confidence: 0.70,
        }
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            max_iterations: 3,
            base_temperature: 0.3,
            temperature_step: 0.2,
            llm: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "FAIRFOUND_LLM_API_KEY".to_string(),
            timeout_ms: 8_000,
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            default_method: ConsensusMethod::WeightedAverage,
            debate_max_rounds: 3,
            debate_tolerance: 0.1,
            low_agreement_threshold: 0.7,
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            min_weight: 0.05,
            max_weight: 0.50,
            max_change: 0.05,
            min_change: 0.001,
            min_reviews: 10,
            full_confidence_reviews: 50,
            min_apply_confidence: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() -> Result<()> {
        let config = Config::default();
        config.validate()?;
        assert_eq!(config.orchestrator.max_attempts, 3);
        assert_eq!(config.judge.max_iterations, 3);
        assert!((config.judge.confidence_threshold - 0.8).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[orchestrator]\nmax_attempts = 5\n\n[judge]\nconfidence_threshold = 0.9")?;

        let config = Config::from_file(file.path())?;
        assert_eq!(config.orchestrator.max_attempts, 5);
        assert_eq!(config.orchestrator.max_parallel, 4);
        assert!((config.judge.confidence_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.events.history_capacity, 1000);
        Ok(())
    }

    #[test]
    fn test_validation_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.monitoring.critical_success_rate = 0.95;
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_llm_loop_must_fit_agent_timeout() {
        let mut config = Config::default();
        config.judge.llm = Some(LlmConfig {
            endpoint: "http://localhost:9999/v1/chat/completions".into(),
            ..LlmConfig::default()
        });
        assert!(config.validate().is_ok());

        if let Some(llm) = config.judge.llm.as_mut() {
            llm.timeout_ms = 20_000;
        }
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AgentError::Config(ref m) if m.contains("agent_timeout_ms")));

        config.orchestrator.agent_timeout_ms = 60_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_method_serializes_snake_case() -> Result<()> {
        let text = Config::default().to_toml()?;
        assert!(text.contains("default_method = \"weighted_average\""));
        Ok(())
    }
}
