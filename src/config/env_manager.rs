use std::str::FromStr;

use tracing::warn;

use super::{Config, LlmConfig};

/// Applies `FAIRFOUND_*` environment overrides on top of a loaded config
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(level) = get_env_value("FAIRFOUND_LOG_LEVEL") {
        config.log_level = level;
    }
    if let Some(v) = parse_env("FAIRFOUND_MAX_ATTEMPTS") {
        config.orchestrator.max_attempts = v;
    }
    if let Some(v) = parse_env("FAIRFOUND_AGENT_TIMEOUT_MS") {
        config.orchestrator.agent_timeout_ms = v;
    }
    if let Some(v) = parse_env("FAIRFOUND_PIPELINE_TIMEOUT_MS") {
        config.orchestrator.pipeline_timeout_ms = v;
    }
    if let Some(v) = parse_env("FAIRFOUND_MAX_PARALLEL") {
        config.orchestrator.max_parallel = v;
    }
    if let Some(v) = parse_env("FAIRFOUND_CONFIDENCE_THRESHOLD") {
        config.judge.confidence_threshold = v;
    }
    if let Some(v) = parse_env("FAIRFOUND_MAX_ITERATIONS") {
        config.judge.max_iterations = v;
    }
    if let Some(endpoint) = get_env_value("FAIRFOUND_LLM_ENDPOINT") {
        let llm = config.judge.llm.get_or_insert_with(LlmConfig::default);
        llm.endpoint = endpoint;
    }
    if let Some(model) = get_env_value("FAIRFOUND_LLM_MODEL") {
        if let Some(llm) = config.judge.llm.as_mut() {
            llm.model = model;
        }
    }
}

/// Reads an environment variable, treating empty values as unset
pub fn get_env_value(key: &str) -> Option<String> {
    let value = std::env::var(key).ok()?;
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    let raw = get_env_value(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={}: not a valid value", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_from_environment() {
        std::env::set_var("FAIRFOUND_MAX_PARALLEL", "9");
        std::env::set_var("FAIRFOUND_MAX_ITERATIONS", "not-a-number");
        std::env::set_var("FAIRFOUND_LLM_ENDPOINT", "http://localhost:9999/v1/chat/completions");

        let mut config = Config::default();
        apply_env_overrides(&mut config);

        assert_eq!(config.orchestrator.max_parallel, 9);
        assert_eq!(config.judge.max_iterations, 3);
        assert_eq!(
            config.judge.llm.as_ref().map(|l| l.endpoint.as_str()),
            Some("http://localhost:9999/v1/chat/completions")
        );

        std::env::remove_var("FAIRFOUND_MAX_PARALLEL");
        std::env::remove_var("FAIRFOUND_MAX_ITERATIONS");
        std::env::remove_var("FAIRFOUND_LLM_ENDPOINT");
    }

    #[test]
    fn test_empty_value_is_unset() {
        std::env::set_var("FAIRFOUND_TEST_EMPTY", "");
        assert_eq!(get_env_value("FAIRFOUND_TEST_EMPTY"), None);
    }
}
