use std::io;
use thiserror::Error;

/// Custom result type alias for the agent core
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors raised by the registry, orchestrator, memory and learning components
#[derive(Debug, Error)]
pub enum AgentError {
    /// Planning failed before any agent was executed
    #[error("Planning error: {0}")]
    Planning(String),

    /// The dependency graph contains a cycle; the path lists the agents on it
    #[error("Cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// An agent declares a dependency that is not registered
    #[error("Agent '{agent}' depends on unknown agent '{dependency}'")]
    MissingDependency {
        /// Agent declaring the dependency
        agent: String,
        /// The dependency that could not be resolved
        dependency: String,
    },

    /// An agent with the same id is already registered
    #[error("Duplicate agent id: {0}")]
    DuplicateId(String),

    /// Lookup of an agent id that was never registered
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// Upstream collaborator unavailable or flaky
    #[error("Transient failure: {0}")]
    Transient(String),

    /// A single agent attempt exceeded its time budget
    #[error("Agent '{agent}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Agent that timed out
        agent: String,
        /// The timeout that was applied
        timeout_ms: u64,
    },

    /// Malformed input to an agent or to the service
    #[error("Validation error: {0}")]
    Validation(String),

    /// Retries exhausted and no fallback declared
    #[error("Fallback exhausted: {0}")]
    FallbackExhausted(String),

    /// Lookup of a memory entry, job or similar record that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attempt to record a second outcome on a memory entry
    #[error("Outcome already recorded for entry {0}")]
    AlreadyRecorded(String),

    /// The run was cancelled by the caller or by the pipeline timeout
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Language-model collaborator errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON parsing/serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP errors from the completion client
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AgentError {
    /// Checks if this error is transient and retryable
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) | Self::Timeout { .. } | Self::Llm(_) | Self::Io(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.status().map_or(true, |s| s.is_server_error()),
            _ => false,
        }
    }

    /// Checks if this error aborts a pipeline before any agent runs
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Planning(_) | Self::CyclicDependency(_) | Self::MissingDependency { .. }
        )
    }
}
