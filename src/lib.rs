#![doc = include_str!("../README.md")]
#![warn(clippy::all)]

//! Fairfound Agents - orchestration and learning core for explainable profile scoring
//!
//! This library runs a set of analysis agents over a freelancer profile in
//! dependency order and combines their outputs into one explainable score.
//!
//! ## Features
//! - Capability/dependency registry with deterministic topological planning
//! - Orchestrator with per-agent timeouts, retries, fallbacks and cancellation
//! - Event bus with bounded history
//! - Case memory with similarity retrieval and review outcomes
//! - Rolling-window monitoring with anomaly alerts
//! - Consensus engine and an iterative confidence loop for the judge
//! - Adaptive weight learning from human reviews
//!
//! ## Usage
//! ```rust,no_run
//! use fairfound_agents::api::{JobManager, JobRequest};
//! use fairfound_agents::Config;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! async fn example() -> fairfound_agents::Result<()> {
//!     let manager = JobManager::new(Config::default())?;
//!     let job_id = manager
//!         .submit_job(JobRequest {
//!             user_id: "user-1".to_string(),
//!             input: json!({ "form_fields": { "skills": ["React", "CSS"], "experience_years": 1 } }),
//!         })
//!         .await?;
//!     let result = manager.wait_for(&job_id, Duration::from_secs(30)).await?;
//!     println!("final score: {:?}", result.final_score);
//!     Ok(())
//! }
//! ```

/// Agent trait, context and the built-in agents
pub mod agents;
/// Job manager exposing the operational surface
pub mod api;
/// Configuration loading and validation
pub mod config;
/// Opinion reconciliation
pub mod consensus;
/// Error handling types and utilities
pub mod error;
/// Event bus and lifecycle events
pub mod events;
/// Human-readable score explanations
pub mod explainer;
/// Confidence loop and judges
pub mod judge;
/// Adaptive weight learning
pub mod learning;
/// Logging configuration and utilities
pub mod logging;
/// Case memory
pub mod memory;
/// Pipeline counters and timers
pub mod metrics;
/// Rolling-window monitoring and alerts
pub mod monitoring;
/// Dependency-ordered pipeline execution
pub mod orchestrator;
/// Agent catalog and planning
pub mod registry;
/// Scoring rubric, tiers and benchmarks
pub mod scoring;
/// Utilities (retry helpers)
pub mod utils;

// Re-export common types
pub use agents::{Agent, AgentContext, AgentOutput};
pub use api::{JobManager, JobRequest, JobStatus};
pub use config::Config;
pub use error::{AgentError, Result};
pub use events::{AgentEvent, EventBus, EventType};
pub use orchestrator::{AgentResult, AgentStatus, Orchestrator, PipelineResult, PipelineStatus};
pub use registry::{AgentDescriptor, AgentKind, AgentRegistry};
