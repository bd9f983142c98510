use fairfound_agents::api::{JobManager, JobRequest};
use fairfound_agents::config::Config;
use fairfound_agents::{logging, PipelineResult};
use serde_json::{json, Value};
use std::time::Duration;

#[allow(dead_code)]
pub mod test_helpers {
    use super::*;

    /// Default config with retries that do not sleep
    pub fn fast_config() -> Config {
        let mut config = Config::default();
        config.orchestrator.base_delay_ms = 0;
        config.orchestrator.max_delay_ms = 0;
        config
    }

    pub fn create_test_manager() -> JobManager {
        JobManager::new(fast_config()).unwrap()
    }

    /// A complete junior profile
    pub fn sample_profile() -> Value {
        json!({
            "form_fields": {
                "name": "Ada",
                "email": "ada@example.com",
                "title": "Frontend Developer",
                "skills": ["JavaScript", "React", "CSS", "TypeScript", "Jest", "Git"],
                "experience_years": 1.5,
                "hourly_rate": 35,
                "project_count": 4,
                "has_live_demos": true
            },
            "cv_data": {
                "skills": ["HTML", "Tailwind"],
                "experience_years": 1.5
            },
            "github_data": {
                "public_repos": 8,
                "total_stars": 12,
                "recent_active_repos": 3,
                "contributions_last_year": 150
            },
            "portfolio_data": {
                "quality_score": 0.5,
                "has_descriptions": true,
                "has_code_links": true
            }
        })
    }

    /// Two years of experience and nothing collected from GitHub or a portfolio
    pub fn lopsided_profile() -> Value {
        json!({
            "form_fields": {
                "name": "Grace",
                "skills": ["JavaScript", "HTML", "CSS"],
                "experience_years": 2
            }
        })
    }

    pub async fn run_profile(manager: &JobManager, user_id: &str, input: Value) -> PipelineResult {
        let job_id = manager
            .submit_job(JobRequest {
                user_id: user_id.to_string(),
                input,
            })
            .await
            .unwrap();
        manager.wait_for(&job_id, Duration::from_secs(30)).await.unwrap()
    }

    pub fn setup_test_logger() {
        logging::init_for_tests();
    }
}
