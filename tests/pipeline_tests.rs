use fairfound_agents::agents::ids;
use fairfound_agents::events::HistoryFilter;
use fairfound_agents::{AgentStatus, EventType, JobStatus, PipelineStatus};
use pretty_assertions::assert_eq;
use serde_json::json;

mod common;
use common::test_helpers::*;

#[tokio::test]
async fn test_full_profile_scores_every_agent() {
    setup_test_logger();
    let manager = create_test_manager();
    let result = run_profile(&manager, "user-1", sample_profile()).await;

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(result.results.len(), 13);
    assert_eq!(result.succeeded, 13);
    let order: Vec<String> = result.results.iter().map(|r| r.agent_id.clone()).collect();
    assert_eq!(order, manager.registry().execution_order().unwrap());

    let aggregate = result.payload(ids::SCORE_AGGREGATOR).unwrap();
    let consensus = result.payload(ids::CONSENSUS_BUILDER).unwrap();
    assert_eq!(result.final_score, consensus["final_score"].as_f64());
    assert!(aggregate["overall_score"].as_f64().unwrap() > 0.35);
    assert!(result
        .payload(ids::IMPROVEMENT_GENERATOR)
        .unwrap()["improvements"]
        .is_array());
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let manager = create_test_manager();
    let result = run_profile(&manager, "user-1", sample_profile()).await;

    let events = manager
        .bus()
        .history(&HistoryFilter::for_job(&result.job_id), 1_000);
    assert_eq!(events.first().unwrap().event_type, EventType::PipelineStarted);
    assert_eq!(events.last().unwrap().event_type, EventType::PipelineCompleted);

    for agent in &result.results {
        let position = |event_type: EventType| {
            events
                .iter()
                .position(|e| e.event_type == event_type && e.agent_id == agent.agent_id)
                .unwrap()
        };
        assert!(position(EventType::AgentStarted) < position(EventType::AgentCompleted));
    }

    let scored = manager
        .bus()
        .history(&HistoryFilter::of_type(EventType::ScoreCalculated), 10);
    assert_eq!(scored.len(), 1);
    assert_eq!(scored[0].job_id.as_deref(), Some(result.job_id.as_str()));
}

#[tokio::test]
async fn test_invalid_form_fails_required_agent_without_retry() {
    let manager = create_test_manager();
    let input = json!({ "form_fields": { "skills": ["React"], "experience_years": "lots" } });
    let result = run_profile(&manager, "user-1", input).await;

    assert_eq!(result.status, PipelineStatus::Failed);
    let form = result.result(ids::FORM_PROCESSOR).unwrap();
    assert_eq!(form.status, AgentStatus::Failed);
    assert_eq!(form.attempts, 1);
    assert!(form.error.as_deref().unwrap().contains("experience_years"));

    // without form or CV data the skill scorer degrades to its fallback
    let skills = result.result(ids::SKILL_SCORER).unwrap();
    assert_eq!(skills.status, AgentStatus::FallbackUsed);
    assert_eq!(skills.attempts, 1);
    assert_eq!(skills.payload["score"], 0.3);
    assert!(skills.error.as_deref().unwrap().contains("no skill data"));
    assert!(result.fallbacks >= 1);
    let health = manager.get_agent_health(ids::SKILL_SCORER).unwrap();
    assert_eq!(health.info.stats.failed, 1);
    assert_eq!(result.results.len(), 13);

    let status = manager.get_job_status(&result.job_id).await.unwrap();
    assert_eq!(status.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_collaborator_error_retries_then_falls_back() {
    let manager = create_test_manager();
    let mut input = sample_profile();
    input["github_data"] = json!({ "error": "rate limited" });
    let result = run_profile(&manager, "user-1", input).await;

    let collector = result.result(ids::GITHUB_COLLECTOR).unwrap();
    assert_eq!(collector.status, AgentStatus::FallbackUsed);
    assert_eq!(collector.attempts, 3);
    assert_eq!(collector.payload["skipped"], true);
    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(result.fallbacks, 1);

    let retries = manager
        .bus()
        .history(&HistoryFilter::of_type(EventType::AgentRetrying), 10);
    assert_eq!(retries.len(), 2);
    let health = manager.get_agent_health(ids::GITHUB_COLLECTOR).unwrap();
    assert_eq!(health.info.stats.failed, 1);
}

#[tokio::test]
async fn test_disabled_evaluator_is_skipped_but_run_completes() {
    let manager = create_test_manager();
    manager.registry().set_enabled(ids::BENCHMARK_AGENT, false).unwrap();
    let result = run_profile(&manager, "user-1", sample_profile()).await;

    assert_eq!(result.status, PipelineStatus::Completed);
    let benchmark = result.result(ids::BENCHMARK_AGENT).unwrap();
    assert_eq!(benchmark.status, AgentStatus::Skipped);
    assert_eq!(benchmark.skip_reason.as_deref(), Some("disabled"));
    // the judge declares a rule-based fallback, so it still runs without the benchmark
    assert_eq!(result.result(ids::LLM_JUDGE).unwrap().status, AgentStatus::Succeeded);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let manager = create_test_manager();
    let job_id = manager
        .submit_job(fairfound_agents::JobRequest {
            user_id: "user-1".to_string(),
            input: sample_profile(),
        })
        .await
        .unwrap();
    let status = manager.cancel_job(&job_id).await.unwrap();
    assert!(matches!(status, JobStatus::Queued | JobStatus::Cancelled | JobStatus::Processing));

    let summary = loop {
        let summary = manager.get_job_status(&job_id).await.unwrap();
        if summary.status.is_terminal() {
            break summary;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    };
    assert_eq!(summary.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_similar_cases_are_found_after_runs() {
    let manager = create_test_manager();
    run_profile(&manager, "user-1", sample_profile()).await;
    run_profile(&manager, "user-2", lopsided_profile()).await;

    let query = json!({
        "skills": ["javascript", "react", "css", "typescript", "jest", "git"],
        "experience_years": 1.5
    });
    let cases = manager.find_similar_cases(&query, Some(ids::SCORE_AGGREGATOR), 5);
    assert!(!cases.is_empty());
    assert_eq!(cases[0].entry.context["user_id"], "user-1");
    assert_eq!(manager.get_memory_stats().total_entries, 2);
}
