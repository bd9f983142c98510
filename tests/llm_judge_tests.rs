use fairfound_agents::agents::ids;
use fairfound_agents::api::JobManager;
use fairfound_agents::config::{Config, LlmConfig};
use fairfound_agents::{AgentStatus, PipelineStatus};
use mockito::{Matcher, Server};
use pretty_assertions::assert_eq;
use serde_json::json;

mod common;
use common::test_helpers::*;

fn llm_config(endpoint: String) -> Config {
    let mut config = fast_config();
    config.judge.llm = Some(LlmConfig {
        endpoint,
        model: "judge-test".to_string(),
        api_key_env: "FAIRFOUND_TEST_KEY_NOT_SET".to_string(),
        timeout_ms: 2_000,
    });
    config
}

fn completion(content: serde_json::Value) -> String {
    json!({ "choices": [{ "message": { "role": "assistant", "content": content.to_string() } }] }).to_string()
}

#[tokio::test]
async fn test_confident_model_reply_ends_loop_early() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_body(Matcher::PartialJson(json!({ "model": "judge-test" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(completion(json!({
            "score": 0.72,
            "confidence": 0.9,
            "summary": "Solid junior profile",
            "strengths": ["React"],
            "areas_for_improvement": ["Testing"],
            "recommendations": ["Add unit tests"]
        })))
        .expect(1)
        .create_async()
        .await;

    let manager = JobManager::new(llm_config(format!("{}/v1/chat/completions", server.url()))).unwrap();
    let result = run_profile(&manager, "user-1", sample_profile()).await;
    mock.assert_async().await;

    let judge = result.payload(ids::LLM_JUDGE).unwrap();
    assert_eq!(judge["judge"], "llm");
    assert_eq!(judge["iterations_used"], 1);
    assert_eq!(judge["threshold_met"], true);
    assert_eq!(judge["evaluation"]["score"], 0.72);
    assert_eq!(judge["evaluation"]["strengths"], json!(["React"]));
    assert_eq!(result.status, PipelineStatus::Completed);
}

#[tokio::test]
async fn test_unavailable_model_falls_back_to_rules() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let manager = JobManager::new(llm_config(format!("{}/v1/chat/completions", server.url()))).unwrap();
    let result = run_profile(&manager, "user-1", sample_profile()).await;
    mock.assert_async().await;

    let judge = result.result(ids::LLM_JUDGE).unwrap();
    assert_eq!(judge.status, AgentStatus::FallbackUsed);
    assert_eq!(judge.attempts, 3);
    assert_eq!(judge.payload["judge"], "rule_based");
    // the judge is optional and the consensus still has its fallback opinion
    assert_eq!(result.status, PipelineStatus::Completed);
    assert!(result.final_score.is_some());
}

#[tokio::test]
async fn test_unreadable_model_reply_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "choices": [{ "message": { "role": "assistant", "content": "I think this profile is fine." } }] })
                .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let manager = JobManager::new(llm_config(format!("{}/v1/chat/completions", server.url()))).unwrap();
    let result = run_profile(&manager, "user-1", sample_profile()).await;
    mock.assert_async().await;

    let judge = result.result(ids::LLM_JUDGE).unwrap();
    assert_eq!(judge.status, AgentStatus::FallbackUsed);
    assert_eq!(judge.attempts, 1);
    assert!(judge.error.as_deref().unwrap().contains("not valid JSON"));
    assert_eq!(judge.payload["judge"], "rule_based");
}
