//! LLM goal enhancer
//!
//! Best-effort rephrasing of candidate `goal` / `rationale` text. Any
//! failure returns the rule-based candidates untouched with a
//! [`FallbackReason`]. The enhancer never changes intent, risk,
//! confidence or source, and recomputes the signature of every goal
//! whose text it edits.

use crate::api::TextCompletion;
use crate::config::EnhancerConfig;
use crate::error::{EnhancerError, FallbackReason};
use async_trait::async_trait;
use autogoal_types::{AutonomousGoalCandidate, GoalSignalSnapshot};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You rewrite operational goals for an L2 node operator. \
Keep each goal actionable and specific. Do not change what the goal does. \
Reply with JSON only: {\"candidates\":[{\"index\":0,\"goal\":\"...\",\"rationale\":\"...\"}]}";

static FENCED_JSON: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").ok());

/// Result of an enhancement attempt
#[derive(Debug, Clone)]
pub enum EnhancementOutcome {
    Enhanced(Vec<AutonomousGoalCandidate>),
    Fallback(FallbackReason),
}

#[derive(Debug, Serialize)]
struct PromptCandidate<'a> {
    index: usize,
    goal: &'a str,
    rationale: &'a str,
    intent: &'a str,
    risk: &'a str,
}

#[derive(Debug, Deserialize)]
struct EnhancementResponse {
    #[serde(default)]
    candidates: Vec<Rewrite>,
}

#[derive(Debug, Deserialize)]
struct Rewrite {
    index: usize,
    goal: String,
    #[serde(default)]
    rationale: Option<String>,
}

/// Rephrases candidates through a [`TextCompletion`] backend
pub struct GoalEnhancer {
    client: Arc<dyn TextCompletion>,
}

impl std::fmt::Debug for GoalEnhancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoalEnhancer").finish_non_exhaustive()
    }
}

impl GoalEnhancer {
    #[inline]
    #[must_use]
    pub fn new(client: Arc<dyn TextCompletion>) -> Self {
        Self { client }
    }

    /// Build an enhancer from config; `None` when no API key is set
    pub fn from_config(config: &EnhancerConfig) -> Result<Option<Self>, EnhancerError> {
        match OpenAiCompatibleCompletion::from_config(config) {
            Ok(client) => Ok(Some(Self::new(Arc::new(client)))),
            Err(EnhancerError::MissingApiKey) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn enhance(
        &self,
        candidates: &[AutonomousGoalCandidate],
        snapshot: &GoalSignalSnapshot,
        now: DateTime<Utc>,
    ) -> EnhancementOutcome {
        if candidates.is_empty() {
            return EnhancementOutcome::Fallback(FallbackReason::EmptyResponse);
        }
        match self.try_enhance(candidates, snapshot, now).await {
            Ok(rewritten) => {
                tracing::debug!(count = rewritten.len(), "goal text enhanced");
                EnhancementOutcome::Enhanced(rewritten)
            }
            Err(error) => {
                let reason = error.fallback_reason();
                tracing::warn!(%reason, %error, "goal enhancer fell back to rule text");
                EnhancementOutcome::Fallback(reason)
            }
        }
    }

    async fn try_enhance(
        &self,
        candidates: &[AutonomousGoalCandidate],
        snapshot: &GoalSignalSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<AutonomousGoalCandidate>, EnhancerError> {
        let prompt = build_prompt(candidates, snapshot)?;
        let raw = self.client.complete(SYSTEM_PROMPT, &prompt).await?;
        let response = parse_response(&raw)?;
        apply_rewrites(candidates, response.candidates, &snapshot.chain_type, now)
    }
}

fn build_prompt(candidates: &[AutonomousGoalCandidate], snapshot: &GoalSignalSnapshot) -> Result<String, EnhancerError> {
    let listed: Vec<_> = candidates
        .iter()
        .enumerate()
        .map(|(index, c)| PromptCandidate {
            index,
            goal: &c.goal,
            rationale: &c.rationale,
            intent: c.intent.as_str(),
            risk: c.risk.as_str(),
        })
        .collect();
    let json = serde_json::to_string(&listed).map_err(|e| EnhancerError::Parse(e.to_string()))?;
    Ok(format!(
        "Snapshot: {}\nCandidates: {json}\nRephrase goal and rationale for each index.",
        snapshot.summary()
    ))
}

fn parse_response(raw: &str) -> Result<EnhancementResponse, EnhancerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnhancerError::EmptyResponse);
    }
    let body = FENCED_JSON
        .as_ref()
        .and_then(|re| re.captures(trimmed))
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str());
    serde_json::from_str(body).map_err(|e| EnhancerError::Parse(e.to_string()))
}

fn apply_rewrites(
    candidates: &[AutonomousGoalCandidate],
    rewrites: Vec<Rewrite>,
    chain_type: &str,
    now: DateTime<Utc>,
) -> Result<Vec<AutonomousGoalCandidate>, EnhancerError> {
    if rewrites.is_empty() {
        return Err(EnhancerError::EmptyResponse);
    }
    let mut out = candidates.to_vec();
    let mut applied = 0_usize;
    for rewrite in rewrites {
        let goal = rewrite.goal.trim();
        let Some(target) = out.get_mut(rewrite.index) else { continue };
        if goal.is_empty() {
            continue;
        }
        let rationale = rewrite
            .rationale
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| target.rationale.clone());
        target.rephrase(chain_type, goal, rationale, now);
        applied += 1;
    }
    if applied == 0 {
        return Err(EnhancerError::Parse("no rewrite matched a candidate index".to_string()));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// OpenAI-compatible transport
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for any OpenAI-compatible endpoint
#[derive(Clone)]
pub struct OpenAiCompatibleCompletion {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for OpenAiCompatibleCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleCompletion")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatibleCompletion {
    pub fn from_config(config: &EnhancerConfig) -> Result<Self, EnhancerError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(EnhancerError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EnhancerError::Request(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl TextCompletion for OpenAiCompatibleCompletion {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, EnhancerError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.2,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| EnhancerError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnhancerError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| EnhancerError::Parse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(EnhancerError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autogoal_types::{
        CandidateId, CandidateStatus, GoalIntent, GoalRisk, GoalSignature, GoalSource,
    };

    struct Canned(Result<String, fn() -> EnhancerError>);

    #[async_trait]
    impl TextCompletion for Canned {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, EnhancerError> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn enhancer(reply: &str) -> GoalEnhancer {
        GoalEnhancer::new(Arc::new(Canned(Ok(reply.to_string()))))
    }

    fn candidate(goal: &str) -> AutonomousGoalCandidate {
        let now = Utc::now();
        AutonomousGoalCandidate {
            id: CandidateId::new(),
            created_at: now,
            updated_at: now,
            source: GoalSource::Metrics,
            status: CandidateStatus::Candidate,
            goal: goal.to_string(),
            intent: GoalIntent::Stabilize,
            risk: GoalRisk::High,
            confidence: 0.76,
            signature: GoalSignature::compute("optimism", GoalSource::Metrics, GoalIntent::Stabilize, goal),
            rationale: "cpu high".to_string(),
            signal_snapshot_id: "snap".to_string(),
            score: None,
            suppression_reason_code: None,
            metadata: None,
        }
    }

    fn snapshot() -> GoalSignalSnapshot {
        GoalSignalSnapshot::new("snap", "optimism", Utc::now())
    }

    #[tokio::test]
    async fn fenced_reply_rewrites_text_and_signature_only() {
        let original = candidate("Stabilize load");
        let reply = "Sure:\n```json\n{\"candidates\":[{\"index\":0,\"goal\":\"Scale sequencer replicas\",\"rationale\":\"cpu at 86%\"}]}\n```";

        let outcome = enhancer(reply).enhance(&[original.clone()], &snapshot(), Utc::now()).await;
        let EnhancementOutcome::Enhanced(out) = outcome else {
            panic!("expected enhancement");
        };

        assert_eq!(out[0].goal, "Scale sequencer replicas");
        assert_eq!(out[0].rationale, "cpu at 86%");
        assert_ne!(out[0].signature, original.signature);
        assert_eq!(out[0].intent, original.intent);
        assert_eq!(out[0].risk, original.risk);
        assert_eq!(out[0].confidence, original.confidence);
        assert_eq!(out[0].source, original.source);
    }

    #[tokio::test]
    async fn bare_json_is_accepted_and_missing_rationale_kept() {
        let reply = r#"{"candidates":[{"index":0,"goal":"Drain txpool backlog"}]}"#;
        let EnhancementOutcome::Enhanced(out) = enhancer(reply)
            .enhance(&[candidate("Stabilize load")], &snapshot(), Utc::now())
            .await
        else {
            panic!("expected enhancement");
        };
        assert_eq!(out[0].rationale, "cpu high");
    }

    #[tokio::test]
    async fn garbage_reply_falls_back_with_parse_failed() {
        let outcome = enhancer("I cannot help with that")
            .enhance(&[candidate("Stabilize load")], &snapshot(), Utc::now())
            .await;
        assert!(matches!(outcome, EnhancementOutcome::Fallback(FallbackReason::ParseFailed)));
    }

    #[tokio::test]
    async fn empty_candidate_list_falls_back() {
        let outcome = enhancer(r#"{"candidates":[]}"#)
            .enhance(&[candidate("Stabilize load")], &snapshot(), Utc::now())
            .await;
        assert!(matches!(outcome, EnhancementOutcome::Fallback(FallbackReason::EmptyResponse)));
    }

    #[tokio::test]
    async fn out_of_range_indexes_are_a_parse_failure() {
        let outcome = enhancer(r#"{"candidates":[{"index":7,"goal":"x"}]}"#)
            .enhance(&[candidate("Stabilize load")], &snapshot(), Utc::now())
            .await;
        assert!(matches!(outcome, EnhancementOutcome::Fallback(FallbackReason::ParseFailed)));
    }

    #[tokio::test]
    async fn transport_error_falls_back_with_request_failed() {
        let failing = GoalEnhancer::new(Arc::new(Canned(Err(|| EnhancerError::Request("refused".into())))));
        let outcome = failing.enhance(&[candidate("Stabilize load")], &snapshot(), Utc::now()).await;
        assert!(matches!(outcome, EnhancementOutcome::Fallback(FallbackReason::RequestFailed)));
    }

    #[test]
    fn config_without_key_builds_no_enhancer() {
        assert!(GoalEnhancer::from_config(&EnhancerConfig::default()).unwrap().is_none());
    }

    #[test]
    fn config_with_key_builds_endpoint() {
        let config = EnhancerConfig {
            base_url: "http://localhost:8080/v1/".into(),
            api_key: Some("sk-test".into()),
            ..EnhancerConfig::default()
        };
        let client = OpenAiCompatibleCompletion::from_config(&config).unwrap();
        assert_eq!(client.endpoint, "http://localhost:8080/v1/chat/completions");
    }
}
