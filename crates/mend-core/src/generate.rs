//! Candidate fix generation.
//!
//! Strategy order, each attempted until one returns a usable patch:
//! (a) a learned pattern with confidence at or above the floor,
//! (b) the model prompted with the project's relevant expert guides,
//! (c) the model prompted with only the issue and a file slice.
//!
//! The model vendor is a collaborator behind [`ModelClient`]; the core
//! only requires "prompt in, completion out".

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use mend_state::{ExpertGuide, ExpertKind, GeneratorKind, Issue, PatternStore};

use crate::context::{Clock as _, ServiceContext};
use crate::error::{MendError, Result};
use crate::verify::Patch;

/// Pattern confidence floor for strategy (a).
pub const PATTERN_CONFIDENCE_FLOOR: f64 = 0.75;

/// Raw confidence assigned when the model does not report one.
const EXPERT_BASE_CONFIDENCE: f64 = 0.7;
const MODEL_BASE_CONFIDENCE: f64 = 0.6;

/// Lines of context around the issue line included in prompts.
const SLICE_CONTEXT: u32 = 10;

/// Generative model client. Vendor-neutral: prompt in, completion out.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// HTTP-backed model client (`MODEL_API_KEY` bearer auth).
pub struct HttpModelClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpModelClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Completion {
            completion: String,
        }

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "prompt": prompt }))
            .timeout(Duration::from_secs(55))
            .send()
            .await
            .map_err(|e| MendError::Transient(format!("model request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(MendError::Transient(format!(
                "model returned {}",
                response.status()
            )));
        }

        let body: Completion = response
            .json()
            .await
            .map_err(|e| MendError::Transient(format!("model response unreadable: {e}")))?;
        Ok(body.completion)
    }
}

/// Scripted model for tests: pops queued responses, then repeats the last.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
        }
    }

    /// A model that always returns the same completion.
    pub fn always(response: impl Into<String>) -> Self {
        let response = response.into();
        Self {
            responses: Mutex::new(VecDeque::new()),
            last: Mutex::new(Some(response)),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        let mut responses = self.responses.lock().unwrap();
        if let Some(next) = responses.pop_front() {
            *self.last.lock().unwrap() = Some(next.clone());
            return Ok(next);
        }
        self.last
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| MendError::Transient("scripted model exhausted".to_string()))
    }
}

/// Closure-backed model for tests needing side effects.
pub struct FnModel<F>(pub F);

#[async_trait]
impl<F> ModelClient for FnModel<F>
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    async fn complete(&self, prompt: &str) -> Result<String> {
        (self.0)(prompt)
    }
}

/// A generated candidate plus bookkeeping for later stages.
#[derive(Debug, Clone)]
pub struct GeneratedFix {
    pub generator: GeneratorKind,
    pub patch_json: String,
    /// Self-reported confidence, calibrated by stage 5.
    pub raw_confidence: f64,
    /// Expert guides consulted, for learning updates.
    pub consulted: Vec<ExpertKind>,
}

/// Model completions may wrap the patch with a confidence estimate.
#[derive(Deserialize)]
struct ModelReply {
    patch: Patch,
    confidence: Option<f64>,
}

/// Parse a model completion into (patch json, self-reported confidence).
fn parse_completion(text: &str) -> Option<(String, Option<f64>)> {
    if let Ok(reply) = serde_json::from_str::<ModelReply>(text) {
        return Some((reply.patch.to_json(), reply.confidence));
    }
    if let Ok(patch) = Patch::parse(text) {
        return Some((patch.to_json(), None));
    }
    None
}

/// C6: produces candidate patches via the strategy cascade.
pub struct FixGenerator;

impl FixGenerator {
    /// Run the cascade. `Ok(None)` means every strategy came up empty and
    /// the orchestrator should defer; `Err(Transient)` means retry later.
    pub async fn generate(
        ctx: &ServiceContext,
        issue: &Issue,
        guides: &[ExpertGuide],
        file_content: &str,
    ) -> Result<Option<GeneratedFix>> {
        // (a) learned pattern
        let pattern = ctx
            .store
            .lookup_usable(&issue.fingerprint, PATTERN_CONFIDENCE_FLOOR)
            .await?;
        if let Some(pattern) = pattern {
            let best_fix = pattern
                .best_fix
                .expect("lookup_usable only returns patterns with a fix body");
            debug!(fingerprint = %issue.fingerprint.short(), "pattern strategy hit");
            return Ok(Some(GeneratedFix {
                generator: GeneratorKind::Pattern,
                patch_json: best_fix,
                raw_confidence: pattern.confidence,
                consulted: Vec::new(),
            }));
        }

        // (b) expert-guided model
        if !guides.is_empty() {
            Self::check_rate_limit(ctx).await?;
            let prompt = Self::expert_prompt(issue, guides, file_content);
            let completion = ctx.model.complete(&prompt).await?;
            if let Some((patch_json, confidence)) = parse_completion(&completion) {
                return Ok(Some(GeneratedFix {
                    generator: GeneratorKind::Expert,
                    patch_json,
                    raw_confidence: confidence.unwrap_or(EXPERT_BASE_CONFIDENCE),
                    consulted: guides.iter().map(|g| g.kind.clone()).collect(),
                }));
            }
            debug!("expert strategy returned no usable patch");
        }

        // (c) bare model
        Self::check_rate_limit(ctx).await?;
        let prompt = Self::bare_prompt(issue, file_content);
        let completion = ctx.model.complete(&prompt).await?;
        if let Some((patch_json, confidence)) = parse_completion(&completion) {
            return Ok(Some(GeneratedFix {
                generator: GeneratorKind::Model,
                patch_json,
                raw_confidence: confidence.unwrap_or(MODEL_BASE_CONFIDENCE),
                consulted: Vec::new(),
            }));
        }

        Ok(None)
    }

    /// Pause generation when the shared per-minute window is exhausted.
    ///
    /// The counter lives in the cache; with the cache down every worker
    /// sees count 1 and generation proceeds unthrottled, which is the
    /// documented degraded mode.
    async fn check_rate_limit(ctx: &ServiceContext) -> Result<()> {
        let minute = ctx.clock.now().format("%Y%m%d%H%M");
        let key = format!("model-rate:{minute}");
        let count = ctx.cache.incr(&key, Duration::from_secs(60)).await;
        if count > ctx.config.model_rate_limit_per_min {
            return Err(MendError::Transient("model rate-limited".to_string()));
        }
        Ok(())
    }

    fn file_slice(issue: &Issue, content: &str) -> String {
        let lines: Vec<&str> = content.lines().collect();
        let lo = issue.line.saturating_sub(SLICE_CONTEXT + 1) as usize;
        let hi = ((issue.line + SLICE_CONTEXT) as usize).min(lines.len());
        lines[lo..hi]
            .iter()
            .enumerate()
            .map(|(i, l)| format!("{:>4} | {l}", lo + i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn expert_prompt(issue: &Issue, guides: &[ExpertGuide], content: &str) -> String {
        let guide_bodies = guides
            .iter()
            .map(|g| format!("## {}\n{}", g.kind, g.body))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "Project guidance:\n{guide_bodies}\n\n\
             Defect ({kind}, {severity}) at {path}:{line}: {message}\n\n\
             File slice:\n{slice}\n\n\
             Reply with JSON {{\"patch\": {{\"hunks\": [...]}}, \"confidence\": 0.0-1.0}}.",
            kind = issue.kind,
            severity = issue.severity,
            path = issue.path,
            line = issue.line,
            message = issue.message,
            slice = Self::file_slice(issue, content),
        )
    }

    fn bare_prompt(issue: &Issue, content: &str) -> String {
        format!(
            "Defect ({kind}, {severity}) at {path}:{line}: {message}\n\n\
             File slice:\n{slice}\n\n\
             Reply with JSON {{\"patch\": {{\"hunks\": [...]}}, \"confidence\": 0.0-1.0}}.",
            kind = issue.kind,
            severity = issue.severity,
            path = issue.path,
            line = issue.line,
            message = issue.message,
            slice = Self::file_slice(issue, content),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::Patch;

    #[test]
    fn test_parse_wrapped_completion() {
        let text = r#"{"patch": {"hunks": [{"start_line": 1, "line_count": 1, "replacement": "x"}]}, "confidence": 0.9}"#;
        let (patch_json, confidence) = parse_completion(text).unwrap();
        assert_eq!(confidence, Some(0.9));
        assert!(Patch::parse(&patch_json).is_ok());
    }

    #[test]
    fn test_parse_bare_patch_completion() {
        let text = r#"{"hunks": [{"start_line": 2, "line_count": 1, "replacement": "y"}]}"#;
        let (patch_json, confidence) = parse_completion(text).unwrap();
        assert_eq!(confidence, None);
        assert!(Patch::parse(&patch_json).is_ok());
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(parse_completion("sorry, I cannot help").is_none());
        assert!(parse_completion("{\"hunks\": []}").is_none());
    }

    #[tokio::test]
    async fn test_scripted_model_pops_then_repeats() {
        let model = ScriptedModel::new(vec!["a".into(), "b".into()]);
        assert_eq!(model.complete("p").await.unwrap(), "a");
        assert_eq!(model.complete("p").await.unwrap(), "b");
        assert_eq!(model.complete("p").await.unwrap(), "b");
    }
}
