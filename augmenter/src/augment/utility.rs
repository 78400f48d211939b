//! Candidate response scoring
//!
//! A [`UtilityScorer`] turns a candidate into a score in `[0, 1]` and
//! optional feedback the next generation can act on.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use augmenter_kg::Evidence;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::{CompletionAdapter, CompletionOptions};
use crate::error::Result;
use crate::prompts;
use crate::text::terms;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilityReport {
    /// 0.0 - 1.0
    pub score: f32,
    pub feedback: Option<String>,
}

impl UtilityReport {
    pub fn new(score: f32, feedback: Option<String>) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            feedback: feedback.filter(|f| !f.trim().is_empty()),
        }
    }
}

#[async_trait]
pub trait UtilityScorer: Send + Sync {
    async fn score(&self, query: &str, candidate: &str, evidence: &[Evidence])
        -> Result<UtilityReport>;
}

/// Grounding rule: every sentence should share terms with the evidence
#[derive(Debug, Clone)]
pub struct RuleUtility {
    min_shared_terms: usize,
}

impl RuleUtility {
    pub fn new(min_shared_terms: usize) -> Self {
        Self {
            min_shared_terms: min_shared_terms.max(1),
        }
    }

    fn grade(&self, candidate: &str, evidence: &[Evidence]) -> UtilityReport {
        if candidate.trim().is_empty() {
            return UtilityReport::new(0.0, Some("The response is empty.".to_string()));
        }
        if evidence.is_empty() {
            return UtilityReport::new(1.0, None);
        }

        let evidence_terms: HashSet<String> =
            evidence.iter().flat_map(|item| terms(&item.text)).collect();

        let mut considered = 0usize;
        let mut ungrounded: Vec<&str> = vec![];
        for sentence in sentences(candidate) {
            let sentence_terms = terms(sentence);
            if sentence_terms.is_empty() {
                continue;
            }
            considered += 1;

            let needed = self.min_shared_terms.min(sentence_terms.len());
            let shared = sentence_terms.intersection(&evidence_terms).count();
            if shared < needed {
                ungrounded.push(sentence);
            }
        }

        if considered == 0 {
            return UtilityReport::new(0.0, Some("The response has no content.".to_string()));
        }

        let score = (considered - ungrounded.len()) as f32 / considered as f32;
        let feedback = (!ungrounded.is_empty()).then(|| {
            let quoted: Vec<String> = ungrounded.iter().map(|s| format!("\"{}\"", s)).collect();
            format!(
                "These sentences are not supported by the evidence: {}. Revise them using only the evidence.",
                quoted.join("; ")
            )
        });

        UtilityReport::new(score, feedback)
    }
}

impl Default for RuleUtility {
    fn default() -> Self {
        Self::new(2)
    }
}

#[async_trait]
impl UtilityScorer for RuleUtility {
    async fn score(
        &self,
        _query: &str,
        candidate: &str,
        evidence: &[Evidence],
    ) -> Result<UtilityReport> {
        Ok(self.grade(candidate, evidence))
    }
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Deserialize)]
struct Verdict {
    score: f32,
    #[serde(default)]
    feedback: Option<String>,
}

/// Completion model acting as judge, replying with `{"score", "feedback"}`
pub struct ModelUtility {
    completion: Arc<dyn CompletionAdapter>,
}

impl ModelUtility {
    pub fn new(completion: Arc<dyn CompletionAdapter>) -> Self {
        Self { completion }
    }
}

#[async_trait]
impl UtilityScorer for ModelUtility {
    async fn score(&self, query: &str, candidate: &str, evidence: &[Evidence]) -> Result<UtilityReport> {
        if candidate.trim().is_empty() {
            return Ok(UtilityReport::new(0.0, Some("The response is empty.".to_string())));
        }

        let prompt = prompts::utility(query, candidate, evidence);
        let reply = self
            .completion
            .complete(&prompt, &CompletionOptions::deterministic())
            .await?;

        Ok(parse_verdict(&reply))
    }
}

/// JSON object embedded in `reply`; unparsable replies score zero
fn parse_verdict(reply: &str) -> UtilityReport {
    let json = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => reply,
    };

    match serde_json::from_str::<Verdict>(json) {
        Ok(verdict) if verdict.score.is_finite() => UtilityReport::new(verdict.score, verdict.feedback),
        Ok(_) => UtilityReport::new(0.0, Some("Utility judge returned a non-finite score.".to_string())),
        Err(e) => {
            debug!(error = %e, "Unparsable utility verdict");
            UtilityReport::new(
                0.0,
                Some(format!("Utility judge reply could not be parsed: {}", e)),
            )
        }
    }
}
