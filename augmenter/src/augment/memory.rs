//! Per-request state of the respond loop

use augmenter_kg::Evidence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::utility::UtilityReport;
use crate::consolidator::{Consolidation, EvidenceQuery};

/// One scored candidate response, kept for retry learning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based
    pub number: u32,
    pub response: String,
    pub score: f32,
    pub feedback: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Attempt {
    pub fn new(number: u32, response: String, report: &UtilityReport) -> Self {
        Self {
            number,
            response,
            score: report.score,
            feedback: report.feedback.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Render for inclusion in the next generation prompt
    pub fn as_context(&self) -> String {
        format!(
            "## Previous Attempt #{} ({})\n\n### Response:\n{}\n\n### Feedback (score {:.2}):\n{}\n",
            self.number,
            self.timestamp.format("%Y-%m-%d %H:%M"),
            self.response.trim(),
            self.score,
            self.feedback.as_deref().unwrap_or("No specific feedback.")
        )
    }
}

/// Combined context from all previous attempts
pub fn previous_attempts_context(attempts: &[Attempt]) -> Option<String> {
    if attempts.is_empty() {
        return None;
    }

    let context = attempts
        .iter()
        .map(Attempt::as_context)
        .collect::<Vec<_>>()
        .join("\n---\n\n");

    Some(format!(
        "# Previous Attempts ({} total)\n\nImprove on these responses using their feedback.\n\n{}\n",
        attempts.len(),
        context
    ))
}

#[derive(Debug, Clone)]
pub struct WorkingMemory {
    pub query: EvidenceQuery,
    /// Set once evidence has been acquired, even if empty
    pub evidence: Option<Consolidation>,
    pub candidate: Option<String>,
    pub report: Option<UtilityReport>,
    pub attempts: Vec<Attempt>,
    /// Generation calls that produced no candidate
    pub failed_generations: usize,
}

impl WorkingMemory {
    pub fn new(query: EvidenceQuery) -> Self {
        Self {
            query,
            evidence: None,
            candidate: None,
            report: None,
            attempts: vec![],
            failed_generations: 0,
        }
    }

    pub fn evidence_acquired(&self) -> bool {
        self.evidence.is_some()
    }

    /// Flattened consolidated evidence, empty before acquisition
    pub fn evidence_items(&self) -> Vec<Evidence> {
        self.evidence
            .as_ref()
            .map(Consolidation::evidence)
            .unwrap_or_default()
    }

    /// Generation calls made so far, successful or not
    pub fn generations(&self) -> usize {
        self.attempts.len() + self.failed_generations
    }

    /// Whether the current candidate met `threshold`
    pub fn is_accepted(&self, threshold: f32) -> bool {
        self.candidate.is_some()
            && self
                .report
                .as_ref()
                .is_some_and(|report| report.score >= threshold)
    }

    /// Make `response` the current candidate and remember it as an attempt
    pub fn record(&mut self, response: String, report: UtilityReport) {
        let number = self.attempts.len() as u32 + 1;
        self.attempts.push(Attempt::new(number, response.clone(), &report));
        self.candidate = Some(response);
        self.report = Some(report);
    }

    /// Highest-scoring attempt; the earliest wins ties
    pub fn best(&self) -> Option<&Attempt> {
        self.attempts
            .iter()
            .reduce(|best, next| if next.score > best.score { next } else { best })
    }
}
