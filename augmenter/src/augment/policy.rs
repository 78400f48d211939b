use serde::{Deserialize, Serialize};

use super::memory::WorkingMemory;
use crate::config::AugmentConfig;

/// What the respond loop does next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    AcquireEvidence,
    GenerateCandidateResponse,
    ReturnResponseToUser,
}

/// Picks the next action from the current working memory
pub trait Policy: Send + Sync {
    fn next_action(&self, memory: &WorkingMemory) -> Action;
}

/// IF-THEN bootstrapping policy.
///
/// Acquire evidence once (when enabled), then generate until a candidate
/// meets the utility threshold or the attempt budget runs out.
#[derive(Debug, Clone)]
pub struct RulePolicy {
    pub acquire_evidence: bool,
    pub max_attempts: usize,
    pub utility_threshold: f32,
}

impl RulePolicy {
    pub fn from_config(config: &AugmentConfig) -> Self {
        Self {
            acquire_evidence: config.acquire_evidence,
            max_attempts: config.max_attempts,
            utility_threshold: config.utility_threshold,
        }
    }
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self::from_config(&AugmentConfig::default())
    }
}

impl Policy for RulePolicy {
    fn next_action(&self, memory: &WorkingMemory) -> Action {
        if self.acquire_evidence && !memory.evidence_acquired() {
            return Action::AcquireEvidence;
        }
        if memory.is_accepted(self.utility_threshold) {
            return Action::ReturnResponseToUser;
        }
        if memory.generations() < self.max_attempts {
            return Action::GenerateCandidateResponse;
        }
        Action::ReturnResponseToUser
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::augment::UtilityReport;
    use crate::consolidator::{Consolidation, EvidenceQuery};

    fn report(score: f32) -> UtilityReport {
        UtilityReport {
            score,
            feedback: None,
        }
    }

    #[test]
    fn test_rule_policy_sequence() {
        let policy = RulePolicy {
            acquire_evidence: true,
            max_attempts: 2,
            utility_threshold: 0.7,
        };
        let mut memory = WorkingMemory::new(EvidenceQuery::new("q"));

        assert_eq!(policy.next_action(&memory), Action::AcquireEvidence);
        memory.evidence = Some(Consolidation::default());

        assert_eq!(policy.next_action(&memory), Action::GenerateCandidateResponse);
        memory.record("weak".to_string(), report(0.3));
        assert_eq!(policy.next_action(&memory), Action::GenerateCandidateResponse);
        memory.record("still weak".to_string(), report(0.5));
        assert_eq!(policy.next_action(&memory), Action::ReturnResponseToUser);
    }

    #[test]
    fn test_rule_policy_returns_on_accept() {
        let policy = RulePolicy::default();
        let mut memory = WorkingMemory::new(EvidenceQuery::new("q"));
        memory.evidence = Some(Consolidation::default());
        memory.record("good".to_string(), report(0.95));

        assert_eq!(policy.next_action(&memory), Action::ReturnResponseToUser);
    }

    #[test]
    fn test_rule_policy_without_evidence() {
        let policy = RulePolicy {
            acquire_evidence: false,
            ..RulePolicy::default()
        };
        let memory = WorkingMemory::new(EvidenceQuery::new("q"));
        assert_eq!(policy.next_action(&memory), Action::GenerateCandidateResponse);
    }

    #[test]
    fn test_failed_generations_count_toward_budget() {
        let policy = RulePolicy {
            acquire_evidence: false,
            max_attempts: 1,
            utility_threshold: 0.5,
        };
        let mut memory = WorkingMemory::new(EvidenceQuery::new("q"));
        memory.failed_generations = 1;
        assert_eq!(policy.next_action(&memory), Action::ReturnResponseToUser);
    }
}
