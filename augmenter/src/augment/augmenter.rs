use std::sync::Arc;
use std::time::Duration;

use augmenter_kg::Evidence;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::memory::{Attempt, WorkingMemory};
use super::policy::{Action, Policy, RulePolicy};
use super::utility::{ModelUtility, RuleUtility, UtilityReport, UtilityScorer};
use crate::adapters::{bounded, Adapters, CompletionAdapter, CompletionOptions};
use crate::chainer::RelevanceJudge;
use crate::config::{AugmentConfig, AugmenterConfig, UtilityMode};
use crate::consolidator::{EvidenceQuery, KnowledgeConsolidator};
use crate::error::{AugmenterError, Issue, Result};
use crate::prompts::PromptEngine;

/// Final answer of the respond loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentedResponse {
    pub response: String,
    pub score: f32,
    /// Whether `score` met the utility threshold
    pub accepted: bool,
    /// Evidence the response was generated from
    pub evidence: Vec<Evidence>,
    pub attempts: Vec<Attempt>,
    /// Consolidation issues
    pub issues: Vec<Issue>,
}

/// Evidence-grounded response generation with utility feedback
pub struct LlmAugmenter {
    consolidator: KnowledgeConsolidator,
    completion: Arc<dyn CompletionAdapter>,
    policy: Arc<dyn Policy>,
    utility: Arc<dyn UtilityScorer>,
    engine: PromptEngine,
    config: AugmentConfig,
    options: CompletionOptions,
    timeout: Duration,
}

impl LlmAugmenter {
    pub fn new(adapters: Adapters, config: &AugmenterConfig) -> Result<Self> {
        config.validate()?;
        let completion = adapters.completion.clone();
        let consolidator = KnowledgeConsolidator::new(adapters, config.pipeline.clone())?;

        let utility: Arc<dyn UtilityScorer> = match config.augment.utility {
            UtilityMode::Rule => Arc::new(RuleUtility::new(config.augment.min_shared_terms)),
            UtilityMode::Model => Arc::new(ModelUtility::new(completion.clone())),
        };
        let engine = config
            .augment
            .instruction
            .as_ref()
            .map(PromptEngine::new)
            .unwrap_or_default();

        Ok(Self {
            consolidator,
            completion,
            policy: Arc::new(RulePolicy::from_config(&config.augment)),
            utility,
            engine,
            config: config.augment.clone(),
            options: config.completion.options.clone(),
            timeout: config.pipeline.adapter_timeout(),
        })
    }

    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_utility(mut self, utility: Arc<dyn UtilityScorer>) -> Self {
        self.utility = utility;
        self
    }

    pub fn with_prompt_engine(mut self, engine: PromptEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_judge(mut self, judge: Arc<dyn RelevanceJudge>) -> Self {
        self.consolidator = self.consolidator.with_judge(judge);
        self
    }

    pub fn consolidator(&self) -> &KnowledgeConsolidator {
        &self.consolidator
    }

    /// Answer `query`, refining the candidate until it meets the utility
    /// threshold or the policy gives up.
    ///
    /// Returns the best-scoring candidate. Fails with
    /// [`AugmenterError::NoResponse`] when no generation succeeded.
    pub async fn respond(
        &self,
        query: &EvidenceQuery,
        cancel: &CancellationToken,
    ) -> Result<AugmentedResponse> {
        let span = tracing::info_span!("respond", request_id = %Uuid::new_v4());
        self.run(query, cancel).instrument(span).await
    }

    async fn run(&self, query: &EvidenceQuery, cancel: &CancellationToken) -> Result<AugmentedResponse> {
        let mut memory = WorkingMemory::new(query.clone());
        let mut last_error: Option<AugmenterError> = None;

        for step in 0..self.config.max_steps {
            if cancel.is_cancelled() {
                return Err(AugmenterError::Cancelled);
            }

            let action = self.policy.next_action(&memory);
            debug!(step, ?action, "Policy decision");

            match action {
                Action::AcquireEvidence => {
                    let consolidation = self.consolidator.consolidate_with_cancel(query, cancel).await?;
                    info!(chains = consolidation.chains.len(), "Evidence acquired");
                    memory.evidence = Some(consolidation);
                }
                Action::GenerateCandidateResponse => match self.generate(&memory, cancel).await {
                    Ok((candidate, report)) => {
                        info!(
                            attempt = memory.attempts.len() + 1,
                            score = report.score,
                            "Candidate scored"
                        );
                        memory.record(candidate, report);
                    }
                    Err(AugmenterError::Cancelled) => return Err(AugmenterError::Cancelled),
                    Err(e) => {
                        warn!(error = %e, "Candidate generation failed");
                        memory.failed_generations += 1;
                        last_error = Some(e);
                    }
                },
                Action::ReturnResponseToUser => break,
            }
        }

        let Some(best) = memory.best() else {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no candidate was generated".to_string());
            return Err(AugmenterError::NoResponse(reason));
        };

        let response = AugmentedResponse {
            response: best.response.clone(),
            score: best.score,
            accepted: best.score >= self.config.utility_threshold,
            evidence: memory.evidence_items(),
            issues: memory
                .evidence
                .as_ref()
                .map(|c| c.issues.clone())
                .unwrap_or_default(),
            attempts: memory.attempts,
        };

        info!(
            attempts = response.attempts.len(),
            score = response.score,
            accepted = response.accepted,
            "Response ready"
        );
        Ok(response)
    }

    async fn generate(
        &self,
        memory: &WorkingMemory,
        cancel: &CancellationToken,
    ) -> Result<(String, UtilityReport)> {
        let evidence = memory.evidence_items();
        let prompt = self.engine.response_prompt(
            &memory.query.text,
            &memory.query.history,
            &evidence,
            &memory.attempts,
        );

        let candidate = bounded(
            "response generation",
            self.timeout,
            cancel,
            self.completion.complete(&prompt, &self.options),
        )
        .await?;
        let candidate = candidate.trim().to_string();

        let report = bounded(
            "utility scoring",
            self.timeout,
            cancel,
            self.utility.score(&memory.query.text, &candidate, &evidence),
        )
        .await?;

        Ok((candidate, report))
    }
}
