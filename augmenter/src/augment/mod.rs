//! The respond loop: policy, working memory, prompt, and utility feedback

pub mod augmenter;
pub mod memory;
pub mod policy;
pub mod utility;

pub use augmenter::{AugmentedResponse, LlmAugmenter};
pub use memory::{previous_attempts_context, Attempt, WorkingMemory};
pub use policy::{Action, Policy, RulePolicy};
pub use utility::{ModelUtility, RuleUtility, UtilityReport, UtilityScorer};
