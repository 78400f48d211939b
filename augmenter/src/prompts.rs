//! Prompt builders for every completion call the pipeline makes

use std::fmt::Write;

use augmenter_kg::{Evidence, KnowledgeNode};

use crate::augment::{previous_attempts_context, Attempt};

/// Ask for web search queries that would help answer `query`
pub fn search_queries(query: &str, history: &[String]) -> String {
    let mut questions = String::new();
    for turn in history.iter().map(String::as_str).chain(std::iter::once(query)) {
        let turn = turn.trim();
        if !turn.is_empty() {
            questions.push_str(turn);
            questions.push('\n');
        }
    }

    format!(
        "Given the following questions, generate a set of search queries that would be useful to answer them.\n\
         Pretend these queries go into a search engine like Bing or Google. You are looking for relevant information that helps explain your reasoning.\n\
         Only output the queries, one per line. Do not answer the questions.\n\
         Questions:\n{}",
        questions
    )
}

/// Ask for the named entities in `text` that have encyclopedic entries
pub fn extract_entities(text: &str) -> String {
    format!(
        "List the named entities mentioned in the text below that would have their own encyclopedia article \
         (people, places, organizations, works, events).\n\
         Output one entity name per line using its most common full name. Output nothing else.\n\
         Text:\n{}",
        text.trim()
    )
}

/// Yes/no relevance judgement for one graph node
pub fn relevance(node: &KnowledgeNode, query: &str) -> String {
    format!(
        "Question: {}\n\
         Entity: {}\n\
         Description: {}\n\
         Does this entity's description help answer the question? Reply with yes or no only.",
        query.trim(),
        node.entity,
        node.text.trim()
    )
}

/// Ask a judge model to score a candidate response as JSON
pub fn utility(query: &str, candidate: &str, evidence: &[Evidence]) -> String {
    let mut prompt = String::from(
        "Rate how well the response answers the question and whether every claim is supported by the evidence.\n\
         Reply with JSON only: {\"score\": <number between 0 and 1>, \"feedback\": \"<what to fix, or empty>\"}\n\n",
    );

    if !evidence.is_empty() {
        prompt.push_str("Evidence:\n");
        write_evidence(&mut prompt, evidence);
        prompt.push('\n');
    }

    let _ = write!(
        prompt,
        "Question: {}\nResponse: {}\n",
        query.trim(),
        candidate.trim()
    );
    prompt
}

/// Builds the candidate-response prompt from working memory contents
#[derive(Debug, Clone)]
pub struct PromptEngine {
    instruction: String,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self {
            instruction: "You are a helpful assistant. Answer the user's question using the evidence below. \
                          Ground every claim in the evidence and do not add facts it does not support."
                .to_string(),
        }
    }
}

impl PromptEngine {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
        }
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Instruction, evidence, dialog history, earlier feedback, then the query
    pub fn response_prompt(
        &self,
        query: &str,
        history: &[String],
        evidence: &[Evidence],
        attempts: &[Attempt],
    ) -> String {
        let mut prompt = format!("{}\n\n", self.instruction.trim());

        if !evidence.is_empty() {
            prompt.push_str("## Evidence\n");
            write_evidence(&mut prompt, evidence);
            prompt.push('\n');
        }

        if !history.is_empty() {
            prompt.push_str("## Conversation so far\n");
            for turn in history {
                let _ = writeln!(prompt, "- {}", turn.trim());
            }
            prompt.push('\n');
        }

        if let Some(context) = previous_attempts_context(attempts) {
            prompt.push_str(&context);
            prompt.push('\n');
        }

        let _ = write!(prompt, "## Question\n{}\n", query.trim());
        prompt
    }
}

fn write_evidence(out: &mut String, evidence: &[Evidence]) {
    for (i, item) in evidence.iter().enumerate() {
        let _ = writeln!(out, "[{}] {} (source: {})", i + 1, item.text.trim(), item.source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_queries_prompt() {
        let prompt = search_queries(
            "Where was the Eiffel Tower built?",
            &["Tell me about France".to_string()],
        );
        assert!(prompt.contains("one per line"));
        let history_at = prompt.find("Tell me about France").unwrap();
        let query_at = prompt.find("Where was the Eiffel Tower built?").unwrap();
        assert!(history_at < query_at);
    }

    #[test]
    fn test_extract_entities_prompt() {
        let prompt = extract_entities("  The Eiffel Tower is in Paris.  ");
        assert!(prompt.ends_with("Text:\nThe Eiffel Tower is in Paris."));
    }

    #[test]
    fn test_response_prompt_sections() {
        let engine = PromptEngine::default();
        let evidence = vec![Evidence::new("Built in 1889", "https://en.wikipedia.org/wiki/Eiffel_Tower")];
        let prompt = engine.response_prompt(
            "When was it built?",
            &["What is the Eiffel Tower?".to_string()],
            &evidence,
            &[],
        );

        assert!(prompt.starts_with("You are a helpful assistant."));
        assert!(prompt.contains("[1] Built in 1889 (source: https://en.wikipedia.org/wiki/Eiffel_Tower)"));
        assert!(prompt.contains("- What is the Eiffel Tower?"));
        assert!(prompt.ends_with("## Question\nWhen was it built?\n"));
    }

    #[test]
    fn test_response_prompt_without_evidence() {
        let prompt = PromptEngine::new("Answer briefly.").response_prompt("Hi?", &[], &[], &[]);
        assert!(!prompt.contains("## Evidence"));
        assert!(!prompt.contains("## Conversation"));
    }

    #[test]
    fn test_response_prompt_includes_feedback() {
        let report = crate::augment::UtilityReport::new(0.2, Some("Name the architect.".to_string()));
        let attempt = Attempt::new(1, "It is in Paris.".to_string(), &report);
        let prompt = PromptEngine::default().response_prompt("Who built it?", &[], &[], &[attempt]);

        let feedback_at = prompt.find("Name the architect.").unwrap();
        let question_at = prompt.find("## Question").unwrap();
        assert!(feedback_at < question_at);
    }

    #[test]
    fn test_utility_prompt() {
        let prompt = utility("q", "answer", &[Evidence::new("fact", "src")]);
        assert!(prompt.contains("\"score\""));
        assert!(prompt.contains("[1] fact (source: src)"));
        assert!(prompt.contains("Response: answer"));
    }
}
