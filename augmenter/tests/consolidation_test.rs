//! End-to-end knowledge consolidation with in-memory collaborators
//!
//! This test suite verifies:
//! 1. The Eiffel Tower query yields ranked, duplicate-free evidence chains,
//!    with default settings as well as an accept-all judge
//! 2. Failed or slow collaborator calls only cost their own unit
//! 3. Empty retrieval is a valid, empty result
//! 4. Cancellation abandons the request
//! 5. The local tantivy index can stand in for web search

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use augmenter::adapters::{MemoryLookup, MemorySearch, ScriptedCompletion};
use augmenter::chainer::AcceptAll;
use augmenter::search::{EvidenceDocument, LocalSearch};
use augmenter::{
    Adapters, EvidenceQuery, Issue, KnowledgeConsolidator, PipelineConfig, Stage,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const QUERY: &str = "Where was the Eiffel Tower built?";
const SEARCH_QUERY: &str = "Eiffel Tower construction location";
const UNIT: &str = "The Eiffel Tower was built in Paris, France in 1889 by Gustave Eiffel.";

const TOWER_TEXT: &str = "The Eiffel Tower is a wrought-iron lattice tower in Paris, built for the 1889 World's Fair and named after Gustave Eiffel.";
const GUSTAVE_TEXT: &str = "Alexandre Gustave Eiffel was a French civil engineer.";
const PARIS_TEXT: &str = "Paris is the capital and largest city of France.";

const LOUVRE_UNIT: &str = "Paris is home to the Louvre.";
const LOUVRE_TEXT: &str = "The Louvre is the world's most-visited art museum.";

/// Entity extraction replies for the raw unit and every node description
fn with_eiffel_rules(completion: ScriptedCompletion) -> ScriptedCompletion {
    completion
        .on(UNIT, "Eiffel Tower\nParis\nGustave Eiffel")
        .on(TOWER_TEXT, "Paris\nGustave Eiffel")
        .on(GUSTAVE_TEXT, "France")
        .on(PARIS_TEXT, "France")
}

fn eiffel_lookup() -> MemoryLookup {
    MemoryLookup::new()
        .with_entry("Eiffel Tower", TOWER_TEXT, "https://en.wikipedia.org/wiki/Eiffel_Tower")
        .with_entry("Gustave Eiffel", GUSTAVE_TEXT, "https://en.wikipedia.org/wiki/Gustave_Eiffel")
        .with_entry("Paris", PARIS_TEXT, "https://en.wikipedia.org/wiki/Paris")
}

fn adapters(completion: ScriptedCompletion, search: MemorySearch) -> Adapters {
    Adapters::new(Arc::new(completion), Arc::new(search), Arc::new(eiffel_lookup()))
}

fn fast_config() -> Result<PipelineConfig> {
    Ok(PipelineConfig::builder()
        .adapter_timeout(Duration::from_millis(200))
        .build()?)
}

fn chain_names(consolidation: &augmenter::Consolidation) -> Vec<Vec<String>> {
    consolidation
        .chains
        .iter()
        .map(|chain| chain.entities.clone())
        .collect()
}

#[tokio::test]
async fn test_eiffel_tower_chains() -> Result<()> {
    let completion = with_eiffel_rules(
        ScriptedCompletion::new().on("generate a set of search queries", SEARCH_QUERY),
    );
    let search = MemorySearch::new().with_results(SEARCH_QUERY, [UNIT]);

    let consolidator = KnowledgeConsolidator::new(adapters(completion, search), fast_config()?)?
        .with_judge(Arc::new(AcceptAll));
    let consolidation = consolidator.consolidate(&EvidenceQuery::new(QUERY)).await;

    // Gustave Eiffel shares a query term, Paris does not
    assert_eq!(
        chain_names(&consolidation),
        vec![
            vec!["Eiffel Tower".to_string(), "Gustave Eiffel".to_string()],
            vec!["Eiffel Tower".to_string(), "Paris".to_string()],
        ]
    );

    let evidence = consolidation.evidence();
    assert_eq!(evidence.len(), 4);
    assert_eq!(evidence[0].text, TOWER_TEXT);
    assert_eq!(evidence[1].source, "https://en.wikipedia.org/wiki/Gustave_Eiffel");

    let distinct: HashSet<Vec<String>> = chain_names(&consolidation).into_iter().collect();
    assert_eq!(distinct.len(), consolidation.chains.len());

    assert_eq!(consolidation.stats.search_queries, 1);
    assert_eq!(consolidation.stats.raw_evidence, 1);
    assert_eq!(consolidation.stats.nodes, 3);
    assert_eq!(consolidation.stats.edges, 2);
    assert_eq!(consolidation.degradations().count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_eiffel_tower_default_config() -> Result<()> {
    let completion = with_eiffel_rules(
        ScriptedCompletion::new().on("generate a set of search queries", SEARCH_QUERY),
    );
    let search = MemorySearch::new().with_results(SEARCH_QUERY, [UNIT]);

    let consolidator =
        KnowledgeConsolidator::new(adapters(completion, search), PipelineConfig::default())?;
    let consolidation = consolidator.consolidate(&EvidenceQuery::new(QUERY)).await;

    // Paris shares no query term but is a direct successor of the tower
    assert_eq!(
        chain_names(&consolidation),
        vec![
            vec!["Eiffel Tower".to_string(), "Gustave Eiffel".to_string()],
            vec!["Eiffel Tower".to_string(), "Paris".to_string()],
        ]
    );
    assert_eq!(consolidation.evidence().len(), 4);
    assert_eq!(consolidation.stats.pruned, 0);

    Ok(())
}

#[tokio::test]
async fn test_keyword_relevance_prunes_unrelated_nodes() -> Result<()> {
    let completion = with_eiffel_rules(
        ScriptedCompletion::new()
            .on("generate a set of search queries", SEARCH_QUERY)
            .on(LOUVRE_UNIT, "Paris\nLouvre")
            .on(PARIS_TEXT, "France\nLouvre"),
    );
    let search = MemorySearch::new().with_results(SEARCH_QUERY, [UNIT, LOUVRE_UNIT]);
    let lookup = eiffel_lookup().with_entry(
        "Louvre",
        LOUVRE_TEXT,
        "https://en.wikipedia.org/wiki/Louvre",
    );
    let adapters = Adapters::new(Arc::new(completion), Arc::new(search), Arc::new(lookup));

    let consolidator = KnowledgeConsolidator::new(adapters, fast_config()?)?;
    let consolidation = consolidator.consolidate(&EvidenceQuery::new(QUERY)).await;

    // the Louvre is only reachable through Paris and shares no query term
    assert_eq!(consolidation.stats.nodes, 4);
    assert_eq!(consolidation.stats.pruned, 1);
    assert_eq!(
        chain_names(&consolidation),
        vec![
            vec!["Eiffel Tower".to_string(), "Gustave Eiffel".to_string()],
            vec!["Eiffel Tower".to_string(), "Paris".to_string()],
        ]
    );
    assert!(consolidation
        .evidence()
        .iter()
        .all(|item| item.text != LOUVRE_TEXT));

    Ok(())
}

#[tokio::test]
async fn test_failures_are_isolated_per_unit() -> Result<()> {
    const BROKEN_UNIT: &str = "A garbled page that breaks the extractor.";

    let completion = with_eiffel_rules(
        ScriptedCompletion::new()
            .on("generate a set of search queries", "Eiffel Tower construction location\nEiffel Tower history")
            .fail_on(BROKEN_UNIT, "model overloaded"),
    );
    let search = MemorySearch::new()
        .with_results(SEARCH_QUERY, [UNIT, BROKEN_UNIT])
        .fail_on("Eiffel Tower history", "status 503");

    let consolidator = KnowledgeConsolidator::new(adapters(completion, search), fast_config()?)?
        .with_judge(Arc::new(AcceptAll));
    let consolidation = consolidator.consolidate(&EvidenceQuery::new(QUERY)).await;

    assert_eq!(consolidation.chains.len(), 2);
    assert_eq!(consolidation.stats.search_queries, 2);
    assert_eq!(consolidation.stats.raw_evidence, 2);

    assert!(consolidation.issues.iter().any(|issue| matches!(
        issue,
        Issue::AdapterFailure { stage: Stage::Search, unit, .. } if unit == "Eiffel Tower history"
    )));
    assert!(consolidation.issues.iter().any(|issue| matches!(
        issue,
        Issue::AdapterFailure { stage: Stage::Extraction, reason, .. } if reason.contains("model overloaded")
    )));

    Ok(())
}

#[tokio::test]
async fn test_slow_search_times_out() -> Result<()> {
    let completion = with_eiffel_rules(
        ScriptedCompletion::new().on("generate a set of search queries", "slow query\nEiffel Tower construction location"),
    );
    let search = MemorySearch::new()
        .with_results(SEARCH_QUERY, [UNIT])
        .with_results("slow query", ["never seen"])
        .delay_on("slow query", Duration::from_secs(2));

    let config = PipelineConfig::builder()
        .adapter_timeout(Duration::from_millis(50))
        .build()?;
    let consolidator = KnowledgeConsolidator::new(adapters(completion, search), config)?;

    let started = Instant::now();
    let consolidation = consolidator.consolidate(&EvidenceQuery::new(QUERY)).await;
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(consolidation.stats.raw_evidence, 1);
    assert!(!consolidation.is_empty());
    assert!(consolidation.issues.iter().any(|issue| matches!(
        issue,
        Issue::AdapterFailure { stage: Stage::Search, unit, reason } if unit == "slow query" && reason.contains("timed out")
    )));

    Ok(())
}

#[tokio::test]
async fn test_empty_retrieval_is_valid() -> Result<()> {
    let completion = ScriptedCompletion::new().on("generate a set of search queries", "\n  \n");
    let search = MemorySearch::new();

    let consolidator = KnowledgeConsolidator::new(adapters(completion, search), fast_config()?)?;
    let consolidation = consolidator.consolidate(&EvidenceQuery::new(QUERY)).await;

    assert!(consolidation.is_empty());
    assert!(consolidation.evidence().is_empty());
    assert_eq!(consolidation.issues, vec![Issue::NoSearchQueries]);

    Ok(())
}

#[tokio::test]
async fn test_cancellation_abandons_request() -> Result<()> {
    let completion = with_eiffel_rules(
        ScriptedCompletion::new().on("generate a set of search queries", SEARCH_QUERY),
    );
    let search = MemorySearch::new()
        .with_results(SEARCH_QUERY, [UNIT])
        .delay_on(SEARCH_QUERY, Duration::from_secs(5));

    let config = PipelineConfig::builder()
        .adapter_timeout(Duration::from_secs(30))
        .build()?;
    let consolidator = KnowledgeConsolidator::new(adapters(completion, search), config)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = consolidator
        .consolidate_with_cancel(&EvidenceQuery::new(QUERY), &cancel)
        .await;

    assert!(result.is_err_and(|e| e.is_cancelled()));
    assert!(started.elapsed() < Duration::from_secs(5));

    Ok(())
}

#[tokio::test]
async fn test_history_reaches_query_generation() -> Result<()> {
    let completion = Arc::new(ScriptedCompletion::new());
    let adapters = Adapters::new(
        completion.clone(),
        Arc::new(MemorySearch::new()),
        Arc::new(MemoryLookup::new()),
    );
    let consolidator = KnowledgeConsolidator::new(adapters, fast_config()?)?;

    let query = EvidenceQuery::new("When was it built?").with_history(["Tell me about the Eiffel Tower"]);
    consolidator.consolidate(&query).await;

    let prompts = completion.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Tell me about the Eiffel Tower"));
    assert!(prompts[0].contains("When was it built?"));

    Ok(())
}

#[tokio::test]
async fn test_local_index_as_search_adapter() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut index = LocalSearch::open(temp_dir.path().join("index"))?;
    index.index_document(&EvidenceDocument::new(
        "eiffel",
        "Eiffel Tower",
        UNIT,
        "notes/eiffel.txt",
    ))?;
    index.index_document(&EvidenceDocument::new(
        "bread",
        "Baguette",
        "A long thin loaf of French bread.",
        "notes/bread.txt",
    ))?;
    index.commit()?;

    let completion = with_eiffel_rules(
        ScriptedCompletion::new().on("generate a set of search queries", "Eiffel Tower construction"),
    );
    let adapters = Adapters::new(
        Arc::new(completion),
        Arc::new(index.searcher().with_limit(1)),
        Arc::new(eiffel_lookup()),
    );

    let consolidator = KnowledgeConsolidator::new(adapters, fast_config()?)?
        .with_judge(Arc::new(AcceptAll));
    let consolidation = consolidator.consolidate(&EvidenceQuery::new(QUERY)).await;

    assert_eq!(consolidation.stats.raw_evidence, 1);
    assert_eq!(consolidation.chains.len(), 2);
    assert_eq!(consolidation.chains[0].entities[0], "Eiffel Tower");

    Ok(())
}
