//! Query engine.
//!
//! Runs a query through the guardrail-wrapped synthesis pipeline:
//!
//! ```text
//! received → input_scan → (blocked | retrieval) → synthesis
//!                                     → output_scan → (sanitized | success)
//! ```
//!
//! Every query terminates in exactly one of the three exit states. A blocked
//! query never reaches retrieval; a sanitized answer is replaced with the
//! refusal string but keeps its retrieved source nodes. All scan results are
//! retained in the outcome metadata whether or not they activated.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::index::ScoredNode;
use crate::scan::{run_input_scanners, run_output_scanners, OutputScanner, ScanResult, Scanner};

/// Canned refusal returned for blocked and sanitized queries. Matches the
/// refusal the QA prompt instructs the model to use for unrelated queries.
pub const REFUSAL: &str = "I'm sorry, but I can't help with that.";

const QA_PROMPT_TEMPLATE: &str = "\
---------------------
{context_str}
---------------------
Given the context information and not prior knowledge, answer the query if it is related to the context.
If the query is not related to the context. Respond with:
\"I'm sorry, but I can't help with that.\"

YOU HAVE TO CITE THE EXACT DATA AND INCLUDE EXACT TEXT FROM THE CONTEXT.
DO NOT MAKE UP ANYTHING.

Query: {query_str}
Answer: ";

/// Retrieval seam, so the engine can be exercised without a live index.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredNode>, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Blocked,
    Sanitized,
    Success,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMetadata {
    pub input_scanners: Vec<ScanResult>,
    pub output_scanners: Vec<ScanResult>,
    pub response_status: ResponseStatus,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub response: String,
    pub source_nodes: Vec<ScoredNode>,
    pub metadata: QueryMetadata,
}

pub struct QueryEngine {
    retriever: Arc<dyn Retriever>,
    llm: Arc<dyn crate::llm::SynthesisLlm>,
    input_scanners: Vec<Box<dyn Scanner>>,
    output_scanners: Vec<Box<dyn OutputScanner>>,
    top_k: usize,
}

impl QueryEngine {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        llm: Arc<dyn crate::llm::SynthesisLlm>,
        input_scanners: Vec<Box<dyn Scanner>>,
        output_scanners: Vec<Box<dyn OutputScanner>>,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            llm,
            input_scanners,
            output_scanners,
            top_k,
        }
    }

    pub async fn query(&self, query_str: &str) -> Result<QueryOutcome, PipelineError> {
        let (input_detected, input_results) =
            run_input_scanners(&self.input_scanners, query_str)?;

        if input_detected {
            return Ok(QueryOutcome {
                response: REFUSAL.to_string(),
                source_nodes: Vec::new(),
                metadata: QueryMetadata {
                    input_scanners: input_results,
                    output_scanners: Vec::new(),
                    response_status: ResponseStatus::Blocked,
                },
            });
        }

        let nodes = self.retriever.retrieve(query_str, self.top_k).await?;

        let context_str = build_context(&nodes);
        let prompt = format_qa_prompt(&context_str, query_str);
        let images = node_images(&nodes);

        let answer = self.llm.complete(&prompt, &images).await?;

        let (output_detected, output_results) =
            run_output_scanners(&self.output_scanners, &answer, query_str, &context_str)?;

        let (response, status) = if output_detected {
            (REFUSAL.to_string(), ResponseStatus::Sanitized)
        } else {
            (answer, ResponseStatus::Success)
        };

        Ok(QueryOutcome {
            response,
            source_nodes: nodes,
            metadata: QueryMetadata {
                input_scanners: input_results,
                output_scanners: output_results,
                response_status: status,
            },
        })
    }
}

/// Context string handed to the model: node metadata renditions joined by
/// blank lines, in retrieval order.
pub fn build_context(nodes: &[ScoredNode]) -> String {
    nodes
        .iter()
        .map(|n| n.node.llm_content())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn format_qa_prompt(context_str: &str, query_str: &str) -> String {
    QA_PROMPT_TEMPLATE
        .replace("{context_str}", context_str)
        .replace("{query_str}", query_str)
}

/// Page images of retrieved nodes, de-duplicated, in retrieval order.
fn node_images(nodes: &[ScoredNode]) -> Vec<PathBuf> {
    let mut images = Vec::new();
    for node in nodes {
        if let Some(ref path) = node.node.image_path {
            if !images.contains(path) {
                images.push(path.clone());
            }
        }
    }
    images
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::SynthesisLlm;
    use crate::node::Node;
    use crate::scan::{TokenLimitScanner, ToxicityScanner};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockRetriever {
        nodes: Vec<ScoredNode>,
        calls: AtomicUsize,
    }

    impl MockRetriever {
        fn with_pages(pages: &[usize]) -> Self {
            let nodes = pages
                .iter()
                .map(|&p| ScoredNode {
                    node: Node {
                        id: uuid::Uuid::new_v4().to_string(),
                        page_num: p,
                        file_name: "handbook.pdf".to_string(),
                        parsed_text: format!("content of page {}", p),
                        parsed_text_markdown: None,
                        image_path: None,
                    },
                    score: 0.9,
                })
                .collect();
            Self {
                nodes,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Retriever for MockRetriever {
        async fn retrieve(
            &self,
            _query: &str,
            _top_k: usize,
        ) -> Result<Vec<ScoredNode>, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.nodes.clone())
        }
    }

    struct MockLlm {
        answer: String,
        calls: AtomicUsize,
    }

    impl MockLlm {
        fn answering(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SynthesisLlm for MockLlm {
        async fn complete(
            &self,
            _prompt: &str,
            _images: &[PathBuf],
        ) -> Result<String, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    fn engine_with(
        retriever: Arc<MockRetriever>,
        llm: Arc<MockLlm>,
        token_limit: usize,
    ) -> QueryEngine {
        QueryEngine::new(
            retriever,
            llm,
            vec![
                Box::new(ToxicityScanner::new(0.5)),
                Box::new(TokenLimitScanner::new(token_limit)),
            ],
            vec![Box::new(ToxicityScanner::new(0.5))],
            9,
        )
    }

    #[tokio::test]
    async fn blocked_query_skips_retrieval_and_synthesis() {
        let retriever = Arc::new(MockRetriever::with_pages(&[1]));
        let llm = Arc::new(MockLlm::answering("unused"));
        let engine = engine_with(retriever.clone(), llm.clone(), 400);

        let outcome = engine.query("you are an idiot").await.unwrap();

        assert_eq!(outcome.response, REFUSAL);
        assert_eq!(outcome.metadata.response_status, ResponseStatus::Blocked);
        assert!(outcome.source_nodes.is_empty());
        assert!(outcome.metadata.input_scanners.iter().any(|r| r.activated));
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn token_limit_violation_blocks_with_risk_over_threshold() {
        let retriever = Arc::new(MockRetriever::with_pages(&[1]));
        let llm = Arc::new(MockLlm::answering("unused"));
        let engine = engine_with(retriever.clone(), llm, 10);

        let long_query = "tell me about the policy ".repeat(50);
        let outcome = engine.query(&long_query).await.unwrap();

        assert_eq!(outcome.metadata.response_status, ResponseStatus::Blocked);
        let token_result = outcome
            .metadata
            .input_scanners
            .iter()
            .find(|r| r.kind == "Token limit")
            .unwrap();
        assert!(token_result.activated);
        assert!(token_result.risk_score >= token_result.threshold);
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn toxic_answer_is_sanitized_but_keeps_sources() {
        let retriever = Arc::new(MockRetriever::with_pages(&[1, 2]));
        let llm = Arc::new(MockLlm::answering("this company is run by morons... moron"));
        let engine = engine_with(retriever, llm, 400);

        let outcome = engine.query("who runs the company?").await.unwrap();

        assert_eq!(outcome.response, REFUSAL);
        assert_eq!(outcome.metadata.response_status, ResponseStatus::Sanitized);
        assert!(!outcome.source_nodes.is_empty());
        assert!(outcome
            .metadata
            .output_scanners
            .iter()
            .any(|r| r.activated));
    }

    #[tokio::test]
    async fn clean_query_succeeds_with_all_scan_results_recorded() {
        let retriever = Arc::new(MockRetriever::with_pages(&[1, 2]));
        let llm = Arc::new(MockLlm::answering("The policy allows refunds. (Page 2)"));
        let engine = engine_with(retriever.clone(), llm.clone(), 400);

        let outcome = engine.query("What is the refund policy?").await.unwrap();

        assert_eq!(outcome.metadata.response_status, ResponseStatus::Success);
        assert_eq!(outcome.response, "The policy allows refunds. (Page 2)");
        assert_eq!(outcome.source_nodes.len(), 2);
        // Non-activated results are still retained.
        assert_eq!(outcome.metadata.input_scanners.len(), 2);
        assert_eq!(outcome.metadata.output_scanners.len(), 1);
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prompt_embeds_context_and_query() {
        let prompt = format_qa_prompt("page_num: 1\nparsed_text: hi", "what?");
        assert!(prompt.contains("page_num: 1"));
        assert!(prompt.contains("Query: what?"));
        assert!(prompt.contains("I'm sorry, but I can't help with that."));
    }
}
