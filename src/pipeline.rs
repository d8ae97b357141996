//! Pipeline orchestrator.
//!
//! Owns the vector index, the response cache, the ingested-files registry,
//! and the query engine, and exposes the two public operations: [`ingest`]
//! and [`query`]. Constructed explicitly once at startup and shared via
//! `Arc` — there is no global state.
//!
//! The index sits behind a readers-writer lock: queries retrieve under a
//! read lock, ingestion inserts and persists under a write lock. If
//! persistence fails, the in-memory inserts are discarded by reloading the
//! last persisted state, so memory never drifts ahead of disk.
//!
//! [`ingest`]: Pipeline::ingest
//! [`query`]: Pipeline::query

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::cache::{CachedAnswer, ResponseCache};
use crate::config::Config;
use crate::embedding::{cosine_similarity, create_provider, EmbeddingProvider};
use crate::engine::{QueryEngine, ResponseStatus, Retriever};
use crate::error::PipelineError;
use crate::index::{IndexEntry, ScoredNode, VectorIndex};
use crate::llm::{GeminiClient, SynthesisLlm};
use crate::node::build_nodes;
use crate::parse::{create_parser, DocumentParser};
use crate::registry::IngestedFilesRegistry;
use crate::scan::{OutputScanner, Scanner, TokenLimitScanner, ToxicityScanner};

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub files_found: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub files_ingested: usize,
    pub nodes_added: usize,
}

pub struct Pipeline {
    storage_dir: PathBuf,
    data_dir: PathBuf,
    image_dir: PathBuf,
    max_metadata_len: usize,
    public_base_url: String,
    index: Arc<RwLock<VectorIndex>>,
    cache: ResponseCache,
    registry: IngestedFilesRegistry,
    parser: Box<dyn DocumentParser>,
    embedder: Arc<dyn EmbeddingProvider>,
    engine: QueryEngine,
}

/// Retrieval over the shared index: embeds the query and ranks entries by
/// cosine similarity under a read lock.
struct IndexRetriever {
    index: Arc<RwLock<VectorIndex>>,
    embedder: Arc<dyn EmbeddingProvider>,
}

#[async_trait]
impl Retriever for IndexRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredNode>, PipelineError> {
        let query_vec = self.embedder.embed_one(query).await?;
        let index = self.index.read().await;
        Ok(index.retrieve(&query_vec, top_k))
    }
}

impl Pipeline {
    /// Build the pipeline with the providers named in the configuration.
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        let parser = create_parser(&config.ingest)?;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let llm: Arc<dyn SynthesisLlm> = Arc::new(GeminiClient::new(&config.llm)?);
        Self::with_components(config, parser, embedder, llm)
    }

    /// Build the pipeline with injected components. Used by tests and by
    /// callers that bring their own parser/embedder/model.
    pub fn with_components(
        config: &Config,
        parser: Box<dyn DocumentParser>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn SynthesisLlm>,
    ) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(&config.storage.dir)?;
        std::fs::create_dir_all(&config.ingest.image_dir)?;

        let index = Arc::new(RwLock::new(VectorIndex::load(&config.storage.dir)));
        let cache = ResponseCache::new(config.cache.dir.clone(), config.cache.ttl_secs)?;
        let registry = IngestedFilesRegistry::new(&config.storage.dir);

        let retriever = Arc::new(IndexRetriever {
            index: index.clone(),
            embedder: embedder.clone(),
        });

        let input_scanners: Vec<Box<dyn Scanner>> = vec![
            Box::new(ToxicityScanner::new(config.scanners.toxicity_threshold)),
            Box::new(TokenLimitScanner::new(config.scanners.token_limit)),
        ];
        let output_scanners: Vec<Box<dyn OutputScanner>> = vec![Box::new(ToxicityScanner::new(
            config.scanners.toxicity_threshold,
        ))];

        let engine = QueryEngine::new(
            retriever,
            llm,
            input_scanners,
            output_scanners,
            config.retrieval.top_k,
        );

        Ok(Self {
            storage_dir: config.storage.dir.clone(),
            data_dir: config.ingest.data_dir.clone(),
            image_dir: config.ingest.image_dir.clone(),
            max_metadata_len: config.ingest.max_metadata_len,
            public_base_url: config.server.public_base_url.clone(),
            index,
            cache,
            registry,
            parser,
            embedder,
            engine,
        })
    }

    pub async fn node_count(&self) -> usize {
        self.index.read().await.len()
    }

    /// Ingest every PDF in the data directory that is not already in the
    /// registry. Per-file failures are logged and skipped; the remaining
    /// files still ingest. A directory with zero PDFs is a no-op.
    pub async fn ingest(&self) -> Result<IngestSummary, PipelineError> {
        let pdf_files = list_pdf_files(&self.data_dir)?;
        let mut summary = IngestSummary {
            files_found: pdf_files.len(),
            ..Default::default()
        };

        if pdf_files.is_empty() {
            info!(dir = %self.data_dir.display(), "no pdf files found");
            return Ok(summary);
        }

        let mut ingested = self.registry.load()?;
        let mut new_entries: Vec<IndexEntry> = Vec::new();
        let mut new_paths: Vec<String> = Vec::new();

        for file in &pdf_files {
            let path_str = file.display().to_string();
            if ingested.contains(&path_str) {
                info!(file = %path_str, "skipping already ingested file");
                summary.files_skipped += 1;
                continue;
            }

            info!(file = %path_str, "processing file");
            match self.ingest_file(file).await {
                Ok(entries) => {
                    summary.files_ingested += 1;
                    summary.nodes_added += entries.len();
                    new_entries.extend(entries);
                    new_paths.push(path_str);
                }
                Err(e) => {
                    warn!(file = %path_str, error = %e, "skipping file after ingestion failure");
                    summary.files_failed += 1;
                }
            }
        }

        if !new_entries.is_empty() {
            let mut index = self.index.write().await;
            index.insert(new_entries);
            if let Err(e) = index.persist(&self.storage_dir) {
                // Persist-or-discard: reload the last good on-disk state so
                // the in-memory index never drifts ahead of disk.
                *index = VectorIndex::load(&self.storage_dir);
                return Err(e);
            }
            drop(index);

            ingested.extend(new_paths);
            self.registry.record(&ingested)?;
            info!(nodes = summary.nodes_added, "index persisted");
        }

        Ok(summary)
    }

    async fn ingest_file(&self, file: &Path) -> Result<Vec<IndexEntry>, PipelineError> {
        let parsed = self.parser.parse(file).await?;

        let markdown = if parsed.markdown_pages.is_empty() {
            None
        } else {
            Some(parsed.markdown_pages.as_slice())
        };

        let mut nodes = build_nodes(
            &parsed.text_docs,
            Some(&self.image_dir),
            markdown,
            self.max_metadata_len,
        )?;

        let file_name = file.display().to_string();
        for node in &mut nodes {
            node.file_name = file_name.clone();
        }

        let texts: Vec<String> = nodes.iter().map(|n| n.llm_content()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != nodes.len() {
            return Err(PipelineError::Embedding(format!(
                "expected {} embeddings, got {}",
                nodes.len(),
                embeddings.len()
            )));
        }

        Ok(nodes
            .into_iter()
            .zip(embeddings)
            .map(|(node, embedding)| IndexEntry { node, embedding })
            .collect())
    }

    /// Answer a question. Checks the cache first; on a miss runs the query
    /// engine, scores confidence, builds source citations, and caches the
    /// triple. Internal failures never propagate: they come back as an
    /// error-text answer with confidence 0 and no sources.
    pub async fn query(&self, question: &str) -> CachedAnswer {
        if let Some(hit) = self.cache.get(question) {
            info!("loading response from cache");
            return hit;
        }

        match self.run_query(question).await {
            Ok(answer) => {
                self.cache.set(question, &answer);
                answer
            }
            Err(e) => {
                error!(question, error = %e, "query failed");
                CachedAnswer {
                    response: format!("Error processing query: {}", e),
                    confidence: 0.0,
                    source_files: Vec::new(),
                }
            }
        }
    }

    async fn run_query(&self, question: &str) -> Result<CachedAnswer, PipelineError> {
        let outcome = self.engine.query(question).await?;

        let confidence = match outcome.metadata.response_status {
            ResponseStatus::Success => self.confidence_score(&outcome.response).await,
            _ => 0.0,
        };

        let source_files = build_citations(&outcome.source_nodes, &self.public_base_url);

        Ok(CachedAnswer {
            response: outcome.response,
            confidence,
            source_files,
        })
    }

    /// Grounding estimate for an answer: mean cosine similarity between the
    /// answer embedding and the stored embeddings of nodes whose pages the
    /// answer cites as `(Page N)`. No citations → 0.0. A scoring failure is
    /// logged and reported as 0.0, never as a query failure.
    async fn confidence_score(&self, response: &str) -> f64 {
        let cited_pages = parse_cited_pages(response);
        if cited_pages.is_empty() {
            return 0.0;
        }

        let cited_embeddings: Vec<Vec<f32>> = {
            let index = self.index.read().await;
            index
                .entries()
                .iter()
                .filter(|entry| cited_pages.contains(&entry.node.page_num))
                .map(|entry| entry.embedding.clone())
                .collect()
        };

        if cited_embeddings.is_empty() {
            return 0.0;
        }

        let response_embedding = match self.embedder.embed_one(response).await {
            Ok(vec) => vec,
            Err(e) => {
                warn!(error = %e, "confidence scoring failed");
                return 0.0;
            }
        };

        let sum: f64 = cited_embeddings
            .iter()
            .map(|emb| cosine_similarity(&response_embedding, emb) as f64)
            .sum();
        sum / cited_embeddings.len() as f64
    }
}

/// PDF files directly under `dir`, sorted by path. A missing directory
/// counts as empty, matching the zero-PDFs no-op contract.
fn list_pdf_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();

    files.sort();
    Ok(files)
}

/// Page numbers cited in the answer text as `(Page N)`.
fn parse_cited_pages(text: &str) -> HashSet<usize> {
    let mut pages = HashSet::new();
    let mut rest = text;
    while let Some(pos) = rest.find("(Page ") {
        rest = &rest[pos + "(Page ".len()..];
        if let Some(end) = rest.find(')') {
            if let Ok(page) = rest[..end].trim().parse::<usize>() {
                pages.insert(page);
            }
        }
    }
    pages
}

/// Human-readable source citations, one per retrieved node, de-duplicated
/// in retrieval order. Nodes with a page image get a URL under the static
/// images route.
fn build_citations(nodes: &[ScoredNode], public_base_url: &str) -> Vec<String> {
    let base = public_base_url.trim_end_matches('/');
    let mut citations = Vec::new();

    for scored in nodes {
        let node = &scored.node;
        let file_base = Path::new(&node.file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| node.file_name.clone());

        let entry = match node.image_path.as_ref().and_then(|p| p.file_name()) {
            Some(image) => format!(
                "Page {} from {}: {}/images/{}",
                node.page_num,
                file_base,
                base,
                image.to_string_lossy()
            ),
            None => format!("Page {} from {}", node.page_num, file_base),
        };

        if !citations.contains(&entry) {
            citations.push(entry);
        }
    }

    citations
}
