//! Document parsing.
//!
//! Turns a source PDF into page-aligned text (and, with the remote provider,
//! per-page markdown plus rendered page images). Any parse failure is
//! per-file: the orchestrator logs it and continues with the remaining
//! files.
//!
//! Providers:
//! - **local** — `pdf_extract` on a blocking task; pages split on form
//!   feeds; no markdown or images are produced (pre-rendered images in the
//!   image directory are still picked up by the node builder).
//! - **remote** — JSON parse-service client authenticated with
//!   `$PARSE_API_KEY`; returns per-page text and markdown and writes
//!   base64-delivered page images into the image directory.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::config::IngestConfig;
use crate::error::PipelineError;
use crate::node::PAGE_DELIMITER;

/// Parsed representation of one source document.
#[derive(Debug, Default)]
pub struct ParseOutput {
    /// Plain-text documents; each splits on the page delimiter into
    /// page-aligned chunks.
    pub text_docs: Vec<String>,
    /// Per-page markdown, when the provider produces it.
    pub markdown_pages: Vec<String>,
}

#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, file: &Path) -> Result<ParseOutput, PipelineError>;
}

/// Instantiate the parser named in the configuration.
pub fn create_parser(config: &IngestConfig) -> Result<Box<dyn DocumentParser>, PipelineError> {
    match config.parser.as_str() {
        "local" => Ok(Box::new(LocalPdfParser)),
        "remote" => {
            let endpoint = config.remote_endpoint.clone().ok_or_else(|| {
                PipelineError::Parse {
                    file: String::new(),
                    reason: "remote parser requires ingest.remote_endpoint".to_string(),
                }
            })?;
            Ok(Box::new(RemoteParser::new(
                endpoint,
                config.image_dir.clone(),
                config.timeout_secs,
            )?))
        }
        other => Err(PipelineError::Parse {
            file: String::new(),
            reason: format!("unknown parser: {}", other),
        }),
    }
}

fn parse_error(file: &Path, reason: impl Into<String>) -> PipelineError {
    PipelineError::Parse {
        file: file.display().to_string(),
        reason: reason.into(),
    }
}

// ============ Local parser ============

/// Extracts text with `pdf_extract`, splitting pages on the form feeds the
/// extractor emits between pages.
pub struct LocalPdfParser;

#[async_trait]
impl DocumentParser for LocalPdfParser {
    async fn parse(&self, file: &Path) -> Result<ParseOutput, PipelineError> {
        let path = file.to_path_buf();

        // pdf_extract is CPU-bound and synchronous; keep it off the runtime.
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
            .await
            .map_err(|e| parse_error(file, e.to_string()))?
            .map_err(|e| parse_error(file, e.to_string()))?;

        let pages: Vec<&str> = text
            .split('\u{c}')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        debug!(file = %file.display(), pages = pages.len(), "parsed pdf locally");

        // Join pages with the page delimiter so the node builder sees the
        // same chunk layout as remote-parsed documents.
        let doc = pages.join(&format!("\n{}\n", PAGE_DELIMITER));

        Ok(ParseOutput {
            text_docs: vec![doc],
            markdown_pages: Vec::new(),
        })
    }
}

// ============ Remote parser ============

#[derive(Serialize)]
struct RemoteParseRequest {
    file_name: String,
    content_base64: String,
}

#[derive(Deserialize)]
struct RemoteParseResponse {
    pages: Vec<RemotePage>,
    #[serde(default)]
    images: Vec<RemoteImage>,
}

#[derive(Deserialize)]
struct RemotePage {
    text: String,
    #[serde(default)]
    markdown: String,
}

#[derive(Deserialize)]
struct RemoteImage {
    file_name: String,
    content_base64: String,
}

/// Client for an external parse service that renders page images and
/// markdown alongside plain text.
pub struct RemoteParser {
    endpoint: String,
    image_dir: PathBuf,
    client: reqwest::Client,
    api_key: String,
}

impl RemoteParser {
    pub fn new(
        endpoint: String,
        image_dir: PathBuf,
        timeout_secs: u64,
    ) -> Result<Self, PipelineError> {
        let api_key = std::env::var("PARSE_API_KEY").map_err(|_| PipelineError::Parse {
            file: String::new(),
            reason: "PARSE_API_KEY not set".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::Parse {
                file: String::new(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            endpoint,
            image_dir,
            client,
            api_key,
        })
    }
}

#[async_trait]
impl DocumentParser for RemoteParser {
    async fn parse(&self, file: &Path) -> Result<ParseOutput, PipelineError> {
        let bytes = std::fs::read(file).map_err(|e| parse_error(file, e.to_string()))?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let request = RemoteParseRequest {
            file_name,
            content_base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
        };

        let response = self
            .client
            .post(format!("{}/parse", self.endpoint.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| parse_error(file, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error(
                file,
                format!("parse service error {}: {}", status, body),
            ));
        }

        let parsed: RemoteParseResponse = response
            .json()
            .await
            .map_err(|e| parse_error(file, e.to_string()))?;

        std::fs::create_dir_all(&self.image_dir)
            .map_err(|e| parse_error(file, e.to_string()))?;
        for image in &parsed.images {
            let data = base64::engine::general_purpose::STANDARD
                .decode(&image.content_base64)
                .map_err(|e| parse_error(file, e.to_string()))?;
            std::fs::write(self.image_dir.join(&image.file_name), data)
                .map_err(|e| parse_error(file, e.to_string()))?;
        }

        let doc = parsed
            .pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(&format!("\n{}\n", PAGE_DELIMITER));

        let markdown_pages = parsed.pages.into_iter().map(|p| p.markdown).collect();

        Ok(ParseOutput {
            text_docs: vec![doc],
            markdown_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_pdf_is_a_recoverable_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();

        let err = LocalPdfParser.parse(&path).await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn remote_response_deserializes() {
        let json = r##"{
            "pages": [
                { "text": "page one", "markdown": "# page one" },
                { "text": "page two" }
            ],
            "images": [
                { "file_name": "doc-page-1.jpg", "content_base64": "aW1n" }
            ]
        }"##;
        let parsed: RemoteParseResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.pages.len(), 2);
        assert_eq!(parsed.pages[1].markdown, "");
        assert_eq!(parsed.images[0].file_name, "doc-page-1.jpg");
    }
}
