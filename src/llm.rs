//! Multimodal synthesis client.
//!
//! Single point of entry for answer generation. Wraps the Gemini
//! `generateContent` API: the formatted QA prompt plus the page images of
//! the retrieved nodes go in as one multimodal request. Every call carries a
//! bounded timeout; a timed-out request surfaces as a distinct error rather
//! than hanging the query.

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::config::LlmConfig;
use crate::error::PipelineError;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Answer synthesis over a prompt and a set of page images.
#[async_trait]
pub trait SynthesisLlm: Send + Sync {
    async fn complete(&self, prompt: &str, images: &[PathBuf]) -> Result<String, PipelineError>;
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inline_data")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Serialize)]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

pub struct GeminiClient {
    model: String,
    timeout_secs: u64,
    client: reqwest::Client,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, PipelineError> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| PipelineError::Llm("GOOGLE_API_KEY not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Llm(e.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
            client,
            api_key,
        })
    }

    fn build_parts(&self, prompt: &str, images: &[PathBuf]) -> Vec<GeminiPart> {
        let mut parts = vec![GeminiPart::Text {
            text: prompt.to_string(),
        }];

        for image in images {
            // A missing image file degrades the answer, not the query.
            match std::fs::read(image) {
                Ok(bytes) => parts.push(GeminiPart::InlineData {
                    inline_data: GeminiInlineData {
                        mime_type: mime_for(image),
                        data: base64::engine::general_purpose::STANDARD.encode(bytes),
                    },
                }),
                Err(e) => {
                    warn!(image = %image.display(), error = %e, "skipping unreadable page image");
                }
            }
        }

        parts
    }
}

fn mime_for(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png".to_string(),
        _ => "image/jpeg".to_string(),
    }
}

#[async_trait]
impl SynthesisLlm for GeminiClient {
    async fn complete(&self, prompt: &str, images: &[PathBuf]) -> Result<String, PipelineError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: self.build_parts(prompt, images),
            }],
        };

        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::LlmTimeout(self.timeout_secs)
                } else {
                    PipelineError::Llm(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Llm(format!(
                "Gemini API error {}: {}",
                status, body
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Llm(e.to_string()))?;

        extract_text(&json)
            .ok_or_else(|| PipelineError::Llm("empty model response".to_string()))
    }
}

/// Pull the first text part out of a `generateContent` response.
fn extract_text(json: &serde_json::Value) -> Option<String> {
    let text = json
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_from_candidates() {
        let json = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "The refund policy " },
                        { "text": "is 30 days. (Page 2)" }
                    ]
                }
            }]
        });
        assert_eq!(
            extract_text(&json).unwrap(),
            "The refund policy is 30 days. (Page 2)"
        );
    }

    #[test]
    fn empty_candidates_yield_none() {
        let json = serde_json::json!({ "candidates": [] });
        assert!(extract_text(&json).is_none());
    }

    #[test]
    fn mime_type_by_extension() {
        assert_eq!(mime_for(Path::new("a/doc-page-1.jpg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a/doc-page-1.png")), "image/png");
    }
}
