//! Vision-model client.
//!
//! Sends one image per request to an OpenAI-compatible chat completions
//! endpoint and decodes the reply with the tolerant chain in [`parsing`].

mod parsing;

pub use parsing::parse_analysis;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use metrics::counter;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AnalyzerConfig;
use crate::error::{AnalyzerError, ServiceError, ServiceResult};

/// Metadata key carrying text transcribed verbatim from the image
pub const RAW_TEXT_KEY: &str = "raw_text_content";

/// Metadata key carrying the unparsed model response when decoding degraded
pub const RAW_RESPONSE_KEY: &str = "raw_response";

pub type Metadata = BTreeMap<String, String>;

const ANALYSIS_PROMPT: &str = "Analyze this image and respond with a single JSON object.\n\
\n\
Include:\n\
1. \"summary\": a short description of what the image shows.\n\
2. \"metadata\": an object with these string fields:\n\
   - \"raw_text_content\": every piece of text visible in the image, transcribed exactly as written. \
Keep line breaks, numbers and punctuation. Use an empty string if there is no text.\n\
   - \"category\": the kind of image (document, receipt, screenshot, photo, diagram, ...).\n\
   - \"colors\": the dominant colors.\n\
   - \"objects\": the main objects or subjects.\n\
   - \"mood\": the overall tone or mood.\n\
   - \"quality\": an assessment of image quality and legibility.\n\
\n\
Return only the JSON object, without commentary.";

/// Result of analyzing a single image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    pub summary: String,
    /// Transcribed text, or the summary when the model transcribed nothing
    pub extracted_text: String,
    pub metadata: Metadata,
}

impl AnalysisResult {
    pub fn new(summary: String, metadata: Metadata) -> Self {
        let extracted_text = metadata
            .get(RAW_TEXT_KEY)
            .cloned()
            .unwrap_or_else(|| summary.clone());

        Self {
            summary,
            extracted_text,
            metadata,
        }
    }
}

/// Image understanding backend
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    /// Describe an image and transcribe any text in it
    async fn analyze(&self, image: &[u8], mime_type: &str) -> Result<AnalysisResult, AnalyzerError>;

    /// Text-only projection of [`ImageAnalyzer::analyze`]
    async fn extract_text(&self, image: &[u8], mime_type: &str) -> Result<String, AnalyzerError> {
        self.analyze(image, mime_type)
            .await
            .map(|analysis| analysis.extracted_text)
    }
}

/// Chat completions client with retry on transport errors and 5xx responses
pub struct AnalyzerClient {
    client: Client,
    config: AnalyzerConfig,
}

impl AnalyzerClient {
    pub fn new(config: AnalyzerConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                ServiceError::Analyzer(AnalyzerError::Connection {
                    url: config.base_url.clone(),
                    source: e,
                })
            })?;

        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn build_request(&self, image: &[u8], mime_type: &str) -> ChatCompletionRequest {
        let data_uri = format!("data:{};base64,{}", mime_type, BASE64.encode(image));

        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: ANALYSIS_PROMPT.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_uri },
                    },
                ],
            }],
            max_tokens: self.config.max_tokens,
        }
    }

    /// POST the request, retrying transport failures and 5xx statuses.
    ///
    /// Up to `max_retries` retries follow the first attempt, with a linear
    /// backoff of `attempt * retry_backoff_ms` before each retry. Any status
    /// below 500 is returned to the caller without retrying.
    async fn send_with_retry(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, AnalyzerError> {
        let url = self.completions_url();
        let mut attempt: u32 = 0;

        loop {
            let outcome = self
                .client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(request)
                .send()
                .await;

            let error = match outcome {
                Ok(response) if response.status().as_u16() < 500 => {
                    counter!("docpipe_analyzer_requests_total", "outcome" => "accepted")
                        .increment(1);
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let message = response.text().await.unwrap_or_default();
                    warn!(attempt, status, "Analyzer returned server error");
                    AnalyzerError::Status { status, message }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Analyzer request failed");
                    AnalyzerError::Connection {
                        url: url.clone(),
                        source: e,
                    }
                }
            };

            if attempt >= self.config.max_retries {
                counter!("docpipe_analyzer_requests_total", "outcome" => "exhausted").increment(1);
                return Err(error);
            }

            counter!("docpipe_analyzer_retries_total").increment(1);
            tokio::time::sleep(backoff_delay(self.config.retry_backoff_unit(), attempt)).await;
            attempt += 1;
        }
    }

    /// Run a completion and return the first choice's message content
    async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, AnalyzerError> {
        let response = self.send_with_retry(request).await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|source| AnalyzerError::InvalidResponse { source })?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or(AnalyzerError::EmptyResponse)
    }
}

#[async_trait]
impl ImageAnalyzer for AnalyzerClient {
    async fn analyze(&self, image: &[u8], mime_type: &str) -> Result<AnalysisResult, AnalyzerError> {
        debug!(
            model = %self.config.model,
            mime_type = %mime_type,
            size = image.len(),
            "Requesting image analysis"
        );

        let request = self.build_request(image, mime_type);
        let content = self.complete(&request).await?;

        Ok(parse_analysis(&content))
    }
}

/// Delay before retry number `attempt + 1`
fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    unit.saturating_mul(attempt.saturating_add(1))
}

// Wire types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}
