//! Gemini client for key point extraction from transcripts.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use hclip_models::{KeyPoint, Transcript};

use crate::error::{MlError, MlResult};
use crate::retry::{map_send_error, with_retry};

/// Configuration for the analysis client.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub api_key: String,
    pub model: String,
    /// API root, e.g. `https://generativelanguage.googleapis.com/v1beta`
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub temperature: f32,
}

impl AnalysisConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gemini-2.0-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 2,
            temperature: 0.7,
        }
    }

    /// Create config from environment variables. `GEMINI_API_KEY` is required.
    pub fn from_env() -> MlResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| MlError::config("GEMINI_API_KEY not set"))?;
        let defaults = Self::new(api_key);

        Ok(Self {
            model: std::env::var("GEMINI_MODEL").unwrap_or(defaults.model.clone()),
            base_url: std::env::var("GEMINI_BASE_URL").unwrap_or(defaults.base_url.clone()),
            timeout: std::env::var("GEMINI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: std::env::var("GEMINI_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            ..defaults
        })
    }
}

/// What the analysis should look for.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub transcript: &'a Transcript,
    pub max_clips: u32,
    pub min_duration: f64,
    pub max_duration: f64,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// Gemini API client.
pub struct AnalysisClient {
    http: Client,
    config: AnalysisConfig,
}

impl AnalysisClient {
    pub fn new(config: AnalysisConfig) -> MlResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MlError::Network)?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> MlResult<Self> {
        Self::new(AnalysisConfig::from_env()?)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Ask the model for the most important moments of the transcript,
    /// most important first.
    pub async fn extract_key_points(&self, request: AnalysisRequest<'_>) -> MlResult<Vec<KeyPoint>> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        let body = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_prompt(&request),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: 4096,
                response_mime_type: "application/json".to_string(),
            },
        };

        debug!("Requesting key points from {}", self.config.model);

        let response: GeminiResponse = with_retry("Gemini request", self.config.max_retries, || async {
            let response = self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.config.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| map_send_error(e, self.config.timeout))?;

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(MlError::from_status("Gemini API", status, &text));
            }

            response
                .json::<GeminiResponse>()
                .await
                .map_err(|e| MlError::invalid_response(format!("Gemini body: {}", e)))
        })
        .await?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .ok_or_else(|| MlError::invalid_response("No content in Gemini response"))?;

        let key_points = parse_key_points(&text)?;
        info!("Gemini returned {} key points", key_points.len());
        Ok(key_points)
    }
}

fn build_prompt(request: &AnalysisRequest<'_>) -> String {
    format!(
        r#"Analyze the following video transcript and identify the {max_clips} most important key points or moments.

For each key point, provide:
1. A short title (max 10 words)
2. A brief summary (1-2 sentences)
3. The start timestamp (in seconds)
4. The end timestamp (in seconds)
5. An importance score (1-10)

Requirements:
- Each clip should be between {min} and {max} seconds
- Focus on the most insightful, educational, or engaging moments
- Ensure clips don't overlap
- Order by importance (most important first)

Return your response as a JSON array with this exact format:
[
  {{
    "title": "Key Point Title",
    "summary": "Brief description of this key point",
    "start_time": 0.0,
    "end_time": 30.0,
    "importance": 8
  }}
]

TRANSCRIPT:
{transcript}

Return ONLY the JSON array, no other text."#,
        max_clips = request.max_clips,
        min = request.min_duration,
        max = request.max_duration,
        transcript = request.transcript.to_timestamped_text(),
    )
}

/// Parse the model output into key points, tolerating markdown fences and
/// surrounding prose.
pub fn parse_key_points(text: &str) -> MlResult<Vec<KeyPoint>> {
    let trimmed = strip_code_fences(text.trim());

    match serde_json::from_str::<Vec<KeyPoint>>(trimmed) {
        Ok(points) => Ok(points),
        Err(first_err) => {
            let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) else {
                return Err(MlError::invalid_response(format!(
                    "Failed to parse key points JSON: {}",
                    first_err
                )));
            };
            if end <= start {
                return Err(MlError::invalid_response("Failed to parse key points JSON"));
            }
            warn!("Key point response had extra text, extracting JSON array");
            serde_json::from_str(&trimmed[start..=end])
                .map_err(|e| MlError::invalid_response(format!("Failed to parse key points JSON: {}", e)))
        }
    }
}

fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
