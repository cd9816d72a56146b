//! Speech-to-text client for OpenAI-compatible transcription servers.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use hclip_models::{Transcript, TranscriptSegment, TranscriptionInfo, WordTimestamp};

use crate::error::{MlError, MlResult};
use crate::retry::{map_send_error, with_retry};

/// Configuration for the transcription client.
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    /// Base URL of the transcription server
    pub base_url: String,
    /// Model name passed to the server
    pub model: String,
    /// Bearer token, if the server requires one
    pub api_key: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            model: "Systran/faster-whisper-small".to_string(),
            api_key: None,
            timeout: Duration::from_secs(1800), // long videos take a while
            max_retries: 2,
        }
    }
}

impl TranscriptionConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("TRANSCRIPTION_URL").unwrap_or(defaults.base_url),
            model: std::env::var("TRANSCRIPTION_MODEL").unwrap_or(defaults.model),
            api_key: std::env::var("TRANSCRIPTION_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout: std::env::var("TRANSCRIPTION_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: std::env::var("TRANSCRIPTION_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    language_probability: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<ApiSegment>,
    /// Word timestamps, when the server reports them at the top level
    #[serde(default)]
    words: Vec<ApiWord>,
}

#[derive(Debug, Deserialize)]
struct ApiSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    words: Option<Vec<ApiWord>>,
}

#[derive(Debug, Deserialize)]
struct ApiWord {
    word: String,
    start: f64,
    end: f64,
}

impl From<ApiWord> for WordTimestamp {
    fn from(w: ApiWord) -> Self {
        WordTimestamp::new(w.word.trim(), w.start, w.end)
    }
}

/// Client for the transcription server.
pub struct TranscriptionClient {
    http: Client,
    config: TranscriptionConfig,
}

impl TranscriptionClient {
    /// Create a new transcription client.
    pub fn new(config: TranscriptionConfig) -> MlResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MlError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> MlResult<Self> {
        Self::new(TranscriptionConfig::from_env())
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Transcribe a WAV file with word-level timestamps. The language is
    /// detected by the server.
    pub async fn transcribe(&self, audio: &Path) -> MlResult<Transcript> {
        let url = format!("{}/v1/audio/transcriptions", self.config.base_url.trim_end_matches('/'));
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        debug!("Sending {} bytes of audio to {}", bytes.len(), url);

        let response = with_retry("transcription request", self.config.max_retries, || async {
            let part = Part::bytes(bytes.clone())
                .file_name(file_name.clone())
                .mime_str("audio/wav")
                .map_err(MlError::Network)?;
            let form = Form::new()
                .part("file", part)
                .text("model", self.config.model.clone())
                .text("response_format", "verbose_json")
                .text("timestamp_granularities[]", "word")
                .text("timestamp_granularities[]", "segment");

            let mut request = self.http.post(&url).multipart(form);
            if let Some(key) = &self.config.api_key {
                request = request.bearer_auth(key);
            }

            let response = request
                .send()
                .await
                .map_err(|e| map_send_error(e, self.config.timeout))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(MlError::from_status("Transcription server", status, &body));
            }

            response
                .json::<VerboseTranscription>()
                .await
                .map_err(|e| MlError::invalid_response(format!("transcription body: {}", e)))
        })
        .await?;

        let transcript = into_transcript(response);
        info!(
            "Transcribed {} segments, {} words (language: {})",
            transcript.segments.len(),
            transcript.word_count(),
            transcript.info.language.as_deref().unwrap_or("unknown")
        );
        Ok(transcript)
    }
}

/// Normalize a verbose response: words go into the segment whose span
/// contains their start time.
fn into_transcript(response: VerboseTranscription) -> Transcript {
    let info = TranscriptionInfo {
        language: response.language,
        language_probability: response.language_probability,
        duration: response.duration.unwrap_or_default(),
    };

    let mut segments: Vec<TranscriptSegment> = response
        .segments
        .into_iter()
        .map(|s| TranscriptSegment {
            start: s.start,
            end: s.end,
            text: s.text.trim().to_string(),
            words: s
                .words
                .unwrap_or_default()
                .into_iter()
                .map(WordTimestamp::from)
                .collect(),
        })
        .collect();

    if !response.words.is_empty() && segments.iter().all(|s| s.words.is_empty()) {
        let words: Vec<WordTimestamp> = response.words.into_iter().map(WordTimestamp::from).collect();
        if segments.is_empty() {
            let start = words.first().map(|w| w.start).unwrap_or_default();
            let end = words.last().map(|w| w.end).unwrap_or_default();
            segments.push(TranscriptSegment {
                start,
                end,
                text: response.text.trim().to_string(),
                words,
            });
        } else {
            let last = segments.len() - 1;
            let mut current = 0;
            for word in words {
                while current < last && word.start >= segments[current].end {
                    current += 1;
                }
                segments[current].words.push(word);
            }
        }
    }

    Transcript { segments, info }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> TranscriptionConfig {
        TranscriptionConfig {
            base_url: server.uri(),
            max_retries: 1,
            timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    async fn audio_file() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("audio.wav"), b"RIFF....WAVE").await.unwrap();
        dir
    }

    #[tokio::test]
    async fn test_transcribe_assigns_top_level_words_to_segments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "language": "en",
                "duration": 6.0,
                "text": "Hello world. Second sentence.",
                "segments": [
                    {"start": 0.0, "end": 2.0, "text": " Hello world."},
                    {"start": 3.0, "end": 6.0, "text": " Second sentence."}
                ],
                "words": [
                    {"word": " Hello", "start": 0.0, "end": 0.5},
                    {"word": " world.", "start": 0.6, "end": 1.5},
                    {"word": " Second", "start": 3.0, "end": 3.6},
                    {"word": " sentence.", "start": 3.7, "end": 4.5}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = audio_file().await;
        let client = TranscriptionClient::new(config(&server)).unwrap();
        let transcript = client.transcribe(&dir.path().join("audio.wav")).await.unwrap();

        assert_eq!(transcript.info.language.as_deref(), Some("en"));
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[0].text, "Hello world.");
        assert_eq!(transcript.segments[0].words.len(), 2);
        assert_eq!(transcript.segments[1].words[0].word, "Second");
    }

    #[tokio::test]
    async fn test_transcribe_keeps_segment_words() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "segments": [
                    {"start": 0.0, "end": 1.0, "text": "Hi", "words": [{"word": "Hi", "start": 0.1, "end": 0.4}]}
                ]
            })))
            .mount(&server)
            .await;

        let dir = audio_file().await;
        let client = TranscriptionClient::new(TranscriptionConfig {
            api_key: Some("secret".into()),
            ..config(&server)
        })
        .unwrap();
        let transcript = client.transcribe(&dir.path().join("audio.wav")).await.unwrap();
        assert_eq!(transcript.word_count(), 1);
        assert!(transcript.info.language.is_none());
    }

    #[tokio::test]
    async fn test_transcribe_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"segments": []})))
            .mount(&server)
            .await;

        let dir = audio_file().await;
        let client = TranscriptionClient::new(config(&server)).unwrap();
        let transcript = client.transcribe(&dir.path().join("audio.wav")).await.unwrap();
        assert!(transcript.is_empty());
    }

    #[tokio::test]
    async fn test_transcribe_rate_limit_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = audio_file().await;
        let client = TranscriptionClient::new(config(&server)).unwrap();
        let err = client.transcribe(&dir.path().join("audio.wav")).await.unwrap_err();
        assert!(matches!(err, MlError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_missing_audio_file() {
        let client = TranscriptionClient::new(TranscriptionConfig::default()).unwrap();
        let err = client.transcribe(Path::new("/nonexistent/audio.wav")).await.unwrap_err();
        assert!(matches!(err, MlError::Io(_)));
    }
}
