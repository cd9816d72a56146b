//! Word-level timestamped transcripts.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::TimeRange;

/// A single transcribed word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WordTimestamp {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

impl WordTimestamp {
    pub fn new(word: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            word: word.into(),
            start,
            end,
        }
    }
}

/// A contiguous stretch of speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<WordTimestamp>,
}

/// Summary reported by the transcription engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TranscriptionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_probability: Option<f64>,
    /// Duration of the transcribed audio in seconds
    #[serde(default)]
    pub duration: f64,
}

/// Full transcript of a job's audio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
    #[serde(default)]
    pub info: TranscriptionInfo,
}

impl Transcript {
    /// True when nothing was transcribed.
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.text.trim().is_empty())
    }

    pub fn word_count(&self) -> usize {
        self.segments.iter().map(|s| s.words.len()).sum()
    }

    /// Words whose start lies inside `range`, re-timed relative to the
    /// range start.
    pub fn words_in_range(&self, range: TimeRange) -> Vec<WordTimestamp> {
        self.segments
            .iter()
            .filter(|s| s.end >= range.start && s.start <= range.end)
            .flat_map(|s| s.words.iter())
            .filter(|w| range.contains(w.start))
            .map(|w| {
                WordTimestamp::new(
                    w.word.trim(),
                    (w.start - range.start).max(0.0),
                    (w.end.min(range.end) - range.start).max(0.0),
                )
            })
            .filter(|w| !w.word.is_empty())
            .collect()
    }

    /// Transcript rendered as `[start - end] text` lines for analysis prompts.
    pub fn to_timestamped_text(&self) -> String {
        self.segments
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| format!("[{:.1}s - {:.1}s] {}", s.start, s.end, s.text.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
