//! Submission parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

/// Default number of clips requested.
pub const DEFAULT_MAX_CLIPS: u32 = 5;
/// Default lower clip duration bound in seconds.
pub const DEFAULT_MIN_CLIP_DURATION: f64 = 10.0;
/// Default upper clip duration bound in seconds.
pub const DEFAULT_MAX_CLIP_DURATION: f64 = 120.0;

/// Colour preset for burned-in captions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptionStyle {
    #[default]
    Default,
    Neon,
    Fire,
    Ocean,
    Minimal,
}

impl CaptionStyle {
    pub const ALL: [CaptionStyle; 5] = [
        CaptionStyle::Default,
        CaptionStyle::Neon,
        CaptionStyle::Fire,
        CaptionStyle::Ocean,
        CaptionStyle::Minimal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptionStyle::Default => "default",
            CaptionStyle::Neon => "neon",
            CaptionStyle::Fire => "fire",
            CaptionStyle::Ocean => "ocean",
            CaptionStyle::Minimal => "minimal",
        }
    }
}

impl fmt::Display for CaptionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CaptionStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown caption style: {s}"))
    }
}

/// How caption words are revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptionMode {
    /// Whole phrase on screen, active word highlighted
    #[default]
    Clipper,
    /// Short lines with a progressive fill
    Karaoke,
}

impl CaptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptionMode::Clipper => "clipper",
            CaptionMode::Karaoke => "karaoke",
        }
    }
}

impl fmt::Display for CaptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CaptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clipper" => Ok(CaptionMode::Clipper),
            "karaoke" => Ok(CaptionMode::Karaoke),
            other => Err(format!("unknown caption mode: {other}")),
        }
    }
}

/// Parameters captured at submission; immutable for the job's lifetime.
/// Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_duration_bounds"))]
pub struct JobParameters {
    #[validate(range(min = 1, max = 20))]
    pub max_clips: u32,

    #[validate(range(min = 5.0))]
    pub min_clip_duration: f64,

    #[validate(range(max = 300.0))]
    pub max_clip_duration: f64,

    pub include_captions: bool,

    pub caption_style: CaptionStyle,

    pub caption_mode: CaptionMode,
}

impl Default for JobParameters {
    fn default() -> Self {
        Self {
            max_clips: DEFAULT_MAX_CLIPS,
            min_clip_duration: DEFAULT_MIN_CLIP_DURATION,
            max_clip_duration: DEFAULT_MAX_CLIP_DURATION,
            include_captions: true,
            caption_style: CaptionStyle::default(),
            caption_mode: CaptionMode::default(),
        }
    }
}

fn validate_duration_bounds(params: &JobParameters) -> Result<(), ValidationError> {
    if !params.min_clip_duration.is_finite() || !params.max_clip_duration.is_finite() {
        return Err(ValidationError::new("non_finite_duration"));
    }
    if params.min_clip_duration >= params.max_clip_duration {
        let mut err = ValidationError::new("duration_bounds");
        err.message = Some("min_clip_duration must be less than max_clip_duration".into());
        return Err(err);
    }
    Ok(())
}
