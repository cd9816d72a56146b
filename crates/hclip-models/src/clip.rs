//! Clip artifacts and time range fitting.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A span of the source video in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }

    /// Fit this range into `[min_duration, max_duration]` by growing or
    /// shrinking it symmetrically around its midpoint, then shifting it
    /// inward so it stays within `[0, video_duration]`.
    ///
    /// A video shorter than `min_duration` yields the whole video. A
    /// non-positive `video_duration` means the length is unknown and only
    /// the lower bound of zero applies.
    pub fn fit(&self, min_duration: f64, max_duration: f64, video_duration: f64) -> TimeRange {
        let start = if self.start.is_finite() { self.start.max(0.0) } else { 0.0 };
        let end = if self.end.is_finite() { self.end.max(start) } else { start };
        let limit = if video_duration.is_finite() && video_duration > 0.0 {
            video_duration
        } else {
            f64::INFINITY
        };

        let length = (end - start).clamp(min_duration, max_duration);
        if length >= limit {
            return TimeRange::new(0.0, limit);
        }

        let mid = (start + end) / 2.0;
        let mut fitted_start = mid - length / 2.0;
        let mut fitted_end = mid + length / 2.0;

        if fitted_start < 0.0 {
            fitted_start = 0.0;
            fitted_end = length;
        }
        if fitted_end > limit {
            fitted_end = limit;
            fitted_start = limit - length;
        }

        TimeRange::new(fitted_start, fitted_end)
    }
}

/// Which rendering of a clip to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipVariant {
    #[default]
    Plain,
    Captioned,
}

/// One rendered highlight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipArtifact {
    /// Position in the job's result sequence
    pub index: usize,
    pub time_range: TimeRange,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub importance: u8,
    pub plain_path: PathBuf,
    /// Set only when captions were requested and rendering succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captioned_path: Option<PathBuf>,
}

impl ClipArtifact {
    pub fn duration(&self) -> f64 {
        self.time_range.duration()
    }

    /// Path for the requested variant; `None` if that variant was never rendered.
    pub fn path_for(&self, variant: ClipVariant) -> Option<&Path> {
        match variant {
            ClipVariant::Plain => Some(self.plain_path.as_path()),
            ClipVariant::Captioned => self.captioned_path.as_deref(),
        }
    }
}
