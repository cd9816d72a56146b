//! Key points produced by transcript analysis.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::TimeRange;

fn default_importance() -> u8 {
    5
}

/// A time range of interest identified in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KeyPoint {
    pub title: String,
    pub summary: String,
    pub start_time: f64,
    pub end_time: f64,
    /// 1-10, higher is more important
    #[serde(default = "default_importance")]
    pub importance: u8,
}

impl KeyPoint {
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }
}

/// Keep at most `max_clips` key points in analyzer order and fit each range
/// into the clip duration bounds.
pub fn select_key_points(
    key_points: Vec<KeyPoint>,
    max_clips: usize,
    min_duration: f64,
    max_duration: f64,
    video_duration: f64,
) -> Vec<KeyPoint> {
    key_points
        .into_iter()
        .take(max_clips)
        .map(|mut kp| {
            let fitted = kp.time_range().fit(min_duration, max_duration, video_duration);
            kp.start_time = fitted.start;
            kp.end_time = fitted.end;
            kp.importance = kp.importance.clamp(1, 10);
            kp
        })
        .collect()
}
