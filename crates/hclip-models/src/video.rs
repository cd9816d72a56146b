//! Source video metadata.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata of an uploaded source video, filled in by the pre-flight probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoMetadata {
    /// Original upload filename
    pub filename: String,
    /// Duration in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub size_bytes: u64,
    pub has_audio: bool,
}

impl VideoMetadata {
    /// Height used for caption sizing, falling back to 1080p when unknown.
    pub fn render_height(&self) -> u32 {
        if self.height == 0 {
            1080
        } else {
            self.height
        }
    }

    pub fn render_width(&self) -> u32 {
        if self.width == 0 {
            1920
        } else {
            self.width
        }
    }
}

/// Details of a video URL looked up without downloading it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RemoteVideoInfo {
    pub title: String,
    /// Duration in seconds, 0 when the site does not report one
    pub duration: f64,
    pub uploader: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub description: String,
}
