//! Timestamp formatting for FFmpeg arguments and ASS subtitles.

/// Format seconds as `HH:MM:SS.mmm` for FFmpeg seek arguments.
///
/// # Examples
/// ```
/// use hclip_models::timestamp::format_ffmpeg_timestamp;
/// assert_eq!(format_ffmpeg_timestamp(3725.5), "01:02:05.500");
/// ```
pub fn format_ffmpeg_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02}.{ms:03}")
}

/// Format seconds as the ASS `H:MM:SS.cc` timestamp (centiseconds).
///
/// # Examples
/// ```
/// use hclip_models::timestamp::format_ass_timestamp;
/// assert_eq!(format_ass_timestamp(65.25), "0:01:05.25");
/// ```
pub fn format_ass_timestamp(seconds: f64) -> String {
    let total_cs = (seconds.max(0.0) * 100.0).round() as u64;
    let hours = total_cs / 360_000;
    let minutes = (total_cs % 360_000) / 6000;
    let secs = (total_cs % 6000) / 100;
    let cs = total_cs % 100;
    format!("{hours}:{minutes:02}:{secs:02}.{cs:02}")
}
