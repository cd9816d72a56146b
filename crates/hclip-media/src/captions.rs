//! Burned-in captions rendered through ASS subtitles.
//!
//! Two presentations are supported:
//! - clipper: the whole phrase is shown, the active word is highlighted and
//!   scaled, upcoming words are dimmed
//! - karaoke: three-word lines filled progressively with `\kf`
//!
//! Word timestamps must already be relative to the clip start.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use hclip_models::timestamp::format_ass_timestamp;
use hclip_models::{CaptionMode, CaptionStyle, WordTimestamp};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Longest phrase shown at once in clipper mode.
const PHRASE_MAX_WORDS: usize = 6;
/// Silence that starts a new phrase, in seconds.
const PHRASE_MAX_GAP: f64 = 1.0;
/// Words per karaoke line.
const KARAOKE_WORDS_PER_LINE: usize = 3;

/// ASS colours (`&HAABBGGRR`) of a caption preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptionColors {
    pub primary: &'static str,
    pub highlight: &'static str,
    pub outline: &'static str,
    pub shadow: &'static str,
}

impl CaptionColors {
    pub fn for_style(style: CaptionStyle) -> Self {
        match style {
            CaptionStyle::Default => Self {
                primary: "&H00FFFFFF",
                highlight: "&H0000FFFF",
                outline: "&H00000000",
                shadow: "&H80000000",
            },
            CaptionStyle::Neon => Self {
                primary: "&H00FFFFFF",
                highlight: "&H0000FF00",
                outline: "&H00FF00FF",
                shadow: "&H80000000",
            },
            CaptionStyle::Fire => Self {
                primary: "&H00FFFFFF",
                highlight: "&H000080FF",
                outline: "&H000000FF",
                shadow: "&H80000000",
            },
            CaptionStyle::Ocean => Self {
                primary: "&H00FFFFFF",
                highlight: "&H00FFFF00",
                outline: "&H00FF8800",
                shadow: "&H80000000",
            },
            CaptionStyle::Minimal => Self {
                primary: "&H00FFFFFF",
                highlight: "&H00FFFFFF",
                outline: "&H00000000",
                shadow: "&H00000000",
            },
        }
    }
}

/// Everything needed to render one caption track.
#[derive(Debug, Clone)]
pub struct CaptionRequest {
    pub words: Vec<WordTimestamp>,
    pub style: CaptionStyle,
    pub mode: CaptionMode,
    pub width: u32,
    pub height: u32,
}

/// Split words into phrases on long pauses or when a phrase is full.
pub fn split_into_phrases(words: &[WordTimestamp], max_words: usize, max_gap: f64) -> Vec<&[WordTimestamp]> {
    let mut phrases = Vec::new();
    let mut start = 0;

    for i in 1..words.len() {
        let gap = words[i].start - words[i - 1].end;
        if gap > max_gap || i - start >= max_words {
            phrases.push(&words[start..i]);
            start = i;
        }
    }
    if start < words.len() {
        phrases.push(&words[start..]);
    }

    phrases
}

/// Build the full ASS document for a caption request.
pub fn generate_ass(request: &CaptionRequest) -> String {
    let colors = CaptionColors::for_style(request.style);
    let (title, style_name, font_size) = match request.mode {
        CaptionMode::Clipper => (
            "Clipper Style Captions",
            "Default",
            ((request.height as f64 * 0.07) as u32).max(42),
        ),
        CaptionMode::Karaoke => (
            "Karaoke Style Captions",
            "Karaoke",
            ((request.height as f64 * 0.08) as u32).max(48),
        ),
    };

    let mut ass = format!(
        "[Script Info]\n\
         Title: {title}\n\
         ScriptType: v4.00+\n\
         PlayResX: {width}\n\
         PlayResY: {height}\n\
         WrapStyle: 0\n\
         ScaledBorderAndShadow: yes\n\
         \n\
         [V4+ Styles]\n\
         Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n\
         Style: {style_name},Arial Black,{font_size},{primary},{highlight},{outline},{shadow},-1,0,0,0,100,100,0,0,1,4,2,2,20,20,50,1\n\
         \n\
         [Events]\n\
         Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n",
        width = request.width,
        height = request.height,
        primary = colors.primary,
        highlight = colors.highlight,
        outline = colors.outline,
        shadow = colors.shadow,
    );

    match request.mode {
        CaptionMode::Clipper => write_clipper_events(&mut ass, &request.words, &colors),
        CaptionMode::Karaoke => write_karaoke_events(&mut ass, &request.words),
    }

    ass
}

fn write_clipper_events(ass: &mut String, words: &[WordTimestamp], colors: &CaptionColors) {
    for phrase in split_into_phrases(words, PHRASE_MAX_WORDS, PHRASE_MAX_GAP) {
        for (active, word) in phrase.iter().enumerate() {
            let start = word.start.max(0.0);
            // Hold the phrase until the next word starts to avoid flicker
            let end = phrase
                .get(active + 1)
                .map(|next| next.start.max(word.end))
                .unwrap_or(word.end)
                .max(start);

            let text = phrase
                .iter()
                .enumerate()
                .map(|(idx, w)| {
                    let text = caption_text(&w.word);
                    if idx == active {
                        format!(
                            "{{\\c{}\\fscx115\\fscy115}}{}{{\\c{}\\fscx100\\fscy100}}",
                            colors.highlight, text, colors.primary
                        )
                    } else if idx < active {
                        text
                    } else {
                        format!("{{\\alpha&H40&}}{}{{\\alpha&H00&}}", text)
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");

            let _ = writeln!(
                ass,
                "Dialogue: 0,{},{},Default,,0,0,0,,{}",
                format_ass_timestamp(start),
                format_ass_timestamp(end),
                text
            );
        }
    }
}

fn write_karaoke_events(ass: &mut String, words: &[WordTimestamp]) {
    for chunk in words.chunks(KARAOKE_WORDS_PER_LINE) {
        let (Some(first), Some(last)) = (chunk.first(), chunk.last()) else {
            continue;
        };
        let start = first.start.max(0.0);
        let end = last.end.max(start);

        let text = chunk
            .iter()
            .map(|w| {
                let centis = ((w.end - w.start).max(0.0) * 100.0) as u32;
                format!("{{\\kf{}}}{}", centis, caption_text(&w.word))
            })
            .collect::<Vec<_>>()
            .join(" ");

        let _ = writeln!(
            ass,
            "Dialogue: 0,{},{},Karaoke,,0,0,0,,{}",
            format_ass_timestamp(start),
            format_ass_timestamp(end),
            text
        );
    }
}

/// Uppercase a word and strip characters that ASS treats as markup.
fn caption_text(word: &str) -> String {
    word.trim()
        .chars()
        .filter(|c| !matches!(c, '{' | '}' | '\\'))
        .collect::<String>()
        .to_uppercase()
}

/// Escape a path for use inside an FFmpeg filter argument.
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Write the subtitle file for `request` next to `output` and burn it into
/// `clip`.
pub async fn burn_captions(
    clip: impl AsRef<Path>,
    output: impl AsRef<Path>,
    request: &CaptionRequest,
    runner: &FfmpegRunner,
) -> MediaResult<PathBuf> {
    let clip = clip.as_ref();
    let output = output.as_ref();

    if !clip.exists() {
        return Err(MediaError::FileNotFound(clip.to_path_buf()));
    }
    if request.words.is_empty() {
        return Err(MediaError::InvalidRange("no words to caption".to_string()));
    }

    let ass_path = output.with_extension("ass");
    tokio::fs::write(&ass_path, generate_ass(request)).await?;

    info!(
        "Burning {} captions ({} words): {} -> {}",
        request.mode,
        request.words.len(),
        clip.display(),
        output.display()
    );

    let cmd = FfmpegCommand::new(clip, output)
        .video_filter(format!("ass={}", escape_filter_path(&ass_path)))
        .video_codec("libx264")
        .preset("medium")
        .crf(18)
        .audio_codec("aac")
        .audio_bitrate("192k")
        .faststart();

    let result = runner.run(&cmd).await;
    let _ = tokio::fs::remove_file(&ass_path).await;
    result?;

    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(timings: &[(&str, f64, f64)]) -> Vec<WordTimestamp> {
        timings.iter().map(|(w, s, e)| WordTimestamp::new(*w, *s, *e)).collect()
    }

    fn request(mode: CaptionMode, words: Vec<WordTimestamp>) -> CaptionRequest {
        CaptionRequest {
            words,
            style: CaptionStyle::Neon,
            mode,
            width: 1080,
            height: 1920,
        }
    }

    #[test]
    fn test_phrases_split_on_gap_and_length() {
        let ws = words(&[
            ("one", 0.0, 0.2),
            ("two", 0.3, 0.5),
            ("three", 2.0, 2.2),
            ("a", 2.3, 2.4),
            ("b", 2.5, 2.6),
            ("c", 2.7, 2.8),
            ("d", 2.9, 3.0),
            ("e", 3.1, 3.2),
            ("f", 3.3, 3.4),
        ]);
        let phrases = split_into_phrases(&ws, 6, 1.0);
        let sizes: Vec<_> = phrases.iter().map(|p| p.len()).collect();
        assert_eq!(sizes, vec![2, 6, 1]);
    }

    #[test]
    fn test_phrases_of_empty_input() {
        assert!(split_into_phrases(&[], 6, 1.0).is_empty());
    }

    #[test]
    fn test_clipper_highlights_each_word() {
        let ass = generate_ass(&request(
            CaptionMode::Clipper,
            words(&[("hello", 0.0, 0.5), ("world", 0.6, 1.0)]),
        ));
        assert!(ass.contains("PlayResY: 1920"));
        // 7% of 1920
        assert!(ass.contains("Style: Default,Arial Black,134,"));
        let dialogues: Vec<_> = ass.lines().filter(|l| l.starts_with("Dialogue:")).collect();
        assert_eq!(dialogues.len(), 2);
        assert!(dialogues[0].starts_with("Dialogue: 0,0:00:00.00,0:00:00.60,Default"));
        assert!(dialogues[0].contains("\\c&H0000FF00\\fscx115\\fscy115}HELLO"));
        assert!(dialogues[0].contains("{\\alpha&H40&}WORLD"));
        assert!(dialogues[1].contains("}WORLD{"));
    }

    #[test]
    fn test_karaoke_lines() {
        let ass = generate_ass(&request(
            CaptionMode::Karaoke,
            words(&[
                ("a", 0.0, 0.25),
                ("b", 0.25, 0.5),
                ("c", 0.5, 1.0),
                ("d", 1.0, 1.5),
            ]),
        ));
        let dialogues: Vec<_> = ass.lines().filter(|l| l.starts_with("Dialogue:")).collect();
        assert_eq!(dialogues.len(), 2);
        assert!(dialogues[0].ends_with("{\\kf25}A {\\kf25}B {\\kf50}C"));
        assert!(dialogues[1].starts_with("Dialogue: 0,0:00:01.00,0:00:01.50,Karaoke"));
    }

    #[test]
    fn test_minimum_font_size() {
        let mut req = request(CaptionMode::Karaoke, Vec::new());
        req.height = 360;
        assert!(generate_ass(&req).contains("Style: Karaoke,Arial Black,48,"));
    }

    #[test]
    fn test_caption_text_strips_markup() {
        assert_eq!(caption_text(" {b}o\\nld "), "BONLD");
    }

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(escape_filter_path(Path::new("/data/it's:here.ass")), "/data/it\\'s\\:here.ass");
    }
}
