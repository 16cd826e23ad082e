//! SubRip (SRT) subtitle helpers

use serde::{Deserialize, Serialize};

/// One timed transcript segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
    pub text: String,
}

/// Format seconds as an SRT timestamp (`HH:MM:SS,mmm`)
pub fn format_timestamp(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Render segments as an SRT document, numbered from 1
pub fn render_srt(segments: &[Segment]) -> String {
    segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            format!(
                "{}\n{} --> {}\n{}\n",
                i + 1,
                format_timestamp(segment.start),
                format_timestamp(segment.end),
                segment.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn blocks(srt: &str) -> impl Iterator<Item = Vec<&str>> {
    srt.split("\n\n")
        .map(|block| block.trim())
        .filter(|block| !block.is_empty())
        .map(|block| block.lines().collect())
}

/// Transcript text without numbering or timing
///
/// Takes the last text line of every well-formed block (number, timing,
/// text) and joins them with single spaces.
pub fn plain_text(srt: &str) -> String {
    let normalized = srt.replace("\r\n", "\n");
    blocks(&normalized)
        .filter(|lines| lines.len() >= 3)
        .filter_map(|lines| lines.last().map(|l| l.trim().to_string()))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop multi-line blocks and renumber the rest
///
/// Auto-generated platform captions repeat the previous cue as an extra
/// line; only single-line cues are kept.
pub fn clean_srt(srt: &str) -> String {
    let normalized = srt.replace("\r\n", "\n");
    blocks(&normalized)
        .filter(|lines| lines.len() == 3)
        .enumerate()
        .map(|(i, lines)| format!("{}\n{}\n{}", i + 1, lines[1], lines[2]))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(3723.5), "01:02:03,500");
        assert_eq!(format_timestamp(59.999), "00:00:59,999");
    }

    #[test]
    fn test_render_then_plain_text() {
        let segments = vec![
            Segment { start: 0.0, end: 1.5, text: " Hello there ".to_string() },
            Segment { start: 1.5, end: 3.0, text: "general".to_string() },
        ];
        let srt = render_srt(&segments);

        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,500\nHello there\n"));
        assert_eq!(plain_text(&srt), "Hello there general");
    }

    #[test]
    fn test_plain_text_skips_malformed_blocks() {
        let srt = "1\n00:00:00,000 --> 00:00:01,000\nfirst\n\ngarbage\n\n2\n00:00:01,000 --> 00:00:02,000\nsecond\n";
        assert_eq!(plain_text(srt), "first second");
    }

    #[test]
    fn test_clean_srt_drops_duplicate_cues() {
        let srt = "1\n00:00:00,000 --> 00:00:01,000\nfirst\n\n\
                   2\n00:00:01,000 --> 00:00:02,000\nfirst\nsecond\n\n\
                   3\n00:00:02,000 --> 00:00:03,000\nthird";
        let cleaned = clean_srt(srt);

        assert_eq!(
            cleaned,
            "1\n00:00:00,000 --> 00:00:01,000\nfirst\n\n2\n00:00:02,000 --> 00:00:03,000\nthird"
        );
    }
}
