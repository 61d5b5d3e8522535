//! Turns raw terminal output into transport-sized, escape-free messages.

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;

/// Telegram rejects messages above 4096 UTF-16 code units; stay well below
/// it. Every length in this module is measured in those units.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4000;
pub const DEFAULT_ANSWER_SEPARATOR: &str = "·";
pub const TRUNCATION_MARKER: &str = "\n... (truncated)";

// OSC must be tried before the two-byte form: `]` is inside `[@-Z\\-_]`.
#[allow(clippy::expect_used)]
static ESCAPE_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:\][^\x07\x1B]*(?:\x07|\x1B\\)?|\[[0-?]*[ -/]*[@-~]|[@-Z\\-_])")
        .expect("escape sequence pattern is valid")
});

/// Removes escape sequences, then any stray control characters except
/// newline and tab. Idempotent.
pub fn strip(text: &str) -> String {
    let without_sequences = ESCAPE_SEQUENCE.replace_all(text, "");
    without_sequences
        .chars()
        .filter(|ch| !ch.is_control() || *ch == '\n' || *ch == '\t')
        .collect()
}

/// Length as the transport counts it: astral-plane characters take two
/// units.
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Byte index of the longest prefix of `text` that fits in `max_units`.
fn prefix_end(text: &str, max_units: usize) -> usize {
    let mut units = 0;
    for (idx, ch) in text.char_indices() {
        units += ch.len_utf16();
        if units > max_units {
            return idx;
        }
    }
    text.len()
}

/// Byte index where the longest suffix of `text` that fits in `max_units`
/// starts.
fn suffix_start(text: &str, max_units: usize) -> usize {
    let mut units = 0;
    let mut start = text.len();
    for (idx, ch) in text.char_indices().rev() {
        units += ch.len_utf16();
        if units > max_units {
            break;
        }
        start = idx;
    }
    start
}

/// Splits `text` into pieces of at most `max_len` units, preferring to cut
/// right after a newline. Concatenating the pieces yields `text`.
pub fn chunk(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut window_end = prefix_end(rest, max_len);
        if window_end == 0 {
            // A single surrogate pair wider than the limit still has to go.
            window_end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        if window_end == rest.len() {
            chunks.push(rest.to_string());
            break;
        }
        let split = match rest[..window_end].rfind('\n') {
            Some(idx) if idx > 0 => idx + 1,
            _ => window_end,
        };
        chunks.push(rest[..split].to_string());
        rest = &rest[split..];
    }
    chunks
}

/// Returns `text` unchanged when it fits, otherwise the longest prefix that
/// still leaves room for `marker`.
pub fn truncate(text: &str, max_len: usize, marker: &str) -> String {
    if utf16_len(text) <= max_len {
        return text.to_string();
    }
    let keep = max_len.saturating_sub(utf16_len(marker));
    let mut truncated = text[..prefix_end(text, keep)].to_string();
    truncated.push_str(marker);
    let end = prefix_end(&truncated, max_len);
    truncated.truncate(end);
    truncated
}

/// Keeps the last `max_len` units of `text`.
pub fn tail(text: &str, max_len: usize) -> &str {
    &text[suffix_start(text, max_len)..]
}

/// `opencode/kimi-k2.5-free` -> `kimi`, `gpt-5` -> `gpt`.
pub fn model_short_name(model: &str) -> String {
    let last = model.rsplit('/').next().unwrap_or(model);
    last.split('-').next().unwrap_or(last).to_lowercase()
}

/// Strategy for locating the assistant's answer in a finished run.
pub trait AnswerExtractor: fmt::Debug + Send + Sync {
    /// `output` is already stripped of escape sequences. An empty result
    /// means "nothing worth relaying".
    fn extract(&self, output: &str, model: &str) -> String;
}

/// Finds the banner line the assistant prints before its answer, e.g.
/// `┃ Build · kimi-k2.5-free`, and keeps every non-blank line from there on.
#[derive(Debug, Clone)]
pub struct BannerAnswerExtractor {
    separator: String,
}

impl BannerAnswerExtractor {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

impl Default for BannerAnswerExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_ANSWER_SEPARATOR)
    }
}

impl AnswerExtractor for BannerAnswerExtractor {
    fn extract(&self, output: &str, model: &str) -> String {
        let short_name = model_short_name(model);
        if short_name.is_empty() {
            return String::new();
        }
        let mut found = false;
        let mut lines = Vec::new();
        for line in output.lines() {
            if !found
                && line.contains(self.separator.as_str())
                && line.to_lowercase().contains(&short_name)
            {
                found = true;
            }
            if found && !line.trim().is_empty() {
                lines.push(line.trim_end());
            }
        }
        lines.join("\n")
    }
}

/// Applies the transport limit to the three kinds of outbound text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framer {
    max_len: usize,
}

impl Framer {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Replies and notices: stripped, trimmed, truncated with a marker.
    /// `None` when nothing visible is left.
    pub fn reply(&self, text: &str) -> Option<String> {
        let clean = strip(text);
        let clean = clean.trim();
        if clean.is_empty() {
            return None;
        }
        Some(truncate(clean, self.max_len, TRUNCATION_MARKER))
    }

    /// Output flushed because a prompt appeared: the prompt sits at the end,
    /// so the tail is kept verbatim.
    pub fn prompt_flush(&self, text: &str) -> Option<String> {
        let clean = strip(text);
        let clean = clean.trim();
        if clean.is_empty() {
            return None;
        }
        Some(tail(clean, self.max_len).to_string())
    }

    /// A final answer may be long; it is split rather than cut.
    pub fn answer(&self, text: &str) -> Vec<String> {
        chunk(text, self.max_len)
            .into_iter()
            .filter(|piece| !piece.trim().is_empty())
            .collect()
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strip_removes_color_cursor_and_osc_sequences() {
        let raw = "\x1b[1;32mgreen\x1b[0m \x1b[2K\x1b[1Gline\x1b]0;title\x07 done\x1bM";
        assert_eq!(strip(raw), "green line done");
    }

    #[test]
    fn strip_drops_carriage_returns_and_stray_escapes() {
        assert_eq!(strip("a\r\nb\x1b\x1b[31mc\x07"), "a\nbc");
    }

    #[test]
    fn strip_is_idempotent() {
        let samples = [
            "\x1b\x1b[31mA",
            "plain text",
            "\x1b]8;;http://x\x1b\\link\x1b]8;;\x1b\\",
            "\x1b[?25l\x1b[?25hspinner\r\rok",
        ];
        for sample in samples {
            let once = strip(sample);
            assert_eq!(strip(&once), once, "sample {sample:?}");
            assert!(!once.contains('\x1b'));
        }
    }

    #[test]
    fn chunk_respects_limit_and_reassembles() {
        let text = "first line\nsecond line that is longer\nthird\n".repeat(7);
        let pieces = chunk(&text, 25);
        assert!(pieces.iter().all(|piece| utf16_len(piece) <= 25));
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn chunk_splits_inside_long_lines_on_char_boundaries() {
        let text = "ж".repeat(10);
        let pieces = chunk(&text, 4);
        assert_eq!(pieces, vec!["жжжж", "жжжж", "жж"]);
    }

    #[test]
    fn limits_count_utf16_units() {
        let emoji = "😀".repeat(10);
        assert_eq!(utf16_len(&emoji), 20);

        let pieces = chunk(&emoji, 4);
        assert_eq!(pieces, vec!["😀😀"; 5]);
        assert!(pieces.iter().all(|piece| utf16_len(piece) <= 4));

        assert_eq!(tail(&format!("ab{emoji}"), 5), "😀😀");

        let truncated = truncate(&emoji, 18, "…");
        assert_eq!(truncated, format!("{}…", "😀".repeat(8)));
        assert!(utf16_len(&truncated) <= 18);
    }

    #[test]
    fn chunk_always_makes_progress() {
        assert_eq!(chunk("😀a", 1), vec!["😀", "a"]);
    }

    #[test]
    fn default_reply_fits_telegram_for_emoji() {
        let framer = Framer::default();
        let reply = framer.reply(&"😀".repeat(4000)).unwrap_or_default();
        assert!(utf16_len(&reply) <= DEFAULT_MAX_MESSAGE_LEN);
        assert!(reply.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn chunk_of_empty_text_is_empty() {
        assert!(chunk("", 10).is_empty());
    }

    #[test]
    fn truncate_appends_marker_within_limit() {
        let truncated = truncate(&"x".repeat(50), 30, TRUNCATION_MARKER);
        assert_eq!(utf16_len(&truncated), 30);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
        assert_eq!(truncate("short", 30, TRUNCATION_MARKER), "short");
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }

    #[test]
    fn model_short_name_takes_family() {
        assert_eq!(model_short_name("opencode/kimi-k2.5-free"), "kimi");
        assert_eq!(model_short_name("gpt-5"), "gpt");
        assert_eq!(model_short_name("anthropic/Claude"), "claude");
    }

    #[test]
    fn extractor_returns_empty_without_banner() {
        let output = "Loading...\nsome tool output\nDone\n";
        assert_eq!(
            BannerAnswerExtractor::default().extract(output, "opencode/kimi-k2.5-free"),
            ""
        );
    }

    #[test]
    fn extractor_keeps_non_blank_lines_after_banner() {
        let output = "boot noise\n\n┃ Build · KIMI-k2.5-free\n\nFirst answer line\n\n   \nSecond line\nThird\n";
        let answer = BannerAnswerExtractor::default().extract(output, "opencode/kimi-k2.5-free");
        assert_eq!(
            answer,
            "┃ Build · KIMI-k2.5-free\nFirst answer line\nSecond line\nThird"
        );
    }

    #[test]
    fn extractor_separator_is_configurable() {
        let output = "noise\n>> gpt answer\nbody\n";
        assert_eq!(
            BannerAnswerExtractor::new(">>").extract(output, "gpt-5"),
            ">> gpt answer\nbody"
        );
        assert_eq!(BannerAnswerExtractor::default().extract(output, "gpt-5"), "");
    }

    #[test]
    fn framer_reply_skips_blank_and_truncates() {
        let framer = Framer::new(20);
        assert_eq!(framer.reply("  \x1b[0m \n"), None);
        let long = framer.reply(&"y".repeat(100)).unwrap_or_default();
        assert_eq!(utf16_len(&long), 20);
    }

    #[test]
    fn framer_prompt_flush_keeps_prompt_at_end() {
        let framer = Framer::new(10);
        assert_eq!(
            framer.prompt_flush("lots of output Continue? (y/n)").as_deref(),
            Some("nue? (y/n)")
        );
    }
}
