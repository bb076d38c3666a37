use once_cell::sync::Lazy;
use regex::Regex;

/// Flat tariff for a video download; the size is unknown until the download ran.
pub const VIDEO_DOWNLOAD_TOKENS: i64 = 1;

static SPACED_DOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+\.\s+").expect("valid regex"));
static DOT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{3,}").expect("valid regex"));
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static TRAILING_DOTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.+$").expect("valid regex"));

/// What a job is charged for, as determined by the adapter's cheap `prepare`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CostBasis {
    /// Normalized text length in characters.
    Characters(usize),
    Flat,
    /// Measured media duration in seconds.
    Duration(f64),
}

/// key: cost-policy -> pure token tariffs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostPolicy {
    pub chars_per_token: i64,
    pub transcription_tokens_per_minute: i64,
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self {
            chars_per_token: 10,
            transcription_tokens_per_minute: 10,
        }
    }
}

impl CostPolicy {
    pub fn new(chars_per_token: i64, transcription_tokens_per_minute: i64) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
            transcription_tokens_per_minute: transcription_tokens_per_minute.max(0),
        }
    }

    pub fn cost(&self, basis: &CostBasis) -> i64 {
        match basis {
            CostBasis::Characters(chars) => self.tokens_for_chars(*chars),
            CostBasis::Flat => self.video_download_cost(),
            CostBasis::Duration(seconds) => self.transcription_cost(*seconds),
        }
    }

    pub fn text_to_speech_cost(&self, text: &str) -> i64 {
        self.tokens_for_chars(normalize_tts_text(text).chars().count())
    }

    /// `ceil(chars / chars_per_token)`; zero only for empty text.
    pub fn tokens_for_chars(&self, chars: usize) -> i64 {
        if chars == 0 {
            return 0;
        }
        let per_token = self.chars_per_token.max(1);
        let chars = i64::try_from(chars).unwrap_or(i64::MAX);
        chars / per_token + i64::from(chars % per_token != 0)
    }

    pub fn video_download_cost(&self) -> i64 {
        VIDEO_DOWNLOAD_TOKENS
    }

    /// `max(1, floor(minutes * rate))`. Unusable probe values count as zero
    /// seconds and therefore cost the minimum.
    pub fn transcription_cost(&self, duration_seconds: f64) -> i64 {
        let seconds = if duration_seconds.is_finite() && duration_seconds > 0.0 {
            duration_seconds
        } else {
            0.0
        };
        let tokens = (seconds * self.transcription_tokens_per_minute as f64 / 60.0).floor();
        (tokens as i64).max(1)
    }
}

/// Cleans text before synthesis: tightens spaced periods, collapses dot runs
/// into an ellipsis, folds whitespace and ends on at most one period.
pub fn normalize_tts_text(text: &str) -> String {
    let text = SPACED_DOT.replace_all(text, ". ");
    let text = DOT_RUN.replace_all(&text, "...");
    let text = WHITESPACE_RUN.replace_all(&text, " ");
    let text = TRAILING_DOTS.replace(text.trim(), ".");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_characters_cost_one_token() {
        let policy = CostPolicy::default();
        assert_eq!(policy.text_to_speech_cost("aaaaaaaaaa"), 1);
    }

    #[test]
    fn partial_token_rounds_up() {
        let policy = CostPolicy::default();
        assert_eq!(policy.text_to_speech_cost(&"a".repeat(25)), 3);
        assert_eq!(policy.text_to_speech_cost("a"), 1);
        assert_eq!(policy.text_to_speech_cost("   "), 0);
    }

    #[test]
    fn length_is_measured_after_normalization() {
        let policy = CostPolicy::default();
        // "Hello . World....." -> "Hello. World." (13 chars)
        assert_eq!(normalize_tts_text("  Hello   .   World.....  "), "Hello. World.");
        assert_eq!(policy.text_to_speech_cost("  Hello   .   World.....  "), 2);
    }

    #[test]
    fn ellipsis_inside_text_is_kept() {
        assert_eq!(normalize_tts_text("Wait..... what"), "Wait... what");
        assert_eq!(normalize_tts_text("one\n\ttwo"), "one two");
    }

    #[test]
    fn multibyte_text_counts_characters() {
        let policy = CostPolicy::default();
        assert_eq!(policy.text_to_speech_cost("Привет мир"), 1);
    }

    #[test]
    fn transcription_charges_per_started_fraction_of_minute_rate() {
        let policy = CostPolicy::default();
        assert_eq!(policy.transcription_cost(90.0), 15);
        assert_eq!(policy.transcription_cost(60.0), 10);
        assert_eq!(policy.transcription_cost(1.0), 1);
        assert_eq!(policy.transcription_cost(0.0), 1);
        assert_eq!(policy.transcription_cost(f64::NAN), 1);
    }

    #[test]
    fn download_is_flat_rate() {
        let policy = CostPolicy::new(3, 20);
        assert_eq!(policy.video_download_cost(), 1);
        assert_eq!(policy.cost(&CostBasis::Flat), 1);
        assert_eq!(policy.cost(&CostBasis::Duration(30.0)), 10);
        assert_eq!(policy.cost(&CostBasis::Characters(7)), 3);
    }
}
