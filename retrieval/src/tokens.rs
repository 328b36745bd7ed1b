//! Character-based token estimation.

use serde::{Deserialize, Serialize};

/// Estimates token counts as `ceil(chars / chars_per_token)`.
///
/// This is an approximation; tokenizers differ per model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenEstimator {
    chars_per_token: f32,
}

impl TokenEstimator {
    /// Create an estimator. Non-positive ratios fall back to 4.0.
    pub fn new(chars_per_token: f32) -> Self {
        let chars_per_token = if chars_per_token > 0.0 {
            chars_per_token
        } else {
            4.0
        };
        Self { chars_per_token }
    }

    /// Characters per token.
    pub fn chars_per_token(&self) -> f32 {
        self.chars_per_token
    }

    /// Estimated tokens in `text`.
    pub fn estimate(&self, text: &str) -> usize {
        let chars = text.chars().count();
        (chars as f32 / self.chars_per_token).ceil() as usize
    }

    /// Longest prefix of `text` that fits in `max_tokens`.
    ///
    /// Cuts on a char boundary, backing off to the last whitespace when the
    /// prefix contains any.
    pub fn truncate_to<'a>(&self, text: &'a str, max_tokens: usize) -> &'a str {
        let max_chars = (max_tokens as f32 * self.chars_per_token).floor() as usize;
        let Some((byte, _)) = text.char_indices().nth(max_chars) else {
            return text;
        };

        let cut = &text[..byte];
        match cut.rfind(char::is_whitespace) {
            Some(pos) if pos > 0 => cut[..pos].trim_end(),
            _ => cut,
        }
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(4.0)
    }
}
