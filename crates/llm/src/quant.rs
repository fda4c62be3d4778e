//! Quantization and context-window selection
//!
//! Quantization is picked from the expected output size at first load;
//! callers may override. Context windows grow in power-of-two steps so a
//! loaded handle can serve any request its window covers without a reload.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Quantization level of a loaded model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    /// Smallest footprint; short replies only
    Iq3,
    /// Mid quality; the common case
    Q4,
    /// Highest quality; long-form output
    Q5,
}

impl Quantization {
    /// Select by expected output size: <200 tokens → IQ3, 200–800 → Q4,
    /// >800 → Q5.
    pub fn for_expected_tokens(tokens: u32) -> Self {
        if tokens < 200 {
            Quantization::Iq3
        } else if tokens <= 800 {
            Quantization::Q4
        } else {
            Quantization::Q5
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantization::Iq3 => f.write_str("IQ3"),
            Quantization::Q4 => f.write_str("Q4"),
            Quantization::Q5 => f.write_str("Q5"),
        }
    }
}

/// Grapheme-aware token estimate, ~4 characters per token
pub fn estimate_tokens(text: &str) -> u32 {
    use unicode_segmentation::UnicodeSegmentation;
    (text.graphemes(true).count() as u32 / 4).max(1)
}

/// Context window sized to the prompt plus the generation budget,
/// power-of-two steps, floor 512, cap 8192.
pub fn context_window_for(prompt_tokens: u32, max_tokens: u32) -> u32 {
    let needed = prompt_tokens.saturating_add(max_tokens);
    let mut window = 512u32;
    while window < needed && window < 8_192 {
        window *= 2;
    }
    window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_bands() {
        assert_eq!(Quantization::for_expected_tokens(0), Quantization::Iq3);
        assert_eq!(Quantization::for_expected_tokens(199), Quantization::Iq3);
        assert_eq!(Quantization::for_expected_tokens(200), Quantization::Q4);
        assert_eq!(Quantization::for_expected_tokens(800), Quantization::Q4);
        assert_eq!(Quantization::for_expected_tokens(801), Quantization::Q5);
    }

    #[test]
    fn test_context_window_steps() {
        assert_eq!(context_window_for(25, 256), 512);
        assert_eq!(context_window_for(1_000, 256), 2_048);
        assert_eq!(context_window_for(25_000, 1_024), 8_192);
    }

    #[test]
    fn test_token_estimate() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("cuatro letras por token aproximadamente"), 9);
    }
}
