//! Refusal keyword lists
//!
//! Language-indexed keyword lists behind the unknown/refusal classifier.
//! Order inside the classifier is fixed; these lists only supply the
//! vocabulary per reason.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Keyword lists for one language
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefusalKeywords {
    /// Future-event markers ("ganará", "will win", future years)
    #[serde(default)]
    pub future_event: Vec<String>,
    /// Private-data markers ("mi contraseña", "my password")
    #[serde(default)]
    pub private_info: Vec<String>,
    /// Self-referential memory claims the system cannot honor
    #[serde(default)]
    pub memory_claims: Vec<String>,
    /// Forbidden actions
    #[serde(default)]
    pub unsafe_actions: Vec<String>,
}

/// Language-indexed refusal vocabulary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownPatterns {
    pub languages: HashMap<String, RefusalKeywords>,
}

impl UnknownPatterns {
    pub fn keywords(&self, language: &str) -> Option<&RefusalKeywords> {
        self.languages.get(language)
    }
}

impl Default for UnknownPatterns {
    fn default() -> Self {
        let mut languages = HashMap::new();

        languages.insert(
            "es".to_string(),
            RefusalKeywords {
                future_event: strings(&[
                    "ganará",
                    "ganara",
                    "pasará",
                    "pasara",
                    "predice",
                    "predicción",
                    "quién va a ganar",
                    "qué pasará",
                ]),
                private_info: strings(&[
                    "mi contraseña",
                    "mi clave",
                    "mi pin",
                    "mi número de tarjeta",
                    "mis datos bancarios",
                ]),
                memory_claims: strings(&[
                    "te acuerdas de",
                    "recuerdas cuando",
                    "lo que te dije ayer",
                    "la última vez que hablamos",
                ]),
                unsafe_actions: strings(&[
                    "cómo fabricar un arma",
                    "cómo hackear",
                    "sin que se enteren",
                ]),
            },
        );

        languages.insert(
            "en".to_string(),
            RefusalKeywords {
                future_event: strings(&[
                    "will win",
                    "will happen",
                    "predict the",
                    "who is going to win",
                    "what will happen",
                ]),
                private_info: strings(&[
                    "my password",
                    "my pin",
                    "my card number",
                    "my bank details",
                ]),
                memory_claims: strings(&[
                    "remember when i",
                    "what i told you yesterday",
                    "last time we talked",
                ]),
                unsafe_actions: strings(&["how to make a weapon", "how to hack", "without them knowing"]),
            },
        );

        Self { languages }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_both_languages() {
        let patterns = UnknownPatterns::default();
        for lang in ["es", "en"] {
            let kw = patterns.keywords(lang).unwrap();
            assert!(!kw.future_event.is_empty());
            assert!(!kw.private_info.is_empty());
            assert!(!kw.memory_claims.is_empty());
            assert!(!kw.unsafe_actions.is_empty());
        }
    }
}
