//! Template engine
//!
//! Maps normalized utterances in a known language to a closed catalogue of
//! categories and returns a canned reply. Lookup is a hash probe over
//! normalized forms plus a short prefix-pattern scan, so cost is constant
//! with respect to catalogue size. No side effects; thread-safe;
//! deterministic per (language, catalogue revision).

use std::collections::HashMap;

use voice_router_config::{TemplateCatalogue, TemplateEntry};
use voice_router_core::{Language, Utterance};

use crate::normalize::{normalize, stable_hash};

/// A catalogue hit
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch {
    pub category: String,
    pub reply: String,
}

struct CategoryReplies {
    category: String,
    replies: Vec<String>,
}

struct LanguageIndex {
    /// normalized exact pattern → index into `categories`
    exact: HashMap<String, usize>,
    /// (normalized prefix, index into `categories`)
    prefixes: Vec<(String, usize)>,
    categories: Vec<CategoryReplies>,
}

/// Precomputed template index over the catalogue
pub struct TemplateEngine {
    languages: HashMap<String, LanguageIndex>,
    revision: u32,
}

impl TemplateEngine {
    pub fn new(catalogue: &TemplateCatalogue) -> Self {
        let mut languages = HashMap::new();
        for (lang, entries) in &catalogue.languages {
            languages.insert(lang.clone(), build_index(entries));
        }
        Self {
            languages,
            revision: catalogue.revision,
        }
    }

    /// Catalogue revision this index was built from
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Look up a canned reply for the utterance
    ///
    /// Returns `None` for unknown languages, unmatched text, and malformed
    /// input. Reply selection is a stable hash of the normalized utterance,
    /// so the same utterance always receives the same reply.
    pub fn lookup(&self, utterance: &Utterance) -> Option<TemplateMatch> {
        if !utterance.language.has_templates() {
            return None;
        }
        let index = self.languages.get(utterance.language.as_str())?;
        let normalized = normalize(&utterance.text);
        if normalized.is_empty() {
            return None;
        }

        let cat_idx = index.exact.get(normalized.as_str()).copied().or_else(|| {
            index
                .prefixes
                .iter()
                .find(|(prefix, _)| normalized.starts_with(prefix.as_str()))
                .map(|(_, idx)| *idx)
        })?;

        let category = &index.categories[cat_idx];
        let reply_idx = (stable_hash(&normalized) % category.replies.len() as u64) as usize;
        Some(TemplateMatch {
            category: category.category.clone(),
            reply: category.replies[reply_idx].clone(),
        })
    }

    /// Convenience for language-tagged raw text
    pub fn lookup_text(&self, text: &str, language: &Language) -> Option<TemplateMatch> {
        self.lookup(&Utterance::new(text, language.clone()))
    }
}

fn build_index(entries: &[TemplateEntry]) -> LanguageIndex {
    let mut exact = HashMap::new();
    let mut prefixes = Vec::new();
    let mut categories = Vec::with_capacity(entries.len());

    for entry in entries {
        let idx = categories.len();
        categories.push(CategoryReplies {
            category: entry.category.clone(),
            replies: entry.replies.clone(),
        });
        for pattern in &entry.patterns {
            if let Some(prefix) = pattern.strip_suffix('*') {
                prefixes.push((normalize(prefix), idx));
            } else {
                exact.insert(normalize(pattern), idx);
            }
        }
    }

    // Longest prefix first so "que tal estas*" beats "que tal*"
    prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    LanguageIndex {
        exact,
        prefixes,
        categories,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_router_config::TemplateCatalogue;

    fn engine() -> TemplateEngine {
        TemplateEngine::new(&TemplateCatalogue::default())
    }

    #[test]
    fn test_greeting_matches() {
        let engine = engine();
        let hit = engine.lookup_text("hola", &Language::Es).unwrap();
        assert_eq!(hit.category, "greetings");
        assert!(!hit.reply.is_empty());
    }

    #[test]
    fn test_match_is_deterministic() {
        let engine = engine();
        let first = engine.lookup_text("¡Hola!", &Language::Es).unwrap();
        for _ in 0..20 {
            let again = engine.lookup_text("¡Hola!", &Language::Es).unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_punctuation_and_case_are_ignored() {
        let engine = engine();
        assert!(engine.lookup_text("  GRACIAS!! ", &Language::Es).is_some());
        assert!(engine.lookup_text("Thank you.", &Language::En).is_some());
    }

    #[test]
    fn test_prefix_patterns() {
        let engine = engine();
        let hit = engine
            .lookup_text("¿Qué puedes hacer por mí?", &Language::Es)
            .unwrap();
        assert_eq!(hit.category, "help");
    }

    #[test]
    fn test_unknown_language_passes_through() {
        let engine = engine();
        assert!(engine
            .lookup_text("bonjour", &Language::from_tag("fr"))
            .is_none());
    }

    #[test]
    fn test_unmatched_text_returns_none() {
        let engine = engine();
        assert!(engine
            .lookup_text("¿Cuál es la capital de Francia?", &Language::Es)
            .is_none());
        assert!(engine.lookup_text("", &Language::Es).is_none());
    }
}
