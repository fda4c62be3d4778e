//! Template catalogue
//!
//! Language-indexed catalogue of pattern → canned-reply entries consumed by
//! the template engine. A small closed set of categories is built in for
//! Spanish and English; deployments extend or replace it from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ConfigError;

/// One catalogue entry: a category with its trigger patterns and replies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEntry {
    /// Category name (greetings, thanks, ...)
    pub category: String,
    /// Normalized utterance patterns; a leading-star entry ("que tal*")
    /// matches as a prefix, everything else matches exactly
    pub patterns: Vec<String>,
    /// Canned replies; selection is deterministic per utterance
    pub replies: Vec<String>,
}

/// Language-indexed template catalogue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCatalogue {
    /// Monotonically bumped when entries change; part of the engine's
    /// determinism contract
    #[serde(default)]
    pub revision: u32,
    /// Entries keyed by primary language subtag
    pub languages: HashMap<String, Vec<TemplateEntry>>,
}

impl TemplateCatalogue {
    /// Entries for one language, if any
    pub fn entries(&self, language: &str) -> Option<&[TemplateEntry]> {
        self.languages.get(language).map(|v| v.as_slice())
    }

    /// Every entry must have at least one pattern and one reply
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (lang, entries) in &self.languages {
            for entry in entries {
                if entry.patterns.is_empty() || entry.replies.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("catalogue.{}.{}", lang, entry.category),
                        message: "needs at least one pattern and one reply".into(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for TemplateCatalogue {
    fn default() -> Self {
        let mut languages = HashMap::new();
        languages.insert("es".to_string(), spanish_entries());
        languages.insert("en".to_string(), english_entries());
        Self {
            revision: 1,
            languages,
        }
    }
}

fn entry(category: &str, patterns: &[&str], replies: &[&str]) -> TemplateEntry {
    TemplateEntry {
        category: category.to_string(),
        patterns: patterns.iter().map(|s| s.to_string()).collect(),
        replies: replies.iter().map(|s| s.to_string()).collect(),
    }
}

fn spanish_entries() -> Vec<TemplateEntry> {
    vec![
        entry(
            "greetings",
            &["hola", "buenas", "buenos dias", "buenas tardes", "buenas noches", "hey"],
            &[
                "¡Hola! ¿En qué puedo ayudarte?",
                "¡Buenas! Estoy aquí para ayudarte.",
                "Hola. ¿Qué necesitas?",
            ],
        ),
        entry(
            "confirmations",
            &["si", "vale", "ok", "de acuerdo", "claro", "perfecto"],
            &["Perfecto, seguimos.", "De acuerdo.", "Entendido."],
        ),
        entry(
            "thanks",
            &["gracias", "muchas gracias", "mil gracias"],
            &[
                "¡De nada! Estoy aquí para ayudarte.",
                "¡Con gusto! Si necesitas algo más, avísame.",
                "¡Encantado de ayudar!",
            ],
        ),
        entry(
            "farewells",
            &["adios", "hasta luego", "nos vemos", "chao", "hasta mañana"],
            &["¡Hasta luego!", "¡Nos vemos! Que vaya bien.", "Adiós, aquí estaré."],
        ),
        entry(
            "help",
            &["ayuda", "que puedes hacer*", "como funcionas*"],
            &[
                "Puedo responder preguntas, buscar información y conversar contigo.",
                "Pregúntame lo que quieras; si no lo sé, lo busco.",
            ],
        ),
        entry(
            "status",
            &["como estas", "que tal", "todo bien"],
            &[
                "Todo bien por aquí. ¿Cómo puedo ayudarte?",
                "Funcionando perfectamente. ¿Y tú?",
            ],
        ),
    ]
}

fn english_entries() -> Vec<TemplateEntry> {
    vec![
        entry(
            "greetings",
            &["hello", "hi", "hey", "good morning", "good afternoon", "good evening"],
            &[
                "Hello! How can I help you?",
                "Hi there! I'm here to help.",
                "Hey. What do you need?",
            ],
        ),
        entry(
            "confirmations",
            &["yes", "ok", "okay", "sure", "alright", "sounds good"],
            &["Great, let's continue.", "Alright.", "Got it."],
        ),
        entry(
            "thanks",
            &["thanks", "thank you", "thanks a lot"],
            &[
                "You're welcome!",
                "Happy to help! Let me know if you need anything else.",
            ],
        ),
        entry(
            "farewells",
            &["bye", "goodbye", "see you", "see you later"],
            &["Goodbye!", "See you later!", "Bye, I'll be here."],
        ),
        entry(
            "help",
            &["help", "what can you do*", "how do you work*"],
            &[
                "I can answer questions, look things up, and chat with you.",
                "Ask me anything; if I don't know, I'll find out.",
            ],
        ),
        entry(
            "status",
            &["how are you", "how is it going", "all good"],
            &["All good here. How can I help?", "Running smoothly. And you?"],
        ),
    ]
}
