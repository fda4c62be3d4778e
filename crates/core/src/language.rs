//! Language tags
//!
//! Spanish and English carry template catalogues and abbreviation lists;
//! any other tag passes through the router without template matches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Language of an utterance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Spanish
    Es,
    /// English
    En,
    /// Any other BCP-47 tag; no template or abbreviation support
    Other(String),
}

impl Language {
    /// Parse a BCP-47-ish tag, case-insensitive, region suffixes stripped
    pub fn from_tag(tag: &str) -> Self {
        let primary = tag
            .split(['-', '_'])
            .next()
            .unwrap_or(tag)
            .to_ascii_lowercase();
        match primary.as_str() {
            "es" => Language::Es,
            "en" => Language::En,
            _ => Language::Other(primary),
        }
    }

    /// Primary subtag as a str
    pub fn as_str(&self) -> &str {
        match self {
            Language::Es => "es",
            Language::En => "en",
            Language::Other(tag) => tag,
        }
    }

    /// Whether template catalogues exist for this language
    pub fn has_templates(&self) -> bool {
        matches!(self, Language::Es | Language::En)
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Es
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag() {
        assert_eq!(Language::from_tag("es"), Language::Es);
        assert_eq!(Language::from_tag("ES-mx"), Language::Es);
        assert_eq!(Language::from_tag("en_US"), Language::En);
        assert_eq!(Language::from_tag("fr"), Language::Other("fr".into()));
    }

    #[test]
    fn test_template_support() {
        assert!(Language::Es.has_templates());
        assert!(Language::En.has_templates());
        assert!(!Language::from_tag("de").has_templates());
    }
}
