use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::generator::Capability;

/// Keyword table shipped with the crate.
pub const DEFAULT_KEYWORDS: &str = include_str!("../../config/keywords.json");

/// Terms for one capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSet {
    /// Direct matches select the capability.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// "Looks relevant" terms that only trigger the fallback classifier.
    #[serde(default)]
    pub hints: Vec<String>,
}

impl KeywordSet {
    fn normalized(self) -> Self {
        Self {
            keywords: normalize(self.keywords),
            hints: normalize(self.hints),
        }
    }
}

/// Lowercase, trim, and drop single-character terms and duplicates.
fn normalize(terms: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(terms.len());
    for term in terms {
        let term = term.trim().to_lowercase();
        if term.chars().count() < 2 || out.contains(&term) {
            continue;
        }
        out.push(term);
    }
    out
}

/// Immutable capability → terms mapping used by the fast classification path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordTable {
    /// Terms per capability.
    pub capabilities: BTreeMap<Capability, KeywordSet>,
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::embedded()
    }
}

impl KeywordTable {
    /// The shipped table.
    pub fn embedded() -> Self {
        match Self::parse(DEFAULT_KEYWORDS, Path::new("<embedded>")) {
            Ok(table) => table,
            Err(err) => {
                tracing::error!(error = %err, "embedded keyword table is invalid");
                Self {
                    capabilities: BTreeMap::new(),
                }
            }
        }
    }

    /// Load a table from a JSON file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::parse(&text, path)?;
        tracing::info!(path = %path.display(), terms = table.term_count(), "loaded keyword table");
        Ok(table)
    }

    /// Parse and normalize a table. `origin` is only used in errors.
    pub fn parse(text: &str, origin: &Path) -> ConfigResult<Self> {
        let raw: KeywordTable = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from(origin),
            source,
        })?;
        let table = Self {
            capabilities: raw
                .capabilities
                .into_iter()
                .map(|(capability, set)| (capability, set.normalized()))
                .collect(),
        };
        if table.capabilities.values().all(|set| set.keywords.is_empty()) {
            return Err(ConfigError::Keywords(format!(
                "{} defines no keywords",
                origin.display()
            )));
        }
        Ok(table)
    }

    /// Terms for a capability.
    pub fn set(&self, capability: Capability) -> Option<&KeywordSet> {
        self.capabilities.get(&capability)
    }

    /// Capabilities with at least one keyword contained in `request`
    /// (case-insensitive substring match).
    pub fn matches(&self, request: &str) -> Vec<Capability> {
        let text = request.to_lowercase();
        self.capabilities
            .iter()
            .filter(|(_, set)| set.keywords.iter().any(|term| text.contains(term.as_str())))
            .map(|(capability, _)| *capability)
            .collect()
    }

    /// Capabilities with at least one hint term contained in `request`.
    pub fn hinted(&self, request: &str) -> Vec<Capability> {
        let text = request.to_lowercase();
        self.capabilities
            .iter()
            .filter(|(_, set)| set.hints.iter().any(|term| text.contains(term.as_str())))
            .map(|(capability, _)| *capability)
            .collect()
    }

    /// Total number of keywords and hints.
    pub fn term_count(&self) -> usize {
        self.capabilities
            .values()
            .map(|set| set.keywords.len() + set.hints.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_table_covers_every_capability() {
        let table = KeywordTable::embedded();
        for capability in Capability::ALL {
            let set = table.set(capability).expect("capability present");
            assert!(!set.keywords.is_empty(), "{capability}");
        }
    }

    #[test]
    fn single_characters_are_dropped() {
        let table = KeywordTable::parse(
            r#"{"capabilities": {"daw": {"keywords": ["x", " Track ", "track"], "hints": ["a"]}}}"#,
            Path::new("inline"),
        )
        .expect("table");
        let set = table.set(Capability::Daw).expect("daw");
        assert_eq!(set.keywords, vec!["track".to_string()]);
        assert!(set.hints.is_empty());
        assert!(table.matches("x marks the spot").is_empty());
        assert_eq!(table.matches("New TRACK please"), vec![Capability::Daw]);
    }

    #[test]
    fn table_without_keywords_is_rejected() {
        let err = KeywordTable::parse(r#"{"capabilities": {}}"#, Path::new("empty.json"))
            .expect_err("no keywords");
        assert!(matches!(err, ConfigError::Keywords(_)));
    }

    #[test]
    fn matches_are_independent() {
        let table = KeywordTable::embedded();
        assert_eq!(
            table.matches("add a chord progression to track 1"),
            vec![Capability::Daw, Capability::Arranger]
        );
        assert_eq!(table.matches("add reverb to track 1"), vec![Capability::Daw]);
        assert!(table.matches("bake me a cake").is_empty());
    }
}
