use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Translations of a message keyed by locale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageMap(pub BTreeMap<String, String>);

impl LanguageMap {
    /// Map with a single English entry.
    pub fn en(msg: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert("en".to_string(), msg.into());
        LanguageMap(map)
    }

    /// Translation for `locale`, falling back to English.
    pub fn get(&self, locale: &str) -> Option<&str> {
        self.0
            .get(locale)
            .or_else(|| self.0.get("en"))
            .map(String::as_str)
    }

    /// Translation for `locale`, falling back to English and then `default`.
    pub fn get_or<'a>(&'a self, locale: &str, default: &'a str) -> &'a str {
        self.get(locale).unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_english_then_default() {
        let mut map = LanguageMap::en("Title");
        map.0.insert("de".into(), "Titel".into());
        assert_eq!(map.get("de"), Some("Titel"));
        assert_eq!(map.get("nl"), Some("Title"));
        assert_eq!(LanguageMap::default().get_or("de", "core.Title"), "core.Title");
    }
}
