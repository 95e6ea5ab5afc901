//! Keyword extraction from chat text

use smallvec::SmallVec;

use crate::config::MetricsConfig;

/// Length band for keywords, both bounds exclusive, in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordBand {
    pub min_exclusive: usize,
    pub max_exclusive: usize,
}

impl Default for KeywordBand {
    fn default() -> Self {
        Self {
            min_exclusive: 2,
            max_exclusive: 50,
        }
    }
}

impl From<&MetricsConfig> for KeywordBand {
    fn from(config: &MetricsConfig) -> Self {
        Self {
            min_exclusive: config.keyword_min_len,
            max_exclusive: config.keyword_max_len,
        }
    }
}

impl KeywordBand {
    pub fn accepts(&self, token: &str) -> bool {
        let len = token.chars().count();
        len > self.min_exclusive && len < self.max_exclusive
    }
}

/// Most chat lines carry only a handful of keywords
pub type Keywords = SmallVec<[String; 8]>;

/// Split on whitespace, lowercase, keep tokens inside `band`.
///
/// Duplicates are kept: "go go gophers" counts "gophers" once and nothing for
/// "go", while "rust rust" counts "rust" twice.
pub fn extract_keywords(text: &str, band: KeywordBand) -> Keywords {
    text.split_whitespace()
        .map(str::to_lowercase)
        .filter(|token| band.accepts(token))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_by_length() {
        let keywords = extract_keywords("a an the Rust", KeywordBand::default());
        assert_eq!(keywords.as_slice(), ["the", "rust"]);
    }

    #[test]
    fn test_upper_bound_is_exclusive() {
        let band = KeywordBand::default();
        assert!(band.accepts(&"x".repeat(49)));
        assert!(!band.accepts(&"x".repeat(50)));
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        // three characters, six bytes
        assert!(KeywordBand::default().accepts("héé"));
        assert_eq!(
            extract_keywords("ÉTÉ été", KeywordBand::default()).as_slice(),
            ["été", "été"]
        );
    }

    #[test]
    fn test_any_whitespace_separates() {
        let keywords = extract_keywords("  hello\tworld\nagain  ", KeywordBand::default());
        assert_eq!(keywords.as_slice(), ["hello", "world", "again"]);
    }

    #[test]
    fn test_empty_text() {
        assert!(extract_keywords("", KeywordBand::default()).is_empty());
        assert!(extract_keywords("   ", KeywordBand::default()).is_empty());
    }

    #[test]
    fn test_band_from_config() {
        let config = MetricsConfig {
            keyword_min_len: 3,
            keyword_max_len: 6,
            ..Default::default()
        };
        let keywords = extract_keywords("abc abcd abcdef", KeywordBand::from(&config));
        assert_eq!(keywords.as_slice(), ["abcd"]);
    }
}
