//! Auxiliary country detection.
//!
//! A lexicon scorer over title, description, and body. The result is only
//! surfaced in logs; no `news` column consumes it yet.

use std::collections::HashMap;

use crate::domain::classifier::lexicon::{CountryEntry, Tokenizer};

const TITLE_WEIGHT: f64 = 2.0;
const DESCRIPTION_WEIGHT: f64 = 1.3;
const BODY_WEIGHT: f64 = 1.0;
/// Keywords at or past this length carry more signal.
const LONG_KEYWORD_CHARS: usize = 7;
const LONG_KEYWORD_MULTIPLIER: f64 = 1.25;
/// Minimum score for a detection to be reported at all.
const SCORE_FLOOR: f64 = 0.75;

struct CountryLexicon {
    code: String,
    // stemmed keyword -> weight (already scaled for keyword length)
    keywords: HashMap<String, f64>,
}

pub struct CountryDetector {
    tokenizer: Tokenizer,
    countries: Vec<CountryLexicon>,
}

impl CountryDetector {
    pub fn new(entries: &[CountryEntry]) -> Self {
        let tokenizer = Tokenizer::new();
        let countries = entries
            .iter()
            .map(|entry| {
                let mut keywords: HashMap<String, f64> = HashMap::new();
                for (keyword, weight) in &entry.keywords {
                    let scaled = if keyword.chars().count() >= LONG_KEYWORD_CHARS {
                        weight * LONG_KEYWORD_MULTIPLIER
                    } else {
                        *weight
                    };
                    let stem = tokenizer.tokenize(keyword).join(" ");
                    if stem.is_empty() {
                        continue;
                    }
                    let slot = keywords.entry(stem).or_insert(0.0);
                    if scaled > *slot {
                        *slot = scaled;
                    }
                }
                CountryLexicon {
                    code: entry.code.clone(),
                    keywords,
                }
            })
            .collect();
        Self {
            tokenizer,
            countries,
        }
    }

    /// Returns the top-scoring country code when it clears the floor.
    pub fn detect(&self, title: &str, description: &str, body: &str) -> Option<String> {
        let sections = [
            (self.tokenizer.tokenize(title), TITLE_WEIGHT),
            (self.tokenizer.tokenize(description), DESCRIPTION_WEIGHT),
            (self.tokenizer.tokenize(body), BODY_WEIGHT),
        ];

        let mut best: Option<(&str, f64)> = None;
        for country in &self.countries {
            let mut score = 0.0;
            for (tokens, weight) in &sections {
                for token in tokens {
                    if let Some(kw_weight) = country.keywords.get(token) {
                        score += kw_weight * weight;
                    }
                }
            }
            if score > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((&country.code, score));
            }
        }

        best.and_then(|(code, score)| (score >= SCORE_FLOOR).then(|| code.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classifier::LexiconArtifact;

    fn detector() -> CountryDetector {
        CountryDetector::new(&LexiconArtifact::embedded().unwrap().countries)
    }

    #[test]
    fn test_detects_russia_from_title() {
        let detected = detector().detect("В Москве открылся форум", "", "");
        assert_eq!(detected.as_deref(), Some("ru"));
    }

    #[test]
    fn test_detects_inflected_country_name() {
        // "России" stems to the same token as "Россия".
        let detected = detector().detect("Новости России за неделю", "", "");
        assert_eq!(detected.as_deref(), Some("ru"));
    }

    #[test]
    fn test_no_detection_below_floor() {
        assert_eq!(detector().detect("Plain headline", "nothing here", ""), None);
    }

    #[test]
    fn test_title_outweighs_body() {
        let detected = detector().detect(
            "Washington hosts the summit",
            "",
            "Россия",
        );
        assert_eq!(detected.as_deref(), Some("us"));
    }
}
