//! In-process fallback classifier.
//!
//! A deterministic scorer over a data artifact: weighted bag-of-terms plus
//! bigrams, positive/negative lexicon dot products, cosine similarity to
//! per-category seed prototypes, table-driven pattern boosts, and URL
//! priors. The artifact (weights, seeds, patterns, priors) is data, not
//! code: the embedded `data/lexicon.json` can be swapped per deployment
//! via `CLASSIFIER_LEXICON_PATH` without touching the algorithm.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LexiconError {
    #[error("failed to read lexicon file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse lexicon artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid pattern in category {category}: {source}")]
    Pattern {
        category: String,
        source: regex::Error,
    },

    #[error("fallback category {0:?} is not in the category table")]
    UnknownFallback(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectionWeights {
    pub title: f64,
    pub description: f64,
    pub body: f64,
    pub bigram: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatternEntry {
    pub pattern: String,
    pub boost: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryEntry {
    pub name: String,
    pub id: i32,
    #[serde(default)]
    pub positive: HashMap<String, f64>,
    #[serde(default)]
    pub negative: HashMap<String, f64>,
    #[serde(default)]
    pub seeds: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<PatternEntry>,
    #[serde(default)]
    pub url_priors: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountryEntry {
    pub code: String,
    pub keywords: HashMap<String, f64>,
}

/// The full lexicon data artifact as shipped in `data/lexicon.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct LexiconArtifact {
    pub weights: SectionWeights,
    pub alpha: f64,
    pub min_confidence: f64,
    pub min_margin: f64,
    pub fallback_category: String,
    pub fallback_floor_confidence: f64,
    pub use_fallback_category: bool,
    pub categories: Vec<CategoryEntry>,
    #[serde(default)]
    pub countries: Vec<CountryEntry>,
}

const EMBEDDED_LEXICON: &str = include_str!("../../../data/lexicon.json");

impl LexiconArtifact {
    pub fn embedded() -> Result<Self, LexiconError> {
        Ok(serde_json::from_str(EMBEDDED_LEXICON)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LexiconError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Snowball-backed tokenizer shared by the classifier and the country
/// detector. Tokens are lowercased, `ё` folded to `е`, split on
/// non-alphanumeric runs, and stemmed by script (Cyrillic tokens through
/// the Russian stemmer, the rest through English).
pub struct Tokenizer {
    english: Stemmer,
    russian: Stemmer,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            english: Stemmer::create(Algorithm::English),
            russian: Stemmer::create(Algorithm::Russian),
        }
    }

    pub fn stem(&self, token: &str) -> String {
        let is_cyrillic = token
            .chars()
            .next()
            .map(|c| ('\u{0400}'..='\u{04FF}').contains(&c))
            .unwrap_or(false);
        if is_cyrillic {
            self.russian.stem(token).into_owned()
        } else {
            self.english.stem(token).into_owned()
        }
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .replace('ё', "е")
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 2)
            .map(|t| self.stem(t))
            .collect()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

struct CompiledCategory {
    id: i32,
    name: String,
    positive: HashMap<String, f64>,
    negative: HashMap<String, f64>,
    prototype: HashMap<String, f64>,
    patterns: Vec<(Regex, f64)>,
    url_priors: HashMap<String, f64>,
}

/// The article text handed to the classifier, already reduced to plain text.
pub struct ClassifyInput<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub body: &'a str,
    pub url: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexiconDecision {
    pub category_id: i32,
    pub category_name: String,
    pub confidence: f64,
}

pub struct LexiconClassifier {
    tokenizer: Tokenizer,
    weights: SectionWeights,
    alpha: f64,
    min_confidence: f64,
    min_margin: f64,
    fallback: Option<LexiconDecision>,
    categories: Vec<CompiledCategory>,
}

fn add_terms(
    vec: &mut HashMap<String, f64>,
    tokens: &[String],
    weight: f64,
    bigram_weight: f64,
) {
    for token in tokens {
        *vec.entry(token.clone()).or_insert(0.0) += weight;
    }
    for pair in tokens.windows(2) {
        let key = format!("{} {}", pair[0], pair[1]);
        *vec.entry(key).or_insert(0.0) += bigram_weight;
    }
}

fn dot(lexicon: &HashMap<String, f64>, doc: &HashMap<String, f64>) -> f64 {
    lexicon
        .iter()
        .filter_map(|(term, w)| doc.get(term).map(|d| w * d))
        .sum()
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, x)| large.get(term).map(|y| x * y))
        .sum();
    let norm_a: f64 = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

impl LexiconClassifier {
    pub fn new(artifact: &LexiconArtifact) -> Result<Self, LexiconError> {
        let tokenizer = Tokenizer::new();

        // Seed prototypes: TF-IDF over the corpus of all seed phrases, one
        // document per phrase, summed per category and L2-normalized.
        let mut seed_docs: Vec<(usize, HashMap<String, f64>)> = Vec::new();
        for (idx, category) in artifact.categories.iter().enumerate() {
            for seed in &category.seeds {
                let tokens = tokenizer.tokenize(seed);
                let mut vec = HashMap::new();
                add_terms(&mut vec, &tokens, 1.0, artifact.weights.bigram);
                seed_docs.push((idx, vec));
            }
        }
        let total_docs = seed_docs.len().max(1) as f64;
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for (_, vec) in &seed_docs {
            let terms: HashSet<&str> = vec.keys().map(String::as_str).collect();
            for term in terms {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }
        let idf: HashMap<String, f64> = doc_freq
            .iter()
            .map(|(term, df)| (term.to_string(), (1.0 + total_docs / *df as f64).ln()))
            .collect();

        let mut prototypes: Vec<HashMap<String, f64>> =
            vec![HashMap::new(); artifact.categories.len()];
        for (idx, vec) in &seed_docs {
            for (term, tf) in vec {
                let weight = tf * idf.get(term).copied().unwrap_or(1.0);
                *prototypes[*idx].entry(term.clone()).or_insert(0.0) += weight;
            }
        }
        for prototype in &mut prototypes {
            let norm: f64 = prototype.values().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 0.0 {
                for value in prototype.values_mut() {
                    *value /= norm;
                }
            }
        }

        let mut categories = Vec::with_capacity(artifact.categories.len());
        for (entry, prototype) in artifact.categories.iter().zip(prototypes) {
            let stem_map = |terms: &HashMap<String, f64>| -> HashMap<String, f64> {
                let mut out: HashMap<String, f64> = HashMap::new();
                for (term, weight) in terms {
                    let tokens = tokenizer.tokenize(term);
                    let key = tokens.join(" ");
                    if key.is_empty() {
                        continue;
                    }
                    let slot = out.entry(key).or_insert(0.0);
                    if *weight > *slot {
                        *slot = *weight;
                    }
                }
                out
            };

            let mut patterns = Vec::with_capacity(entry.patterns.len());
            for pattern in &entry.patterns {
                let compiled = Regex::new(&pattern.pattern).map_err(|e| LexiconError::Pattern {
                    category: entry.name.clone(),
                    source: e,
                })?;
                patterns.push((compiled, pattern.boost));
            }

            categories.push(CompiledCategory {
                id: entry.id,
                name: entry.name.clone(),
                positive: stem_map(&entry.positive),
                negative: stem_map(&entry.negative),
                prototype,
                patterns,
                url_priors: entry
                    .url_priors
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), *v))
                    .collect(),
            });
        }

        let fallback = if artifact.use_fallback_category {
            let entry = artifact
                .categories
                .iter()
                .find(|c| c.name == artifact.fallback_category)
                .ok_or_else(|| LexiconError::UnknownFallback(artifact.fallback_category.clone()))?;
            Some(LexiconDecision {
                category_id: entry.id,
                category_name: entry.name.clone(),
                confidence: artifact.fallback_floor_confidence,
            })
        } else {
            None
        };

        Ok(Self {
            tokenizer,
            weights: artifact.weights.clone(),
            alpha: artifact.alpha,
            min_confidence: artifact.min_confidence,
            min_margin: artifact.min_margin,
            fallback,
            categories,
        })
    }

    /// Score every category and decide. Returns the fallback decision (if
    /// configured) when no category clears the confidence and margin
    /// thresholds, `None` when fallback is disabled too.
    pub fn classify(&self, input: &ClassifyInput<'_>) -> Option<LexiconDecision> {
        let mut doc: HashMap<String, f64> = HashMap::new();
        let title_tokens = self.tokenizer.tokenize(input.title);
        let desc_tokens = self.tokenizer.tokenize(input.description);
        let body_tokens = self.tokenizer.tokenize(input.body);
        add_terms(
            &mut doc,
            &title_tokens,
            self.weights.title,
            self.weights.title * self.weights.bigram,
        );
        add_terms(
            &mut doc,
            &desc_tokens,
            self.weights.description,
            self.weights.description * self.weights.bigram,
        );
        add_terms(
            &mut doc,
            &body_tokens,
            self.weights.body,
            self.weights.body * self.weights.bigram,
        );

        if doc.is_empty() || self.categories.is_empty() {
            return self.fallback.clone();
        }

        let raw_text = format!("{} {} {}", input.title, input.description, input.body);
        let url_lower = input.url.to_lowercase();

        let mut scored: Vec<(usize, f64)> = self
            .categories
            .iter()
            .enumerate()
            .map(|(idx, category)| {
                let mut score = dot(&category.positive, &doc) - dot(&category.negative, &doc);
                score += self.alpha * cosine(&doc, &category.prototype);
                for (pattern, boost) in &category.patterns {
                    if pattern.is_match(&raw_text) {
                        score += boost;
                    }
                }
                for (token, boost) in &category.url_priors {
                    if url_lower.contains(token) {
                        score += boost;
                    }
                }
                (idx, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let (best_idx, best_score) = scored[0];
        let second_score = scored.get(1).map(|(_, s)| *s).unwrap_or(0.0);
        let margin = best_score - second_score;
        let normalized_margin = if best_score.abs() > f64::EPSILON {
            clamp01(margin / best_score.abs())
        } else {
            0.0
        };

        let best = &self.categories[best_idx];
        let cos_best = cosine(&doc, &best.prototype);
        let confidence = clamp01(0.7 * cos_best + 0.3 * normalized_margin);

        if best_score > 0.0 && confidence >= self.min_confidence && normalized_margin >= self.min_margin
        {
            Some(LexiconDecision {
                category_id: best.id,
                category_name: best.name.clone(),
                confidence,
            })
        } else {
            self.fallback.clone()
        }
    }
}
