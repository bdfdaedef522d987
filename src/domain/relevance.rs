//! Relevance scoring for incoming articles.
//!
//! The score is a coarse freshness/quality prior used by downstream feed
//! ranking. Bands are additive over a 0.5 base and the result is clamped
//! to 1.0.

use chrono::{DateTime, Utc};

pub struct RelevanceInput<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub published_at: DateTime<Utc>,
    pub has_image: bool,
    pub has_author: bool,
}

pub fn score(input: &RelevanceInput<'_>, now: DateTime<Utc>) -> f64 {
    let mut score = 0.5f64;

    let age = now - input.published_at;
    if age < chrono::Duration::hours(1) {
        score += 0.3;
    } else if age < chrono::Duration::hours(6) {
        score += 0.2;
    } else if age < chrono::Duration::hours(24) {
        score += 0.1;
    }

    let title_len = input.title.chars().count();
    if (50..=100).contains(&title_len) {
        score += 0.1;
    }

    if input.body.chars().count() > 100 {
        score += 0.05;
    }
    if input.has_image {
        score += 0.05;
    }
    if input.has_author {
        score += 0.05;
    }

    score.min(1.0)
}
