use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

/// A publisher feed endpoint, the unit of scheduling. Sources are managed
/// by an external admin tool; the pipeline only reads them and bumps
/// `last_parsed_at` after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Source {
    pub id: i32,
    pub name: String,
    pub domain: String,
    pub feed_url: String,
    pub website_url: Option<String>,
    pub country_id: Option<i32>,
    pub language: String,
    pub is_active: bool,
    pub last_parsed_at: Option<DateTime<Utc>>,
    pub parse_interval_minutes: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An entry parsed out of a syndication document, pre-validation.
#[derive(Debug, Clone, Default)]
pub struct FeedItem {
    pub title: String,
    pub description: String,
    /// Raw content from the feed; often empty.
    pub content: String,
    pub link: String,
    pub author: String,
    pub published_at: DateTime<Utc>,
    pub image_url: Option<String>,
    pub guid: String,
    pub categories: Vec<String>,
}

/// Outcome envelope of one feed fetch+parse.
#[derive(Debug)]
pub struct FeedParseResult {
    pub success: bool,
    pub items: Vec<FeedItem>,
    pub error: Option<String>,
    pub execution_time: std::time::Duration,
    pub parsed_at: DateTime<Utc>,
}

/// A validated article record, immutable from the pipeline's point of view
/// once assembled. The store assigns the surrogate id on insert; the batch
/// writer copies it back here so callers can count genuine inserts.
/// `view_count` and `is_active` take their defaults in the store.
#[derive(Debug, Clone)]
pub struct News {
    pub id: Option<i64>,
    pub title: String,
    pub description: String,
    pub content: String,
    pub url: String,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub source_id: i32,
    pub category_id: Option<i32>,
    pub published_at: DateTime<Utc>,
    pub parsed_at: DateTime<Utc>,
    pub relevance_score: f64,
}

/// Outcome of one source tick, recorded append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    Success,
    Error,
    Timeout,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::Success => "success",
            ParseStatus::Error => "error",
            ParseStatus::Timeout => "timeout",
        }
    }
}

pub const MIN_NEWS_TITLE_CHARS: usize = 10;
pub const MAX_NEWS_TITLE_CHARS: usize = 500;

#[derive(Error, Debug, PartialEq)]
pub enum NewsValidationError {
    #[error("title length {0} outside [{MIN_NEWS_TITLE_CHARS}, {MAX_NEWS_TITLE_CHARS}]")]
    TitleLength(usize),

    #[error("url is empty")]
    EmptyUrl,

    #[error("source id {0} is not a valid reference")]
    InvalidSourceId(i32),

    #[error("relevance score {0} outside [0, 1]")]
    RelevanceOutOfRange(f64),
}

impl News {
    /// Enforces the persisted-record invariants. Runs after sanitation,
    /// immediately before the batch write.
    pub fn validate(&self) -> Result<(), NewsValidationError> {
        let title_chars = self.title.chars().count();
        if !(MIN_NEWS_TITLE_CHARS..=MAX_NEWS_TITLE_CHARS).contains(&title_chars) {
            return Err(NewsValidationError::TitleLength(title_chars));
        }
        if self.url.is_empty() {
            return Err(NewsValidationError::EmptyUrl);
        }
        if self.source_id <= 0 {
            return Err(NewsValidationError::InvalidSourceId(self.source_id));
        }
        if !(0.0..=1.0).contains(&self.relevance_score) {
            return Err(NewsValidationError::RelevanceOutOfRange(
                self.relevance_score,
            ));
        }
        Ok(())
    }
}

impl Source {
    /// A source is due when active and its interval has elapsed (or it has
    /// never been parsed).
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        match self.last_parsed_at {
            None => true,
            Some(last) => now - last >= chrono::Duration::minutes(self.parse_interval_minutes as i64),
        }
    }
}
