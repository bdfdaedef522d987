//! The per-source pipeline: feed items in, committed news rows and one
//! parsing-log row out.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::domain::classifier::CategoryResolver;
use crate::domain::country::CountryDetector;
use crate::domain::models::{FeedItem, News, ParseStatus, Source};
use crate::domain::{relevance, sanitize};
use crate::infrastructure::content_extractor::ContentExtractor;
use crate::infrastructure::feed_fetcher::FeedFetcher;
use crate::infrastructure::repository;

/// Where an item's body came from; carried in logs only.
const CONTENT_SOURCE_WEB: &str = "web_extraction";
const CONTENT_SOURCE_RSS: &str = "rss_description";

#[derive(Debug, Clone, Copy)]
pub struct SourceRunSummary {
    pub status: ParseStatus,
    pub inserted: usize,
}

pub struct SourcePipeline {
    pool: PgPool,
    fetcher: FeedFetcher,
    extractor: ContentExtractor,
    resolver: CategoryResolver,
    country: CountryDetector,
    min_body_chars: usize,
    min_total_chars: usize,
    max_content_runes: usize,
    enable_deduplication: bool,
    /// Wall-clock budget for one source run: double the per-request timeout.
    source_budget: Duration,
    shutdown: CancellationToken,
}

impl SourcePipeline {
    pub fn new(
        pool: PgPool,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let artifact = match &config.classifier.lexicon_path {
            Some(path) => crate::domain::classifier::LexiconArtifact::from_path(path)?,
            None => crate::domain::classifier::LexiconArtifact::embedded()?,
        };
        let resolver = CategoryResolver::new(&config.classifier, &artifact, shutdown.clone())?;
        Ok(Self {
            pool,
            fetcher: FeedFetcher::new(&config.parsing, &config.proxy, shutdown.clone())?,
            extractor: ContentExtractor::new(&config.parsing, &config.proxy, shutdown.clone())?,
            resolver,
            country: CountryDetector::new(&artifact.countries),
            min_body_chars: config.parsing.min_body_chars,
            min_total_chars: config.parsing.min_total_chars,
            max_content_runes: config.parsing.max_content_runes,
            enable_deduplication: config.parsing.enable_deduplication,
            source_budget: config.parsing.request_timeout * 2,
            shutdown,
        })
    }

    /// Run the full pipeline for one source under its wall-clock budget:
    /// fetch, process items in feed order, write the batch, record exactly
    /// one parsing-log row, and bump `last_parsed_at` on success. Never
    /// propagates: every failure mode ends in the log row.
    pub async fn run_source(&self, source: &Source) -> SourceRunSummary {
        let started = Instant::now();
        tracing::debug!(source_id = source.id, feed_url = %source.feed_url, "source tick started");

        // Shutdown wins over the budget: a cancelled run returns promptly
        // and writes no log row, since the tick never completed.
        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => {
                tracing::debug!(source_id = source.id, "source run cancelled by shutdown");
                return SourceRunSummary {
                    status: ParseStatus::Error,
                    inserted: 0,
                };
            }
            outcome = tokio::time::timeout(self.source_budget, self.execute(source)) => outcome,
        };
        let elapsed_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(Ok(inserted)) => {
                repository::record_parsing_log(
                    &self.pool,
                    source.id,
                    ParseStatus::Success,
                    inserted as i32,
                    None,
                    elapsed_ms,
                )
                .await;
                if let Err(e) = repository::touch_source_parsed(&self.pool, source.id).await {
                    tracing::warn!(source_id = source.id, error = %e, "failed to update last_parsed_at");
                }
                tracing::info!(source_id = source.id, inserted, elapsed_ms, "source tick complete");
                SourceRunSummary {
                    status: ParseStatus::Success,
                    inserted,
                }
            }
            Ok(Err(message)) => {
                tracing::warn!(source_id = source.id, error = %message, "source tick failed");
                repository::record_parsing_log(
                    &self.pool,
                    source.id,
                    ParseStatus::Error,
                    0,
                    Some(&message),
                    elapsed_ms,
                )
                .await;
                SourceRunSummary {
                    status: ParseStatus::Error,
                    inserted: 0,
                }
            }
            Err(_) => {
                let message = format!(
                    "source run exceeded budget of {}ms",
                    self.source_budget.as_millis()
                );
                tracing::warn!(source_id = source.id, "source tick timed out");
                repository::record_parsing_log(
                    &self.pool,
                    source.id,
                    ParseStatus::Timeout,
                    0,
                    Some(&message),
                    elapsed_ms,
                )
                .await;
                SourceRunSummary {
                    status: ParseStatus::Timeout,
                    inserted: 0,
                }
            }
        }
    }

    /// Fetch, process, and persist. Returns the count of genuine inserts or
    /// an error message for the parsing log.
    async fn execute(&self, source: &Source) -> Result<usize, String> {
        let parse_result = self.fetcher.parse_feed(source).await;
        if !parse_result.success {
            return Err(parse_result
                .error
                .unwrap_or_else(|| "feed fetch failed".to_string()));
        }

        let mut batch: Vec<News> = Vec::with_capacity(parse_result.items.len());
        // parsed_at is non-decreasing across the batch even if the clock
        // steps backwards mid-run.
        let mut parsed_at = parse_result.parsed_at;
        for item in &parse_result.items {
            let now = Utc::now();
            if now > parsed_at {
                parsed_at = now;
            }
            if let Some(news) = self.process_item(source, item, parsed_at).await {
                batch.push(news);
            }
        }

        repository::create_news_batch(&self.pool, &mut batch)
            .await
            .map_err(|e| {
                tracing::error!(source_id = source.id, error = %e, "news batch rolled back");
                format!("batch insert failed: {e}")
            })
    }

    /// Per-item stage order is part of the contract: dedup, body
    /// resolution, quality gate, classification, country detection,
    /// relevance, sanitize + validate.
    async fn process_item(
        &self,
        source: &Source,
        item: &FeedItem,
        parsed_at: DateTime<Utc>,
    ) -> Option<News> {
        if self.enable_deduplication {
            match repository::news_exists(&self.pool, source.id, &item.link).await {
                Ok(true) => {
                    tracing::debug!(source_id = source.id, url = %item.link, "duplicate item, skipping");
                    return None;
                }
                Ok(false) => {}
                // The batch writer's conflict handling still guarantees
                // at-most-once; carry on.
                Err(e) => {
                    tracing::warn!(source_id = source.id, error = %e, "dedup lookup failed")
                }
            }
        }

        let (body, content_source) = match self.extractor.extract(&item.link).await {
            Ok(extracted) => (extracted.text, CONTENT_SOURCE_WEB),
            Err(e) => {
                tracing::debug!(
                    url = %item.link,
                    error = %e,
                    "content extraction failed, falling back to feed description"
                );
                (item.description.clone(), CONTENT_SOURCE_RSS)
            }
        };

        let description_chars = item.description.chars().count();
        let body_chars = body.chars().count();
        if !passes_quality_gate(
            description_chars,
            body_chars,
            self.min_body_chars,
            self.min_total_chars,
        ) {
            tracing::debug!(
                source_id = source.id,
                url = %item.link,
                description_chars,
                body_chars,
                "item failed quality gate, skipping"
            );
            return None;
        }

        // Feed-provided category strings are extra classification signal.
        let classify_description = if item.categories.is_empty() {
            item.description.clone()
        } else {
            format!("{} {}", item.description, item.categories.join(" "))
        };
        let resolution = self
            .resolver
            .resolve(&item.title, &classify_description, &body, &item.link)
            .await;

        let detected_country = self.country.detect(&item.title, &item.description, &body);

        let now = Utc::now();
        let relevance_score = relevance::score(
            &relevance::RelevanceInput {
                title: &item.title,
                body: &body,
                published_at: item.published_at,
                has_image: item.image_url.is_some(),
                has_author: !item.author.is_empty(),
            },
            now,
        );

        tracing::debug!(
            source_id = source.id,
            url = %item.link,
            content_source,
            category_id = resolution.category_id,
            category_origin = resolution.origin.as_str(),
            confidence = resolution.confidence,
            detected_country = detected_country.as_deref().unwrap_or("-"),
            relevance_score,
            "item processed"
        );

        let content = sanitize::truncate_runes(
            &sanitize::normalize_body(&sanitize::scrub_control_chars(&body)),
            self.max_content_runes,
        );
        let author = sanitize::collapse_whitespace(&sanitize::scrub_control_chars(&item.author));

        let news = News {
            id: None,
            title: sanitize::collapse_whitespace(&sanitize::scrub_control_chars(&item.title)),
            description: sanitize::collapse_whitespace(&sanitize::scrub_control_chars(
                &item.description,
            )),
            content,
            url: item.link.clone(),
            image_url: item.image_url.clone(),
            author: (!author.is_empty()).then_some(author),
            source_id: source.id,
            category_id: (resolution.category_id > 0).then_some(resolution.category_id),
            published_at: item.published_at,
            parsed_at,
            relevance_score,
        };

        match news.validate() {
            Ok(()) => Some(news),
            Err(e) => {
                tracing::debug!(source_id = source.id, url = %item.link, error = %e, "item failed validation, skipping");
                None
            }
        }
    }
}

fn passes_quality_gate(
    description_chars: usize,
    body_chars: usize,
    min_body_chars: usize,
    min_total_chars: usize,
) -> bool {
    description_chars > 0
        && body_chars >= min_body_chars
        && description_chars + body_chars >= min_total_chars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_gate_requires_description() {
        assert!(!passes_quality_gate(0, 500, 100, 150));
    }

    #[test]
    fn test_quality_gate_requires_body_floor() {
        assert!(!passes_quality_gate(80, 99, 100, 150));
        assert!(passes_quality_gate(80, 100, 100, 150));
    }

    #[test]
    fn test_quality_gate_requires_total_floor() {
        assert!(!passes_quality_gate(20, 100, 100, 150));
        assert!(passes_quality_gate(50, 100, 100, 150));
    }
}
