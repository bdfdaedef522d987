//! Feed fetching and parsing: one `Source` in, a list of `FeedItem`s out.

use std::time::{Duration, Instant};

use chrono::Utc;
use feed_rs::parser;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{ParsingConfig, ProxyConfig};
use crate::domain::models::{FeedItem, FeedParseResult, Source};
use crate::domain::sanitize;

/// Cap on cleaned feed descriptions, in chars. Full bodies come from the
/// content extractor, not the feed.
const DESCRIPTION_CAP_RUNES: usize = 2_000;

const FEED_ACCEPT: &str = "application/rss+xml, application/xml, text/xml";

#[derive(Error, Debug)]
pub enum FeedFetchError {
    #[error("HTTP request failed with status {status}: {message}")]
    RequestFailed { status: StatusCode, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("feed size too large: {0} bytes")]
    Oversize(usize),

    #[error("Feed parsing failed: {0}")]
    Parse(String),

    #[error("Invalid proxy configuration: {0}")]
    Proxy(String),

    #[error("fetch cancelled by shutdown")]
    Cancelled,
}

pub struct FeedFetcher {
    client: Client,
    shutdown: CancellationToken,
    max_feed_size: usize,
    min_title_length: usize,
    max_title_length: usize,
    batch_size: usize,
}

impl FeedFetcher {
    pub fn new(
        parsing: &ParsingConfig,
        proxy: &ProxyConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, FeedFetchError> {
        let mut builder = Client::builder()
            .user_agent(&parsing.user_agent)
            .gzip(true)
            .brotli(true)
            .timeout(parsing.request_timeout)
            .connect_timeout(Duration::from_secs(10));

        if proxy.enabled && !proxy.url.is_empty() {
            let mut forward = reqwest::Proxy::all(&proxy.url)
                .map_err(|e| FeedFetchError::Proxy(e.to_string()))?;
            if let (Some(user), Some(password)) = (&proxy.username, &proxy.password) {
                forward = forward.basic_auth(user, password);
            }
            builder = builder.proxy(forward);
        }

        Ok(Self {
            client: builder.build()?,
            shutdown,
            max_feed_size: parsing.max_feed_size,
            min_title_length: parsing.min_title_length,
            max_title_length: parsing.max_title_length,
            batch_size: parsing.batch_size,
        })
    }

    /// Fetch and parse one source's feed. All failure modes are folded into
    /// the result envelope; callers record it in the parsing log.
    pub async fn parse_feed(&self, source: &Source) -> FeedParseResult {
        let started = Instant::now();
        match self.fetch_items(source).await {
            Ok(items) => FeedParseResult {
                success: true,
                items,
                error: None,
                execution_time: started.elapsed(),
                parsed_at: Utc::now(),
            },
            Err(e) => {
                tracing::warn!(source_id = source.id, url = %source.feed_url, error = %e, "feed fetch failed");
                FeedParseResult {
                    success: false,
                    items: Vec::new(),
                    error: Some(e.to_string()),
                    execution_time: started.elapsed(),
                    parsed_at: Utc::now(),
                }
            }
        }
    }

    async fn fetch_items(&self, source: &Source) -> Result<Vec<FeedItem>, FeedFetchError> {
        tracing::debug!(source_id = source.id, url = %source.feed_url, "fetching feed");

        let request = self
            .client
            .get(&source.feed_url)
            .header(header::ACCEPT, FEED_ACCEPT)
            .header(header::CACHE_CONTROL, "no-cache")
            .send();
        let response = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(FeedFetchError::Cancelled),
            response = request => response?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let message = format!(
                "{} - {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            );
            return Err(FeedFetchError::RequestFailed { status, message });
        }

        let body = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(FeedFetchError::Cancelled),
            body = self.read_limited(response) => body?,
        };

        let feed = parser::parse(body.as_slice())
            .map_err(|e| FeedFetchError::Parse(e.to_string()))?;

        tracing::debug!(
            source_id = source.id,
            entries = feed.entries.len(),
            "parsed feed document"
        );

        let base = Url::parse(&source.feed_url).ok();
        let now = Utc::now();
        let mut items = Vec::new();
        for entry in feed.entries {
            if items.len() >= self.batch_size {
                // Per-tick cap; the next tick picks up the rest.
                break;
            }
            if let Some(item) = self.map_entry(entry, base.as_ref(), now) {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Read the response body through a size cap. The limit applies to the
    /// decompressed stream, which is what the parser will see.
    async fn read_limited(&self, response: reqwest::Response) -> Result<Vec<u8>, FeedFetchError> {
        let mut body: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > self.max_feed_size {
                return Err(FeedFetchError::Oversize(body.len() + chunk.len()));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    fn map_entry(
        &self,
        entry: feed_rs::model::Entry,
        base: Option<&Url>,
        now: chrono::DateTime<Utc>,
    ) -> Option<FeedItem> {
        let title = entry
            .title
            .as_ref()
            .map(|t| sanitize::html_to_text(&t.content))
            .unwrap_or_default();
        let link = entry
            .links
            .first()
            .map(|l| resolve_link(&l.href, base))
            .unwrap_or_default();

        if title.is_empty() || link.is_empty() {
            tracing::debug!("dropping entry without title or link");
            return None;
        }
        let title_chars = title.chars().count();
        if !(self.min_title_length..=self.max_title_length).contains(&title_chars) {
            tracing::debug!(title = %title, chars = title_chars, "dropping entry with out-of-bounds title");
            return None;
        }

        let published_at = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);

        let description = entry
            .summary
            .as_ref()
            .map(|s| {
                sanitize::truncate_runes(&sanitize::html_to_text(&s.content), DESCRIPTION_CAP_RUNES)
            })
            .unwrap_or_default();

        let content = entry
            .content
            .as_ref()
            .and_then(|c| c.body.as_deref())
            .map(sanitize::html_to_text)
            .unwrap_or_default();

        let author = entry
            .authors
            .first()
            .map(|a| sanitize::collapse_whitespace(&a.name))
            .unwrap_or_default();

        let image_url = extract_image(&entry);

        let guid = if entry.id.is_empty() {
            link.clone()
        } else {
            entry.id.clone()
        };

        let categories = entry
            .categories
            .iter()
            .map(|c| c.label.clone().unwrap_or_else(|| c.term.clone()))
            .filter(|c| !c.is_empty())
            .collect();

        Some(FeedItem {
            title,
            description,
            content,
            link,
            author,
            published_at,
            image_url,
            guid,
            categories,
        })
    }
}

fn resolve_link(href: &str, base: Option<&Url>) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match base.and_then(|b| b.join(href).ok()) {
        Some(resolved) => resolved.to_string(),
        None => href.to_string(),
    }
}

/// Image from the item's media metadata: a thumbnail when present, else the
/// first enclosure with an `image/*` media type.
fn extract_image(entry: &feed_rs::model::Entry) -> Option<String> {
    for media in &entry.media {
        if let Some(thumbnail) = media.thumbnails.first() {
            return Some(thumbnail.image.uri.clone());
        }
        for content in &media.content {
            let is_image = content
                .content_type
                .as_ref()
                .map(|media_type| media_type.ty().as_str() == "image")
                .unwrap_or(false);
            if is_image {
                if let Some(url) = &content.url {
                    return Some(url.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParsingConfig;

    fn test_parsing_config() -> ParsingConfig {
        ParsingConfig {
            interval: "0 */5 * * * *".to_string(),
            max_concurrent_parsers: 2,
            request_timeout: Duration::from_secs(5),
            max_feed_size: 1024 * 1024,
            max_content_runes: 10_000,
            min_content_runes: 50,
            min_title_length: 10,
            max_title_length: 500,
            min_body_chars: 50,
            min_total_chars: 80,
            batch_size: 2,
            enable_deduplication: true,
            user_agent: "NewsPulse/test".to_string(),
        }
    }

    fn fetcher() -> FeedFetcher {
        FeedFetcher::new(
            &test_parsing_config(),
            &ProxyConfig::default(),
            CancellationToken::new(),
        )
        .unwrap()
    }

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Example</title>
    <link>https://example.com</link>
    <item>
      <title>First headline with enough characters</title>
      <link>/news/1</link>
      <guid>tag:example.com,2024:1</guid>
      <description>&lt;p&gt;A &lt;b&gt;summary&lt;/b&gt; of the piece&lt;/p&gt;</description>
      <author>reporter@example.com (Jane Doe)</author>
      <category>Sports</category>
      <enclosure url="https://example.com/img/1.jpg" type="image/jpeg" length="1000"/>
      <pubDate>Mon, 06 Jan 2025 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>short</title>
      <link>https://example.com/news/2</link>
    </item>
    <item>
      <title></title>
      <link>https://example.com/news/3</link>
    </item>
    <item>
      <title>Second valid headline of fair length</title>
      <link>https://example.com/news/4</link>
    </item>
    <item>
      <title>Third valid headline beyond the batch cap</title>
      <link>https://example.com/news/5</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_map_entries_from_sample_feed() {
        let fetcher = fetcher();
        let feed = parser::parse(SAMPLE_RSS.as_bytes()).unwrap();
        let base = Url::parse("https://example.com/feed.rss").unwrap();
        let now = Utc::now();

        let items: Vec<FeedItem> = feed
            .entries
            .into_iter()
            .filter_map(|e| fetcher.map_entry(e, Some(&base), now))
            .collect();

        // "short" and the untitled entry are dropped.
        assert_eq!(items.len(), 3);

        let first = &items[0];
        assert_eq!(first.title, "First headline with enough characters");
        assert_eq!(first.link, "https://example.com/news/1");
        assert_eq!(first.guid, "tag:example.com,2024:1");
        assert_eq!(first.description, "A summary of the piece");
        assert_eq!(first.image_url.as_deref(), Some("https://example.com/img/1.jpg"));
        assert_eq!(first.categories, vec!["Sports".to_string()]);
    }

    #[test]
    fn test_published_defaults_to_now() {
        let fetcher = fetcher();
        let feed = parser::parse(SAMPLE_RSS.as_bytes()).unwrap();
        let now = Utc::now();
        let undated = feed
            .entries
            .into_iter()
            .find(|e| e.links.first().map(|l| l.href.ends_with("/news/4")).unwrap_or(false))
            .unwrap();
        let item = fetcher.map_entry(undated, None, now).unwrap();
        assert_eq!(item.published_at, now);
        assert!(!item.guid.is_empty());
    }

    #[test]
    fn test_resolve_link_joins_relative() {
        let base = Url::parse("https://example.com/rss/feed.xml").unwrap();
        assert_eq!(
            resolve_link("/news/1", Some(&base)),
            "https://example.com/news/1"
        );
        assert_eq!(
            resolve_link("https://other.example/x", Some(&base)),
            "https://other.example/x"
        );
    }
}
