use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use newspulse::config::{ParsingConfig, ProxyConfig};
use newspulse::domain::models::Source;
use newspulse::infrastructure::feed_fetcher::FeedFetcher;

fn parsing_config(max_feed_size: usize) -> ParsingConfig {
    ParsingConfig {
        interval: "0 */5 * * * *".to_string(),
        max_concurrent_parsers: 2,
        request_timeout: Duration::from_secs(5),
        max_feed_size,
        max_content_runes: 10_000,
        min_content_runes: 50,
        min_title_length: 10,
        max_title_length: 500,
        min_body_chars: 50,
        min_total_chars: 80,
        batch_size: 50,
        enable_deduplication: true,
        user_agent: "NewsPulse/test".to_string(),
    }
}

fn source(feed_url: String) -> Source {
    let now = Utc::now();
    Source {
        id: 1,
        name: "Example".to_string(),
        domain: "example.com".to_string(),
        feed_url,
        website_url: None,
        country_id: None,
        language: "en".to_string(),
        is_active: true,
        last_parsed_at: None,
        parse_interval_minutes: 30,
        created_at: now,
        updated_at: now,
    }
}

fn sample_rss(base: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>{base}</link>
    <item>
      <title>First headline with enough characters</title>
      <link>{base}/news/1</link>
      <description>A summary of the first piece</description>
      <pubDate>Mon, 06 Jan 2025 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second headline with enough characters</title>
      <link>{base}/news/2</link>
      <description>A summary of the second piece</description>
      <pubDate>Mon, 06 Jan 2025 11:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#
    )
}

#[tokio::test]
async fn test_parse_feed_happy_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.rss"))
        .and(header("cache-control", "no-cache"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sample_rss(&server.uri()), "application/rss+xml"),
        )
        .mount(&server)
        .await;

    let fetcher = FeedFetcher::new(&parsing_config(1024 * 1024), &ProxyConfig::default(), CancellationToken::new()).unwrap();
    let result = fetcher
        .parse_feed(&source(format!("{}/a.rss", server.uri())))
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.items.len(), 2);
    assert_eq!(result.items[0].title, "First headline with enough characters");
    assert_eq!(result.items[0].link, format!("{}/news/1", server.uri()));
    assert_eq!(result.items[1].link, format!("{}/news/2", server.uri()));
    // Feed order is preserved.
    assert!(result.items[0].published_at < result.items[1].published_at);
}

#[tokio::test]
async fn test_parse_feed_reports_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.rss"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = FeedFetcher::new(&parsing_config(1024 * 1024), &ProxyConfig::default(), CancellationToken::new()).unwrap();
    let result = fetcher
        .parse_feed(&source(format!("{}/a.rss", server.uri())))
        .await;

    assert!(!result.success);
    assert!(result.items.is_empty());
    assert!(result.error.as_deref().unwrap().contains("503"));
}

#[tokio::test]
async fn test_parse_feed_enforces_size_limit() {
    let server = MockServer::start().await;
    let oversize_body = "x".repeat(2048 + 1);
    Mock::given(method("GET"))
        .and(path("/a.rss"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(oversize_body, "application/rss+xml"))
        .mount(&server)
        .await;

    let fetcher = FeedFetcher::new(&parsing_config(2048), &ProxyConfig::default(), CancellationToken::new()).unwrap();
    let result = fetcher
        .parse_feed(&source(format!("{}/a.rss", server.uri())))
        .await;

    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("feed size too large"));
}

#[tokio::test]
async fn test_parse_feed_rejects_malformed_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.rss"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("this is not a feed", "text/plain"),
        )
        .mount(&server)
        .await;

    let fetcher = FeedFetcher::new(&parsing_config(1024 * 1024), &ProxyConfig::default(), CancellationToken::new()).unwrap();
    let result = fetcher
        .parse_feed(&source(format!("{}/a.rss", server.uri())))
        .await;

    assert!(!result.success);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_parse_feed_caps_items_at_batch_size() {
    let server = MockServer::start().await;
    let items: String = (0..10)
        .map(|i| {
            format!(
                "<item><title>Numbered headline number {i} padded out</title><link>https://example.com/news/{i}</link></item>"
            )
        })
        .collect();
    let feed = format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>E</title>{items}</channel></rss>"#
    );
    Mock::given(method("GET"))
        .and(path("/a.rss"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(feed, "application/rss+xml"))
        .mount(&server)
        .await;

    let mut config = parsing_config(1024 * 1024);
    config.batch_size = 3;
    let fetcher = FeedFetcher::new(&config, &ProxyConfig::default(), CancellationToken::new()).unwrap();
    let result = fetcher
        .parse_feed(&source(format!("{}/a.rss", server.uri())))
        .await;

    assert!(result.success);
    assert_eq!(result.items.len(), 3);
}
