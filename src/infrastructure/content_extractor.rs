//! Article content extraction: fetch a page, normalize transport encoding
//! and charset, run readability, and clean the resulting text.
//!
//! Transport encoding (`Content-Encoding`) and the document charset are
//! deliberately handled in separate passes; conflating them is the classic
//! way to end up parsing mojibake.

use std::io::Read;
use std::time::Duration;

use chardetng::EncodingDetector;
use dom_smoothie::Readability;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header, Client, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{ParsingConfig, ProxyConfig};
use crate::domain::sanitize;

/// Raw page cap. Pages past this size are not articles.
const MAX_ARTICLE_BYTES: usize = 10 * 1024 * 1024;

/// How many leading bytes charset sniffing looks at.
const CHARSET_SNIFF_BYTES: usize = 4096;

const ARTICLE_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// File extensions that can never be article pages.
const REJECTED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "rtf", "jpg", "jpeg", "png", "gif",
    "webp", "svg", "bmp", "ico", "mp3", "mp4", "avi", "mov", "mkv", "wmv", "flv", "zip", "rar",
    "7z", "gz", "tar", "exe", "dmg", "apk",
];

/// Trailing publisher boilerplate stripped from extracted text. Small,
/// deployment-tunable set; each pattern anchors to the end of the text.
static BOILERPLATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)подписывайтесь на (наш|наши|телеграм|канал).{0,200}$",
        r"(?is)читайте (также|ещё|еще)\s*:.{0,300}$",
        r"(?is)read more at .{0,200}$",
        r"(?is)subscribe to our newsletter.{0,200}$",
        r"(?is)all rights reserved\.?.{0,100}$",
        r"(?is)©\s?\d{4}.{0,150}$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static META_CHARSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([a-zA-Z0-9_-]+)"#).unwrap()
});

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("url rejected: {0}")]
    UrlRejected(String),

    #[error("invalid proxy configuration: {0}")]
    Proxy(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("article not found")]
    NotFound,

    #[error("article fetch failed with status {0}")]
    FetchFailed(StatusCode),

    #[error("unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("page too large: {0} bytes")]
    Oversize(usize),

    #[error("content decoding failed: {0}")]
    Decode(String),

    #[error("readability parsing failed: {0}")]
    Readability(String),

    #[error("insufficient content: {chars} chars, need {min}")]
    InsufficientContent { chars: usize, min: usize },

    #[error("extraction cancelled by shutdown")]
    Cancelled,
}

/// The extracted article: candidate title, cleaned plain-text body, and a
/// short excerpt when readability produced one.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub title: String,
    pub text: String,
    pub excerpt: Option<String>,
}

pub struct ContentExtractor {
    client: Client,
    shutdown: CancellationToken,
    min_content_runes: usize,
    max_content_runes: usize,
}

impl ContentExtractor {
    pub fn new(
        parsing: &ParsingConfig,
        proxy: &ProxyConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, ExtractError> {
        // No explicit Accept-Encoding header: the client negotiates and
        // decompresses transparently, and explicit residual Content-Encoding
        // values are handled after the fact.
        let mut builder = Client::builder()
            .user_agent(&parsing.user_agent)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .timeout(parsing.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(20))
            .pool_idle_timeout(Duration::from_secs(90));

        if proxy.enabled && !proxy.url.is_empty() {
            let mut forward = reqwest::Proxy::all(&proxy.url)
                .map_err(|e| ExtractError::Proxy(e.to_string()))?;
            if let (Some(user), Some(password)) = (&proxy.username, &proxy.password) {
                forward = forward.basic_auth(user, password);
            }
            builder = builder.proxy(forward);
        }

        Ok(Self {
            client: builder.build()?,
            shutdown,
            min_content_runes: parsing.min_content_runes,
            max_content_runes: parsing.max_content_runes,
        })
    }

    /// Fetch `url` and return its cleaned main text. Empty extraction is an
    /// error, never a success.
    pub async fn extract(&self, url: &str) -> Result<ExtractedContent, ExtractError> {
        let parsed_url = validate_article_url(url)?;

        let request = self
            .client
            .get(parsed_url.clone())
            .header(header::ACCEPT, ARTICLE_ACCEPT)
            .header(header::ACCEPT_LANGUAGE, "ru, en;q=0.8, *;q=0.5")
            .send();
        let response = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(ExtractError::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ExtractError::NotFound);
        }
        if !status.is_success() {
            return Err(ExtractError::FetchFailed(status));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.is_empty()
            && !content_type.contains("html")
            && !content_type.contains("text/plain")
        {
            return Err(ExtractError::UnsupportedType(content_type));
        }
        let header_charset = charset_from_content_type(&content_type);

        let content_encoding = response
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let raw = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(ExtractError::Cancelled),
            raw = read_limited(response) => raw?,
        };
        let decoded = decode_content_encoding(raw, &content_encoding)?;
        let html = decode_charset(&decoded, header_charset.as_deref());

        let mut readability =
            Readability::new(html, Some(parsed_url.as_str()), None)
                .map_err(|e| ExtractError::Readability(e.to_string()))?;
        let article = readability
            .parse()
            .map_err(|e| ExtractError::Readability(e.to_string()))?;

        let text_content = article.text_content.to_string();
        let extracted_chars = text_content.chars().count();
        if extracted_chars < self.min_content_runes {
            return Err(ExtractError::InsufficientContent {
                chars: extracted_chars,
                min: self.min_content_runes,
            });
        }

        let title = sanitize::collapse_whitespace(&article.title);
        let text = clean_extracted_text(
            &text_content,
            &title,
            parsed_url.as_str(),
            self.max_content_runes,
        );
        if text.is_empty() {
            return Err(ExtractError::InsufficientContent {
                chars: 0,
                min: self.min_content_runes,
            });
        }

        Ok(ExtractedContent {
            title,
            text,
            excerpt: article.excerpt.map(|e| sanitize::collapse_whitespace(&e)),
        })
    }
}

/// Reject anything that is not an http(s) page, plus known binary and
/// document extensions.
pub fn validate_article_url(raw: &str) -> Result<Url, ExtractError> {
    let url = Url::parse(raw).map_err(|e| ExtractError::UrlRejected(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ExtractError::UrlRejected(format!("scheme {other}"))),
    }
    let path = url.path().to_ascii_lowercase();
    if let Some(extension) = path.rsplit('/').next().and_then(|f| f.rsplit_once('.')) {
        let ext = extension.1;
        if REJECTED_EXTENSIONS.contains(&ext) {
            return Err(ExtractError::UrlRejected(format!("extension .{ext}")));
        }
    }
    Ok(url)
}

async fn read_limited(response: reqwest::Response) -> Result<Vec<u8>, ExtractError> {
    let mut body: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > MAX_ARTICLE_BYTES {
            return Err(ExtractError::Oversize(body.len() + chunk.len()));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Decode an explicit residual `Content-Encoding`. The transport usually
/// decodes transparently and strips the header; this handles servers that
/// compress unasked. Unknown encodings pass through untouched.
fn decode_content_encoding(raw: Vec<u8>, encoding: &str) -> Result<Vec<u8>, ExtractError> {
    match encoding {
        "" | "identity" => Ok(raw),
        "gzip" => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(raw.as_slice())
                .read_to_end(&mut out)
                .map_err(|e| ExtractError::Decode(format!("gzip: {e}")))?;
            Ok(out)
        }
        "br" => {
            let mut out = Vec::new();
            brotli::Decompressor::new(raw.as_slice(), 4096)
                .read_to_end(&mut out)
                .map_err(|e| ExtractError::Decode(format!("brotli: {e}")))?;
            Ok(out)
        }
        "deflate" => {
            // Servers disagree on whether "deflate" means zlib-wrapped or
            // raw; try zlib first, then raw.
            let mut out = Vec::new();
            match flate2::read::ZlibDecoder::new(raw.as_slice()).read_to_end(&mut out) {
                Ok(_) => Ok(out),
                Err(_) => {
                    let mut out = Vec::new();
                    flate2::read::DeflateDecoder::new(raw.as_slice())
                        .read_to_end(&mut out)
                        .map_err(|e| ExtractError::Decode(format!("deflate: {e}")))?;
                    Ok(out)
                }
            }
        }
        other => {
            tracing::debug!(encoding = other, "unknown content encoding, passing through");
            Ok(raw)
        }
    }
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Convert the page to UTF-8. Order: the Content-Type charset parameter,
/// a `<meta charset>` hint in the leading bytes, then detection.
fn decode_charset(raw: &[u8], header_charset: Option<&str>) -> String {
    let encoding = header_charset
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
        .or_else(|| {
            let prefix = &raw[..raw.len().min(CHARSET_SNIFF_BYTES)];
            let prefix_str = String::from_utf8_lossy(prefix);
            META_CHARSET_RE
                .captures(&prefix_str)
                .and_then(|caps| encoding_rs::Encoding::for_label(caps[1].as_bytes()))
        })
        .unwrap_or_else(|| {
            let mut detector = EncodingDetector::new();
            detector.feed(&raw[..raw.len().min(CHARSET_SNIFF_BYTES)], raw.len() <= CHARSET_SNIFF_BYTES);
            detector.guess(None, true)
        });

    let (decoded, _, _) = encoding.decode(raw);
    decoded.into_owned()
}

/// The post-extraction cleaning pass. Kept apart from the readability
/// heuristic so it can be tuned independently.
fn clean_extracted_text(text: &str, title: &str, url: &str, max_runes: usize) -> String {
    let mut cleaned = text.trim().to_string();

    // Some extractions lead with the page URL.
    if let Some(rest) = cleaned.strip_prefix(url) {
        cleaned = rest.trim_start().to_string();
    }

    cleaned = collapse_adjacent_title(&cleaned, title);

    for pattern in BOILERPLATE_PATTERNS.iter() {
        if let Some(m) = pattern.find(&cleaned) {
            cleaned.truncate(m.start());
        }
    }

    let normalized = sanitize::normalize_body(&sanitize::scrub_control_chars(&cleaned));
    sanitize::truncate_runes(&normalized, max_runes)
}

/// Collapse repeated occurrences of the title at the head of the text down
/// to a single one.
fn collapse_adjacent_title(text: &str, title: &str) -> String {
    if title.is_empty() {
        return text.to_string();
    }
    let mut out = text.trim_start();
    loop {
        let Some(rest) = out.strip_prefix(title) else {
            break;
        };
        let rest = rest.trim_start();
        if rest.starts_with(title) {
            out = rest;
        } else {
            break;
        }
    }
    out.to_string()
}
