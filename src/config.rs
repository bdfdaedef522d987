use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Server settings. The parsing service itself exposes no HTTP surface;
/// these are carried so deployments can share one `.env` with the read APIs.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct ParsingConfig {
    /// Cron expression driving ingestion ticks (seconds-resolution, 6 fields).
    pub interval: String,
    pub max_concurrent_parsers: usize,
    pub request_timeout: Duration,
    /// Cap on fetched feed documents, in bytes.
    pub max_feed_size: usize,
    /// Cap on stored article bodies, in chars.
    pub max_content_runes: usize,
    /// Minimum extracted body length, in chars, below which extraction fails.
    pub min_content_runes: usize,
    pub min_title_length: usize,
    pub max_title_length: usize,
    pub min_body_chars: usize,
    pub min_total_chars: usize,
    /// Per-tick item cap per source.
    pub batch_size: usize,
    pub enable_deduplication: bool,
    pub user_agent: String,
}

#[derive(Clone, Debug, Default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    pub enabled: bool,
    pub service_url: String,
    pub timeout: Duration,
    pub min_confidence: f64,
    pub fallback_category_id: i32,
    /// Remote model label -> internal taxonomy id.
    pub category_label_to_id: HashMap<String, i32>,
    /// Optional path overriding the embedded lexicon artifact.
    pub lexicon_path: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server: ServerConfig,
    pub parsing: ParsingConfig,
    pub proxy: ProxyConfig,
    pub classifier: ClassifierConfig,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error + Send + Sync>>
where
    T::Err: std::error::Error + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| format!("invalid {key}: {e}").into()),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    match env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(format!("invalid {key}: {other}").into()),
        },
        Err(_) => Ok(default),
    }
}

/// Default mapping from the remote model's label set to taxonomy ids.
/// Overridable with `CLASSIFIER_LABEL_MAP` (a JSON object).
fn default_label_map() -> HashMap<String, i32> {
    [
        ("politics", 1),
        ("economy", 2),
        ("sports", 3),
        ("technology", 4),
        ("science", 5),
        ("culture", 6),
        ("incidents", 7),
        ("society", 8),
        ("health", 9),
        ("world", 10),
    ]
    .into_iter()
    .map(|(label, id)| (label.to_string(), id))
    .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        dotenvy::dotenv().ok();

        let database_url = env_or("DATABASE_URL", "postgres://localhost/newspulse");

        let server = ServerConfig {
            host: env_or("SERVER_HOST", "0.0.0.0"),
            port: parse_env("SERVER_PORT", 8080u16)?,
        };

        let parsing = ParsingConfig {
            interval: env_or("PARSING_INTERVAL", "0 */5 * * * *"),
            max_concurrent_parsers: parse_env("PARSING_MAX_CONCURRENT_PARSERS", 10usize)?,
            request_timeout: Duration::from_secs(parse_env("PARSING_REQUEST_TIMEOUT", 30u64)?),
            max_feed_size: parse_env("PARSING_MAX_FEED_SIZE", 10 * 1024 * 1024usize)?,
            max_content_runes: parse_env("PARSING_MAX_CONTENT_RUNES", 50_000usize)?,
            min_content_runes: parse_env("PARSING_MIN_CONTENT_RUNES", 200usize)?,
            min_title_length: parse_env("PARSING_MIN_TITLE_LENGTH", 10usize)?,
            max_title_length: parse_env("PARSING_MAX_TITLE_LENGTH", 500usize)?,
            min_body_chars: parse_env("PARSING_MIN_BODY_CHARS", 100usize)?,
            min_total_chars: parse_env("PARSING_MIN_TOTAL_CHARS", 150usize)?,
            batch_size: parse_env("PARSING_BATCH_SIZE", 50usize)?,
            enable_deduplication: env_bool("PARSING_ENABLE_DEDUPLICATION", true)?,
            user_agent: env_or("PARSING_USER_AGENT", &crate::user_agent()),
        };

        let proxy = ProxyConfig {
            enabled: env_bool("PROXY_ENABLED", false)?,
            url: env_or("PROXY_URL", ""),
            username: env::var("PROXY_USERNAME").ok(),
            password: env::var("PROXY_PASSWORD").ok(),
        };

        let category_label_to_id = match env::var("CLASSIFIER_LABEL_MAP") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| format!("invalid CLASSIFIER_LABEL_MAP: {e}"))?,
            Err(_) => default_label_map(),
        };

        let classifier = ClassifierConfig {
            enabled: env_bool("CLASSIFIER_ENABLED", false)?,
            service_url: env_or("CLASSIFIER_SERVICE_URL", "http://localhost:8000"),
            timeout: Duration::from_secs(parse_env("CLASSIFIER_TIMEOUT", 10u64)?),
            min_confidence: parse_env("CLASSIFIER_MIN_CONFIDENCE", 0.65f64)?,
            fallback_category_id: parse_env("CLASSIFIER_FALLBACK_CATEGORY_ID", 8i32)?,
            category_label_to_id,
            lexicon_path: env::var("CLASSIFIER_LEXICON_PATH").ok(),
        };

        if parsing.min_title_length > parsing.max_title_length {
            return Err("PARSING_MIN_TITLE_LENGTH exceeds PARSING_MAX_TITLE_LENGTH".into());
        }
        if parsing.max_concurrent_parsers == 0 {
            return Err("PARSING_MAX_CONCURRENT_PARSERS must be at least 1".into());
        }

        Ok(Config {
            database_url,
            server,
            parsing,
            proxy,
            classifier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_label_map_covers_fallback() {
        let map = default_label_map();
        assert_eq!(map.get("society"), Some(&8));
        assert_eq!(map.get("sports"), Some(&3));
    }

    #[test]
    fn test_env_bool_accepts_common_spellings() {
        assert!(env_bool("NEWSPULSE_TEST_MISSING_FLAG", true).unwrap());
        std::env::set_var("NEWSPULSE_TEST_FLAG", "off");
        assert!(!env_bool("NEWSPULSE_TEST_FLAG", true).unwrap());
        std::env::remove_var("NEWSPULSE_TEST_FLAG");
    }
}
