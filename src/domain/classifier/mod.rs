//! Category assignment: remote model first, lexicon fallback second,
//! configured default last.

pub mod lexicon;
pub mod remote;

use tokio_util::sync::CancellationToken;

use crate::config::ClassifierConfig;

pub use lexicon::{ClassifyInput, LexiconArtifact, LexiconClassifier, LexiconError};
pub use remote::{BatchItem, RemoteClassification, RemoteClassifier};

/// Where a category decision came from; carried into the parsing logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationOrigin {
    Remote,
    Lexicon,
    Fallback,
}

impl ClassificationOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationOrigin::Remote => "remote",
            ClassificationOrigin::Lexicon => "lexicon",
            ClassificationOrigin::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub category_id: i32,
    pub confidence: f64,
    pub origin: ClassificationOrigin,
}

/// Composition of the two classification strategies. Both surface the same
/// capability (a category id plus a confidence) and the order is fixed:
/// remote when available and confident, then the lexicon, then the
/// configured default category.
pub struct CategoryResolver {
    remote: Option<RemoteClassifier>,
    lexicon: LexiconClassifier,
    min_confidence: f64,
    fallback_category_id: i32,
}

impl CategoryResolver {
    pub fn new(
        config: &ClassifierConfig,
        artifact: &LexiconArtifact,
        shutdown: CancellationToken,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let lexicon = LexiconClassifier::new(artifact)?;
        let remote = if config.enabled {
            Some(RemoteClassifier::new(config, shutdown)?)
        } else {
            None
        };
        Ok(Self {
            remote,
            lexicon,
            min_confidence: config.min_confidence,
            fallback_category_id: config.fallback_category_id,
        })
    }

    /// Build a resolver with no remote leg; used in tests and deployments
    /// running purely on the lexicon.
    pub fn lexicon_only(
        config: &ClassifierConfig,
        artifact: &LexiconArtifact,
    ) -> Result<Self, LexiconError> {
        Ok(Self {
            remote: None,
            lexicon: LexiconClassifier::new(artifact)?,
            min_confidence: config.min_confidence,
            fallback_category_id: config.fallback_category_id,
        })
    }

    pub async fn resolve(
        &self,
        title: &str,
        description: &str,
        body: &str,
        url: &str,
    ) -> Resolution {
        if let Some(remote) = &self.remote {
            if remote.ensure_available().await {
                match remote.classify(title, description, body).await {
                    Ok(result)
                        if result.category_id > 0 && result.confidence >= self.min_confidence =>
                    {
                        return Resolution {
                            category_id: result.category_id,
                            confidence: result.confidence,
                            origin: ClassificationOrigin::Remote,
                        };
                    }
                    Ok(result) => {
                        tracing::debug!(
                            label = %result.original_label,
                            confidence = result.confidence,
                            "remote classification below threshold, using lexicon"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "remote classifier unavailable, using lexicon");
                    }
                }
            }
        }

        if let Some(decision) = self.lexicon.classify(&ClassifyInput {
            title,
            description,
            body,
            url,
        }) {
            return Resolution {
                category_id: decision.category_id,
                confidence: decision.confidence,
                origin: ClassificationOrigin::Lexicon,
            };
        }

        Resolution {
            category_id: self.fallback_category_id,
            confidence: 0.0,
            origin: ClassificationOrigin::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_config() -> ClassifierConfig {
        ClassifierConfig {
            enabled: false,
            service_url: "http://localhost:8000".to_string(),
            timeout: Duration::from_secs(5),
            min_confidence: 0.65,
            fallback_category_id: 8,
            category_label_to_id: HashMap::new(),
            lexicon_path: None,
        }
    }

    #[tokio::test]
    async fn test_lexicon_only_resolves_sports() {
        let artifact = LexiconArtifact::embedded().unwrap();
        let resolver = CategoryResolver::lexicon_only(&test_config(), &artifact).unwrap();
        let resolution = resolver
            .resolve(
                "Матч завершился со счётом 2:1",
                "Сборная одержала победу в матче чемпионата",
                "Гол на последней минуте принес команде победу.",
                "https://example.com/sport/1",
            )
            .await;
        assert_eq!(resolution.category_id, 3);
        assert_eq!(resolution.origin, ClassificationOrigin::Lexicon);
    }

    #[tokio::test]
    async fn test_disabled_fallback_reaches_configured_default() {
        let mut artifact = LexiconArtifact::embedded().unwrap();
        artifact.use_fallback_category = false;
        let resolver = CategoryResolver::lexicon_only(&test_config(), &artifact).unwrap();
        let resolution = resolver.resolve("", "", "", "").await;
        assert_eq!(resolution.category_id, 8);
        assert_eq!(resolution.origin, ClassificationOrigin::Fallback);
    }
}
