use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use newspulse::config::ClassifierConfig;
use newspulse::domain::classifier::{
    BatchItem, CategoryResolver, ClassificationOrigin, LexiconArtifact, RemoteClassifier,
};

fn classifier_config(service_url: String, enabled: bool) -> ClassifierConfig {
    ClassifierConfig {
        enabled,
        service_url,
        timeout: Duration::from_secs(5),
        min_confidence: 0.65,
        fallback_category_id: 8,
        category_label_to_id: HashMap::from([("sports".to_string(), 3)]),
        lexicon_path: None,
    }
}

async fn mount_healthy(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "model_loaded": true,
            "model_info": {"name": "fasttext-news"},
            "uptime": 120.5
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_confident_remote_classification_is_accepted() {
    let server = MockServer::start().await;
    mount_healthy(&server).await;
    Mock::given(method("POST"))
        .and(path("/classify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "original_category": "sports",
            "original_score": 0.93,
            "category_id": 3,
            "category_name": "Спорт",
            "confidence": 0.88
        })))
        .mount(&server)
        .await;

    let config = classifier_config(server.uri(), true);
    let artifact = LexiconArtifact::embedded().unwrap();
    let resolver = CategoryResolver::new(&config, &artifact, CancellationToken::new()).unwrap();

    let resolution = resolver
        .resolve("Team wins the final", "Late goal decides it", "", "")
        .await;
    assert_eq!(resolution.category_id, 3);
    assert_eq!(resolution.origin, ClassificationOrigin::Remote);
    assert!((resolution.confidence - 0.88).abs() < 1e-9);
}

#[tokio::test]
async fn test_low_confidence_remote_falls_back_to_lexicon() {
    let server = MockServer::start().await;
    mount_healthy(&server).await;
    Mock::given(method("POST"))
        .and(path("/classify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "original_category": "society",
            "original_score": 0.4,
            "category_id": 8,
            "category_name": "Общество",
            "confidence": 0.32
        })))
        .mount(&server)
        .await;

    let config = classifier_config(server.uri(), true);
    let artifact = LexiconArtifact::embedded().unwrap();
    let resolver = CategoryResolver::new(&config, &artifact, CancellationToken::new()).unwrap();

    let resolution = resolver
        .resolve(
            "Матч завершился со счётом 2:1",
            "Сборная одержала победу в матче чемпионата",
            "Гол на последней минуте принес команде победу.",
            "https://example.com/sport/1",
        )
        .await;
    // Below the 0.65 threshold the remote answer is discarded and the
    // lexicon decides.
    assert_eq!(resolution.category_id, 3);
    assert_eq!(resolution.origin, ClassificationOrigin::Lexicon);
}

#[tokio::test]
async fn test_unavailable_service_disables_client_and_uses_lexicon() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = classifier_config(server.uri(), true);
    let artifact = LexiconArtifact::embedded().unwrap();
    let resolver = CategoryResolver::new(&config, &artifact, CancellationToken::new()).unwrap();

    let resolution = resolver
        .resolve(
            "Матч завершился со счётом 2:1",
            "Сборная одержала победу в матче чемпионата",
            "",
            "https://example.com/sport/1",
        )
        .await;
    assert_eq!(resolution.category_id, 3);
    assert_eq!(resolution.origin, ClassificationOrigin::Lexicon);
}

#[tokio::test]
async fn test_model_not_loaded_counts_as_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "starting",
            "model_loaded": false
        })))
        .mount(&server)
        .await;

    let config = classifier_config(server.uri(), true);
    let remote = RemoteClassifier::new(&config, CancellationToken::new()).unwrap();
    assert!(!remote.ensure_available().await);
    assert!(!remote.enabled());
}

#[tokio::test]
async fn test_failed_call_disables_until_health_recovers() {
    let server = MockServer::start().await;
    mount_healthy(&server).await;
    Mock::given(method("POST"))
        .and(path("/classify"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = classifier_config(server.uri(), true);
    let remote = RemoteClassifier::new(&config, CancellationToken::new()).unwrap();
    assert!(remote.ensure_available().await);

    let err = remote.classify("Title", "Description", "Body").await;
    assert!(err.is_err());
    assert!(!remote.enabled());

    // The next use re-probes health, which still succeeds, re-enabling it.
    assert!(remote.ensure_available().await);
}

#[tokio::test]
async fn test_label_map_backstops_missing_category_id() {
    let server = MockServer::start().await;
    mount_healthy(&server).await;
    Mock::given(method("POST"))
        .and(path("/classify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "original_category": "Sports",
            "original_score": 0.9,
            "category_id": 0,
            "category_name": "",
            "confidence": 0.9
        })))
        .mount(&server)
        .await;

    let config = classifier_config(server.uri(), true);
    let remote = RemoteClassifier::new(&config, CancellationToken::new()).unwrap();
    assert!(remote.ensure_available().await);
    let result = remote.classify("Title", "", "").await.unwrap();
    assert_eq!(result.category_id, 3);
}

#[tokio::test]
async fn test_classify_batch_orders_results_by_index() {
    let server = MockServer::start().await;
    mount_healthy(&server).await;
    Mock::given(method("POST"))
        .and(path("/classify/batch"))
        .and(body_partial_json(json!({
            "items": [
                {"index": 0, "title": "A", "description": "a"},
                {"index": 1, "title": "B", "description": "b"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"index": 1, "original_category": "economy", "original_score": 0.8,
                 "category_id": 2, "category_name": "Экономика", "confidence": 0.8},
                {"index": 0, "original_category": "sports", "original_score": 0.9,
                 "category_id": 3, "category_name": "Спорт", "confidence": 0.9}
            ]
        })))
        .mount(&server)
        .await;

    let config = classifier_config(server.uri(), true);
    let remote = RemoteClassifier::new(&config, CancellationToken::new()).unwrap();
    let results = remote
        .classify_batch(vec![
            BatchItem {
                index: 0,
                title: "A".to_string(),
                description: "a".to_string(),
            },
            BatchItem {
                index: 1,
                title: "B".to_string(),
                description: "b".to_string(),
            },
        ])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].category_id, 3);
    assert_eq!(results[1].category_id, 2);
}
