/// Integration tests with mocked external APIs
/// Exercises the HTTP collaborators and a full run without hitting real services
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use rust_leadgen_api::config::WhatsAppSettings;
use rust_leadgen_api::description_cache::DescriptionCache;
use rust_leadgen_api::dispatcher::{BulkDispatcher, Pacing, Sleeper};
use rust_leadgen_api::errors::AppError;
use rust_leadgen_api::generation::{
    ContentGenerator, DescriptionGenerator, LlmClient, TextGenerator,
};
use rust_leadgen_api::models::{Channel, MessageStatus};
use rust_leadgen_api::orchestrator::{EnrichmentOrchestrator, RunRequest, StageFlags};
use rust_leadgen_api::scraper::{HttpPageFetcher, LeadSource, PageFetcher, SerpApiClient};
use rust_leadgen_api::storage::{DeliveryLog, LeadStore, MemoryStore};
use rust_leadgen_api::task_manager::CancelFlag;
use rust_leadgen_api::transports::{GraphWhatsAppTransport, Transports, WhatsAppTransport};
use wiremock::matchers::{
    body_partial_json, body_string_contains, header, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": content } }
        ]
    })
}

fn llm_client(server: &MockServer) -> LlmClient {
    LlmClient::new(&server.uri(), "test-key", "gpt-4o-mini", TIMEOUT).unwrap()
}

fn whatsapp_settings(server: &MockServer) -> WhatsAppSettings {
    WhatsAppSettings {
        base_url: server.uri(),
        phone_number_id: "1234567890".to_string(),
        access_token: "wa-token".to_string(),
    }
}

struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

// ============ LLM ============

#[tokio::test]
async fn test_llm_completion_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "max_tokens": 200
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "  Acme Trading is a Dubai wholesaler.  ",
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = llm_client(&mock_server);
    let text = client.generate("Describe Acme", 200).await.unwrap();

    assert_eq!(text, "Acme Trading is a Dubai wholesaler.");
}

#[tokio::test]
async fn test_llm_server_error_is_transient() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&mock_server)
        .await;

    let err = llm_client(&mock_server)
        .generate("Describe Acme", 200)
        .await
        .unwrap_err();

    assert!(err.is_transient(), "expected transient, got {:?}", err);
}

#[tokio::test]
async fn test_llm_client_error_is_permanent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&mock_server)
        .await;

    let err = llm_client(&mock_server)
        .generate("Describe Acme", 200)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ExternalApiError(_)));
}

#[tokio::test]
async fn test_llm_empty_completion_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("   ")))
        .mount(&mock_server)
        .await;

    let err = llm_client(&mock_server)
        .generate("Describe Acme", 200)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ExternalApiError(_)));
}

#[tokio::test]
async fn test_llm_breaker_stops_calling_failing_provider() {
    let mock_server = MockServer::start().await;

    // Five consecutive failures open the breaker; the sixth call never leaves the process.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&mock_server)
        .await;

    let client = llm_client(&mock_server);
    for _ in 0..5 {
        assert!(client.generate("Describe Acme", 50).await.is_err());
    }

    let err = client.generate("Describe Acme", 50).await.unwrap_err();
    assert!(err.to_string().contains("circuit breaker open"));
    assert!(err.is_transient());
}

// ============ SerpAPI ============

fn local_result(i: usize) -> serde_json::Value {
    serde_json::json!({
        "title": format!("Clinic {}", i),
        "address": "Jumeirah, Dubai",
        "phone": "+971 4 123 4567",
        "place_id": format!("place-{}", i),
        "type": "Dentist",
        "rating": 4.5,
        "reviews": 10 + i
    })
}

#[tokio::test]
async fn test_serpapi_maps_search() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search.json"))
        .and(query_param("engine", "google_maps"))
        .and(query_param("q", "dentists in dubai"))
        .and(query_param("start", "0"))
        .and(query_param("api_key", "serp-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "local_results": [local_result(1), local_result(2)]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = SerpApiClient::new(&mock_server.uri(), "serp-key", TIMEOUT).unwrap();
    let records = client.search("dentists in dubai", 10).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].title, "Clinic 1");
    assert_eq!(records[0].place_id.as_deref(), Some("place-1"));
    assert_eq!(records[0].category.as_deref(), Some("Dentist"));
    assert_eq!(records[1].reviews, Some(12));
}

#[tokio::test]
async fn test_serpapi_paginates_and_truncates() {
    let mock_server = MockServer::start().await;

    let first_page: Vec<_> = (0..20).map(local_result).collect();
    let second_page: Vec<_> = (20..25).map(local_result).collect();

    Mock::given(method("GET"))
        .and(path("/search.json"))
        .and(query_param("start", "0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "local_results": first_page })),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search.json"))
        .and(query_param("start", "20"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "local_results": second_page })),
        )
        .mount(&mock_server)
        .await;

    let client = SerpApiClient::new(&mock_server.uri(), "serp-key", TIMEOUT).unwrap();
    let records = client.search("dentists in dubai", 22).await.unwrap();

    assert_eq!(records.len(), 22);
    assert_eq!(records[21].title, "Clinic 21");
}

#[tokio::test]
async fn test_serpapi_no_results_is_empty() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "error": "Google hasn't returned any results for this query."
        })))
        .mount(&mock_server)
        .await;

    let client = SerpApiClient::new(&mock_server.uri(), "serp-key", TIMEOUT).unwrap();
    let records = client.search("nothing here", 20).await.unwrap();

    assert!(records.is_empty());
}

#[tokio::test]
async fn test_serpapi_rate_limit_is_transient() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search.json"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&mock_server)
        .await;

    let client = SerpApiClient::new(&mock_server.uri(), "serp-key", TIMEOUT).unwrap();
    let err = client.search("dentists", 20).await.unwrap_err();

    assert!(err.is_transient());
}

// ============ Website fetch ============

#[tokio::test]
async fn test_page_fetcher_returns_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/contact"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<p>Email: hello@acme-store.com</p>"),
        )
        .mount(&mock_server)
        .await;

    let fetcher = HttpPageFetcher::new(TIMEOUT).unwrap();
    let page = fetcher
        .fetch(&format!("{}/contact", mock_server.uri()))
        .await
        .unwrap();

    assert!(page.contains("hello@acme-store.com"));
}

#[tokio::test]
async fn test_page_fetcher_not_found_is_permanent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let fetcher = HttpPageFetcher::new(TIMEOUT).unwrap();
    let err = fetcher
        .fetch(&format!("{}/gone", mock_server.uri()))
        .await
        .unwrap_err();

    assert!(!err.is_transient());
}

// ============ WhatsApp ============

#[tokio::test]
async fn test_whatsapp_send_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1234567890/messages"))
        .and(header("authorization", "Bearer wa-token"))
        .and(body_partial_json(serde_json::json!({
            "messaging_product": "whatsapp",
            "to": "+971501234567",
            "type": "text",
            "text": { "body": "Hi from Acme" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [{ "id": "wamid.test" }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transport =
        GraphWhatsAppTransport::new(&whatsapp_settings(&mock_server), TIMEOUT).unwrap();

    transport
        .send_whatsapp("+971 50 123 4567", "Hi from Acme")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_whatsapp_rejects_invalid_number_without_calling_api() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let transport =
        GraphWhatsAppTransport::new(&whatsapp_settings(&mock_server), TIMEOUT).unwrap();
    let err = transport.send_whatsapp("12345", "Hi").await.unwrap_err();

    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn test_dispatcher_retries_whatsapp_rate_limit() {
    let mock_server = MockServer::start().await;

    // First attempt is throttled, the retry goes through.
    Mock::given(method("POST"))
        .and(path("/1234567890/messages"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1234567890/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let transports = Transports {
        email: None,
        whatsapp: Some(Arc::new(
            GraphWhatsAppTransport::new(&whatsapp_settings(&mock_server), TIMEOUT).unwrap(),
        )),
    };
    let dispatcher = BulkDispatcher::new(transports, Pacing::default(), store.clone())
        .with_sleeper(Arc::new(NoSleep));

    let mut messages = vec![rust_leadgen_api::models::GeneratedMessage::whatsapp(
        uuid::Uuid::new_v4(),
        "+971501234567",
        "Hello".to_string(),
    )];
    let summary = dispatcher
        .send_all(&mut messages, &CancelFlag::new(), &|_, _| {})
        .await
        .unwrap();

    assert_eq!(summary.sent, 1);
    assert_eq!(messages[0].status, MessageStatus::Sent);
    assert_eq!(messages[0].retry_count, 1);

    let records = store.delivery_records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts, 2);
}

// ============ Full run ============

#[tokio::test]
async fn test_full_run_against_mocked_providers() {
    let serp = MockServer::start().await;
    let llm = MockServer::start().await;
    let graph = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "local_results": [{
                "title": "Acme Trading",
                "address": "Deira, Dubai",
                "place_id": "ChIJacme",
                "description": "Contact us: sales@acme.ae or call +971 50 123 4567. \
                                1.2K Followers. Fortune 500 company, recently expanding."
            }]
        })))
        .expect(1)
        .mount(&serp)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("business description"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "Acme Trading is a fast-growing Dubai distributor.",
        )))
        .expect(1)
        .mount(&llm)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("WhatsApp message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "Hi Acme team, we help distributors reach new buyers. Open to a quick chat?",
        )))
        .expect(1)
        .mount(&llm)
        .await;

    Mock::given(method("POST"))
        .and(path("/1234567890/messages"))
        .and(body_partial_json(serde_json::json!({ "to": "+971501234567" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&graph)
        .await;

    let store = Arc::new(MemoryStore::new());
    let generator: Arc<dyn TextGenerator> = Arc::new(llm_client(&llm));
    let describer = DescriptionGenerator::new(
        generator.clone(),
        DescriptionCache::new(Duration::from_secs(60)),
        200,
    );
    let content = ContentGenerator::new(generator, 300, "Test Sender");
    let transports = Transports {
        email: None,
        whatsapp: Some(Arc::new(
            GraphWhatsAppTransport::new(&whatsapp_settings(&graph), TIMEOUT).unwrap(),
        )),
    };
    let dispatcher = BulkDispatcher::new(
        transports,
        Pacing::default(),
        store.clone() as Arc<dyn DeliveryLog>,
    )
    .with_sleeper(Arc::new(NoSleep));
    let orchestrator = EnrichmentOrchestrator::new(
        Arc::new(SerpApiClient::new(&serp.uri(), "serp-key", TIMEOUT).unwrap()),
        describer,
        content,
        dispatcher,
        store.clone() as Arc<dyn LeadStore>,
    );

    let mut request = RunRequest::new("campaign-1", "distributors in dubai");
    request.stages = StageFlags {
        extract: true,
        fetch_websites: false,
        describe: true,
        generate: true,
        send: true,
    };
    request.channels = vec![Channel::WhatsApp];
    request.pitch = "Buyer introductions".to_string();

    let outcome = orchestrator
        .run(&request, &CancelFlag::new(), &|_| {})
        .await;

    assert!(outcome.success, "run failed: {:?}", outcome.error);
    assert_eq!(
        outcome.stages_completed,
        vec!["extract", "describe", "generate", "send"]
    );
    assert_eq!(outcome.stats.leads_collected, 1);
    assert_eq!(outcome.stats.descriptions_generated, 1);
    assert_eq!(outcome.stats.whatsapp_generated, 1);
    assert_eq!(outcome.stats.emails_sent, 1);
    assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);

    let lead = &outcome.leads[0];
    assert_eq!(lead.emails, vec!["sales@acme.ae".to_string()]);
    assert_eq!(lead.kpis.followers, 1_200);
    assert_eq!(lead.lead_score, 100);
    assert_eq!(
        lead.description.as_deref(),
        Some("Acme Trading is a fast-growing Dubai distributor.")
    );

    let records = store.delivery_records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, MessageStatus::Sent);
    assert_eq!(records[0].channel, Channel::WhatsApp);
}
