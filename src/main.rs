use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_leadgen_api::config::Config;
use rust_leadgen_api::contact_extractor::ContactExtractor;
use rust_leadgen_api::db::Database;
use rust_leadgen_api::description_cache::DescriptionCache;
use rust_leadgen_api::dispatcher::BulkDispatcher;
use rust_leadgen_api::generation::{
    ContentGenerator, DescriptionGenerator, LlmClient, TextGenerator,
};
use rust_leadgen_api::handlers::{self, AppState};
use rust_leadgen_api::orchestrator::EnrichmentOrchestrator;
use rust_leadgen_api::scoring::LeadScorer;
use rust_leadgen_api::scraper::{HttpPageFetcher, SerpApiClient};
use rust_leadgen_api::storage::{DeliveryLog, LeadStore, MemoryStore, PgStore};
use rust_leadgen_api::task_manager::TaskManager;
use rust_leadgen_api::transports::Transports;

/// Finished tasks stay queryable for this long.
const TASK_RETENTION: Duration = Duration::from_secs(3600);
const TASK_CLEANUP_EVERY: Duration = Duration::from_secs(300);

/// Main entry point for the application.
///
/// Initializes tracing, configuration, storage (Postgres when configured, in-memory
/// otherwise), the external clients and the task manager, then serves the HTTP API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_leadgen_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    let (store, delivery_log): (Arc<dyn LeadStore>, Arc<dyn DeliveryLog>) =
        match &config.database_url {
            Some(url) => {
                let db = Database::new(url).await?;
                let pg = Arc::new(PgStore::new(db.pool.clone()));
                tracing::info!("✓ Postgres lead store ready");
                (pg.clone() as Arc<dyn LeadStore>, pg as Arc<dyn DeliveryLog>)
            }
            None => {
                let memory = Arc::new(MemoryStore::new());
                (memory.clone() as Arc<dyn LeadStore>, memory as Arc<dyn DeliveryLog>)
            }
        };

    let llm: Arc<dyn TextGenerator> = Arc::new(LlmClient::from_config(&config)?);
    let cache = DescriptionCache::new(Duration::from_secs(config.description_cache_ttl_secs));
    let describer = DescriptionGenerator::new(llm.clone(), cache, config.llm_max_tokens);
    let content = ContentGenerator::new(llm, config.llm_max_tokens, &config.sender_name);

    let dispatcher = BulkDispatcher::new(
        Transports::from_config(&config)?,
        config.pacing(),
        delivery_log,
    );

    let orchestrator = EnrichmentOrchestrator::new(
        Arc::new(SerpApiClient::from_config(&config)?),
        describer,
        content,
        dispatcher,
        store,
    )
    .with_fetcher(Arc::new(HttpPageFetcher::new(config.http_timeout())?));

    let tasks = TaskManager::new(Arc::new(orchestrator), TASK_RETENTION);
    tasks.spawn_cleanup_loop(TASK_CLEANUP_EVERY);

    let app_state = Arc::new(AppState {
        tasks,
        extractor: ContactExtractor::default(),
        scorer: LeadScorer::new(),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = Router::new()
        .route("/api/v1/campaigns/:id/runs", post(handlers::start_run))
        .route("/api/v1/tasks/:id", get(handlers::get_task))
        .route("/api/v1/tasks/:id/cancel", post(handlers::cancel_task))
        .route("/api/v1/tasks/:id/leads.csv", get(handlers::export_leads_csv))
        .route("/api/v1/extract", post(handlers::extract_text))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 1MB max payload
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
