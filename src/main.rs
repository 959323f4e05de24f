mod config;
mod db;
mod models;
mod responses;
mod routes;
mod services;
mod state;
mod utils;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::http::Method;
use axum::{
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use config::Config;
use db::postgres_document_repository::PostgresDocumentRepository;
use db::postgres_workspace_repository::PostgresWorkspaceRepository;
use responses::JsonResponse;
use routes::{
    ai::complete,
    billing::{cancel_subscription, get_usage},
    documents::{
        create_document, delete_document, get_document, list_documents, publish_document,
        unpublish_document, update_document,
    },
    public::{resolve_public_document, resolve_public_document_by_host},
    stripe::webhook,
    workspaces::{
        my_workspace, request_workspace, set_custom_domain, slug_available, update_settings,
        upload_logo,
    },
};
use services::ai::HttpAiService;
use services::deploy::WebhookDeployHook;
use services::dns::DohResolver;
use services::entitlement::PlanEntitlements;
use services::object_store::HttpObjectStore;
use services::stripe::{LiveStripeService, StripeService};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::db::{
    document_repository::DocumentRepository, workspace_repository::WorkspaceRepository,
};
use crate::state::AppState;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let rate_limit_ms: u64 = std::env::var("RATE_LIMITER_MILLISECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        // Default: 200ms/token (~5 req/sec)
        .unwrap_or(200);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        // Default: allow short bursts during client polling
        .unwrap_or(20);
    let global_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(rate_limit_ms)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .unwrap(),
    );

    // Stricter limiter for the AI path, every request costs provider money.
    let rate_limit_ai_s: u64 = std::env::var("RATE_LIMITER_AI_SECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(2);
    let rate_limit_ai_burst: u32 = std::env::var("RATE_LIMITER_AI_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(5);
    let ai_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(rate_limit_ai_s)
            .burst_size(rate_limit_ai_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many AI requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .unwrap(),
    );

    let config = Config::from_env();

    let pg_pool = establish_connection(&config.database_url).await;
    let workspace_repo = Arc::new(PostgresWorkspaceRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn WorkspaceRepository>;
    let document_repo = Arc::new(PostgresDocumentRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn DocumentRepository>;

    let http_client = reqwest::Client::new();
    let stripe =
        Arc::new(LiveStripeService::from_settings(&config.stripe)) as Arc<dyn StripeService>;
    let entitlements = Arc::new(PlanEntitlements::new(stripe.clone()));
    let dns = Arc::new(DohResolver::new(
        http_client.clone(),
        config.doh_endpoint.clone(),
    ));
    let uploads = Arc::new(HttpObjectStore::from_settings(
        http_client.clone(),
        &config.storage,
    ));
    let deploy = Arc::new(WebhookDeployHook::new(
        http_client.clone(),
        config.deploy_hook_url.clone(),
    ));
    let ai = Arc::new(HttpAiService::from_settings(http_client.clone(), &config.ai));

    let state = AppState {
        db: workspace_repo,
        documents: document_repo,
        stripe,
        entitlements,
        dns,
        uploads,
        deploy,
        ai,
        http_client: Arc::new(http_client),
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .frontend_origin
                .parse::<HeaderValue>()
                .unwrap(),
        )
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    let workspace_routes = Router::new()
        .route("/request", post(request_workspace))
        .route("/slug-available", get(slug_available))
        .route("/mine", get(my_workspace))
        .route("/settings", put(update_settings))
        .route("/logo", post(upload_logo))
        .route("/domain", put(set_custom_domain));

    let document_routes = Router::new()
        .route("/", post(create_document).get(list_documents))
        .route(
            "/{document_id}",
            get(get_document)
                .put(update_document)
                .delete(delete_document),
        )
        .route("/{document_id}/publish", post(publish_document))
        .route("/{document_id}/unpublish", post(unpublish_document));

    let billing_routes = Router::new()
        .route("/usage", get(get_usage))
        .route("/cancel", post(cancel_subscription));

    let ai_routes = Router::new()
        .route("/complete", post(complete))
        .layer(GovernorLayer {
            config: ai_governor_conf.clone(),
        });

    // Public, unauthenticated reads: only the publication gate.
    let public_routes = Router::new()
        .route(
            "/p/{workspace_slug}/{document_slug}",
            get(resolve_public_document),
        )
        .route("/d/{document_slug}", get(resolve_public_document_by_host));

    let app = Router::new()
        .route("/", get(root))
        .nest("/api/workspaces", workspace_routes)
        .nest("/api/documents", document_routes)
        .nest("/api/billing", billing_routes)
        .nest("/api/ai", ai_routes)
        .route("/api/stripe/webhook", post(webhook))
        .merge(public_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: global_governor_conf.clone(),
        })
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));

    let listener = TcpListener::bind(addr).await.unwrap();
    println!("Running at http://{}", addr);
    axum::serve(listener, make_service).await.unwrap();
}

/// A simple root route.
async fn root() -> Response {
    JsonResponse::success("Hello, OpenPolicy!").into_response()
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> PgPool {
    let pool = PgPool::connect(database_url)
        .await
        .expect("Failed to connect to the database");

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .expect("Failed to verify database connection");

    info!("✅ Successfully connected to the database");
    pool
}
