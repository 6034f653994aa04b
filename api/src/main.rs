use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod error;
mod execute;
mod notify;
mod routes;
mod state;
mod store;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Dealflow Approval API",
        version = "0.1.0",
        description = "Tiered approval and action-propagation engine: classifies deal events, \
                       derives chains of proposed actions, and gates their execution behind a \
                       risk-ordered human review queue."
    ),
    paths(
        routes::health::health_check,
        routes::events::emit_event,
        routes::events::reprocess_event,
        routes::events::list_events,
        routes::queue::list_queue,
        routes::queue::queue_stats,
        routes::queue::chain_detail,
        routes::resolution::approve_chain,
        routes::resolution::approve_action,
        routes::resolution::modify_action,
        routes::resolution::reject_action,
        routes::policy::get_deal_policy,
        routes::policy::put_deal_policy,
        routes::policy::get_default_policy,
    ),
    components(schemas(
        HealthResponse,
        dealflow_core::error::ApiError,
        dealflow_core::events::PropagationEvent,
        dealflow_core::events::EmitEventRequest,
        dealflow_core::events::PaginatedResponse<dealflow_core::events::PropagationEvent>,
        dealflow_core::chains::ActionChain,
        dealflow_core::chains::ProposedAction,
        dealflow_core::chains::ChainStatus,
        dealflow_core::chains::ActionStatus,
        dealflow_core::policy::ApprovalPolicy,
        dealflow_core::policy::TierThreshold,
        dealflow_core::policy::Tier,
        routes::events::EmitEventResponse,
        routes::queue::QueuedChain,
        routes::queue::QueueResponse,
        routes::queue::QueueStatsResponse,
        routes::queue::TierCounts,
        routes::queue::ChainDetailResponse,
        routes::resolution::ResolveRequest,
        routes::resolution::ModifyRequest,
        routes::resolution::ResolutionResponse,
        routes::resolution::ChainApprovalResponse,
        routes::policy::PolicyResponse,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dealflow_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Database connection
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let app_state = state::AppState {
        db: pool,
        notifier: Arc::new(notify::TracingNotifier),
        executor: Arc::new(execute::AuditLogExecutor),
    };

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::events::router())
        .merge(routes::queue::router())
        .merge(routes::resolution::router())
        .merge(routes::policy::router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Dealflow API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
