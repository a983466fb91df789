use axum::{
    extract::{Json, Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

mod coercion;
mod condition;
mod config;
mod entity;
mod error;
mod filter;
mod listing;
mod params;
mod query;
mod repository;
mod schema;
mod search;
#[cfg(test)]
mod integration_tests;

use crate::coercion::CoercionOptions;
use crate::condition::ConditionBuilder;
use crate::config::Config;
use crate::entity::Entity;
use crate::error::QueryBuildError;
use crate::listing::{ListingError, ListingService};
use crate::params::{AggregateParams, ListParams};
use crate::repository::{HttpRepository, Repository, RepositoryError};
use crate::schema::SchemaRegistry;

#[derive(Clone)]
pub(crate) struct AppState {
    listing: ListingService,
    max_page_limit: u64,
}

impl AppState {
    pub(crate) fn new(listing: ListingService, max_page_limit: u64) -> Self {
        Self {
            listing,
            max_page_limit,
        }
    }
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Service stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;

    let schema = Arc::new(SchemaRegistry::load(&config.schema_path)?);
    tracing::info!(
        path = %config.schema_path.display(),
        models = schema.model_names().len(),
        "Loaded schema"
    );

    let repository: Option<Arc<dyn Repository>> = match &config.datastore_url {
        Some(url) => {
            let http: Arc<dyn Repository> =
                Arc::new(HttpRepository::new(url.clone(), config.datastore_timeout)?);
            tracing::info!("Forwarding queries to {}", url);
            Some(http)
        }
        None => {
            tracing::warn!("DATASTORE_URL is not set; only /health and /:entity/plan will answer");
            None
        }
    };

    let builder = ConditionBuilder::new(
        schema,
        CoercionOptions {
            strict_booleans: config.strict_booleans,
        },
    );
    let listing = ListingService::new(builder, repository, config.strict_sort);
    let state = AppState::new(listing, config.max_page_limit);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("listening on {}", config.bind_addr);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub(crate) fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/:entity", get(handle_list))
        .route("/:entity/plan", get(handle_plan))
        .route("/:entity/aggregate", get(handle_aggregate))
        .with_state(state)
        .layer(cors)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn success(message: String, data: Value) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": message,
            "data": data,
            "code": StatusCode::OK.as_u16(),
            "timestamp": timestamp(),
        })),
    )
        .into_response()
}

/// Error body shared by every route: `{status, message, code, reasoning, timestamp}`.
#[derive(Debug)]
pub(crate) enum ApiError {
    Query(QueryBuildError),
    Repository(RepositoryError),
}

impl From<QueryBuildError> for ApiError {
    fn from(e: QueryBuildError) -> Self {
        ApiError::Query(e)
    }
}

impl From<ListingError> for ApiError {
    fn from(e: ListingError) -> Self {
        match e {
            ListingError::Query(e) => ApiError::Query(e),
            ListingError::Repository(e) => ApiError::Repository(e),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Query(_) => StatusCode::BAD_REQUEST,
            ApiError::Repository(RepositoryError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Repository(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn reasoning(&self) -> &'static str {
        match self {
            ApiError::Query(e) => e.reasoning(),
            ApiError::Repository(RepositoryError::NotConfigured) =>
                "Set DATASTORE_URL to execute queries. The /:entity/plan endpoint works without it.",
            ApiError::Repository(RepositoryError::Transport(_)) =>
                "The data store could not be reached or did not answer in time.",
            ApiError::Repository(_) =>
                "The data store rejected the query or answered with an unexpected payload.",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Query(e) => e.to_string(),
            ApiError::Repository(e) => e.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %message, "Rejected request");
        }
        (
            status,
            Json(json!({
                "status": "error",
                "message": message,
                "code": status.as_u16(),
                "reasoning": self.reasoning(),
                "timestamp": timestamp(),
            })),
        )
            .into_response()
    }
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "models": state.listing.schema().model_names(),
        "datastore": state.listing.has_repository(),
    }))
}

async fn handle_list(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    tracing::info!("Received list request for {}: {:?}", entity, params);

    let entity: Entity = entity.parse()?;
    let validated = params.validate(state.max_page_limit)?;
    let data = state.listing.list(entity, &validated).await?;
    Ok(success(
        format!("{} retrieved successfully", entity.collection_key()),
        data,
    ))
}

async fn handle_plan(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    tracing::info!("Received plan request for {}: {:?}", entity, params);

    let entity: Entity = entity.parse()?;
    let validated = params.validate(state.max_page_limit)?;
    let spec = state.listing.plan(entity, &validated)?;
    tracing::debug!("Planned query for {}: {}", entity, spec.to_json());
    Ok(success(
        format!("Query plan for {}", entity.model_name()),
        json!({
            "model": entity.model_name(),
            "query": spec.to_json(),
        }),
    ))
}

async fn handle_aggregate(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(params): Query<AggregateParams>,
) -> Result<Response, ApiError> {
    tracing::info!("Received aggregate request for {}: {:?}", entity, params);

    let entity: Entity = entity.parse()?;
    let result = state.listing.aggregate(entity, &params).await?;
    Ok(success(
        format!("{} aggregated successfully", entity.collection_key()),
        result,
    ))
}
