// LocalPulse - Query API Server
// Read-only JSON endpoints over the store (Axum)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use local_pulse::{logging, AppConfig, Category, KeywordScope, Period, PipelineError, Store};

const DEFAULT_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 500;
const MAX_COMPETITORS: usize = 50;

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<Store>,
    keyword_window_days: u32,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn fail(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
    )
        .into_response()
}

/// Run a store query off the async runtime and wrap the result
async fn respond<T, F>(state: &AppState, query: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce(&Store) -> local_pulse::Result<T> + Send + 'static,
{
    let store = state.store.clone();
    match tokio::task::spawn_blocking(move || query(&store)).await {
        Ok(Ok(data)) => ApiResponse::ok(data),
        Ok(Err(PipelineError::NotFound(id))) => {
            fail(StatusCode::NOT_FOUND, format!("business not found: {}", id))
        }
        Ok(Err(e)) => {
            error!(error = %e, "query failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            error!(error = %e, "query task panicked");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    }
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

fn parse_category(raw: Option<&str>) -> Result<Option<Category>, Response> {
    raw.map(|c| c.parse::<Category>())
        .transpose()
        .map_err(|e| fail(StatusCode::BAD_REQUEST, e))
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Deserialize)]
struct ListParams {
    category: Option<String>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct NearParams {
    lat: f64,
    lon: f64,
    radius: Option<f64>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct TrendParams {
    period: Option<String>,
}

#[derive(Deserialize)]
struct TrendingParams {
    days: Option<u32>,
    business: Option<String>,
    limit: Option<usize>,
    as_of: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CompetitorParams {
    /// Comma-separated business ids
    ids: String,
}

#[derive(Deserialize)]
struct RangeParams {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    business: Option<String>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check(State(state): State<AppState>) -> Response {
    respond(&state, |store| {
        Ok(serde_json::json!({
            "status": "ok",
            "version": local_pulse::VERSION,
            "businesses": store.business_count()?,
            "reviews": store.review_count()?,
            "unprocessed_reviews": store.unprocessed_review_count()?,
        }))
    })
    .await
}

/// GET /api/businesses?category=&limit= - By category, or best rated overall
async fn list_businesses(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    let category = match parse_category(params.category.as_deref()) {
        Ok(c) => c,
        Err(response) => return response,
    };
    let limit = clamp_limit(params.limit);

    respond(&state, move |store| match category {
        Some(category) => store.businesses_by_category(category, limit),
        None => store.top_rated(None, limit),
    })
    .await
}

/// GET /api/businesses/top?category=&limit= - Rated businesses only
async fn top_rated(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    let category = match parse_category(params.category.as_deref()) {
        Ok(c) => c,
        Err(response) => return response,
    };
    let limit = clamp_limit(params.limit);
    respond(&state, move |store| store.top_rated(category, limit)).await
}

/// GET /api/businesses/near?lat=&lon=&radius=&limit=
async fn businesses_near(State(state): State<AppState>, Query(params): Query<NearParams>) -> Response {
    if !(-90.0..=90.0).contains(&params.lat) || !(-180.0..=180.0).contains(&params.lon) {
        return fail(StatusCode::BAD_REQUEST, "lat/lon out of range".to_string());
    }
    let radius = params.radius.unwrap_or(1_000.0);
    if !(radius > 0.0) {
        return fail(StatusCode::BAD_REQUEST, "radius must be positive".to_string());
    }
    let limit = clamp_limit(params.limit);

    respond(&state, move |store| {
        store.businesses_near(params.lat, params.lon, radius, limit)
    })
    .await
}

/// GET /api/businesses/:id
async fn get_business(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(&state, move |store| {
        store
            .get_business(&id)?
            .ok_or(PipelineError::NotFound(id))
    })
    .await
}

/// GET /api/businesses/:id/reviews?limit=
async fn business_reviews(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Response {
    let limit = clamp_limit(params.limit);
    respond(&state, move |store| store.reviews_for_business(&id, limit)).await
}

/// GET /api/businesses/:id/anomalies
async fn business_anomalies(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(&state, move |store| store.anomaly_flags(&id)).await
}

/// GET /api/businesses/:id/analytics
async fn business_analytics(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    respond(&state, move |store| store.business_analytics(&id)).await
}

/// GET /api/businesses/:id/sentiment?period=day|week|month
async fn sentiment_trend(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TrendParams>,
) -> Response {
    let period = match params.period.as_deref().unwrap_or("month").parse::<Period>() {
        Ok(p) => p,
        Err(e) => return fail(StatusCode::BAD_REQUEST, e),
    };
    respond(&state, move |store| store.sentiment_trend(&id, period)).await
}

/// GET /api/categories/:category/analytics
async fn category_analytics(State(state): State<AppState>, Path(category): Path<String>) -> Response {
    let category = match category.parse::<Category>() {
        Ok(c) => c,
        Err(e) => return fail(StatusCode::BAD_REQUEST, e),
    };
    respond(&state, move |store| store.category_analytics(category)).await
}

/// GET /api/keywords/trending?days=&business=&limit=&as_of=
async fn trending_keywords(
    State(state): State<AppState>,
    Query(params): Query<TrendingParams>,
) -> Response {
    let days = params.days.unwrap_or(state.keyword_window_days).max(1);
    let limit = clamp_limit(params.limit);
    let as_of = params.as_of.unwrap_or_else(Utc::now);

    respond(&state, move |store| {
        let scope = match params.business {
            Some(id) => {
                let business = store.get_business(&id)?.ok_or(PipelineError::NotFound(id))?;
                KeywordScope::Business(business.id)
            }
            None => KeywordScope::Global,
        };
        store.trending_keywords(&scope, days, as_of, limit)
    })
    .await
}

/// GET /api/competitors?ids=a,b,c - Side-by-side metrics and market averages
async fn competitors(State(state): State<AppState>, Query(params): Query<CompetitorParams>) -> Response {
    let ids: Vec<String> = params
        .ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if ids.is_empty() || ids.len() > MAX_COMPETITORS {
        return fail(
            StatusCode::BAD_REQUEST,
            format!("ids must name 1 to {} businesses", MAX_COMPETITORS),
        );
    }
    respond(&state, move |store| store.competitor_metrics(&ids)).await
}

/// GET /api/reviews?start=&end=&business= - Reviews posted in [start, end]
async fn reviews_between(State(state): State<AppState>, Query(params): Query<RangeParams>) -> Response {
    if params.start > params.end {
        return fail(StatusCode::BAD_REQUEST, "start must not be after end".to_string());
    }
    respond(&state, move |store| {
        store.reviews_between(params.start, params.end, params.business.as_deref())
    })
    .await
}

/// GET /api/review-queue - Candidates awaiting manual resolution
async fn review_queue(State(state): State<AppState>) -> Response {
    respond(&state, |store| store.manual_review_queue()).await
}

// ============================================================================
// Main Server
// ============================================================================

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/businesses", get(list_businesses))
        .route("/businesses/top", get(top_rated))
        .route("/businesses/near", get(businesses_near))
        .route("/businesses/:id", get(get_business))
        .route("/businesses/:id/reviews", get(business_reviews))
        .route("/businesses/:id/anomalies", get(business_anomalies))
        .route("/businesses/:id/analytics", get(business_analytics))
        .route("/businesses/:id/sentiment", get(sentiment_trend))
        .route("/categories/:category/analytics", get(category_analytics))
        .route("/keywords/trending", get(trending_keywords))
        .route("/competitors", get(competitors))
        .route("/reviews", get(reviews_between))
        .route("/review-queue", get(review_queue))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config_path = None;
    let mut addr = DEFAULT_ADDR.to_string();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next().map(std::path::PathBuf::from),
            "--addr" => addr = args.next().unwrap_or(addr),
            other => anyhow::bail!("Unexpected argument: {}", other),
        }
    }

    let config = AppConfig::load(config_path.as_deref())?;
    config.validate()?;
    logging::init(&config.logging.level);

    println!("🌐 LocalPulse - Query API");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let store = Store::from_config(&config.database)?;
    println!("✓ Database opened: {}", config.database.path.display());

    let state = AppState {
        store: Arc::new(store),
        keyword_window_days: config.keywords.window_days,
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "query API listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/health", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
