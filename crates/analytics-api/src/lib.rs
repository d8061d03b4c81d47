//! # Analytics HTTP Service
//!
//! The ingestion endpoint (C5), stats reader (C8), and metrics surface (C9)
//! as an axum `Router` plus the `AppState` they share. `analytics-service`
//! wires this crate's [`start_server`] to a store and a queue backend and
//! runs it as a binary; tests construct [`create_router`] directly against
//! in-memory backends.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod responses;

pub use config::AppConfig;
pub use errors::{ApiError, ServiceError};
pub use metrics::PrometheusMetrics;
pub use responses::*;

use analytics_core::monitoring::{MetricsCollector, QueueOp};
use analytics_core::{parse_period, validate_batch, CorrelationId, Event};
use analytics_queue::{cached, DurableQueue, RateLimiter, StatsCache};
use analytics_store::StoreGateway;
use axum::{
    extract::{ConnectInfo, MatchedPath, Path, Query, State},
    http::{header, HeaderName, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, instrument, warn};

/// The header every response carries its correlation id on, per the
/// requirement that server logs and the client-visible response agree on
/// one id for support follow-up. Generated fresh per request by
/// [`CorrelationIdFactory`], never supplied by the caller.
static CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// Mints a fresh [`CorrelationId`] for every request that reaches the
/// service, so it never depends on (or trusts) a caller-supplied id.
#[derive(Clone, Default)]
struct CorrelationIdFactory;

impl MakeRequestId for CorrelationIdFactory {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = CorrelationId::new().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// The hourly aggregate table's retention horizon, expressed in hours,
/// mirroring `analytics_store::RetentionPolicy::default().hourly_aggregations`
/// (30 days). Windows longer than this read from the daily table instead.
const HOURLY_TABLE_RETENTION_HOURS: u32 = 30 * 24;

/// Shared application state, cloned cheaply (everything behind an `Arc`)
/// into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub queue: Arc<dyn DurableQueue>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub cache: Arc<dyn StatsCache>,
    pub store: Arc<StoreGateway>,
    pub metrics: Arc<dyn MetricsCollector>,
    started_at: Instant,
    last_event_received: Arc<AtomicI64>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        queue: Arc<dyn DurableQueue>,
        rate_limiter: Arc<dyn RateLimiter>,
        cache: Arc<dyn StatsCache>,
        store: Arc<StoreGateway>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            config,
            queue,
            rate_limiter,
            cache,
            store,
            metrics,
            started_at: Instant::now(),
            last_event_received: Arc::new(AtomicI64::new(0)),
        }
    }
}

/// Builds the router with every route the service exposes, layered with a
/// tracing/compression/CORS middleware stack.
pub fn create_router(state: AppState) -> Router {
    let cors = if state.config.cors_origin == "*" {
        CorsLayer::permissive()
    } else {
        CorsLayer::new().allow_origin(
            state
                .config
                .cors_origin
                .parse::<HeaderValue>()
                .unwrap_or_else(|_| HeaderValue::from_static("*")),
        )
    };

    let v1 = Router::new()
        .route("/events", post(ingest_events))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/stats/overview", get(stats_overview))
        .route("/stats/tools", get(stats_tools))
        .route("/stats/tool/{toolName}", get(stats_tool_detail))
        .route("/stats/errors", get(stats_errors))
        .route("/stats/performance", get(stats_performance));

    Router::new()
        .nest("/v1", v1)
        .route("/metrics", get(metrics_endpoint))
        .route_layer(middleware::from_fn_with_state(state.clone(), metrics_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    CORRELATION_ID_HEADER.clone(),
                    CorrelationIdFactory,
                ))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                    let correlation_id = request
                        .headers()
                        .get(&CORRELATION_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        correlation_id = %correlation_id,
                    )
                }))
                .layer(CompressionLayer::new())
                .layer(cors)
                .layer(PropagateRequestIdLayer::new(CORRELATION_ID_HEADER.clone()))
                .into_inner(),
        )
        .with_state(state)
}

/// Records `http_requests_total`/`http_request_duration_seconds` for every
/// request that matches a route. Applied with `route_layer` rather than
/// `layer` so [`MatchedPath`] is populated in the request extensions by the
/// time this runs, giving a low-cardinality `route` label (`/v1/stats/tool/{toolName}`)
/// instead of the raw, unbounded request path.
async fn metrics_middleware(State(state): State<AppState>, request: Request<axum::body::Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status().as_u16();
    state.metrics.record_http_request(&route, &method, status, duration);
    response
}

/// Starts the HTTP server, binding `config.host:config.port` and serving
/// until SIGINT/SIGTERM, then draining in-flight requests for up to
/// `config.shutdown_grace`.
pub async fn start_server(state: AppState) -> Result<(), ServiceError> {
    let config = state.config.clone();
    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e: std::net::AddrParseError| ServiceError::BindFailed {
            address: format!("{}:{}", config.host, config.port),
            message: e.to_string(),
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: addr.to_string(),
            message: e.to_string(),
        })?;

    info!(%addr, "starting HTTP server");

    let shutdown_grace = config.shutdown_grace;
    let shutdown_signal = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C signal handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down (grace {:?})", shutdown_grace),
            _ = terminate => info!("received SIGTERM, shutting down (grace {:?})", shutdown_grace),
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

// ============================================================================
// Ingestion endpoint
// ============================================================================

// `peer` is excluded from the span: never serialize the
// remote IP, and `#[instrument]` would otherwise capture it via `Debug`.
#[instrument(skip(state, peer, headers, body))]
async fn ingest_events(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let sanitize = state.config.sanitize_errors();
    match ingest_events_impl(state, peer, headers, body).await {
        Ok(response) => response,
        Err(err) => err.into_response_with_mode(sanitize),
    }
}

async fn ingest_events_impl(
    state: AppState,
    peer: SocketAddr,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if body.len() > state.config.body_limit_bytes {
        return Err(ApiError::PayloadTooLarge {
            size: body.len(),
            max: state.config.body_limit_bytes,
        });
    }

    let identifier = client_identifier(state.config.trust_proxy, &headers, peer);
    let decision = state
        .rate_limiter
        .check(
            &identifier,
            state.config.rate_limit_window_budget(),
            std::time::Duration::from_secs(60),
        )
        .await
        .map_err(ApiError::from)?;
    if !decision.allowed {
        warn!(%identifier, violations = decision.violation_count, "rate limit exceeded");
        return Err(ApiError::RateLimitExceeded {
            retry_after_secs: decision.retry_after.as_secs().max(1),
        });
    }

    let raw: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            return Err(ApiError::ValidationFailed {
                details: vec![format!("Event 0: body is not valid JSON: {err}")],
            })
        }
    };

    let events: Vec<Event> = match validate_batch(&raw) {
        Ok(events) if events.len() > state.config.max_batch_size => {
            return Err(ApiError::ValidationFailed {
                details: vec![format!(
                    "Event 0: batch of {} exceeds the configured maximum of {}",
                    events.len(),
                    state.config.max_batch_size
                )],
            })
        }
        Ok(events) => events,
        Err(failures) => {
            return Err(ApiError::ValidationFailed {
                details: failures.iter().map(|f| f.display()).collect(),
            })
        }
    };

    for event in &events {
        state
            .metrics
            .record_event_received(event.level().as_str(), event.common().tool.as_str());
    }

    let count = events.len();
    state.queue.push_batch(events).await.map_err(|err| {
        state.metrics.record_queue_operation(QueueOp::Reject);
        ApiError::from(err)
    })?;
    state.metrics.record_queue_operation(QueueOp::Push);

    let now = Utc::now();
    state.last_event_received.store(now.timestamp_millis(), Ordering::Relaxed);

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestAccepted {
            status: "accepted",
            count,
            timestamp: now,
        }),
    )
        .into_response())
}

/// Derives the rate-limiter identifier: the client IP, taken from
/// `X-Forwarded-For` only when `TRUST_PROXY` is enabled, falling
/// back to the TCP peer address otherwise so an untrusted proxy can't let a
/// caller spoof another client's budget.
fn client_identifier(trust_proxy: bool, headers: &HeaderMap, peer: SocketAddr) -> String {
    if trust_proxy {
        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
        {
            if !forwarded.is_empty() {
                return forwarded.to_string();
            }
        }
    }
    peer.ip().to_string()
}

// ============================================================================
// Health and status
// ============================================================================

#[instrument(skip(state))]
async fn health(State(state): State<AppState>) -> Response {
    let sanitize = state.config.sanitize_errors();
    match health_impl(state).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => err.into_response_with_mode(sanitize),
    }
}

async fn health_impl(state: AppState) -> Result<HealthResponse, ApiError> {
    state.store.ping().await.map_err(|err| ApiError::ServiceUnavailable {
        message: format!("store unreachable: {err}"),
    })?;
    state
        .queue
        .depth()
        .await
        .map_err(|err| ApiError::ServiceUnavailable {
            message: format!("queue unreachable: {err}"),
        })?;

    Ok(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
    })
}

#[instrument(skip(state))]
async fn status(State(state): State<AppState>) -> Response {
    let sanitize = state.config.sanitize_errors();
    match status_impl(state).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => err.into_response_with_mode(sanitize),
    }
}

async fn status_impl(state: AppState) -> Result<StatusResponse, ApiError> {
    let depth = state.queue.depth().await.map_err(ApiError::from)?;

    let end = Utc::now();
    let start = end - chrono::Duration::hours(24);
    let overview = state
        .store
        .query_overview(start, end, true)
        .await
        .map_err(ApiError::from)?;

    let last_event_received = match state.last_event_received.load(Ordering::Relaxed) {
        0 => None,
        millis => chrono::DateTime::from_timestamp_millis(millis),
    };

    Ok(StatusResponse {
        queue_depth: depth,
        events_processed_24h: overview.total_calls,
        last_event_received,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

// ============================================================================
// Stats reader
// ============================================================================

fn resolve_window(raw: Option<&str>) -> Result<(chrono::DateTime<Utc>, chrono::DateTime<Utc>, bool), ApiError> {
    let period = parse_period(raw.unwrap_or("24h")).map_err(|e| ApiError::InvalidPeriod { reason: e.reason })?;
    let end = Utc::now();
    let start = end - chrono::Duration::hours(period.as_hours() as i64);
    let use_hourly = period.fits_hourly_table(HOURLY_TABLE_RETENTION_HOURS);
    Ok((start, end, use_hourly))
}

/// Serves a cached, JSON-serialized stats body: on a cache miss runs
/// `producer`, serializes its result, and populates the cache before
/// responding. Every stats endpoint is a
/// thin wrapper around this.
async fn cached_stats_response<T, F, Fut>(
    state: &AppState,
    cache_key: &str,
    producer: F,
) -> Result<Response, ApiError>
where
    T: serde::Serialize + Send,
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = Result<T, ApiError>> + Send,
{
    if !state.config.cache_enabled {
        let value = producer().await?;
        state.metrics.record_cache_operation(false);
        return Ok(Json(value).into_response());
    }

    let (body, hit) = cached(state.cache.as_ref(), cache_key, state.config.cache_ttl, move || async move {
        let value = producer().await.map_err(|e| match e {
            ApiError::ServiceUnavailable { message } => analytics_queue::QueueError::ConnectionFailed { message },
            other => analytics_queue::QueueError::ConnectionFailed {
                message: other.to_string(),
            },
        })?;
        serde_json::to_string(&value).map_err(|e| analytics_queue::QueueError::SerializationError {
            message: e.to_string(),
        })
    })
    .await
    .map_err(ApiError::from)?;

    state.metrics.record_cache_operation(hit);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response())
}

#[instrument(skip(state))]
async fn stats_overview(State(state): State<AppState>, query: Query<PeriodQuery>) -> Response {
    let sanitize = state.config.sanitize_errors();
    match stats_overview_impl(state, query).await {
        Ok(response) => response,
        Err(err) => err.into_response_with_mode(sanitize),
    }
}

async fn stats_overview_impl(
    state: AppState,
    Query(query): Query<PeriodQuery>,
) -> Result<Response, ApiError> {
    let (start, end, use_hourly) = resolve_window(query.period.as_deref())?;
    let key = format!("stats:overview:{}:{}", start.timestamp(), use_hourly);
    let store = state.store.clone();
    cached_stats_response(&state, &key, move || async move {
        store.query_overview(start, end, use_hourly).await.map_err(ApiError::from)
    })
    .await
}

#[instrument(skip(state))]
async fn stats_tools(State(state): State<AppState>, query: Query<PeriodQuery>) -> Response {
    let sanitize = state.config.sanitize_errors();
    match stats_tools_impl(state, query).await {
        Ok(response) => response,
        Err(err) => err.into_response_with_mode(sanitize),
    }
}

async fn stats_tools_impl(
    state: AppState,
    Query(query): Query<PeriodQuery>,
) -> Result<Response, ApiError> {
    let (start, end, use_hourly) = resolve_window(query.period.as_deref())?;
    let key = format!("stats:tools:{}:{}", start.timestamp(), use_hourly);
    let store = state.store.clone();
    cached_stats_response(&state, &key, move || async move {
        store.query_tools(start, end, use_hourly).await.map_err(ApiError::from)
    })
    .await
}

#[instrument(skip(state))]
async fn stats_tool_detail(
    State(state): State<AppState>,
    path: Path<String>,
    query: Query<PeriodQuery>,
) -> Response {
    let sanitize = state.config.sanitize_errors();
    match stats_tool_detail_impl(state, path, query).await {
        Ok(response) => response,
        Err(err) => err.into_response_with_mode(sanitize),
    }
}

async fn stats_tool_detail_impl(
    state: AppState,
    Path(tool_name): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<Response, ApiError> {
    let (start, end, use_hourly) = resolve_window(query.period.as_deref())?;
    let key = format!("stats:tool:{}:{}:{}", tool_name, start.timestamp(), use_hourly);
    let store = state.store.clone();
    cached_stats_response(&state, &key, move || async move {
        let timeline = store
            .query_tool_timeline(&tool_name, start, end, use_hourly)
            .await
            .map_err(ApiError::from)?;
        let errors = store
            .query_errors(start, end, Some(tool_name.as_str()))
            .await
            .map_err(ApiError::from)?;
        Ok(ToolDetailResponse {
            tool: tool_name,
            timeline,
            errors,
        })
    })
    .await
}

#[instrument(skip(state))]
async fn stats_errors(State(state): State<AppState>, query: Query<PeriodQuery>) -> Response {
    let sanitize = state.config.sanitize_errors();
    match stats_errors_impl(state, query).await {
        Ok(response) => response,
        Err(err) => err.into_response_with_mode(sanitize),
    }
}

async fn stats_errors_impl(
    state: AppState,
    Query(query): Query<PeriodQuery>,
) -> Result<Response, ApiError> {
    let (start, end, _use_hourly) = resolve_window(query.period.as_deref())?;
    let key = format!("stats:errors:{}", start.timestamp());
    let store = state.store.clone();
    cached_stats_response(&state, &key, move || async move {
        store.query_errors(start, end, None).await.map_err(ApiError::from)
    })
    .await
}

#[instrument(skip(state))]
async fn stats_performance(State(state): State<AppState>, query: Query<PeriodQuery>) -> Response {
    let sanitize = state.config.sanitize_errors();
    match stats_performance_impl(state, query).await {
        Ok(response) => response,
        Err(err) => err.into_response_with_mode(sanitize),
    }
}

async fn stats_performance_impl(
    state: AppState,
    Query(query): Query<PeriodQuery>,
) -> Result<Response, ApiError> {
    let (start, end, _use_hourly) = resolve_window(query.period.as_deref())?;
    let key = format!("stats:performance:{}", start.timestamp());
    let store = state.store.clone();
    cached_stats_response(&state, &key, move || async move {
        store.query_performance(start, end).await.map_err(ApiError::from)
    })
    .await
}

// ============================================================================
// Metrics surface
// ============================================================================

/// Renders the Prometheus registry. Production deployments bind this route
/// to loopback only at the network layer; `analytics-service` enforces that by
/// listening on a separate loopback-only port for this route when
/// `config.mode.is_production()`, rather than this handler refusing
/// non-loopback callers itself.
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    let sanitize = state.config.sanitize_errors();
    match metrics_endpoint_impl(state).await {
        Ok(response) => response,
        Err(err) => err.into_response_with_mode(sanitize),
    }
}

async fn metrics_endpoint_impl(state: AppState) -> Result<Response, ApiError> {
    if !state.config.enable_metrics {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    let body = PrometheusMetrics::gather_text().map_err(|e| ApiError::Internal {
        message: format!("failed to render metrics: {e}"),
    })?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_identifier_falls_back_to_peer_when_untrusted() {
        let headers = {
            let mut h = HeaderMap::new();
            h.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());
            h
        };
        let peer: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        assert_eq!(client_identifier(false, &headers, peer), "127.0.0.1");
    }

    #[test]
    fn client_identifier_uses_forwarded_header_when_trusted() {
        let headers = {
            let mut h = HeaderMap::new();
            h.insert("x-forwarded-for", "1.2.3.4, 5.6.7.8".parse().unwrap());
            h
        };
        let peer: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        assert_eq!(client_identifier(true, &headers, peer), "1.2.3.4");
    }

    #[test]
    fn client_identifier_trusts_header_but_falls_back_when_absent() {
        let peer: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        assert_eq!(client_identifier(true, &HeaderMap::new(), peer), "127.0.0.1");
    }

    #[test]
    fn resolve_window_rejects_invalid_period() {
        assert!(resolve_window(Some("not-a-period")).is_err());
    }

    #[test]
    fn resolve_window_picks_hourly_for_short_windows() {
        let (_, _, use_hourly) = resolve_window(Some("24h")).unwrap();
        assert!(use_hourly);
    }

    #[test]
    fn resolve_window_picks_daily_for_long_windows() {
        let (_, _, use_hourly) = resolve_window(Some("365d")).unwrap();
        assert!(!use_hourly);
    }

    #[test]
    fn resolve_window_defaults_to_24_hours() {
        let (start, end, use_hourly) = resolve_window(None).unwrap();
        assert!(use_hourly);
        assert_eq!((end - start).num_hours(), 24);
    }
}
