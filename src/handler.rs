//! HTTP front door: routing, the decision cache, and upstream passthrough.

use std::collections::HashSet;
use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use serde::Deserialize;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::health;
use crate::helpers::is_hop_by_hop_http_header;
use crate::lapi::{self, Decision};
use crate::metrics::{self, MetricsSnapshot};
use crate::scorer::{Scorer, Stats};

const PASSTHROUGH_TIMEOUT: Duration = Duration::from_secs(30);
const TIMEOUT_HEADROOM: Duration = Duration::from_secs(60);
const API_KEY_HEADER: &str = "X-Api-Key";

/// Shared request-handling state. Clones are cheap; all interior state is
/// behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub client: Arc<lapi::Client>,
    pub scorer: Arc<Scorer>,
    pub started_at: Instant,

    cache: Arc<RwLock<DecisionCache>>,
    ops: Arc<Mutex<OpsCounters>>,
    dropped_ips: Arc<RwLock<Arc<HashSet<String>>>>,

    pub false_negatives_total: Arc<AtomicI64>,
    pub false_negative_last_check: Arc<AtomicI64>,

    // Separate short-timeout client for transparent passthrough.
    passthrough: reqwest::Client,
}

/// At most one cached scoring result, plus the hit/miss counters that share
/// its lock.
#[derive(Default)]
struct DecisionCache {
    decisions: Option<(Arc<Vec<Decision>>, Instant)>,
    stats: Arc<Stats>,
    hits: u64,
    misses: u64,
}

#[derive(Default)]
struct OpsCounters {
    total_requests: u64,
    failed_requests: u64,
    upstream_latency: Duration,
    last_upstream_call: Option<Instant>,
}

impl AppState {
    pub fn new(cfg: Arc<Config>) -> Result<Self, lapi::Error> {
        let client = lapi::Client::new(
            &cfg.upstream_lapi_url,
            &cfg.upstream_lapi_key,
            cfg.upstream_timeout,
        )?;
        let passthrough = reqwest::Client::builder()
            .timeout(PASSTHROUGH_TIMEOUT)
            .build()?;
        Ok(Self {
            scorer: Arc::new(Scorer::new(cfg.clone())),
            client: Arc::new(client),
            cfg,
            started_at: Instant::now(),
            cache: Arc::new(RwLock::new(DecisionCache::default())),
            ops: Arc::new(Mutex::new(OpsCounters::default())),
            dropped_ips: Arc::new(RwLock::new(Arc::new(HashSet::new()))),
            false_negatives_total: Arc::new(AtomicI64::new(0)),
            false_negative_last_check: Arc::new(AtomicI64::new(0)),
            passthrough,
        })
    }

    /// Cached decisions if the slot is still inside `cache_ttl`.
    fn cached_decisions(&self) -> Option<(Arc<Vec<Decision>>, Arc<Stats>, Duration)> {
        let hit = {
            let cache = self.cache.read().unwrap();
            match &cache.decisions {
                Some((decisions, stored_at))
                    if stored_at.elapsed() < self.cfg.cache_ttl =>
                {
                    Some((decisions.clone(), cache.stats.clone(), stored_at.elapsed()))
                }
                _ => None,
            }
        };
        if hit.is_some() {
            self.cache.write().unwrap().hits += 1;
        }
        hit
    }

    /// Stores a fresh scoring result and the dropped-IP set it produced.
    fn store_decisions(&self, decisions: Arc<Vec<Decision>>, stats: Arc<Stats>) {
        {
            let mut cache = self.cache.write().unwrap();
            cache.decisions = Some((decisions, Instant::now()));
            cache.stats = stats.clone();
            cache.misses += 1;
        }
        self.replace_dropped_ips(&stats);
    }

    fn replace_dropped_ips(&self, stats: &Stats) {
        *self.dropped_ips.write().unwrap() = Arc::new(stats.dropped_ips.clone());
    }

    /// Snapshot of the dropped-IP set for the auditor.
    pub fn dropped_ips_snapshot(&self) -> Arc<HashSet<String>> {
        self.dropped_ips.read().unwrap().clone()
    }

    fn record_upstream_call(&self, started: Instant) {
        let mut ops = self.ops.lock().unwrap();
        ops.upstream_latency = started.elapsed();
        ops.last_upstream_call = Some(Instant::now());
    }

    fn record_failure(&self) {
        self.ops.lock().unwrap().failed_requests += 1;
    }

    async fn fetch_and_score(
        &self,
        raw_query: Option<&str>,
    ) -> Result<(Arc<Vec<Decision>>, Arc<Stats>), lapi::Error> {
        let started = Instant::now();
        let decisions = self.client.get_decisions(raw_query).await?;
        self.record_upstream_call(started);

        let (result, stats) = self
            .scorer
            .score_and_truncate_with_stats(decisions, self.cfg.max_decisions as usize);
        Ok((Arc::new(result), Arc::new(stats)))
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let (total_requests, failed_requests, upstream_latency) = {
            let ops = self.ops.lock().unwrap();
            (ops.total_requests, ops.failed_requests, ops.upstream_latency)
        };
        let (cache_hits, cache_misses, cached_decisions, stats) = {
            let cache = self.cache.read().unwrap();
            let cached = cache
                .decisions
                .as_ref()
                .map(|(d, _)| d.len())
                .unwrap_or(0);
            (cache.hits, cache.misses, cached, cache.stats.clone())
        };

        MetricsSnapshot {
            total_requests,
            failed_requests,
            cache_hits,
            cache_misses,
            cached_decisions,
            upstream_latency,
            max_decisions: self.cfg.max_decisions,
            uptime: self.started_at.elapsed(),
            stats,
            false_negatives_total: self
                .false_negatives_total
                .load(std::sync::atomic::Ordering::Relaxed),
            false_negative_check_time: self
                .false_negative_last_check
                .load(std::sync::atomic::Ordering::Relaxed),
            top_scenarios: self.cfg.effectiveness.top_scenarios(),
        }
    }
}

/// Builds the routing table: the two decision endpoints, the configurable
/// health and metrics paths, and a catch-all passthrough.
pub fn build_router(state: AppState) -> Router {
    let cfg = state.cfg.clone();

    let mut router = Router::new()
        .route("/v1/decisions", get(decisions))
        .route("/v1/decisions/stream", get(decisions_stream));

    if cfg.health.path.starts_with('/') {
        router = if cfg.health.enabled {
            router.route(&cfg.health.path, get(health::health))
        } else {
            router.route(&cfg.health.path, any(disabled))
        };
    }
    if cfg.metrics.path.starts_with('/') {
        router = if cfg.metrics.enabled {
            router.route(&cfg.metrics.path, get(metrics_endpoint))
        } else {
            router.route(&cfg.metrics.path, any(disabled))
        };
    }

    router
        .fallback(passthrough)
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(cfg.upstream_timeout + TIMEOUT_HEADROOM))
        .with_state(state)
}

async fn track_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    state.ops.lock().unwrap().total_requests += 1;
    next.run(req).await
}

async fn disabled() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// GET /v1/decisions: scored + truncated full set, served from the cache
/// slot when fresh.
async fn decisions(State(state): State<AppState>, uri: Uri) -> Response {
    if let Some((decisions, _stats, age)) = state.cached_decisions() {
        debug!(count = decisions.len(), age_secs = age.as_secs(), "serving cached decisions");
        return decisions_response(&decisions);
    }

    match state.fetch_and_score(uri.query()).await {
        Ok((decisions, stats)) => {
            state.store_decisions(decisions.clone(), stats.clone());
            info!(
                total = stats.total,
                returned = stats.returned,
                dropped = stats.dropped,
                max_score = stats.max_score,
                min_score = stats.min_score,
                "fetched decisions from upstream"
            );
            decisions_response(&decisions)
        }
        Err(err) => {
            error!(error = %err, "failed to fetch decisions from upstream");
            state.record_failure();
            (
                StatusCode::BAD_GATEWAY,
                "failed to fetch decisions from upstream",
            )
                .into_response()
        }
    }
}

fn decisions_response(decisions: &[Decision]) -> Response {
    // The reference upstream sends a literal null for an empty set; the
    // downstream bouncer expects the same.
    if decisions.is_empty() {
        return ([(CONTENT_TYPE, "application/json")], "null").into_response();
    }
    json_response(&decisions)
}

fn json_response<T: serde::Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => ([(CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
struct StreamParams {
    startup: Option<String>,
}

/// GET /v1/decisions/stream: always fetched fresh; only `new` is scored and
/// truncated, `deleted` passes through untouched.
async fn decisions_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    let startup = params.startup.as_deref() == Some("true");

    let started = Instant::now();
    let mut stream = match state.client.get_stream(startup).await {
        Ok(stream) => stream,
        Err(err) => {
            error!(error = %err, "failed to fetch decision stream");
            state.record_failure();
            return (
                StatusCode::BAD_GATEWAY,
                "failed to fetch decisions from upstream",
            )
                .into_response();
        }
    };
    state.record_upstream_call(started);

    if let Some(new) = stream.new.take() {
        if new.is_empty() {
            stream.new = Some(new);
        } else {
            let (kept, stats) = state
                .scorer
                .score_and_truncate_with_stats(new, state.cfg.max_decisions as usize);

            // Stream scoring feeds the same stats the metrics endpoint
            // reads, even though the decisions themselves are not cached.
            let stats = Arc::new(stats);
            state.replace_dropped_ips(&stats);
            state.cache.write().unwrap().stats = stats;

            stream.new = Some(kept);
        }
    }

    info!(
        new = stream.new.as_ref().map(|d| d.len()).unwrap_or(0),
        deleted = stream.deleted.as_ref().map(|d| d.len()).unwrap_or(0),
        startup,
        "processed decision stream"
    );

    json_response(&stream)
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    let snapshot = state.metrics_snapshot();
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(&snapshot),
    )
        .into_response()
}

/// Forwards unrecognized requests to the upstream verbatim, injecting the
/// credential header.
async fn passthrough(State(state): State<AppState>, req: Request) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    debug!(path = %req.uri().path(), "proxying request to upstream");

    let url = format!("{}{}", state.cfg.upstream_lapi_url, path_and_query);
    let (parts, body) = req.into_parts();

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let mut upstream_req = state
        .passthrough
        .request(parts.method, url)
        .header(API_KEY_HEADER, &state.cfg.upstream_lapi_key)
        .body(body);

    for (name, value) in parts.headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        upstream_req = upstream_req.header(name.clone(), value.clone());
    }

    let upstream_resp = match upstream_req.send().await {
        Ok(resp) => resp,
        Err(err) => {
            error!(error = %err, "upstream request failed");
            return (StatusCode::BAD_GATEWAY, "upstream request failed").into_response();
        }
    };

    let status = upstream_resp.status();
    let mut response = Response::builder().status(status);
    if let Some(headers) = response.headers_mut() {
        for (name, value) in upstream_resp.headers() {
            if is_hop_by_hop_http_header(name.as_str()) {
                continue;
            }
            headers.append(HeaderName::from(name), value.clone());
        }
    }

    match response.body(Body::from_stream(upstream_resp.bytes_stream())) {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "failed to build passthrough response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
