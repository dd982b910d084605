use std::net::SocketAddr;
use std::sync::Arc;

use prometheus::{Counter, Histogram, HistogramOpts, IntGauge, Opts, Registry, TextEncoder};
use tracing::{error, info};
use warp::Filter;

use crate::health::HealthChecker;

lazy_static::lazy_static! {
    // Model traffic
    pub static ref MODEL_REQUESTS: Counter = Counter::with_opts(
        Opts::new("parley_model_requests_total", "Total number of completion requests sent")
    ).unwrap();

    pub static ref MODEL_FAILURES: Counter = Counter::with_opts(
        Opts::new("parley_model_failures_total", "Total number of completion requests that failed")
    ).unwrap();

    pub static ref MODEL_REQUEST_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("parley_model_request_duration_seconds", "Time spent waiting on the model")
    ).unwrap();

    pub static ref RATE_LIMIT_WAITS: Counter = Counter::with_opts(
        Opts::new("parley_rate_limit_waits_total", "Requests that had to back off before being sent")
    ).unwrap();

    // Chat
    pub static ref CHAT_RESPONSES: Counter = Counter::with_opts(
        Opts::new("parley_chat_responses_total", "Chat replies delivered")
    ).unwrap();

    pub static ref RETRIEVAL_FAILURES: Counter = Counter::with_opts(
        Opts::new("parley_retrieval_failures_total", "Grounding lookups that failed")
    ).unwrap();

    // Trivia
    pub static ref TRIVIA_GAMES_STARTED: Counter = Counter::with_opts(
        Opts::new("parley_trivia_games_started_total", "Trivia games started")
    ).unwrap();

    pub static ref TRIVIA_GAMES_COMPLETED: Counter = Counter::with_opts(
        Opts::new("parley_trivia_games_completed_total", "Trivia games that ran all rounds")
    ).unwrap();

    pub static ref TRIVIA_GAMES_STOPPED: Counter = Counter::with_opts(
        Opts::new("parley_trivia_games_stopped_total", "Trivia games stopped by an administrator")
    ).unwrap();

    pub static ref TRIVIA_ROUNDS_SKIPPED: Counter = Counter::with_opts(
        Opts::new("parley_trivia_rounds_skipped_total", "Rounds skipped because no question could be generated")
    ).unwrap();

    pub static ref ACTIVE_GAMES: IntGauge = IntGauge::with_opts(
        Opts::new("parley_trivia_active_games", "Trivia games currently running")
    ).unwrap();

    // Voice
    pub static ref SPEECH_SYNTHESES: Counter = Counter::with_opts(
        Opts::new("parley_speech_syntheses_total", "Replies converted to speech")
    ).unwrap();
}

pub struct MetricsRegistry {
    registry: Registry,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(MODEL_REQUESTS.clone()),
            Box::new(MODEL_FAILURES.clone()),
            Box::new(MODEL_REQUEST_DURATION.clone()),
            Box::new(RATE_LIMIT_WAITS.clone()),
            Box::new(CHAT_RESPONSES.clone()),
            Box::new(RETRIEVAL_FAILURES.clone()),
            Box::new(TRIVIA_GAMES_STARTED.clone()),
            Box::new(TRIVIA_GAMES_COMPLETED.clone()),
            Box::new(TRIVIA_GAMES_STOPPED.clone()),
            Box::new(TRIVIA_ROUNDS_SKIPPED.clone()),
            Box::new(ACTIVE_GAMES.clone()),
            Box::new(SPEECH_SYNTHESES.clone()),
        ];
        for collector in collectors {
            if let Err(err) = registry.register(collector) {
                error!("Failed to register metric: {err}");
            }
        }

        Self { registry }
    }

    pub fn gather_metrics(&self) -> String {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        encoder.encode_to_string(&metric_families).unwrap_or_else(|e| {
            error!("Failed to encode metrics: {}", e);
            String::new()
        })
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves `/metrics` and `/health` until the process exits.
pub async fn serve(port: u16, metrics: Arc<MetricsRegistry>, health: Arc<HealthChecker>) {
    let metrics_route = warp::path("metrics")
        .and(warp::get())
        .and(with_shared(metrics))
        .map(|metrics: Arc<MetricsRegistry>| {
            warp::reply::with_header(
                metrics.gather_metrics(),
                "Content-Type",
                "text/plain; version=0.0.4; charset=utf-8",
            )
        });

    let health_route = warp::path("health")
        .and(warp::get())
        .and(with_shared(health))
        .map(|health: Arc<HealthChecker>| warp::reply::json(&health.status()));

    let root_route = warp::path::end()
        .and(warp::get())
        .map(|| "Parley - /metrics, /health");

    let routes = metrics_route.or(health_route).or(root_route);

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(%addr, "Serving metrics");
    warp::serve(routes).run(addr).await;
}

fn with_shared<T: Send + Sync + 'static>(
    value: Arc<T>,
) -> impl Filter<Extract = (Arc<T>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || value.clone())
}
