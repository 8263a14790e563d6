//! chorus-api library
//!
//! Contribution intake and synthesis service: per-identifier rate
//! limiting, content safety gating, threshold-triggered synthesis and the
//! HTTP surface around them.

use axum::Router;
use chorus_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod intake;
pub mod llm;
pub mod rate_limit;
pub mod safety;
pub mod synthesis;
pub mod utils;

use intake::ContributionIntake;
use rate_limit::RateLimiter;
use safety::{ContentSafetyGate, SafetyFailurePolicy};
use synthesis::{SynthesisGenerator, SynthesisOrchestrator};

/// Buffered events per SSE subscriber
const EVENT_BUS_CAPACITY: usize = 256;

/// Tunables that shape the service components
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub safety_policy: SafetyFailurePolicy,
    pub generator_timeout: Duration,
    pub default_threshold: i64,
    pub internal_secret: String,
}

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub rate_limiter: Arc<RateLimiter>,
    pub intake: Arc<ContributionIntake>,
    pub orchestrator: Arc<SynthesisOrchestrator>,
    /// Secret expected in `x-internal-secret`
    pub internal_secret: Arc<str>,
    /// Threshold stamped on new problems
    pub default_threshold: i64,
    pub startup_time: Instant,
}

impl AppState {
    /// Wire the intake and orchestrator around the given collaborators
    pub fn new(
        db: SqlitePool,
        safety_gate: Arc<dyn ContentSafetyGate>,
        generator: Arc<dyn SynthesisGenerator>,
        rate_limiter: Arc<RateLimiter>,
        options: ServiceOptions,
    ) -> Self {
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

        let orchestrator = Arc::new(SynthesisOrchestrator::new(
            db.clone(),
            generator,
            rate_limiter.clone(),
            event_bus.clone(),
            options.generator_timeout,
        ));

        let intake = Arc::new(ContributionIntake::new(
            db.clone(),
            rate_limiter.clone(),
            safety_gate,
            options.safety_policy,
            orchestrator.clone(),
            event_bus.clone(),
        ));

        Self {
            db,
            event_bus,
            rate_limiter,
            intake,
            orchestrator,
            internal_secret: Arc::from(options.internal_secret),
            default_threshold: options.default_threshold,
            startup_time: Instant::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let api = Router::new()
        .route("/api/contribute", post(api::submit_contribution))
        .route("/api/synthesise/:problem_id", post(api::trigger_synthesis))
        .route("/api/problems", post(api::create_problem))
        .route("/api/problems/:id", get(api::get_problem))
        .route("/api/problems/:id/synthesis", get(api::get_problem_synthesis))
        .route("/api/events", get(api::event_stream));

    Router::new()
        .merge(api)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
