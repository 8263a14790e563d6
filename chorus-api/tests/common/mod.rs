//! Shared fixtures for chorus-api integration tests
//!
//! Every harness gets its own temporary database, a manual clock for the
//! rate limiter, and scripted stand-ins for the safety gate and generator.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{body::Body, http::Request, Router};
use chorus_api::db::problems::{self, NewProblem};
use chorus_api::db::profiles;
use chorus_api::intake::ContributionSubmission;
use chorus_api::rate_limit::{InMemoryRateLimitStore, RateLimitConfig, RateLimitPolicies, RateLimiter};
use chorus_api::safety::{ContentSafetyGate, SafetyError, SafetyFailurePolicy, SafetyVerdict};
use chorus_api::synthesis::{GeneratedSynthesis, GeneratorError, ProblemContext, SynthesisGenerator};
use chorus_api::{build_router, AppState, ServiceOptions};
use chorus_common::db::{init_database, CommonTheme, Problem, ProblemType};
use chorus_common::ManualClock;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

pub const INTERNAL_SECRET: &str = "test-internal-secret-value";

/// A contribution comfortably inside the length bounds
pub const GOOD_CONTENT: &str = "Talk to them directly and set clear expectations early on.";

// =============================================================================
// Safety gate double
// =============================================================================

#[derive(Debug, Clone)]
pub enum SafetyMode {
    Verdict(SafetyVerdict),
    Unavailable,
    /// Safe, after sleeping
    SlowSafe(Duration),
}

pub struct MockSafetyGate {
    mode: Mutex<SafetyMode>,
    calls: AtomicUsize,
}

impl MockSafetyGate {
    pub fn new(mode: SafetyMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: SafetyMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSafetyGate for MockSafetyGate {
    async fn check(&self, _content: &str) -> Result<SafetyVerdict, SafetyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            SafetyMode::Verdict(verdict) => Ok(verdict),
            SafetyMode::Unavailable => Err(SafetyError::Unavailable("connection refused".into())),
            SafetyMode::SlowSafe(delay) => {
                tokio::time::sleep(delay).await;
                Ok(SafetyVerdict::safe())
            }
        }
    }
}

// =============================================================================
// Generator double
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub enum GeneratorMode {
    Succeed,
    Fail,
    /// Succeeds after sleeping
    Slow(Duration),
}

pub struct MockGenerator {
    mode: Mutex<GeneratorMode>,
    calls: AtomicUsize,
    last_input: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new(mode: GeneratorMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
            last_input: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: GeneratorMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Contributions handed to the most recent call
    pub fn last_input(&self) -> Vec<String> {
        self.last_input.lock().unwrap().clone()
    }
}

#[async_trait]
impl SynthesisGenerator for MockGenerator {
    async fn generate(
        &self,
        problem: &ProblemContext,
        contributions: &[String],
    ) -> Result<GeneratedSynthesis, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().unwrap() = contributions.to_vec();

        let mode = *self.mode.lock().unwrap();
        match mode {
            GeneratorMode::Fail => {
                return Err(GeneratorError::InvalidResponse("model returned prose".into()))
            }
            GeneratorMode::Slow(delay) => tokio::time::sleep(delay).await,
            GeneratorMode::Succeed => {}
        }

        Ok(GeneratedSynthesis {
            summary: format!("{} contributors weighed in on {}", contributions.len(), problem.title),
            common_themes: vec![CommonTheme {
                theme: "Communication".into(),
                explanation: "Most people suggested talking it through".into(),
            }],
            divergent_views: Vec::new(),
            considerations: vec!["Timing matters".into()],
            warnings: Vec::new(),
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct HarnessOptions {
    pub policies: RateLimitPolicies,
    pub safety_policy: SafetyFailurePolicy,
    pub generator_timeout: Duration,
    pub default_threshold: i64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            // Generous limits so tests only hit them on purpose
            policies: RateLimitPolicies {
                contribute: RateLimitConfig::new(1000, Duration::from_secs(60)),
                synthesise: RateLimitConfig::new(1000, Duration::from_secs(300)),
                submit: RateLimitConfig::new(1000, Duration::from_secs(3600)),
            },
            safety_policy: SafetyFailurePolicy::FailClosed,
            generator_timeout: Duration::from_secs(5),
            default_threshold: 5,
        }
    }
}

pub struct TestHarness {
    _dir: TempDir,
    pub db: SqlitePool,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub safety: Arc<MockSafetyGate>,
    pub generator: Arc<MockGenerator>,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_options(HarnessOptions::default()).await
    }

    pub async fn with_options(options: HarnessOptions) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db = init_database(&dir.path().join("chorus.db"))
            .await
            .expect("database init");

        let clock = Arc::new(ManualClock::default());
        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::new(InMemoryRateLimitStore::new()),
            clock.clone(),
            options.policies,
        ));
        let safety = Arc::new(MockSafetyGate::new(SafetyMode::Verdict(SafetyVerdict::safe())));
        let generator = Arc::new(MockGenerator::new(GeneratorMode::Succeed));

        let state = AppState::new(
            db.clone(),
            safety.clone(),
            generator.clone(),
            rate_limiter,
            ServiceOptions {
                safety_policy: options.safety_policy,
                generator_timeout: options.generator_timeout,
                default_threshold: options.default_threshold,
                internal_secret: INTERNAL_SECRET.to_string(),
            },
        );

        Self {
            _dir: dir,
            db,
            state,
            clock,
            safety,
            generator,
        }
    }

    pub fn app(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Create a profile and return its id
    pub async fn user(&self) -> Uuid {
        let id = Uuid::new_v4();
        profiles::ensure_profile(&self.db, id, None).await.unwrap();
        id
    }

    pub async fn admin(&self) -> Uuid {
        let id = self.user().await;
        profiles::set_admin(&self.db, id, true).await.unwrap();
        id
    }

    /// Bearer token for `user`
    pub async fn token(&self, user: Uuid) -> String {
        chorus_common::api::create_session(&self.db, user, None)
            .await
            .unwrap()
    }

    /// Advice problem owned by `owner` in gathering
    pub async fn problem(&self, owner: Uuid, threshold: i64) -> Problem {
        problems::create_problem(
            &self.db,
            &NewProblem {
                user_id: owner,
                problem_type: ProblemType::Advice,
                title: "Flatmate never does the dishes".into(),
                category: Some("Home".into()),
                situation: "Shared flat, four people, one sink.".into(),
                tried_already: Some("A rota on the fridge".into()),
                desired_outcome: None,
                constraints: None,
                contribution_threshold: threshold,
            },
        )
        .await
        .unwrap()
    }

    pub async fn reload(&self, problem_id: Uuid) -> Problem {
        problems::get_problem(&self.db, problem_id)
            .await
            .unwrap()
            .expect("problem exists")
    }
}

pub fn submission(problem_id: Uuid, content: &str) -> ContributionSubmission {
    ContributionSubmission {
        problem_id: Some(json!(problem_id.to_string())),
        content: Some(json!(content)),
    }
}

// =============================================================================
// HTTP helpers
// =============================================================================

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}
