//! HTTP API handlers for chorus-api

pub mod auth;
pub mod contribute;
pub mod health;
pub mod problems;
pub mod sse;
pub mod synthesise;

pub use auth::Identity;
pub use contribute::submit_contribution;
pub use health::health_routes;
pub use problems::{create_problem, get_problem, get_problem_synthesis};
pub use sse::event_stream;
pub use synthesise::trigger_synthesis;
