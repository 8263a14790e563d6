//! # Chorus Common Library
//!
//! Shared code for the Chorus services including:
//! - Database schema, initialization and models
//! - Event types (ChorusEvent enum) and the EventBus
//! - Internal secret and session token primitives
//! - Configuration loading and root folder resolution
//! - Clock abstraction used by time-windowed components

pub mod api;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use time::{Clock, ManualClock, SystemClock};
