//! Synthesis generation and orchestration
//!
//! [`SynthesisGenerator`] is the external text generator; the
//! [`orchestrator`] owns the gathering → synthesising → complete state
//! machine around it.

pub mod claude;
pub mod orchestrator;

pub use claude::ClaudeSynthesisGenerator;
pub use orchestrator::{SynthesisCaller, SynthesisOrchestrator};

use async_trait::async_trait;
use chorus_common::db::{CommonTheme, DivergentView, Problem, ProblemType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;

/// Problem fields handed to the generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemContext {
    pub problem_type: ProblemType,
    pub title: String,
    pub category: String,
    pub situation: String,
    pub tried_already: Option<String>,
    pub desired_outcome: Option<String>,
    pub constraints: Option<String>,
}

impl From<&Problem> for ProblemContext {
    fn from(problem: &Problem) -> Self {
        Self {
            problem_type: problem.problem_type,
            title: problem.title.clone(),
            category: problem
                .category
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| "General".to_string()),
            situation: problem.situation.clone(),
            tried_already: problem.tried_already.clone(),
            desired_outcome: problem.desired_outcome.clone(),
            constraints: problem.constraints.clone(),
        }
    }
}

/// Structured generator output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSynthesis {
    pub summary: String,
    #[serde(default)]
    pub common_themes: Vec<CommonTheme>,
    #[serde(default)]
    pub divergent_views: Vec<DivergentView>,
    #[serde(default)]
    pub considerations: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Invalid synthesis: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait SynthesisGenerator: Send + Sync {
    /// `contributions` are the non-flagged contents, never empty
    async fn generate(
        &self,
        problem: &ProblemContext,
        contributions: &[String],
    ) -> Result<GeneratedSynthesis, GeneratorError>;
}
