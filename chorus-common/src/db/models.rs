//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Kind of request a problem makes of the community
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProblemType {
    #[default]
    Advice,
    Opinion,
}

impl ProblemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemType::Advice => "advice",
            ProblemType::Opinion => "opinion",
        }
    }
}

impl FromStr for ProblemType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advice" => Ok(ProblemType::Advice),
            "opinion" => Ok(ProblemType::Opinion),
            other => Err(Error::InvalidInput(format!("Unknown problem type: {}", other))),
        }
    }
}

/// Problem workflow status
///
/// Transitions: gathering → synthesising → complete, with
/// synthesising → gathering on a failed synthesis attempt.
/// `closed` is set by administrative collaborators only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemStatus {
    Gathering,
    Synthesising,
    Complete,
    Closed,
}

impl ProblemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemStatus::Gathering => "gathering",
            ProblemStatus::Synthesising => "synthesising",
            ProblemStatus::Complete => "complete",
            ProblemStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ProblemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProblemStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gathering" => Ok(ProblemStatus::Gathering),
            "synthesising" => Ok(ProblemStatus::Synthesising),
            "complete" => Ok(ProblemStatus::Complete),
            "closed" => Ok(ProblemStatus::Closed),
            other => Err(Error::Internal(format!("Unknown problem status: {}", other))),
        }
    }
}

/// A request for advice or opinion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: Uuid,
    /// Owning user
    pub user_id: Uuid,
    pub problem_type: ProblemType,
    pub title: String,
    pub category: Option<String>,
    pub situation: String,
    pub tried_already: Option<String>,
    pub desired_outcome: Option<String>,
    pub constraints: Option<String>,
    pub status: ProblemStatus,
    /// Non-flagged contributions received so far
    pub contribution_count: i64,
    /// Count at which synthesis fires; fixed at creation
    pub contribution_threshold: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Problem {
    /// True once enough counted contributions have arrived
    pub fn threshold_reached(&self) -> bool {
        self.contribution_count >= self.contribution_threshold
    }
}

/// One anonymous response to a problem
///
/// Never projected to anyone but its author; synthesis reads contents in
/// aggregate only.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub id: Uuid,
    pub problem_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub flagged_harmful: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonTheme {
    pub theme: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergentView {
    pub view: String,
    pub alternative: String,
}

/// AI-produced aggregate result for one problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synthesis {
    pub id: Uuid,
    pub problem_id: Uuid,
    pub summary: String,
    pub common_themes: Vec<CommonTheme>,
    pub divergent_views: Vec<DivergentView>,
    pub considerations: Vec<String>,
    pub warnings: Vec<String>,
    /// Snapshot of non-flagged contributions that fed the synthesis
    pub contribution_count: i64,
    pub helpful_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub contributions_count: i64,
    pub problems_submitted: i64,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}
