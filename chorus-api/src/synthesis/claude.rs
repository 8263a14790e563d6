//! Claude-backed synthesis generator

use async_trait::async_trait;
use chorus_common::db::{CommonTheme, DivergentView, ProblemType};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Write;
use std::time::Duration;
use tracing::{debug, warn};

use super::{GeneratedSynthesis, GeneratorError, ProblemContext, SynthesisGenerator};
use crate::llm::{extract_json_object, AnthropicClient};

pub struct ClaudeSynthesisGenerator {
    client: AnthropicClient,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl ClaudeSynthesisGenerator {
    pub fn new(
        client: AnthropicClient,
        model: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
            timeout,
        }
    }
}

#[async_trait]
impl SynthesisGenerator for ClaudeSynthesisGenerator {
    async fn generate(
        &self,
        problem: &ProblemContext,
        contributions: &[String],
    ) -> Result<GeneratedSynthesis, GeneratorError> {
        let prompt = build_prompt(problem, contributions);
        debug!(
            model = %self.model,
            contributions = contributions.len(),
            "Requesting synthesis"
        );
        let text = self
            .client
            .complete(&self.model, &prompt, self.max_tokens, self.timeout)
            .await?;
        parse_synthesis_response(&text)
    }
}

const RESPONSE_FORMAT: &str = r#"Respond in JSON format:
{
  "summary": "string",
  "common_themes": [{"theme": "string", "explanation": "string"}],
  "divergent_views": [{"view": "string", "alternative": "string"}],
  "considerations": ["string"],
  "warnings": ["string"]
}"#;

fn or_default<'a>(value: &'a Option<String>, fallback: &'a str) -> &'a str {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(fallback)
}

fn contribution_block(contributions: &[String]) -> String {
    contributions
        .iter()
        .map(|c| format!("---\n{}\n---", c))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt for the problem's type
pub fn build_prompt(problem: &ProblemContext, contributions: &[String]) -> String {
    let mut prompt = String::new();
    let n = contributions.len();
    let block = contribution_block(contributions);

    // write! into a String cannot fail
    let _ = match problem.problem_type {
        ProblemType::Advice => write!(
            prompt,
            "You are synthesising multiple anonymous contributions to help someone with a problem. \
Your role is to distill collective wisdom, not summarise individual posts.

THE PROBLEM:
Title: {title}
Category: {category}
Situation: {situation}
Already tried: {tried}
Desired outcome: {outcome}
Constraints: {constraints}

CONTRIBUTIONS FROM {n} PEOPLE:
{block}

---

Create a synthesis with these sections:

1. SUMMARY: A warm, helpful paragraph synthesising the collective advice. Write as \"People generally suggest...\" or \"The collective view is...\" - never attribute to individuals.

2. COMMON THEMES: What suggestions or ideas appeared multiple times? List 3-5 themes, each with a brief explanation.

3. DIVERGENT VIEWS: Where did contributors disagree or offer different approaches? Present these fairly - disagreement is valuable information.

4. CONSIDERATIONS: Important factors or questions that contributors raised for the person to think about.

5. CAUTIONS: Any warnings, risks, or \"watch out for\" points that were raised. Only include if genuinely present in contributions.

Tone: Warm, practical, non-judgmental. This is collective wisdom from people who took time to help a stranger.

Do not:
- Attribute anything to specific contributors
- Make up advice not present in contributions
- Be preachy or lecture
- Include generic advice not specifically raised in contributions

{format}",
            title = problem.title,
            category = problem.category,
            situation = problem.situation,
            tried = or_default(&problem.tried_already, "Not specified"),
            outcome = or_default(&problem.desired_outcome, "Not specified"),
            constraints = or_default(&problem.constraints, "None specified"),
            n = n,
            block = block,
            format = RESPONSE_FORMAT,
        ),
        ProblemType::Opinion => {
            let context = if problem.situation.trim().is_empty() {
                "No additional context provided"
            } else {
                problem.situation.as_str()
            };
            write!(
                prompt,
                "You are synthesising multiple anonymous opinions on a question. \
Your role is to distill the collective view, not summarise individual responses.

THE QUESTION:
{title}
Category: {category}
Context: {context}

OPINIONS FROM {n} PEOPLE:
{block}

---

Create a synthesis with these sections:

1. SUMMARY: A clear paragraph summarising the collective opinion. If there's a clear majority view, state it (e.g., \"Most people think X\"). If it's split, say so. Write as \"The collective opinion is...\" or \"People generally think...\" - never attribute to individuals.

2. COMMON THEMES: What reasons or points appeared multiple times? List 3-5 themes, each with a brief explanation of why people mentioned this.

3. DIVERGENT VIEWS: Where did opinions differ? Present both sides fairly - different perspectives help the person make their own decision.

4. CONSIDERATIONS: \"It depends\" factors - things people said would change their answer depending on circumstances.

5. CAUTIONS: Any \"watch out for\" points or things to be aware of. Only include if genuinely present in contributions.

Tone: Balanced, practical, conversational. This is collective opinion from people who took time to share their view.

Do not:
- Attribute anything to specific contributors
- Make up opinions not present in contributions
- Be preachy or lecture
- Try to tell the person what they \"should\" do - just share what people think

{format}",
                title = problem.title,
                category = problem.category,
                context = context,
                n = n,
                block = block,
                format = RESPONSE_FORMAT,
            )
        }
    };

    prompt
}

/// Parse the generator reply
///
/// Fails only when there is no JSON object or no non-empty `summary`.
/// List fields that are missing or not arrays become empty; list items
/// with the wrong shape are dropped.
pub fn parse_synthesis_response(text: &str) -> Result<GeneratedSynthesis, GeneratorError> {
    let json = extract_json_object(text).ok_or_else(|| {
        GeneratorError::InvalidResponse("Could not find JSON in response".to_string())
    })?;

    let value: Value = serde_json::from_str(json)
        .map_err(|e| GeneratorError::InvalidResponse(format!("Failed to parse JSON: {}", e)))?;

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GeneratorError::InvalidResponse("missing or invalid summary".to_string()))?
        .to_string();

    Ok(GeneratedSynthesis {
        summary,
        common_themes: lenient_list::<CommonTheme>(&value, "common_themes"),
        divergent_views: lenient_list::<DivergentView>(&value, "divergent_views"),
        considerations: lenient_list::<String>(&value, "considerations"),
        warnings: lenient_list::<String>(&value, "warnings"),
    })
}

fn lenient_list<T: DeserializeOwned>(value: &Value, field: &str) -> Vec<T> {
    let Some(items) = value.get(field).and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(field, "Dropping malformed synthesis item: {}", e);
                None
            }
        })
        .collect()
}
