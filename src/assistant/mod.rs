//! Natural-language task parsing and productivity coaching.
//!
//! `TaskAssistant` asks a completion service when one is configured and
//! falls back to the rule tables in [`fallback`] / [`recommend`] otherwise.
//! Nothing here returns an error to the caller: every failure becomes an
//! [`Assisted::Fallback`] carrying the rule-based answer and the reason.

pub mod completion;
pub mod fallback;
pub mod recommend;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CompletionSettings;
use crate::world::{Priority, TITLE_MAX};
use completion::{CompletionError, CompletionRequest, CompletionService, OpenAiCompletion};

pub use recommend::TaskSummary;

const PARSE_SYSTEM: &str = "You are a task parsing assistant. Return only JSON.";
const PARSE_MAX_TOKENS: u32 = 200;
const PARSE_TEMPERATURE: f32 = 0.3;

const COACH_SYSTEM: &str = "You are a productivity coach.";
const COACH_MAX_TOKENS: u32 = 150;
const COACH_TEMPERATURE: f32 = 0.7;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

// ── Types ──────────────────────────────────────────────────────

/// Structured result of parsing free text. Never stored as-is; handlers
/// map it onto a Task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTask {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    /// Minutes, always > 0.
    pub estimated_duration: u32,
    pub due_date: Option<NaiveDate>,
    pub category_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NotConfigured,
    ServiceUnavailable,
    MalformedResponse,
}

impl From<&CompletionError> for FallbackReason {
    fn from(e: &CompletionError) -> Self {
        match e {
            CompletionError::NotConfigured => FallbackReason::NotConfigured,
            CompletionError::Unavailable(_) => FallbackReason::ServiceUnavailable,
            CompletionError::Malformed(_) => FallbackReason::MalformedResponse,
        }
    }
}

/// A value from the model, or the rule-based stand-in and why it was used.
#[derive(Debug, Clone, PartialEq)]
pub enum Assisted<T> {
    Model(T),
    Fallback { value: T, reason: FallbackReason },
}

impl<T> Assisted<T> {
    pub fn value(&self) -> &T {
        match self {
            Assisted::Model(value) | Assisted::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Assisted::Model(value) | Assisted::Fallback { value, .. } => value,
        }
    }

    pub fn reason(&self) -> Option<FallbackReason> {
        match self {
            Assisted::Model(_) => None,
            Assisted::Fallback { reason, .. } => Some(*reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Assisted::Fallback { .. })
    }

    /// "model" or "fallback", for API responses.
    pub fn source(&self) -> &'static str {
        match self {
            Assisted::Model(_) => "model",
            Assisted::Fallback { .. } => "fallback",
        }
    }
}

// ── The assistant ──────────────────────────────────────────────

/// Built once at boot and shared. Holds no mutable state, so concurrent
/// calls are independent.
pub struct TaskAssistant {
    service: Option<Arc<dyn CompletionService>>,
    model: String,
    timeout: Duration,
}

impl TaskAssistant {
    /// Rules only.
    pub fn offline() -> Self {
        TaskAssistant {
            service: None,
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn new(service: Arc<dyn CompletionService>, model: impl Into<String>, timeout: Duration) -> Self {
        TaskAssistant {
            service: Some(service),
            model: model.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &CompletionSettings) -> Self {
        match OpenAiCompletion::from_settings(settings) {
            Some(Ok(service)) => {
                tracing::info!(model = %settings.model, endpoint = %settings.endpoint, "completion service configured");
                TaskAssistant::new(Arc::new(service), settings.model.clone(), settings.timeout())
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "cannot build completion client, using rules only");
                TaskAssistant::offline()
            }
            None => {
                tracing::warn!("no completion api key configured, using rules only");
                TaskAssistant::offline()
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.service.is_some()
    }

    /// Turn free text into a task. Always produces one.
    pub async fn parse_natural_language(&self, text: &str) -> Assisted<ParsedTask> {
        let fallback = fallback::parse(text);
        let request = self.request(PARSE_SYSTEM, parse_prompt(text), PARSE_MAX_TOKENS, PARSE_TEMPERATURE);

        let result = match self.complete(&request).await {
            Ok(reply) => parse_reply(&reply, &fallback),
            Err(e) => Err(e),
        };

        match result {
            Ok(task) => Assisted::Model(task),
            Err(e) => degrade("parse", &e, fallback),
        }
    }

    /// Coaching advice for a user's tasks (newest first). Always produces some.
    pub async fn recommendations(&self, tasks: &[TaskSummary]) -> Assisted<String> {
        let request = self.request(
            COACH_SYSTEM,
            recommend::coaching_prompt(tasks),
            COACH_MAX_TOKENS,
            COACH_TEMPERATURE,
        );

        let result = match self.complete(&request).await {
            Ok(reply) if reply.trim().is_empty() => Err(CompletionError::Malformed("empty reply".to_string())),
            Ok(reply) => Ok(reply.trim().to_string()),
            Err(e) => Err(e),
        };

        match result {
            Ok(text) => Assisted::Model(text),
            Err(e) => degrade("recommendations", &e, recommend::fallback_recommendations(tasks)),
        }
    }

    fn request(&self, system: &str, prompt: String, max_tokens: u32, temperature: f32) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            system: system.to_string(),
            prompt,
            max_tokens,
            temperature,
        }
    }

    /// One attempt, bounded by the configured timeout. No retries.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let service = self.service.as_ref().ok_or(CompletionError::NotConfigured)?;
        match tokio::time::timeout(self.timeout, service.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Unavailable(format!(
                "{} did not answer within {:?}",
                service.name(),
                self.timeout
            ))),
        }
    }
}

fn degrade<T>(what: &str, error: &CompletionError, value: T) -> Assisted<T> {
    let reason = FallbackReason::from(error);
    match reason {
        FallbackReason::NotConfigured => tracing::debug!(what, "using rule-based fallback"),
        _ => tracing::warn!(what, error = %error, ?reason, "completion failed, using rule-based fallback"),
    }
    Assisted::Fallback { value, reason }
}

// ── Prompt and reply ───────────────────────────────────────────

fn parse_prompt(text: &str) -> String {
    format!(
        "Parse this task description and return JSON with:\n\
         - title: A clear task title\n\
         - description: Expanded description if needed\n\
         - priority: LOW, MEDIUM, HIGH, or URGENT\n\
         - estimated_duration: Estimated time in minutes\n\
         - due_date: Date in YYYY-MM-DD format if mentioned\n\
         - category_suggestion: Suggested category\n\
         \n\
         Text: \"{text}\"\n\
         \n\
         Return only JSON."
    )
}

/// What the model is asked to return. Every field is optional; gaps are
/// filled from the rule-based parse of the same text.
#[derive(Debug, Deserialize)]
struct ModelTask {
    title: Option<String>,
    description: Option<String>,
    priority: Option<String>,
    estimated_duration: Option<f64>,
    due_date: Option<String>,
    category_suggestion: Option<String>,
}

/// Models like to wrap JSON in a Markdown fence even when told not to.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_reply(reply: &str, fallback: &ParsedTask) -> Result<ParsedTask, CompletionError> {
    let model: ModelTask = serde_json::from_str(strip_code_fence(reply))
        .map_err(|e| CompletionError::Malformed(e.to_string()))?;

    let title = non_empty(model.title);
    if let Some(title) = &title {
        let chars = title.chars().count();
        if chars > TITLE_MAX {
            return Err(CompletionError::Malformed(format!("title is {chars} characters")));
        }
    }

    let priority = non_empty(model.priority)
        .map(|p| p.parse::<Priority>().map_err(CompletionError::Malformed))
        .transpose()?;

    let due_date = non_empty(model.due_date)
        .map(|d| {
            NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                .map_err(|e| CompletionError::Malformed(format!("due_date {d:?}: {e}")))
        })
        .transpose()?;

    let estimated_duration = model
        .estimated_duration
        .filter(|m| m.is_finite() && *m >= 1.0 && *m <= f64::from(u32::MAX))
        .map(|m| m.round() as u32);

    let description = non_empty(model.description);
    let category_suggestion = non_empty(model.category_suggestion);

    // A reply carrying nothing we can use is not a model answer
    if title.is_none()
        && description.is_none()
        && priority.is_none()
        && estimated_duration.is_none()
        && due_date.is_none()
        && category_suggestion.is_none()
    {
        return Err(CompletionError::Malformed("no usable fields".to_string()));
    }

    Ok(ParsedTask {
        title: title.unwrap_or_else(|| fallback.title.clone()),
        description: description.unwrap_or_else(|| fallback.description.clone()),
        priority: priority.unwrap_or(fallback.priority),
        estimated_duration: estimated_duration.unwrap_or(fallback.estimated_duration),
        due_date,
        category_suggestion: category_suggestion.unwrap_or_else(|| fallback.category_suggestion.clone()),
    })
}
