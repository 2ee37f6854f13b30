//! Generation client: one bounded, validated call to a text generator.
//!
//! The [`GenerationClient`] wraps a [`TextGenerator`] with:
//!
//! - a hard timeout (a timeout is a [`Error::Transient`] failure)
//! - strict output validation (violations are [`Error::Validation`])
//! - exactly one underlying call per invocation; retries belong to the scheduler
//!
//! ## Implementations
//!
//! - [`http::ChatCompletionsGenerator`]: OpenAI-compatible chat completions
//! - [`scripted::ScriptedGenerator`]: scripted responses for tests

pub mod http;
pub mod scripted;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::GenerationRequest;
use crate::error::{Error, Result};
use crate::forecast::{ForecastRecord, ForecastStatus, OutcomeLabel};
use crate::metrics::FlowMetrics;
use crate::prompt::Prompt;

/// Black-box text-generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Performs a single request/response call, returning raw text.
    async fn complete(&self, prompt: &Prompt) -> Result<String>;

    /// Identifier of the underlying model.
    fn model_id(&self) -> &str;
}

/// Linear shrinkage of model confidence toward a target mean.
///
/// `calibrated = (1 - strength) * raw + strength * mean`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceCalibration {
    strength: f64,
    mean: f64,
}

impl Default for ConfidenceCalibration {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ConfidenceCalibration {
    /// Calibration that returns the raw confidence unchanged.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            strength: 0.0,
            mean: 0.7,
        }
    }

    /// Creates a calibration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] unless both values lie in [0, 1].
    pub fn new(strength: f64, mean: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&strength) {
            return Err(Error::configuration(format!(
                "calibration strength must be in [0, 1], got {strength}"
            )));
        }
        if !(0.0..=1.0).contains(&mean) {
            return Err(Error::configuration(format!(
                "calibration mean must be in [0, 1], got {mean}"
            )));
        }
        Ok(Self { strength, mean })
    }

    /// Applies the calibration to a raw confidence in [0, 1].
    #[must_use]
    pub fn apply(&self, raw: f64) -> f64 {
        ((1.0 - self.strength) * raw + self.strength * self.mean).clamp(0.0, 1.0)
    }
}

/// A generated answer that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedOutput {
    /// Predicted outcome.
    pub outcome: OutcomeLabel,
    /// Raw confidence in [0, 1].
    pub confidence: f64,
    /// Non-blank rationale.
    pub rationale: String,
}

/// Validates raw generator output against the response contract.
///
/// # Errors
///
/// Returns [`Error::Validation`] for anything but a JSON object with a valid
/// `pick`, `confidence` and non-blank `rationale` (alias `logic`).
pub fn parse_output(raw: &str) -> Result<ValidatedOutput> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::validation(format!("output is not valid JSON: {e}")))?;
    let Value::Object(fields) = value else {
        return Err(Error::validation("output must be a JSON object"));
    };

    let outcome = match fields.get("pick") {
        Some(Value::String(pick)) => pick.parse::<OutcomeLabel>()?,
        Some(_) => return Err(Error::validation("pick must be a string")),
        None => return Err(Error::validation("missing field: pick")),
    };

    let confidence = match fields.get("confidence") {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| Error::validation("confidence is not representable"))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::validation(format!("confidence {s:?} is not a number")))?,
        Some(_) => return Err(Error::validation("confidence must be a number")),
        None => return Err(Error::validation("missing field: confidence")),
    };
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(Error::validation(format!(
            "confidence {confidence} outside [0, 1]"
        )));
    }

    let rationale = match fields.get("rationale").or_else(|| fields.get("logic")) {
        Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Some(Value::String(_)) => return Err(Error::validation("rationale is blank")),
        Some(_) => return Err(Error::validation("rationale must be a string")),
        None => return Err(Error::validation("missing field: rationale")),
    };

    Ok(ValidatedOutput {
        outcome,
        confidence,
        rationale,
    })
}

/// Removes a surrounding markdown code fence (```` ```json ... ``` ````).
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    match inner.find('\n') {
        Some(newline) => inner[newline + 1..].trim(),
        None => inner.trim(),
    }
}

/// Wraps a [`TextGenerator`] with a timeout and output validation.
pub struct GenerationClient {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
    calibration: ConfidenceCalibration,
    metrics: FlowMetrics,
}

impl std::fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationClient")
            .field("model_id", &self.generator.model_id())
            .field("timeout", &self.timeout)
            .field("calibration", &self.calibration)
            .finish_non_exhaustive()
    }
}

impl GenerationClient {
    /// Creates a client with calibration disabled.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration) -> Self {
        Self {
            generator,
            timeout,
            calibration: ConfidenceCalibration::disabled(),
            metrics: FlowMetrics::new(),
        }
    }

    /// Sets the confidence calibration.
    #[must_use]
    pub fn with_calibration(mut self, calibration: ConfidenceCalibration) -> Self {
        self.calibration = calibration;
        self
    }

    /// Returns the generator's model identifier.
    #[must_use]
    pub fn model_id(&self) -> &str {
        self.generator.model_id()
    }

    /// Generates a `pending` forecast for `request`.
    ///
    /// Makes exactly one call to the generator.
    ///
    /// # Errors
    ///
    /// - [`Error::Transient`] if the call fails or exceeds the timeout
    /// - [`Error::Validation`] if the output violates the response contract
    #[tracing::instrument(skip(self, request, now), fields(event_id = %request.event().id))]
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<ForecastRecord> {
        let prompt = Prompt::render(request);
        let started = Instant::now();
        let raw = match tokio::time::timeout(self.timeout, self.generator.complete(&prompt)).await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                self.metrics
                    .observe_generation_duration("error", started.elapsed());
                return Err(match err {
                    Error::Validation { .. } => err,
                    other => Error::transient(format!("generation call failed: {other}")),
                });
            }
            Err(_) => {
                self.metrics
                    .observe_generation_duration("timeout", started.elapsed());
                warn!(timeout = ?self.timeout, "generation timed out");
                return Err(Error::transient(format!(
                    "generation timed out after {:?}",
                    self.timeout
                )));
            }
        };
        self.metrics
            .observe_generation_duration("ok", started.elapsed());

        let output = parse_output(&raw).inspect_err(|err| {
            debug!(error = %err, "generation output rejected");
        })?;
        Ok(ForecastRecord {
            event_id: request.event().id.clone(),
            outcome: output.outcome,
            confidence: self.calibration.apply(output.confidence),
            raw_confidence: output.confidence,
            rationale: output.rationale,
            model_id: self.generator.model_id().to_string(),
            snapshot_version: request.snapshot_version(),
            attempt,
            context_gaps: request.gaps().to_vec(),
            created_at: now,
            status: ForecastStatus::Pending,
        })
    }
}
