//! Executes pending generation records against a [`ModelRunner`] and
//! turns the result into a fulfillment message for the room.
//!
//! Retry policy is per model kind:
//! - chat completions with a schema: one retry when the reply fails the
//!   shape check (temperature makes a second attempt worthwhile);
//! - image diffusion: one retry on a transient provider error;
//! - everything else: single shot.
//!
//! A dispatch ALWAYS produces a fulfillment — on terminal failure the
//! fulfillment carries the error. An unfulfilled record would leave a
//! room waiting forever, which is the one outcome this module may never
//! produce.

use std::sync::Arc;

use parlor_engine::{GenerationRecord, ModelConfig};

use crate::runner::{
    ChatCompletionRequest, ImageRequest, ModelRunner, RunnerError, TextCompletionRequest,
};

/// The completed result of one dispatched generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Fulfillment {
    /// The generation key from the effect (a player id or `"engine"`).
    pub key: String,
    pub generation: serde_json::Value,
    pub error: Option<String>,
}

impl Fulfillment {
    /// The wire payload every engine accepts as `GenerationResult`.
    pub fn into_message(self) -> serde_json::Value {
        serde_json::json!({
            "type": "GenerationResult",
            "key": self.key,
            "generation": self.generation,
            "error": self.error,
        })
    }
}

/// Runs generation requests against a shared runner.
#[derive(Clone)]
pub struct Dispatcher {
    runner: Arc<dyn ModelRunner>,
}

impl Dispatcher {
    pub fn new(runner: Arc<dyn ModelRunner>) -> Self {
        Self { runner }
    }

    /// Executes one pending record to completion.
    pub async fn dispatch(&self, key: &str, record: &GenerationRecord) -> Fulfillment {
        let outcome = match &record.model {
            ModelConfig::TextCompletion {
                model,
                temperature,
                max_tokens,
                stop,
            } => self
                .runner
                .text_completion(TextCompletionRequest {
                    model: model.clone(),
                    prompt: record.prompt.clone(),
                    temperature: *temperature,
                    max_tokens: *max_tokens,
                    stop: stop.clone(),
                })
                .await
                .map(serde_json::Value::String),

            ModelConfig::ChatCompletion {
                model,
                temperature,
                schema,
            } => {
                self.chat_with_schema_retry(ChatCompletionRequest {
                    model: model.clone(),
                    prompt: record.prompt.clone(),
                    temperature: *temperature,
                    schema: schema.clone(),
                })
                .await
            }

            ModelConfig::ImageDiffusion {
                model,
                steps,
                guidance,
            } => {
                self.image_with_provider_retry(ImageRequest {
                    model: model.clone(),
                    prompt: record.prompt.clone(),
                    steps: Some(*steps),
                    guidance: Some(*guidance),
                })
                .await
                .map(serde_json::Value::String)
            }

            ModelConfig::ImageDirect { model } => self
                .runner
                .image_direct(ImageRequest {
                    model: model.clone(),
                    prompt: record.prompt.clone(),
                    steps: None,
                    guidance: None,
                })
                .await
                .map(serde_json::Value::String),
        };

        match outcome {
            Ok(generation) => Fulfillment {
                key: key.to_string(),
                generation,
                error: None,
            },
            Err(err) => {
                tracing::warn!(key, error = %err, "generation failed terminally");
                Fulfillment {
                    key: key.to_string(),
                    generation: serde_json::Value::Null,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn chat_with_schema_retry(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<serde_json::Value, RunnerError> {
        let first = self.runner.chat_completion(req.clone()).await?;
        let Some(schema) = req.schema.clone() else {
            return Ok(first);
        };
        if validates(&schema, &first) {
            return Ok(first);
        }
        tracing::debug!(model = req.model, "chat reply failed schema check, retrying once");
        let second = self.runner.chat_completion(req).await?;
        if validates(&schema, &second) {
            Ok(second)
        } else {
            Err(RunnerError::InvalidResponse(
                "reply did not match the response schema after retry".to_string(),
            ))
        }
    }

    async fn image_with_provider_retry(&self, req: ImageRequest) -> Result<String, RunnerError> {
        match self.runner.image_diffusion(req.clone()).await {
            Ok(url) => Ok(url),
            // Content filtering is deterministic; only provider faults
            // are worth a second attempt.
            Err(RunnerError::Provider(msg)) => {
                tracing::debug!(model = req.model, error = msg, "diffusion failed, retrying once");
                self.runner.image_diffusion(req).await
            }
            Err(other) => Err(other),
        }
    }
}

/// Checks a reply against a `{field: "number" | "string" | "boolean"}`
/// schema map. Extra fields in the reply are tolerated.
fn validates(schema: &serde_json::Value, reply: &serde_json::Value) -> bool {
    let Some(fields) = schema.as_object() else {
        return true;
    };
    let Some(obj) = reply.as_object() else {
        return false;
    };
    fields.iter().all(|(name, ty)| {
        let Some(value) = obj.get(name) else {
            return false;
        };
        match ty.as_str() {
            Some("number") => value.is_number(),
            Some("string") => value.is_string(),
            Some("boolean") => value.is_boolean(),
            _ => true,
        }
    })
}

// =========================================================================
// Tests
// =========================================================================
