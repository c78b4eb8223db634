//! Machine-readable output from generation calls.
//!
//! Models asked for JSON often wrap it in a markdown code fence or surround
//! it with a sentence of prose. [`parse_json`] is the single place that
//! strips that wrapping, parses strict JSON and validates the shape against a
//! target type. Every failure is a typed [`StructuredOutputError`], so callers
//! can degrade instead of panicking.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::RequestContext;
use crate::error::ModelError;
use crate::gateway::Gateway;
use crate::types::{ChatMessage, ChatRequest};

/// Why a model's output could not be turned into the requested type.
#[derive(Debug, Error)]
pub enum StructuredOutputError {
    /// The output was empty after removing the code fence.
    #[error("model returned no content")]
    Empty,

    /// The output was not valid JSON.
    #[error("model output is not valid JSON: {0}")]
    InvalidJson(String),

    /// The output was JSON but did not match the expected shape.
    #[error("model output has an unexpected shape: {0}")]
    Shape(String),

    /// The generation call itself failed.
    #[error(transparent)]
    Generation(#[from] ModelError),
}

/// Remove a surrounding markdown code fence (```` ``` ```` or ```` ```json ````), if any.
pub fn unwrap_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    trimmed
        .strip_prefix("```")
        .and_then(|s| s.split_once('\n').map(|(_, rest)| rest))
        .map(|s| s.trim_end().strip_suffix("```").unwrap_or(s))
        .unwrap_or(trimmed)
        .trim()
}

/// Parse model output into `T`.
///
/// The code fence is removed first. If the remainder is not JSON on its own,
/// the outermost `[...]` or `{...}` span is tried, which tolerates a leading
/// or trailing sentence of prose.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, StructuredOutputError> {
    let body = unwrap_code_fence(text);
    if body.is_empty() {
        return Err(StructuredOutputError::Empty);
    }

    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => match embedded_json(body) {
            Some(span) => serde_json::from_str(span)
                .map_err(|_| StructuredOutputError::InvalidJson(err.to_string()))?,
            None => return Err(StructuredOutputError::InvalidJson(err.to_string())),
        },
    };

    serde_json::from_value(value).map_err(|e| StructuredOutputError::Shape(e.to_string()))
}

fn embedded_json(text: &str) -> Option<&str> {
    let start = text.find(['[', '{'])?;
    let close = if text[start..].starts_with('[') { ']' } else { '}' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// One field of the JSON object a [`StructuredPrompt`] asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    /// JSON key.
    pub name: String,
    /// JSON type name (`string`, `number`, `boolean`, `array`, `object`).
    pub field_type: String,
    /// What the field should contain.
    pub description: String,
    /// Whether the model must always produce the field.
    pub required: bool,
}

impl SchemaField {
    /// A required field.
    pub fn required(
        name: impl Into<String>,
        field_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            description: description.into(),
            required: true,
        }
    }

    /// An optional field.
    pub fn optional(
        name: impl Into<String>,
        field_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self { required: false, ..Self::required(name, field_type, description) }
    }
}

/// Asks a model for a JSON object with a fixed set of fields.
///
/// # Example
///
/// ```rust,ignore
/// use ragway_model::structured::{SchemaField, StructuredPrompt};
///
/// #[derive(serde::Deserialize)]
/// struct Sentiment { label: String, confidence: f64 }
///
/// let prompt = StructuredPrompt::new("Classify the sentiment of the text.")
///     .field(SchemaField::required("label", "string", "positive, negative or neutral"))
///     .field(SchemaField::required("confidence", "number", "between 0 and 1"));
///
/// let sentiment: Sentiment = prompt.generate(&gateway, &ctx, "gpt-4o-mini", text).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct StructuredPrompt {
    instruction: String,
    fields: Vec<SchemaField>,
}

impl StructuredPrompt {
    /// Start a prompt with a task instruction.
    pub fn new(instruction: impl Into<String>) -> Self {
        Self { instruction: instruction.into(), fields: Vec::new() }
    }

    /// Add a field to the expected object.
    pub fn field(mut self, field: SchemaField) -> Self {
        self.fields.push(field);
        self
    }

    /// The fields of the expected object.
    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    /// The system instruction sent with every request.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "{}\n\nRespond with ONLY a JSON object with the following fields:\n",
            self.instruction.trim()
        );
        for field in &self.fields {
            let presence = if field.required { "required" } else { "optional" };
            prompt.push_str(&format!(
                "- \"{}\" ({}, {}): {}\n",
                field.name, field.field_type, presence, field.description
            ));
        }
        prompt.push_str("Do not include any text outside the JSON object.");
        prompt
    }

    /// Run the prompt against `input` and deserialize the model's answer.
    pub async fn generate<T: DeserializeOwned>(
        &self,
        gateway: &Gateway,
        ctx: &RequestContext,
        model: &str,
        input: &str,
    ) -> Result<T, StructuredOutputError> {
        let request = ChatRequest::new(
            model,
            vec![ChatMessage::system(self.system_prompt()), ChatMessage::user(input)],
        )
        .with_temperature(0.0);

        let response = gateway.chat(ctx, request).await?;
        let value: serde_json::Value = parse_json(&response.content)?;

        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required && value.get(&f.name).is_none())
            .map(|f| f.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(StructuredOutputError::Shape(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        serde_json::from_value(value).map_err(|e| StructuredOutputError::Shape(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Score {
        index: usize,
        score: f32,
    }

    #[test]
    fn strips_language_tagged_fence() {
        let text = "```json\n[{\"index\": 0, \"score\": 0.5}]\n```";
        assert_eq!(unwrap_code_fence(text), "[{\"index\": 0, \"score\": 0.5}]");
    }

    #[test]
    fn plain_text_is_only_trimmed() {
        assert_eq!(unwrap_code_fence("  {\"a\": 1}\n"), "{\"a\": 1}");
    }

    #[test]
    fn parses_array_surrounded_by_prose() {
        let text = "Here are the scores: [{\"index\": 1, \"score\": 0.9}] Hope it helps.";
        let scores: Vec<Score> = parse_json(text).unwrap();
        assert_eq!(scores, vec![Score { index: 1, score: 0.9 }]);
    }

    #[test]
    fn distinguishes_failure_kinds() {
        assert!(matches!(parse_json::<Vec<Score>>("```\n```"), Err(StructuredOutputError::Empty)));
        assert!(matches!(
            parse_json::<Vec<Score>>("not json at all"),
            Err(StructuredOutputError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_json::<Vec<Score>>("{\"index\": 0}"),
            Err(StructuredOutputError::Shape(_))
        ));
    }

    #[test]
    fn system_prompt_lists_fields() {
        let prompt = StructuredPrompt::new("Extract the entity.")
            .field(SchemaField::required("name", "string", "entity name"))
            .field(SchemaField::optional("kind", "string", "entity kind"));
        let text = prompt.system_prompt();
        assert!(text.starts_with("Extract the entity."));
        assert!(text.contains("- \"name\" (string, required): entity name"));
        assert!(text.contains("- \"kind\" (string, optional): entity kind"));
    }
}
