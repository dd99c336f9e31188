//! The narrative-generation capability.
//!
//! Every agent talks to the language model through one shape: a persona, a
//! prompt and a response schema go in, a JSON value comes out. Agents never
//! work with that raw value directly; [`request`] deserializes it into a typed
//! [`Payload`] and validates it.

use async_trait::async_trait;
use deepseek::{DeepSeek, FinishReason, Message, Request};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from the narrative-generation capability.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NarrativeError {
    /// The backend could not be reached or answered with a non-2xx status.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The answer did not conform to the requested schema.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<deepseek::Error> for NarrativeError {
    fn from(err: deepseek::Error) -> Self {
        NarrativeError::Transport(err.to_string())
    }
}

/// A type that can describe its own JSON shape.
///
/// Usually derived with `#[derive(Schema)]`.
pub trait ResponseSchema {
    fn schema_name() -> &'static str;
    fn response_schema() -> Value;
}

/// A typed response from the capability.
pub trait Payload: ResponseSchema + DeserializeOwned {
    /// Semantic checks beyond what deserialization enforces.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Name and system prompt of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentPersona {
    pub name: &'static str,
    pub system_prompt: &'static str,
}

impl AgentPersona {
    pub const fn new(name: &'static str, system_prompt: &'static str) -> Self {
        Self { name, system_prompt }
    }
}

/// One call to the capability.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeRequest {
    /// Persona name, e.g. `consequence-engine`.
    pub agent: String,
    pub system_prompt: String,
    pub prompt: String,
    pub schema: Value,
}

impl NarrativeRequest {
    pub fn new(persona: &AgentPersona, prompt: impl Into<String>, schema: Value) -> Self {
        Self {
            agent: persona.name.to_string(),
            system_prompt: persona.system_prompt.to_string(),
            prompt: prompt.into(),
            schema,
        }
    }
}

/// Given a prompt and a schema, return a JSON value conforming to that schema.
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn generate(&self, request: &NarrativeRequest) -> Result<Value, NarrativeError>;
}

/// Ask `narrator` for a `T`, then deserialize and validate the answer.
pub async fn request<T: Payload>(
    narrator: &dyn Narrator,
    persona: &AgentPersona,
    prompt: impl Into<String>,
) -> Result<T, NarrativeError> {
    let request = NarrativeRequest::new(persona, prompt, T::response_schema());
    debug!(agent = persona.name, schema = T::schema_name(), "Requesting narrative payload");

    let value = narrator.generate(&request).await?;
    let payload: T = serde_json::from_value(value).map_err(|e| {
        NarrativeError::Validation(format!(
            "{} response does not match {}: {e}",
            persona.name,
            T::schema_name()
        ))
    })?;
    payload
        .validate()
        .map_err(|reason| NarrativeError::Validation(format!("{}: {reason}", T::schema_name())))?;
    Ok(payload)
}

/// Check that a value lies in [0, 1].
pub fn unit_interval(field: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{field} must be within [0, 1], got {value}"))
    }
}

/// Check that a property path is non-empty and has no empty segments.
pub fn property_path(field: &str, path: &str) -> Result<(), String> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        Err(format!("{field} is not a valid property path: '{path}'"))
    } else {
        Ok(())
    }
}

/// [`Narrator`] backed by the DeepSeek chat-completions API.
#[derive(Debug)]
pub struct DeepseekNarrator {
    client: DeepSeek,
}

impl DeepseekNarrator {
    pub fn new(client: DeepSeek) -> Self {
        Self { client }
    }

    /// Build from `DEEPSEEK_API_KEY` (and optional overrides).
    pub fn from_env() -> Result<Self, deepseek::Error> {
        Ok(Self::new(DeepSeek::from_env()?))
    }
}

fn build_request(request: &NarrativeRequest) -> Request {
    let messages = vec![
        Message::system(request.system_prompt.clone()),
        Message::user(request.prompt.clone()),
        Message::system(format!(
            "Respond with valid JSON matching this schema: {}",
            request.schema
        )),
    ];
    Request::new(messages).json_object()
}

#[async_trait]
impl Narrator for DeepseekNarrator {
    async fn generate(&self, request: &NarrativeRequest) -> Result<Value, NarrativeError> {
        let response = self.client.complete(build_request(request)).await?;
        if response.finish_reason == FinishReason::Length {
            warn!(agent = %request.agent, "Response truncated at max tokens");
        }
        serde_json::from_str(&response.content).map_err(|e| {
            NarrativeError::Validation(format!("{} returned invalid JSON: {e}", request.agent))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Schema;
    use serde::Deserialize;
    use serde_json::json;

    /// A single omen.
    #[derive(Debug, Schema, Deserialize)]
    struct Omen {
        /// What is seen
        sign: String,
        /// How strongly it presses on the world
        weight: f64,
        #[schema(rename = "tags")]
        #[serde(rename = "tags")]
        labels: Vec<String>,
        note: Option<String>,
    }

    impl Payload for Omen {
        fn validate(&self) -> Result<(), String> {
            unit_interval("weight", self.weight)
        }
    }

    struct Canned(Value);

    #[async_trait]
    impl Narrator for Canned {
        async fn generate(&self, _request: &NarrativeRequest) -> Result<Value, NarrativeError> {
            Ok(self.0.clone())
        }
    }

    const SEER: AgentPersona = AgentPersona::new("seer", "You read omens.");

    #[test]
    fn test_schema_derive() {
        assert_eq!(Omen::schema_name(), "omen");
        let schema = Omen::response_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["description"], "A single omen.");
        assert_eq!(schema["properties"]["sign"]["type"], "string");
        assert_eq!(schema["properties"]["sign"]["description"], "What is seen");
        assert_eq!(schema["properties"]["weight"]["type"], "number");
        assert_eq!(schema["properties"]["tags"]["type"], "array");
        assert_eq!(schema["properties"]["tags"]["items"]["type"], "string");

        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "sign"));
        assert!(required.iter().any(|v| v == "tags"));
        assert!(!required.iter().any(|v| v == "note"));
    }

    #[tokio::test]
    async fn test_request_parses_payload() {
        let narrator = Canned(json!({"sign": "red moon", "weight": 0.4, "tags": ["sky"]}));
        let omen: Omen = request(&narrator, &SEER, "What do you see?").await.unwrap();
        assert_eq!(omen.sign, "red moon");
        assert_eq!(omen.labels, vec!["sky"]);
        assert!(omen.note.is_none());
    }

    #[tokio::test]
    async fn test_request_rejects_wrong_shape() {
        let narrator = Canned(json!({"sign": 3}));
        let err = request::<Omen>(&narrator, &SEER, "?").await.unwrap_err();
        assert!(matches!(err, NarrativeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_request_runs_validation() {
        let narrator = Canned(json!({"sign": "comet", "weight": 4.0, "tags": []}));
        let err = request::<Omen>(&narrator, &SEER, "?").await.unwrap_err();
        match err {
            NarrativeError::Validation(message) => assert!(message.contains("weight")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_build_request_messages() {
        let request = NarrativeRequest::new(&SEER, "Look up", json!({"type": "object"}));
        let api = build_request(&request);
        assert_eq!(api.messages.len(), 3);
        assert_eq!(api.messages[0], Message::system("You read omens."));
        assert_eq!(api.messages[1], Message::user("Look up"));
        assert!(api.messages[2].content.starts_with("Respond with valid JSON matching this schema:"));
        assert_eq!(api.response_format, Some(deepseek::ResponseFormat::JsonObject));
    }

    #[test]
    fn test_validators() {
        assert!(unit_interval("p", 0.0).is_ok());
        assert!(unit_interval("p", 1.0).is_ok());
        assert!(unit_interval("p", -0.1).is_err());
        assert!(unit_interval("p", f64::NAN).is_err());
        assert!(property_path("path", "a.b").is_ok());
        assert!(property_path("path", "").is_err());
        assert!(property_path("path", "a..b").is_err());
    }

    #[test]
    fn test_transport_error_from_client() {
        let err: NarrativeError = deepseek::Error::NoApiKey.into();
        assert!(matches!(err, NarrativeError::Transport(_)));
    }
}
