//! Stream event types.
//!
//! One [`StreamEvent`] is parsed from each `data: ` frame. The shape follows
//! the OpenAI-compatible `chat.completion.chunk` convention, but every field
//! is optional: any JSON object is a valid event, and an event without delta
//! text is a no-op for consumers rather than an error.
//!
//! Fields are read independently. A field with an unexpected type is treated
//! as absent and never hides the text or the error carried by the others.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

/// Application-level payload of one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamEvent {
    /// Response ID.
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub id: Option<String>,
    /// Object type, e.g. `chat.completion.chunk`.
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub object: Option<String>,
    /// Creation timestamp.
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub created: Option<u64>,
    /// Model used.
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub model: Option<String>,
    /// Choices, in order.
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "lenient_choices")]
    pub choices: Vec<Choice>,
    /// Flat content field used by some backends instead of `choices`.
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub content: Option<String>,
    /// In-band error reported after the response had started.
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_error")]
    pub error: Option<ErrorPayload>,
    /// Any other fields.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// One choice entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Choice {
    /// Choice index.
    #[serde(deserialize_with = "lenient_index")]
    pub index: u32,
    /// Delta for this chunk.
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub delta: Option<Delta>,
    /// Finish reason, set on the last chunk of a choice.
    #[serde(deserialize_with = "lenient")]
    pub finish_reason: Option<String>,
}

/// Incremental message content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delta {
    /// Role (usually only in the first chunk).
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub role: Option<String>,
    /// Text fragment.
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub content: Option<String>,
}

/// Structured error body, as sent by the chat backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPayload {
    /// Human-readable message.
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub message: Option<String>,
    /// Machine-readable code, e.g. `LLM_TIMEOUT` or `429`.
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub code: Option<String>,
    /// HTTP-like status.
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub status: Option<u16>,
    /// Free-form detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<JsonValue>,
}

impl ErrorPayload {
    /// Best human-readable description: the message, then a string detail.
    pub fn display_message(&self) -> Option<&str> {
        non_empty(self.message.as_deref())
            .or_else(|| non_empty(self.detail.as_ref().and_then(JsonValue::as_str)))
    }
}

impl StreamEvent {
    /// Create an event carrying a single text delta.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                index: 0,
                delta: Some(Delta {
                    role: None,
                    content: Some(content.into()),
                }),
                finish_reason: None,
            }],
            ..Self::default()
        }
    }

    /// Parse a frame payload.
    ///
    /// Malformed JSON is an error. Well-formed JSON that does not have the
    /// expected shape (not an object, or fields of the wrong type) becomes an
    /// empty event.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        let value: JsonValue = serde_json::from_str(payload)?;
        Ok(Self::from_value(value))
    }

    /// Build an event from an already-parsed JSON value.
    pub fn from_value(value: JsonValue) -> Self {
        serde_json::from_value(value).unwrap_or_else(|err| {
            debug!(error = %err, "SSE payload has unexpected shape; treating as empty event");
            Self::default()
        })
    }

    /// Delta text carried by this event, if any.
    ///
    /// Reads `choices[0].delta.content`, falling back to the flat `content`
    /// field. Empty strings count as absent.
    pub fn delta_text(&self) -> Option<&str> {
        let from_choice = self
            .choices
            .first()
            .and_then(|choice| choice.delta.as_ref())
            .and_then(|delta| delta.content.as_deref());

        non_empty(from_choice).or_else(|| non_empty(self.content.as_deref()))
    }

    /// Finish reason of the first choice.
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.finish_reason.as_deref())
    }

    /// Message of an in-band error, if this event reports one.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().and_then(ErrorPayload::display_message)
    }

    /// Check if this event reports an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|text| !text.is_empty())
}

/// Deserialize a field, mapping a type mismatch to `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Like [`lenient`], but numbers are kept as their decimal text.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::String(text) => Some(text),
        JsonValue::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn lenient_index<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient(deserializer)?.unwrap_or_default())
}

/// A non-array becomes no choices; a malformed entry becomes an empty choice
/// so positions are kept.
fn lenient_choices<'de, D>(deserializer: D) -> Result<Vec<Choice>, D::Error>
where
    D: Deserializer<'de>,
{
    let JsonValue::Array(entries) = JsonValue::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .map(|entry| serde_json::from_value(entry).unwrap_or_default())
        .collect())
}

/// An error given as a bare string is taken as its message.
fn lenient_error<'de, D>(deserializer: D) -> Result<Option<ErrorPayload>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => None,
        JsonValue::String(message) => Some(ErrorPayload {
            message: Some(message),
            ..ErrorPayload::default()
        }),
        value => serde_json::from_value(value).ok(),
    })
}
