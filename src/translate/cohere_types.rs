//! Type definitions for the [Cohere Chat API](https://docs.cohere.com/reference/chat).
//!
//! The request we send upstream, the single-shot response, and the records of the
//! line-delimited stream returned when `stream: true`.

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Request types (what we send TO Cohere)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohereChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chat_history: Vec<ChatHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamble: Option<String>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    pub temperature: f64,
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistoryEntry {
    pub role: Speaker,
    pub message: String,
}

impl ChatHistoryEntry {
    pub fn new(role: Speaker, message: impl Into<String>) -> Self {
        Self {
            role,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "CHATBOT")]
    Bot,
}

// ---------------------------------------------------------------------------
// Response types (what Cohere sends back)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CohereChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<CohereMeta>,
    /// Some deployments report billing at the top level instead of under `meta`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billed_units: Option<BilledUnits>,
}

impl CohereChatResponse {
    pub fn billed_units(&self) -> Option<&BilledUnits> {
        self.meta
            .as_ref()
            .and_then(|m| m.billed_units.as_ref())
            .or(self.billed_units.as_ref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CohereMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billed_units: Option<BilledUnits>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BilledUnits {
    #[serde(default, deserialize_with = "token_count")]
    pub input_tokens: u64,
    #[serde(default, deserialize_with = "token_count")]
    pub output_tokens: u64,
}

/// Cohere reports token counts as JSON numbers that are sometimes floats (`5.0`).
fn token_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(value
        .and_then(|n| {
            n.as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
        })
        .unwrap_or(0))
}

// ---------------------------------------------------------------------------
// Streaming record types
// ---------------------------------------------------------------------------

/// One record of the upstream event stream (`stream-start`, `text-generation`,
/// `stream-end`, ...). Unknown kinds decode fine and are ignored downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CohereStreamEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub is_finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CohereChatResponse>,
}

impl CohereStreamEvent {
    pub fn is_terminal(&self) -> bool {
        self.is_finished || self.event_type.as_deref() == Some("stream-end")
    }

    pub fn billed_units(&self) -> Option<&BilledUnits> {
        self.response.as_ref().and_then(CohereChatResponse::billed_units)
    }

    /// Finish reason of a terminal record, which Cohere may place on the record or its `response`.
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref().or_else(|| {
            self.response
                .as_ref()
                .and_then(|r| r.finish_reason.as_deref())
        })
    }
}
