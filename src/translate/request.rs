//! Translate OpenAI Chat Completions requests into Cohere chat requests.
//!
//! Cohere takes a single `message` plus a `chat_history` and a separate `preamble`,
//! so the turn list is split: system turns become the preamble, the last user turn
//! becomes the prompt, and everything else keeps its order in the history.

use super::cohere_types::{ChatHistoryEntry, CohereChatRequest, Speaker};
use super::openai_types::{ChatCompletionRequest, ChatTurn, Role};
use crate::config::{ProxyConfig, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use crate::error::{ProxyError, Result};

/// Generation options with defaults already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub model: String,
    pub max_tokens: Option<u64>,
    pub temperature: f64,
    pub stream: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: None,
            temperature: DEFAULT_TEMPERATURE,
            stream: false,
        }
    }
}

impl RequestOptions {
    /// Resolve options for an inbound request: alias-mapped model, configured defaults.
    /// `max_tokens` stays unset when the caller did not send one.
    pub fn from_request(req: &ChatCompletionRequest, config: &ProxyConfig) -> Self {
        Self {
            model: config.resolve_model(req.model.as_deref()),
            max_tokens: req.max_tokens,
            temperature: req.temperature.unwrap_or(config.defaults.temperature),
            stream: req.is_stream(),
        }
    }
}

/// Translate a turn list into a Cohere chat request.
/// Pure function. Fails with [`ProxyError::MissingPrompt`] when there is no user turn.
pub fn translate_request(turns: &[ChatTurn], options: &RequestOptions) -> Result<CohereChatRequest> {
    let prompt_index = turns
        .iter()
        .rposition(|t| t.role == Role::User)
        .ok_or(ProxyError::MissingPrompt)?;

    let preamble = turns
        .iter()
        .filter(|t| t.role == Role::System)
        .map(ChatTurn::text)
        .collect::<Vec<_>>()
        .join("\n");

    let chat_history = turns
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != prompt_index)
        .filter_map(|(_, turn)| {
            let speaker = match turn.role {
                Role::User => Speaker::User,
                Role::Assistant => Speaker::Bot,
                Role::System => return None,
            };
            Some(ChatHistoryEntry::new(speaker, turn.text()))
        })
        .collect();

    Ok(CohereChatRequest {
        message: turns[prompt_index].text(),
        chat_history,
        preamble: (!preamble.is_empty()).then_some(preamble),
        model: options.model.clone(),
        max_tokens: options.max_tokens,
        temperature: options.temperature,
        stream: options.stream,
    })
}
