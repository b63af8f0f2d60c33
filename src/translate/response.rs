use super::cohere_types::{BilledUnits, CohereChatResponse};
use super::openai_types::{ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage, FinishReason};

/// Translate a Cohere chat response into an OpenAI Chat Completion response.
/// Pure function: `requested_model` is the model name the caller sent, echoed back.
pub fn translate_document(resp: &CohereChatResponse, requested_model: &str) -> ChatCompletionResponse {
    let id = resp
        .generation_id
        .clone()
        .or_else(|| resp.response_id.clone())
        .unwrap_or_else(new_completion_id);

    ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: requested_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: resp.text.clone().unwrap_or_default(),
            },
            finish_reason: Some(map_finish_reason(resp.finish_reason.as_deref())),
        }],
        // Unknown usage is reported as zeros; clients expect the field to exist
        usage: resp.billed_units().map(usage_from_billed).unwrap_or_default(),
    }
}

/// Map a Cohere finish reason to an OpenAI finish reason. Case-insensitive and total.
pub fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    let Some(reason) = reason else {
        return FinishReason::Stop;
    };

    match reason.to_ascii_uppercase().as_str() {
        "COMPLETE" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        upper @ ("ERROR" | "ERROR_TOXIC" | "ERROR_LIMIT") => {
            tracing::warn!(reason = upper, "Upstream generation ended with an error, reporting as stop");
            FinishReason::Stop
        }
        _ => FinishReason::Stop,
    }
}

pub fn usage_from_billed(billed: &BilledUnits) -> ChatUsage {
    ChatUsage::new(billed.input_tokens, billed.output_tokens)
}

/// Fresh identifier for responses the upstream did not name.
pub fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Pull a human-readable message out of an upstream error body.
/// Cohere uses `{"message": ...}`; gateways in front of it sometimes use `error`.
pub fn upstream_error_message(body: &str) -> Option<String> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;

    let message = json
        .get("message")
        .and_then(|v| v.as_str())
        .or_else(|| json.get("error").and_then(|v| v.as_str()))
        .or_else(|| {
            json.get("error")
                .and_then(|v| v.get("message"))
                .and_then(|v| v.as_str())
        })
        .map(str::trim)?;

    (!message.is_empty()).then(|| message.to_string())
}
