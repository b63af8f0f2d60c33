use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::translate::cohere_types::{CohereChatRequest, CohereChatResponse};
use crate::translate::openai_types::{ChatCompletionRequest, ChatCompletionResponse};
use crate::translate::request::{translate_request, RequestOptions};
use crate::translate::response::{translate_document, upstream_error_message};
use crate::translate::streaming::{StreamOutput, StreamTranslator};
use crate::translate::truncate;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use tracing::{info, warn};

/// Translated stream outputs for one streaming request.
/// An `Err` item is the last item; the stream ends right after it.
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<StreamOutput>> + Send>>;

/// Forward a non-streaming request to Cohere and translate the reply.
pub async fn proxy_non_streaming(
    req: &ChatCompletionRequest,
    api_key: &str,
    config: &ProxyConfig,
    client: &reqwest::Client,
) -> Result<ChatCompletionResponse> {
    let options = RequestOptions {
        stream: false,
        ..RequestOptions::from_request(req, config)
    };
    let cohere_req = translate_request(&req.messages, &options)?;

    let response = send_upstream(&cohere_req, api_key, config, client).await?;
    let body = response.text().await?;

    let cohere_resp: CohereChatResponse = serde_json::from_str(&body).map_err(|e| {
        ProxyError::translation(format!(
            "Failed to parse upstream response: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;

    let resp = translate_document(&cohere_resp, &requested_model(req, config));

    info!(
        prompt_tokens = resp.usage.prompt_tokens,
        completion_tokens = resp.usage.completion_tokens,
        "Completed"
    );

    Ok(resp)
}

/// Forward a streaming request to Cohere, returning the translated outputs as they arrive.
///
/// Errors returned here happen before any byte was streamed back, so the caller can
/// still answer with a regular error response.
pub async fn proxy_streaming(
    req: &ChatCompletionRequest,
    api_key: &str,
    config: &ProxyConfig,
    client: &reqwest::Client,
) -> Result<OutputStream> {
    let options = RequestOptions {
        stream: true,
        ..RequestOptions::from_request(req, config)
    };
    let cohere_req = translate_request(&req.messages, &options)?;

    let response = send_upstream(&cohere_req, api_key, config, client).await?;
    let translator = StreamTranslator::new(&requested_model(req, config));

    Ok(Box::pin(translate_byte_stream(
        response.bytes_stream(),
        translator,
    )))
}

/// Drive `translator` over an upstream byte stream.
///
/// The upstream stream is owned by the returned stream: it is dropped as soon as the
/// terminal record is seen, and dropping the returned stream (client went away)
/// drops the upstream connection with it.
pub fn translate_byte_stream<S, E>(
    byte_stream: S,
    mut translator: StreamTranslator,
) -> impl Stream<Item = Result<StreamOutput>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<ProxyError> + std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut upstream = Box::pin(byte_stream);
        let mut tail = Vec::new();

        while let Some(delivery) = upstream.next().await {
            match delivery {
                Ok(bytes) => {
                    let outputs = translator.feed(&bytes);
                    if translator.is_closed() {
                        tail = outputs;
                        break;
                    }
                    for output in outputs {
                        yield Ok(output);
                    }
                }
                Err(e) => {
                    warn!(error = %e, chunks = translator.chunks_emitted(), "Upstream stream failed");
                    translator.abort();
                    let err: ProxyError = e.into();
                    yield Err(err);
                    return;
                }
            }
        }

        // Release the upstream connection before the final frames go out
        drop(upstream);

        if !translator.is_closed() {
            tail = translator.finish();
        }
        for output in tail {
            yield Ok(output);
        }

        info!(chunks = translator.chunks_emitted(), "Stream completed");
    }
}

async fn send_upstream(
    cohere_req: &CohereChatRequest,
    api_key: &str,
    config: &ProxyConfig,
    client: &reqwest::Client,
) -> Result<reqwest::Response> {
    let url = config.chat_url();

    info!(
        url = %url,
        model = %cohere_req.model,
        stream = cohere_req.stream,
        history = cohere_req.chat_history.len(),
        "POST upstream"
    );

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(cohere_req)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %truncate(&body, 500), "Upstream returned an error");

    let message = upstream_error_message(&body)
        .or_else(|| {
            let raw = truncate(body.trim(), 500);
            (!raw.is_empty()).then(|| raw.to_string())
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("no body").to_string());

    // Anything that is not a client/server error would be a confusing status to mirror
    let status = if status.is_client_error() || status.is_server_error() {
        status.as_u16()
    } else {
        502
    };

    Err(ProxyError::Upstream { status, message })
}

fn requested_model(req: &ChatCompletionRequest, config: &ProxyConfig) -> String {
    req.model
        .clone()
        .unwrap_or_else(|| config.defaults.model.clone())
}
