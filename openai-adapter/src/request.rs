//! Responses request construction and rate-limit header parsing.

use base64::Engine;
use commission_core::provider::LlmRequest;
use reqwest::header::HeaderMap;
use std::time::Duration;

use crate::types::{InputContent, InputMessage, OpenAiConfig, Reasoning, ResponsesRequest};

/// Builds the Responses body: the page subset as an `input_file`, then the prompt.
#[must_use]
pub fn build_request(request: &LlmRequest, config: &OpenAiConfig) -> ResponsesRequest {
    let encoded = base64::engine::general_purpose::STANDARD.encode(&request.document);
    let range = request.page_range;
    ResponsesRequest {
        model: request.model.clone(),
        input: vec![InputMessage {
            role: "user",
            content: vec![
                InputContent::InputFile {
                    filename: format!("pages-{}-{}.pdf", range.start + 1, range.end),
                    file_data: format!("data:application/pdf;base64,{encoded}"),
                },
                InputContent::InputText {
                    text: request.prompt.clone(),
                },
            ],
        }],
        max_output_tokens: request.max_output_tokens,
        reasoning: reasoning_for(&request.model, config),
        store: false,
    }
}

/// Only reasoning model families accept a `reasoning` block.
fn reasoning_for(model: &str, config: &OpenAiConfig) -> Option<Reasoning> {
    let is_reasoning = model.starts_with("gpt-5") || model.starts_with('o');
    config
        .reasoning_effort
        .clone()
        .filter(|_| is_reasoning)
        .map(|effort| Reasoning { effort })
}

/// Reads `retry-after-ms` or `retry-after` (seconds) from a response.
#[must_use]
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| -> Option<u64> { headers.get(name)?.to_str().ok()?.trim().parse().ok() };
    header("retry-after-ms")
        .map(Duration::from_millis)
        .or_else(|| header("retry-after").map(Duration::from_secs))
}
