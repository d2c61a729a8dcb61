//! Messages request construction and response header helpers.

use base64::Engine;
use commission_core::provider::LlmRequest;
use reqwest::header::HeaderMap;
use std::time::Duration;

use crate::types::{ClaudeConfig, ContentBlock, DocumentSource, Message, MessagesRequest};

/// Builds the Messages body for one extraction request: the PDF first, then the prompt.
#[must_use]
pub fn build_request(request: &LlmRequest, config: &ClaudeConfig) -> MessagesRequest {
    let data = base64::engine::general_purpose::STANDARD.encode(&request.document);
    MessagesRequest {
        model: request.model.clone(),
        max_tokens: request.max_output_tokens,
        messages: vec![Message {
            role: "user",
            content: vec![
                ContentBlock::Document {
                    source: DocumentSource::Base64 {
                        media_type: "application/pdf",
                        data,
                    },
                },
                ContentBlock::Text {
                    text: request.prompt.clone(),
                },
            ],
        }],
        temperature: config.temperature,
    }
}

/// Reads `retry-after` (whole seconds) from a response.
#[must_use]
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use commission_core::types::PageRange;
    use reqwest::header::HeaderValue;

    fn request() -> LlmRequest {
        LlmRequest {
            model: "claude-sonnet-4-5".to_string(),
            prompt: "Extract every table.".to_string(),
            document: b"%PDF-1.7".to_vec(),
            page_range: PageRange::new(0, 3),
            max_output_tokens: 8_000,
        }
    }

    #[test]
    fn test_document_block_precedes_prompt() {
        let body = build_request(&request(), &ClaudeConfig::new("k"));
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "claude-sonnet-4-5");
        assert_eq!(json["max_tokens"], 8_000);
        assert_eq!(json["temperature"], 0.0);
        let content = &json["messages"][0]["content"];
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(content[0]["type"], "document");
        assert_eq!(content[0]["source"]["type"], "base64");
        assert_eq!(content[0]["source"]["media_type"], "application/pdf");
        assert_eq!(content[0]["source"]["data"], "JVBERi0xLjc=");
        assert_eq!(content[1]["type"], "text");
        assert_eq!(content[1]["text"], "Extract every table.");
    }

    #[test]
    fn test_temperature_omitted_when_unset() {
        let mut config = ClaudeConfig::new("k");
        config.temperature = None;
        let json = serde_json::to_value(build_request(&request(), &config)).unwrap();
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static("17"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(17)));
        headers.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }
}
