use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProxyError;

// Fixed persona for every generation. Client-supplied system text is ignored.
pub const SYSTEM_INSTRUCTION: &str = "You are a poetic and deeply romantic narrator writing a short, \
future memory about the couple's imagined life together. Use a warm, sentimental tone.";

// Validated inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
}

impl GenerationRequest {
    // anything but an object with a non-empty string `prompt` is rejected
    pub fn from_body(body: &[u8]) -> Result<Self, ProxyError> {
        let value: Value = serde_json::from_slice(body).map_err(|_| ProxyError::InvalidInput)?;

        match value.get("prompt").and_then(Value::as_str) {
            Some(prompt) if !prompt.is_empty() => Ok(Self {
                prompt: prompt.to_string(),
            }),
            _ => Err(ProxyError::InvalidInput),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Content {
    pub parts: Vec<Part>,
}

// Body sent to the generateContent endpoint
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamPayload {
    pub contents: Vec<Content>,
    pub system_instruction: Content,
}

impl UpstreamPayload {
    pub fn new(request: &GenerationRequest) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            system_instruction: Content {
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTION.to_string(),
                }],
            },
        }
    }
}

// `error.message` of a failed upstream response, if it has one
pub fn upstream_error_message(body: &Value) -> Option<&str> {
    body.get("error")?.get("message")?.as_str()
}
