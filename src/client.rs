use reqwest::StatusCode;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

use crate::retry::{RetryPolicy, retry_if};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Please tell me a concept for your shared future story (e.g., 'Our 50th anniversary').")]
    EmptyConcept,

    #[error("{message}")]
    Proxy { status: StatusCode, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Could not generate a story. Upstream returned an unexpected response.")]
    UnexpectedResponse,
}

impl ClientError {
    // Bad input, wrong method and rate limiting won't get better by retrying
    // right away.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Proxy { status, .. } => !matches!(
                *status,
                StatusCode::BAD_REQUEST | StatusCode::METHOD_NOT_ALLOWED | StatusCode::TOO_MANY_REQUESTS
            ),
            ClientError::Transport(_) => true,
            ClientError::EmptyConcept | ClientError::UnexpectedResponse => false,
        }
    }
}

pub fn future_memory_prompt(concept: &str) -> String {
    format!(
        "Write a romantic 'future memory' based on this concept of the couple's shared future: \"{}\".",
        concept
    )
}

// plain generateContent shape, or the same wrapped in `result`
pub fn extract_story(body: &Value) -> Option<String> {
    let candidates = [
        body.pointer("/result/candidates/0/content/parts/0/text"),
        body.pointer("/candidates/0/content/parts/0/text"),
        body.pointer("/candidates/0/content/text"),
    ];

    let text = candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|text| !text.is_empty());

    if let Some(text) = text {
        return Some(text.trim().to_string());
    }

    // last resort: show the start of whatever `result` holds
    body.get("result")
        .filter(|result| !result.is_null())
        .map(|result| result.to_string().chars().take(200).collect())
}

pub struct DreamClient {
    client: reqwest::Client,
    endpoint: String,
    policy: RetryPolicy,
}

impl DreamClient {
    pub fn new(base_url: &str, timeout: Duration, policy: RetryPolicy) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/dream", base_url.trim_end_matches('/')),
            policy,
        })
    }

    pub async fn dream(&self, concept: &str) -> Result<String, ClientError> {
        let concept = concept.trim();
        if concept.is_empty() {
            return Err(ClientError::EmptyConcept);
        }

        let prompt = future_memory_prompt(concept);
        let body = retry_if(self.policy, ClientError::is_retryable, || self.post(&prompt)).await?;

        extract_story(&body).ok_or(ClientError::UnexpectedResponse)
    }

    async fn post(&self, prompt: &str) -> Result<Value, ClientError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.json::<Value>().await.unwrap_or(Value::Null);
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Server error {}", status.as_u16()));
            return Err(ClientError::Proxy { status, message });
        }

        Ok(response.json::<Value>().await?)
    }
}
