use reqwest::Url;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::error;

use crate::error::{ProxyError, upstream_status};
use crate::metrics::{UPSTREAM_ERRORS, UPSTREAM_LATENCY};
use crate::models::{UpstreamPayload, upstream_error_message};

// Text-generation backend: POST {base}/{model}:generateContent?key=...
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl UpstreamClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn endpoint(&self, api_key: &str) -> Result<Url, ProxyError> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        Url::parse_with_params(&url, &[("key", api_key)]).map_err(|e| {
            error!(base_url = %self.base_url, model = %self.model, "invalid upstream url: {}", e);
            ProxyError::Misconfigured
        })
    }

    // upstream body is returned untouched
    pub async fn generate(
        &self,
        api_key: &str,
        payload: &UpstreamPayload,
    ) -> Result<Value, ProxyError> {
        let url = self.endpoint(api_key)?;
        let start_time = Instant::now();

        let result = self.client.post(url).json(payload).send().await;

        let response = match result {
            Ok(res) => res,
            Err(e) => {
                UPSTREAM_ERRORS.inc();
                // without_url keeps the key out of the log
                error!("upstream request failed: {}", e.without_url());
                return Err(ProxyError::ServerError);
            }
        };

        let status = response.status();
        let body = match response.json::<Value>().await {
            Ok(body) => body,
            Err(e) => {
                UPSTREAM_ERRORS.inc();
                error!(%status, "upstream body parse error: {}", e.without_url());
                return Err(ProxyError::ServerError);
            }
        };

        UPSTREAM_LATENCY.observe(start_time.elapsed().as_secs_f64());

        if !status.is_success() {
            UPSTREAM_ERRORS.inc();
            error!(%status, body = %body, "upstream API error");
            let message = upstream_error_message(&body)
                .unwrap_or("Upstream API error")
                .to_string();
            return Err(ProxyError::Upstream {
                status: upstream_status(status.as_u16()),
                message,
                raw: body,
            });
        }

        Ok(body)
    }
}
