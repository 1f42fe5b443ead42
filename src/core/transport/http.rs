use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::debug;

use super::{ByteStream, Transport};
use crate::api::format_api_error;
use crate::core::config::handle::ActiveConfig;
use crate::core::config::io::ConfigError;
use crate::core::error::CompletionError;
use crate::core::request::CompletionRequest;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends requests to an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, CompletionError> {
        let client = build_client()?;
        Ok(Self::with_client(client, url, api_key))
    }

    pub fn with_client(
        client: reqwest::Client,
        url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    /// Build a transport for the active environment's endpoint.
    pub fn from_config(config: &ActiveConfig) -> Result<Self, ConfigError> {
        let endpoint = config.endpoint();
        let api_key = endpoint.api_key.ok_or(ConfigError::MissingApiKey {
            environment: config.environment(),
        })?;
        let client = build_client().map_err(ConfigError::HttpClient)?;
        Ok(Self::with_client(client, endpoint.api_url, api_key))
    }
}

fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("quill/", env!("CARGO_PKG_VERSION")))
        .build()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dispatch(&self, request: &CompletionRequest) -> Result<ByteStream, CompletionError> {
        debug!(
            url = %self.url,
            model = %request.payload().model,
            stream = request.is_stream(),
            "Dispatching completion request"
        );

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request.payload())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(classify_status(status, retry_after, &body));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(CompletionError::from));
        Ok(Box::pin(body))
    }
}

pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> CompletionError {
    let message = format_api_error(body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        CompletionError::RateLimited {
            retry_after,
            message,
        }
    } else if status.is_server_error() {
        CompletionError::Server {
            status: status.as_u16(),
            message,
        }
    } else {
        CompletionError::InvalidResponse(format!("HTTP {}: {message}", status.as_u16()))
    }
}

/// Only the delta-seconds form is honoured; HTTP dates are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
