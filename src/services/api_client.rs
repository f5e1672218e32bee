use crate::error::{ChatError, Result};
use crate::models::{ChatRequest, ChatResponse, HealthStatus, History, HistoryEnvelope, StatsWire, UserStats};
use crate::services::config_service::{with_trailing_slash, EffectiveConfig, INIT_DATA_ENV};
use crate::services::middleware::{
    init_data_user_id, EnvInitData, ErrorClassifier, InitDataSource, Pipeline, StaticInitData,
};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The four calls the chat front-end makes against the API.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse>;
    async fn get_history(&self) -> Result<History>;
    async fn get_stats(&self) -> Result<UserStats>;
    async fn health_check(&self) -> Result<HealthStatus>;
}

/// Error body the API returns on failures
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the chat API
pub struct ApiClient {
    client: Client,
    base_url: url::Url,
    timeout: Duration,
    pipeline: Pipeline,
    identity: Arc<dyn InitDataSource>,
}

impl ApiClient {
    /// Create a client rooted at `base_url`. Every request passes through `pipeline`.
    pub fn new(
        mut base_url: url::Url,
        timeout: Duration,
        identity: Arc<dyn InitDataSource>,
        pipeline: Pipeline,
    ) -> Result<Self> {
        with_trailing_slash(&mut base_url);

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Transport {
                status: None,
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            timeout,
            pipeline,
            identity,
        })
    }

    /// Create a client from the app's configuration with the standard pipeline
    pub fn from_config(config: &EffectiveConfig, classifier: ErrorClassifier) -> Result<Self> {
        let identity: Arc<dyn InitDataSource> = match &config.init_data {
            Some(init_data) => Arc::new(StaticInitData(Some(init_data.clone()))),
            None => Arc::new(EnvInitData::new(INIT_DATA_ENV)),
        };
        let pipeline = Pipeline::standard(identity.clone(), classifier);

        Self::new(
            config.api_base_url.clone(),
            config.request_timeout,
            identity,
            pipeline,
        )
    }

    pub fn base_url(&self) -> &url::Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.base_url.join(path).map_err(|e| ChatError::Transport {
            status: None,
            message: format!("Invalid endpoint {}: {}", path, e),
        })
    }

    /// Run a request through the pipeline and decode a JSON body.
    /// Every failure is passed through the response hooks.
    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        self.execute_raw(builder)
            .await
            .map_err(|e| self.pipeline.apply_failure(e))
    }

    async fn execute_raw<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let mut request = builder.build().map_err(|e| self.map_reqwest(e))?;
        self.pipeline.apply_request(&mut request);

        let method = request.method().clone();
        let path = request.url().path().to_string();
        let started = Instant::now();

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| self.map_reqwest(e))?;

        let status = response.status();
        tracing::debug!(
            %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "API request completed"
        );

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatError::Transport {
                status: Some(status.as_u16()),
                message: error_message(status, &error_text),
            });
        }

        response.json::<T>().await.map_err(|e| self.map_reqwest(e))
    }

    fn map_reqwest(&self, e: reqwest::Error) -> ChatError {
        if e.is_timeout() {
            tracing::warn!(timeout_secs = self.timeout.as_secs(), "API request timed out");
            ChatError::Timeout(self.timeout)
        } else {
            ChatError::Transport {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = self.endpoint("chat")?;
        self.execute(self.client.post(url).json(request)).await
    }

    async fn get_history(&self) -> Result<History> {
        let url = self.endpoint("history")?;
        let envelope: HistoryEnvelope = self.execute(self.client.get(url)).await?;
        Ok(envelope.into())
    }

    async fn get_stats(&self) -> Result<UserStats> {
        let url = self.endpoint("stats")?;
        let wire: StatsWire = self.execute(self.client.get(url)).await?;
        let user_id = self
            .identity
            .init_data()
            .as_deref()
            .and_then(init_data_user_id);
        Ok(wire.into_stats(user_id))
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let url = self.endpoint("health")?;
        self.execute(self.client.get(url)).await
    }
}

/// Prefer the API's `{"error": ...}` message, then the raw body, then the reason phrase
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.error;
    }
    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("Unknown error")
        .to_string()
}
