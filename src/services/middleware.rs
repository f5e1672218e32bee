//! Request/response hooks composed around the API client.
//!
//! A `Pipeline` is built once per session and handed to the client. Request
//! hooks run on every outgoing request before it is sent; response hooks run
//! on every failed response before the error reaches the caller.

use crate::error::ChatError;
use reqwest::header::HeaderValue;
use reqwest::Request;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// X-Telegram-Init-Data; `HeaderName` requires the lowercase form.
pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";

pub trait RequestHook: Send + Sync {
    fn on_request(&self, request: &mut Request);
}

pub trait ResponseHook: Send + Sync {
    /// Inspect a failure. Hooks may re-tag the error but must always return one.
    fn on_failure(&self, error: ChatError) -> ChatError;
}

#[derive(Clone, Default)]
pub struct Pipeline {
    request_hooks: Vec<Arc<dyn RequestHook>>,
    response_hooks: Vec<Arc<dyn ResponseHook>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credential injection plus 401 classification
    pub fn standard(source: Arc<dyn InitDataSource>, classifier: ErrorClassifier) -> Self {
        Self::new()
            .with_request_hook(CredentialInjector::new(source))
            .with_response_hook(classifier)
    }

    pub fn with_request_hook(mut self, hook: impl RequestHook + 'static) -> Self {
        self.request_hooks.push(Arc::new(hook));
        self
    }

    pub fn with_response_hook(mut self, hook: impl ResponseHook + 'static) -> Self {
        self.response_hooks.push(Arc::new(hook));
        self
    }

    pub fn apply_request(&self, request: &mut Request) {
        for hook in &self.request_hooks {
            hook.on_request(request);
        }
    }

    pub fn apply_failure(&self, error: ChatError) -> ChatError {
        self.response_hooks
            .iter()
            .fold(error, |error, hook| hook.on_failure(error))
    }
}

// ============================================================================
// CREDENTIALS
// ============================================================================

/// Handle to the host platform's session. Read on every request, so a token
/// that appears later in the process lifetime is picked up.
pub trait InitDataSource: Send + Sync {
    fn init_data(&self) -> Option<String>;
}

/// Fixed token (or none) captured at startup
#[derive(Debug, Clone, Default)]
pub struct StaticInitData(pub Option<String>);

impl InitDataSource for StaticInitData {
    fn init_data(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Token read from an environment variable each time it is needed
#[derive(Debug, Clone)]
pub struct EnvInitData {
    var: String,
}

impl EnvInitData {
    pub fn new(var: &str) -> Self {
        Self { var: var.to_string() }
    }
}

impl InitDataSource for EnvInitData {
    fn init_data(&self) -> Option<String> {
        std::env::var(&self.var).ok()
    }
}

pub struct CredentialInjector {
    source: Arc<dyn InitDataSource>,
}

impl CredentialInjector {
    pub fn new(source: Arc<dyn InitDataSource>) -> Self {
        Self { source }
    }
}

impl RequestHook for CredentialInjector {
    fn on_request(&self, request: &mut Request) {
        let Some(init_data) = self.source.init_data().filter(|d| !d.is_empty()) else {
            return;
        };

        match HeaderValue::from_str(&init_data) {
            Ok(value) => {
                request.headers_mut().insert(INIT_DATA_HEADER, value);
            }
            Err(_) => {
                tracing::warn!(
                    url = %request.url(),
                    "Init data is not a valid header value, sending without it"
                );
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct InitDataUser {
    id: i64,
}

/// Extract the platform user id from url-encoded init data (`user={"id":...}`)
pub fn init_data_user_id(init_data: &str) -> Option<i64> {
    url::form_urlencoded::parse(init_data.as_bytes())
        .find(|(key, _)| key == "user")
        .and_then(|(_, user)| serde_json::from_str::<InitDataUser>(&user).ok())
        .map(|user| user.id)
}

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

/// Tags HTTP 401 failures as authentication errors. Cloning shares the counter.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    auth_failures: Arc<AtomicU64>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authentication_failures(&self) -> u64 {
        self.auth_failures.load(Ordering::Relaxed)
    }
}

impl ResponseHook for ErrorClassifier {
    fn on_failure(&self, error: ChatError) -> ChatError {
        match error {
            ChatError::Transport {
                status: Some(401),
                message,
            } => {
                self.auth_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(message = %message, "Authentication error");
                ChatError::Authentication { message }
            }
            other => other,
        }
    }
}
