use crate::error::{ChatError, PreconditionFailure, Result};
use crate::models::{ChatRequest, ChatResponse, History, UserStats};
use crate::services::sync_cache::{CacheKey, SyncCache};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Lifecycle of a single send attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SendState {
    Idle,
    Pending,
    Succeeded(ChatResponse),
    Failed(ChatError),
}

impl SendState {
    pub fn is_pending(&self) -> bool {
        matches!(self, SendState::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SendState::Succeeded(_) | SendState::Failed(_))
    }
}

/// Everything a view needs to draw the chat screen
#[derive(Debug, Clone, PartialEq)]
pub struct ChatView {
    pub history: Option<History>,
    pub stats: Option<UserStats>,
    pub pending: bool,
    pub send_enabled: bool,
    pub last_error: Option<ChatError>,
}

/// Resets a send left pending by a dropped future
struct PendingGuard<'a> {
    state: &'a watch::Sender<SendState>,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("Send abandoned while pending");
            self.state.send_replace(SendState::Idle);
        }
    }
}

/// Orchestrates sends against the API and keeps the cached transcript and
/// quota coherent with them. At most one send is outstanding at a time.
pub struct ChatSession {
    cache: Arc<SyncCache>,
    state: watch::Sender<SendState>,
    draft: Mutex<String>,
}

impl ChatSession {
    pub fn new(cache: Arc<SyncCache>) -> Self {
        let (state, _) = watch::channel(SendState::Idle);
        Self {
            cache,
            state,
            draft: Mutex::new(String::new()),
        }
    }

    pub fn cache(&self) -> &Arc<SyncCache> {
        &self.cache
    }

    pub fn state(&self) -> SendState {
        self.state.borrow().clone()
    }

    /// Return the current state; a terminal state is consumed and the
    /// session goes back to `Idle`.
    pub fn observe(&self) -> SendState {
        let mut observed = SendState::Idle;
        self.state.send_if_modified(|state| {
            observed = state.clone();
            if state.is_terminal() {
                *state = SendState::Idle;
                true
            } else {
                false
            }
        });
        observed
    }

    pub fn subscribe(&self) -> watch::Receiver<SendState> {
        self.state.subscribe()
    }

    /// True only when stats are known and show no remaining messages
    pub fn is_quota_exhausted(&self) -> bool {
        self.cache.peek_stats().is_some_and(|stats| stats.is_exhausted())
    }

    pub fn can_send(&self) -> bool {
        !self.state.borrow().is_pending() && !self.is_quota_exhausted()
    }

    /// Fetch transcript and quota, using cached values where fresh
    pub async fn load(&self) -> Result<(History, UserStats)> {
        let (history, stats) = tokio::join!(self.cache.read_history(), self.cache.read_stats());
        Ok((history?, stats?))
    }

    pub async fn send(&self, text: &str) -> Result<ChatResponse> {
        let request = ChatRequest::new(text);
        if request.message.is_empty() {
            return Err(PreconditionFailure::EmptyMessage.into());
        }

        let quota_exhausted = self.is_quota_exhausted();
        let mut rejected = None;
        self.state.send_if_modified(|state| {
            if state.is_pending() {
                rejected = Some(PreconditionFailure::SendPending);
                false
            } else if quota_exhausted {
                rejected = Some(PreconditionFailure::QuotaExhausted);
                false
            } else {
                *state = SendState::Pending;
                true
            }
        });
        if let Some(reason) = rejected {
            tracing::debug!(%reason, "Send rejected");
            return Err(reason.into());
        }

        let mut guard = PendingGuard {
            state: &self.state,
            armed: true,
        };
        let result = self.cache.backend().send_message(&request).await;
        guard.armed = false;

        match result {
            Ok(response) => {
                // Transcript and quota are re-derived from the server
                self.cache.invalidate(CacheKey::History);
                self.cache.invalidate(CacheKey::Stats);
                tracing::info!(
                    length = request.message.len(),
                    reply_length = response.message.len(),
                    "Message sent"
                );
                self.state.send_replace(SendState::Succeeded(response.clone()));
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send message");
                self.state.send_replace(SendState::Failed(e.clone()));
                Err(e)
            }
        }
    }

    pub fn set_draft(&self, text: &str) {
        *self.draft.lock().unwrap_or_else(PoisonError::into_inner) = text.to_string();
    }

    pub fn draft(&self) -> String {
        self.draft.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Send the current draft. The draft is cleared only when the send succeeds.
    pub async fn send_draft(&self) -> Result<ChatResponse> {
        let draft = self.draft();
        let response = self.send(&draft).await?;

        let mut current = self.draft.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == draft {
            current.clear();
        }
        Ok(response)
    }

    pub fn snapshot(&self) -> ChatView {
        let state = self.state();
        ChatView {
            history: self.cache.peek_history(),
            stats: self.cache.peek_stats(),
            pending: state.is_pending(),
            send_enabled: self.can_send(),
            last_error: match state {
                SendState::Failed(e) => Some(e),
                _ => None,
            },
        }
    }
}
