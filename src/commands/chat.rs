use crate::models::{ChatResponse, HealthStatus, History, UserStats};
use crate::services::chat_session::{ChatSession, ChatView};
use crate::services::sync_cache::CacheKey;

pub async fn send_chat_message(session: &ChatSession, message: String) -> Result<ChatResponse, String> {
    session.set_draft(&message);
    session.send_draft().await.map_err(|e| e.to_string())
}

pub async fn get_chat_history(session: &ChatSession) -> Result<History, String> {
    session.cache().read_history().await.map_err(|e| e.to_string())
}

pub async fn get_user_stats(session: &ChatSession) -> Result<UserStats, String> {
    session.cache().read_stats().await.map_err(|e| e.to_string())
}

pub async fn check_health(session: &ChatSession) -> Result<HealthStatus, String> {
    session.cache().read_health().await.map_err(|e| e.to_string())
}

/// Returns the keys that will be refetched on their next read
pub fn focus_regained(session: &ChatSession) -> Vec<CacheKey> {
    session.cache().on_focus_regained()
}

pub fn get_chat_view(session: &ChatSession) -> ChatView {
    session.snapshot()
}
