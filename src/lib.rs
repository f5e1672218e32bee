pub mod commands;
pub mod error;
pub mod models;
pub mod services;

pub use error::{ChatError, PreconditionFailure, Result};
pub use services::api_client::{ApiClient, ChatBackend};
pub use services::chat_session::{ChatSession, ChatView, SendState};
pub use services::sync_cache::{spawn_health_monitor, CacheEvent, CacheKey, SyncCache};
