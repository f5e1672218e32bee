pub mod api_client;
pub mod chat_session;
pub mod config_service;
pub mod middleware;
pub mod sync_cache;
