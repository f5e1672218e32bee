use crate::services::config_service;

pub fn get_config() -> Result<config_service::EffectiveConfig, String> {
    config_service::get_effective_config().map_err(|e| e.to_string())
}

pub fn set_base_url(url: String) -> Result<(), String> {
    config_service::set_base_url(&url).map_err(|e| e.to_string())
}
