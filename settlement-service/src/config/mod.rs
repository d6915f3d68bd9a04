use crate::services::engine::EngineSettings;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub common: core_config::Config,
    pub store: StoreConfig,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub uri: Secret<String>,
    pub database: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

impl SettlementConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = core_config::is_prod();

        Ok(SettlementConfig {
            common,
            store: StoreConfig {
                backend: core_config::get_env("STORE_BACKEND", Some("mongo"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                uri: Secret::new(core_config::get_env(
                    "MONGODB_URI",
                    Some("mongodb://localhost:27017"),
                    is_prod,
                )?),
                database: core_config::get_env("MONGODB_DATABASE", Some("settlement_db"), is_prod)?,
            },
            engine: EngineSettings {
                exclusive_links: bool_env("ENGINE_EXCLUSIVE_LINKS", true),
                log_filters: bool_env("ENGINE_LOG_FILTERS", false),
                default_service_type: core_config::get_env(
                    "ENGINE_DEFAULT_SERVICE_TYPE",
                    Some("REIMBURSEMENT"),
                    is_prod,
                )?,
            },
        })
    }
}

/// Boolean env flag; accepts 1/true/yes/on in any case.
fn bool_env(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parse_accepts_aliases() {
        assert_eq!(
            "mongodb".parse::<StoreBackend>().unwrap(),
            StoreBackend::Mongo
        );
        assert_eq!(
            "MEMORY".parse::<StoreBackend>().unwrap(),
            StoreBackend::Memory
        );
        assert!("postgres".parse::<StoreBackend>().is_err());
    }
}
