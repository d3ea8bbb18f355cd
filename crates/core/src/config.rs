use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use conductor_domain::errors::{ConductorError, ConductorResult};

use crate::circuit_breaker::CircuitBreakerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerSettings,
    pub breaker: BreakerSettings,
    pub router: RouterSettings,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            worker: WorkerSettings::default(),
            breaker: BreakerSettings::default(),
            router: RouterSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:conductor.db?mode=rwc".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Number of agent consumer loops to run in this process.
    pub agents: usize,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_seconds: u64,
    /// Registry consumers treat an agent as offline past this timeout.
    pub liveness_timeout_seconds: u64,
    /// Cadence of the stale-task recovery sweep.
    pub recovery_interval_seconds: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            agents: 3,
            poll_interval_ms: 1000,
            heartbeat_interval_seconds: 15,
            liveness_timeout_seconds: 90,
            recovery_interval_seconds: 30,
        }
    }
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_seconds)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown_seconds: u64,
    pub call_timeout_seconds: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_seconds: 60,
            call_timeout_seconds: 120,
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_seconds),
            call_timeout: Duration::from_secs(self.call_timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Reorders providers within a tier by ascending cost; never changes
    /// tier order.
    pub prioritize_cost: bool,
    pub max_tokens: u32,
    pub temperature: f32,
    pub tiers: Vec<TierSettings>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            prioritize_cost: false,
            max_tokens: 1024,
            temperature: 0.7,
            tiers: vec![
                TierSettings {
                    providers: vec![
                        ProviderSpec {
                            name: "anthropic".to_string(),
                            kind: ProviderKind::Anthropic,
                            base_url: None,
                            api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
                            model: "claude-sonnet-4-20250514".to_string(),
                            cost_per_1k_tokens: 3.0,
                            timeout_seconds: 60,
                            task_types: vec!["reasoning".to_string(), "code".to_string()],
                        },
                        ProviderSpec {
                            name: "openai".to_string(),
                            kind: ProviderKind::OpenAiCompat,
                            base_url: None,
                            api_key_env: Some("OPENAI_API_KEY".to_string()),
                            model: "gpt-4o".to_string(),
                            cost_per_1k_tokens: 2.5,
                            timeout_seconds: 60,
                            task_types: vec!["general".to_string()],
                        },
                    ],
                },
                TierSettings {
                    providers: vec![ProviderSpec {
                        name: "openrouter".to_string(),
                        kind: ProviderKind::OpenAiCompat,
                        base_url: Some("https://openrouter.ai/api/v1".to_string()),
                        api_key_env: Some("OPENROUTER_API_KEY".to_string()),
                        model: "anthropic/claude-3.5-haiku".to_string(),
                        cost_per_1k_tokens: 0.8,
                        timeout_seconds: 60,
                        task_types: Vec::new(),
                    }],
                },
                TierSettings {
                    providers: vec![ProviderSpec {
                        name: "local".to_string(),
                        kind: ProviderKind::OpenAiCompat,
                        base_url: Some("http://127.0.0.1:8080/v1".to_string()),
                        api_key_env: None,
                        model: "llama-3.1-8b-instruct".to_string(),
                        cost_per_1k_tokens: 0.0,
                        timeout_seconds: 120,
                        task_types: Vec::new(),
                    }],
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSettings {
    pub providers: Vec<ProviderSpec>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenAiCompat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub name: String,
    pub kind: ProviderKind,
    /// Overrides the provider's default endpoint; also how a gateway or a
    /// local last-resort server is pointed at.
    pub base_url: Option<String>,
    /// Environment variable holding the API key, never the key itself.
    pub api_key_env: Option<String>,
    pub model: String,
    pub cost_per_1k_tokens: f64,
    pub timeout_seconds: u64,
    /// Task types this provider is preferred for (tier-1 selection only).
    #[serde(default)]
    pub task_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load from a TOML file, falling back to defaults when the path is
    /// absent. `CONDUCTOR_DATABASE_URL` overrides the configured url.
    pub fn load(path: Option<&Path>) -> ConductorResult<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    ConductorError::Configuration(format!(
                        "failed to read config file {}: {e}",
                        path.display()
                    ))
                })?;
                toml::from_str(&raw).map_err(|e| {
                    ConductorError::Configuration(format!(
                        "failed to parse config file {}: {e}",
                        path.display()
                    ))
                })?
            }
            None => Self::default(),
        };

        if let Ok(url) = std::env::var("CONDUCTOR_DATABASE_URL") {
            config.database.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConductorResult<()> {
        if self.database.url.is_empty() {
            return Err(ConductorError::config_error("database.url cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(ConductorError::config_error(
                "database.max_connections must be at least 1",
            ));
        }
        if self.worker.agents == 0 {
            return Err(ConductorError::config_error("worker.agents must be at least 1"));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(ConductorError::config_error(
                "worker.poll_interval_ms must be positive",
            ));
        }
        if self.worker.heartbeat_interval_seconds == 0
            || self.worker.liveness_timeout_seconds == 0
            || self.worker.recovery_interval_seconds == 0
        {
            return Err(ConductorError::config_error(
                "worker intervals must be positive",
            ));
        }
        if self.worker.liveness_timeout_seconds <= self.worker.heartbeat_interval_seconds {
            return Err(ConductorError::config_error(
                "worker.liveness_timeout_seconds must exceed the heartbeat interval",
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConductorError::config_error(
                "breaker.failure_threshold must be at least 1",
            ));
        }
        if self.breaker.cooldown_seconds == 0 || self.breaker.call_timeout_seconds == 0 {
            return Err(ConductorError::config_error(
                "breaker timings must be positive",
            ));
        }
        if self.router.tiers.is_empty() {
            return Err(ConductorError::config_error(
                "router.tiers cannot be empty",
            ));
        }
        for (idx, tier) in self.router.tiers.iter().enumerate() {
            if tier.providers.is_empty() {
                return Err(ConductorError::config_error(format!(
                    "router.tiers[{idx}] has no providers"
                )));
            }
            for provider in &tier.providers {
                if provider.name.is_empty() {
                    return Err(ConductorError::config_error(format!(
                        "router.tiers[{idx}] contains a provider with an empty name"
                    )));
                }
                if provider.timeout_seconds == 0 {
                    return Err(ConductorError::config_error(format!(
                        "provider {} must have a positive timeout",
                        provider.name
                    )));
                }
                if provider.cost_per_1k_tokens < 0.0 {
                    return Err(ConductorError::config_error(format!(
                        "provider {} has a negative cost rate",
                        provider.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.router.tiers.len(), 3);
    }

    #[test]
    fn rejects_zero_agents() {
        let mut config = AppConfig::default();
        config.worker.agents = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_liveness_timeout_below_heartbeat_interval() {
        let mut config = AppConfig::default();
        config.worker.heartbeat_interval_seconds = 60;
        config.worker.liveness_timeout_seconds = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_tier() {
        let mut config = AppConfig::default();
        config.router.tiers[1].providers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml_overrides() {
        let raw = r#"
            [worker]
            agents = 5
            poll_interval_ms = 250

            [breaker]
            failure_threshold = 2
            cooldown_seconds = 10
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.worker.agents, 5);
        assert_eq!(config.breaker.failure_threshold, 2);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.router.max_tokens, 1024);
        assert!(config.validate().is_ok());
    }
}
