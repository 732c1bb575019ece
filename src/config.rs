use serde::Deserialize;
use std::str::FromStr;

use crate::llm_gateway::ProviderKind;
use crate::rate_limit::DEFAULT_DAILY_LIMIT;

/// Which calling convention `POST /api/chat` uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Blocking completion answered as a single JSON object.
    Json,
    /// Schema-constrained streaming answered as a chunked text body.
    Stream,
}

impl FromStr for ChatMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "complete" => Ok(ChatMode::Json),
            "stream" | "streaming" => Ok(ChatMode::Stream),
            other => anyhow::bail!("CHAT_MODE must be 'json' or 'stream', got '{}'", other),
        }
    }
}

/// Where the daily request counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitStoreKind {
    /// Shared `rate_limits` table, consistent across instances.
    Postgres,
    /// In-process cache; counters reset on restart.
    Memory,
    /// No limiting at all (development).
    None,
}

impl FromStr for RateLimitStoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "database" => Ok(RateLimitStoreKind::Postgres),
            "memory" => Ok(RateLimitStoreKind::Memory),
            "none" | "off" | "disabled" => Ok(RateLimitStoreKind::None),
            other => anyhow::bail!(
                "RATE_LIMIT_STORE must be 'postgres', 'memory' or 'none', got '{}'",
                other
            ),
        }
    }
}

/// Provider selection and credentials for the LLM gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub model: String,
    /// `None` puts the gateway in development mock mode.
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub llm: LlmSettings,
    pub chat_mode: ChatMode,
    pub rate_limit_daily: u32,
    pub rate_limit_store: RateLimitStoreKind,
    pub dashboard_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DB_URL")
            .or_else(|| var("DATABASE_URL"))
            .map(|url| {
                if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                    anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                }
                Ok(url)
            })
            .transpose()?;

        let provider: ProviderKind = var("LLM_PROVIDER")
            .map(|p| p.parse())
            .transpose()?
            .unwrap_or(ProviderKind::OpenAi);

        let (key_var, base_var) = match provider {
            ProviderKind::OpenAi => ("OPENAI_API_KEY", "OPENAI_BASE_URL"),
            ProviderKind::Google => ("GOOGLE_API_KEY", "GOOGLE_BASE_URL"),
        };

        let base_url = var(base_var)
            .unwrap_or_else(|| provider.default_base_url().to_string());
        let parsed = url::Url::parse(&base_url)
            .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", base_var, e))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            anyhow::bail!("{} must start with http:// or https://", base_var);
        }

        let llm = LlmSettings {
            provider,
            model: var("LLM_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
            api_key: var(key_var),
            base_url,
            timeout_secs: var("LLM_TIMEOUT_SECS")
                .map(|v| v.parse())
                .transpose()
                .map_err(|_| anyhow::anyhow!("LLM_TIMEOUT_SECS must be a number of seconds"))?
                .unwrap_or(120),
        };

        let rate_limit_store = match var("RATE_LIMIT_STORE") {
            Some(kind) => kind.parse()?,
            None if database_url.is_some() => RateLimitStoreKind::Postgres,
            None => RateLimitStoreKind::None,
        };
        if rate_limit_store == RateLimitStoreKind::Postgres && database_url.is_none() {
            anyhow::bail!("RATE_LIMIT_STORE=postgres requires DB_URL or DATABASE_URL");
        }

        let config = Self {
            port: var("PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            database_url,
            llm,
            chat_mode: var("CHAT_MODE")
                .map(|m| m.parse())
                .transpose()?
                .unwrap_or(ChatMode::Stream),
            rate_limit_daily: var("RATE_LIMIT_DAILY")
                .map(|v| parse_daily_limit(&v))
                .transpose()?
                .unwrap_or(DEFAULT_DAILY_LIMIT),
            rate_limit_store,
            dashboard_token: var("DASHBOARD_TOKEN"),
        };

        // Never log keys or full connection strings.
        tracing::debug!("Server Port: {}", config.port);
        tracing::debug!(
            "LLM provider: {} ({}) at {}",
            config.llm.provider.as_str(),
            config.llm.model,
            config.llm.base_url
        );
        if config.llm.api_key.is_none() {
            tracing::warn!("No {} configured, LLM gateway runs in development mock mode", key_var);
        }
        if let Some(ref url) = config.database_url {
            tracing::debug!("Database URL: {}...", url.chars().take(20).collect::<String>());
        }
        tracing::debug!(
            "Rate limit: {} per day ({:?} store)",
            config.rate_limit_daily,
            config.rate_limit_store
        );

        Ok(config)
    }
}

/// Counters are stored as Postgres `INTEGER`, so the limit must fit an `i32`.
fn parse_daily_limit(value: &str) -> anyhow::Result<u32> {
    let limit: u32 = value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("RATE_LIMIT_DAILY must be a positive number"))?;
    i32::try_from(limit)
        .map_err(|_| anyhow::anyhow!("RATE_LIMIT_DAILY must be at most {}", i32::MAX))?;
    Ok(limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.llm.provider, ProviderKind::OpenAi);
        assert_eq!(config.llm.model, "gpt-5-nano-2025-08-07");
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.chat_mode, ChatMode::Stream);
        assert_eq!(config.rate_limit_daily, 3);
        assert_eq!(config.rate_limit_store, RateLimitStoreKind::None);
    }

    #[test]
    fn test_google_provider_uses_its_key_and_endpoint() {
        let config = config_from(&[
            ("LLM_PROVIDER", "google"),
            ("OPENAI_API_KEY", "sk-ignored"),
            ("GOOGLE_API_KEY", "g-key"),
        ])
        .unwrap();
        assert_eq!(config.llm.provider, ProviderKind::Google);
        assert_eq!(config.llm.model, "gemini-2.5-flash");
        assert_eq!(config.llm.api_key.as_deref(), Some("g-key"));
        assert!(config.llm.base_url.contains("generativelanguage.googleapis.com"));
    }

    #[test]
    fn test_database_selects_postgres_store() {
        let config = config_from(&[("DATABASE_URL", "postgres://user@localhost/app")]).unwrap();
        assert_eq!(config.rate_limit_store, RateLimitStoreKind::Postgres);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(config_from(&[("DATABASE_URL", "mysql://localhost")]).is_err());
        assert!(config_from(&[("PORT", "abc")]).is_err());
        assert!(config_from(&[("CHAT_MODE", "batch")]).is_err());
        assert!(config_from(&[("LLM_PROVIDER", "anthropic")]).is_err());
        assert!(config_from(&[("OPENAI_BASE_URL", "ftp://example.com")]).is_err());
        assert!(config_from(&[("RATE_LIMIT_STORE", "postgres")]).is_err());
        assert!(config_from(&[("RATE_LIMIT_DAILY", "-3")]).is_err());
    }

    #[test]
    fn test_daily_limit_must_fit_the_counter_column() {
        assert!(config_from(&[("RATE_LIMIT_DAILY", "2147483648")]).is_err());
        assert!(config_from(&[("RATE_LIMIT_DAILY", "4294967295")]).is_err());

        let config = config_from(&[("RATE_LIMIT_DAILY", "2147483647")]).unwrap();
        assert_eq!(config.rate_limit_daily, i32::MAX as u32);
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = config_from(&[("OPENAI_API_KEY", "  "), ("PORT", "")]).unwrap();
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.port, 3000);
    }
}
