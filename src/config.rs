//! Configuration loaded from the environment.
//!
//! `DispatchConfig::from_env` reads a `.env` file if present and then the
//! process environment. `from_lookup` takes any key lookup, which keeps
//! tests independent of the real environment.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::credentials::ApiKeys;
use crate::error::ConfigError;
use crate::llm::{GenerationConfig, MediaPolling, Provider, ProviderEndpoints};
use crate::logging::LogFormat;
use crate::transport::RetryConfig;

/// Credentials and switches for the context connectors.
#[derive(Debug, Clone, Default)]
pub struct ConnectorSettings {
    pub youtube_api_key: Option<SecretString>,
    /// User access token from the Spotify authorization flow.
    pub spotify_access_token: Option<SecretString>,
    pub github_token: Option<SecretString>,
    pub github_enabled: bool,
    pub unsplash_access_key: Option<SecretString>,
}

/// Everything the dispatch core needs at startup.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub retry: RetryConfig,
    pub generation: GenerationConfig,
    pub media_polling: MediaPolling,
    /// Upper bound on model tasks running at once within one turn.
    pub max_concurrent_models: usize,
    pub endpoints: ProviderEndpoints,
    /// Administrator keys, used when the user has not supplied one.
    pub admin_keys: ApiKeys,
    pub connectors: ConnectorSettings,
    pub log_format: LogFormat,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            generation: GenerationConfig::default(),
            media_polling: MediaPolling::default(),
            max_concurrent_models: 8,
            endpoints: ProviderEndpoints::default(),
            admin_keys: ApiKeys::new(),
            connectors: ConnectorSettings::default(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl DispatchConfig {
    /// Load from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset and empty keys take their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = Self::default();

        let retry = RetryConfig {
            max_retries: env.parse("OMNICHAT_MAX_RETRIES", defaults.retry.max_retries)?,
            initial_backoff_ms: env.parse(
                "OMNICHAT_INITIAL_BACKOFF_MS",
                defaults.retry.initial_backoff_ms,
            )?,
            max_retry_after_secs: env.parse(
                "OMNICHAT_MAX_RETRY_AFTER_SECS",
                defaults.retry.max_retry_after_secs,
            )?,
        };

        let max_concurrent_models: usize = env.parse(
            "OMNICHAT_MAX_CONCURRENT_MODELS",
            defaults.max_concurrent_models,
        )?;
        if max_concurrent_models == 0 {
            return Err(ConfigError::InvalidValue {
                key: "OMNICHAT_MAX_CONCURRENT_MODELS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let media_polling = MediaPolling {
            interval: Duration::from_millis(env.parse(
                "OMNICHAT_MEDIA_POLL_INTERVAL_MS",
                defaults.media_polling.interval.as_millis() as u64,
            )?),
            max_polls: env.parse("OMNICHAT_MEDIA_MAX_POLLS", defaults.media_polling.max_polls)?,
        };

        let generation = GenerationConfig {
            temperature: env.parse("OMNICHAT_TEMPERATURE", defaults.generation.temperature)?,
            top_p: env.parse("OMNICHAT_TOP_P", defaults.generation.top_p)?,
            // Unset leaves each adapter to its own per-model cap.
            max_tokens: env
                .get("OMNICHAT_MAX_TOKENS")
                .map(|_| env.parse("OMNICHAT_MAX_TOKENS", 0u32))
                .transpose()?,
            system_prompt: env.get("OMNICHAT_SYSTEM_PROMPT"),
        };

        let log_format = match env.get("OMNICHAT_LOG_FORMAT") {
            None => defaults.log_format,
            Some(value) => value.parse().map_err(|message| ConfigError::InvalidValue {
                key: "OMNICHAT_LOG_FORMAT".to_string(),
                message,
            })?,
        };

        let base = ProviderEndpoints::default();
        let endpoints = ProviderEndpoints {
            openai: env.get("OPENAI_BASE_URL").unwrap_or(base.openai),
            anthropic: env.get("ANTHROPIC_BASE_URL").unwrap_or(base.anthropic),
            deepseek: env.get("DEEPSEEK_BASE_URL").unwrap_or(base.deepseek),
            groq: env.get("GROQ_BASE_URL").unwrap_or(base.groq),
            gemini: env.get("GEMINI_BASE_URL").unwrap_or(base.gemini),
        };

        let mut admin_keys = ApiKeys::new();
        for provider in Provider::ALL {
            if let Some(key) = env.get(admin_key_var(provider)) {
                admin_keys.set(provider, key);
            }
        }

        let connectors = ConnectorSettings {
            youtube_api_key: env.secret("YOUTUBE_API_KEY"),
            spotify_access_token: env.secret("SPOTIFY_ACCESS_TOKEN"),
            github_token: env.secret("GITHUB_TOKEN"),
            github_enabled: env.parse("OMNICHAT_GITHUB_CONNECTOR", false)?,
            unsplash_access_key: env.secret("UNSPLASH_ACCESS_KEY"),
        };

        Ok(Self {
            retry,
            generation,
            media_polling,
            max_concurrent_models,
            endpoints,
            admin_keys,
            connectors,
            log_format,
        })
    }
}

/// Environment variable holding the administrator key for a provider.
pub fn admin_key_var(provider: Provider) -> &'static str {
    match provider {
        Provider::Google => "GEMINI_API_KEY",
        Provider::OpenAi => "OPENAI_API_KEY",
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::DeepSeek => "DEEPSEEK_API_KEY",
        Provider::Groq => "GROQ_API_KEY",
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn secret(&self, key: &str) -> Option<SecretString> {
        self.get(key).map(SecretString::from)
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{:?}: {}", value, e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<DispatchConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DispatchConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.max_concurrent_models, 8);
        assert_eq!(config.media_polling.interval, Duration::from_secs(5));
        assert_eq!(config.media_polling.max_polls, 120);
        assert_eq!(config.generation.max_tokens, None);
        assert_eq!(DispatchConfig::default().generation.max_tokens, None);
        assert_eq!(config.generation.system_prompt, None);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.admin_keys.is_empty());
        assert!(!config.connectors.github_enabled);
        assert_eq!(config.endpoints.openai, "https://api.openai.com/v1");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("OMNICHAT_MAX_RETRIES", "5"),
            ("OMNICHAT_INITIAL_BACKOFF_MS", "100"),
            ("OMNICHAT_MAX_CONCURRENT_MODELS", "2"),
            ("OMNICHAT_TEMPERATURE", "0.2"),
            ("OMNICHAT_MAX_TOKENS", "1024"),
            ("OMNICHAT_SYSTEM_PROMPT", "Be brief."),
            ("OMNICHAT_LOG_FORMAT", "json"),
            ("OPENAI_BASE_URL", "http://localhost:9000/v1"),
            ("OPENAI_API_KEY", "sk-admin"),
            ("GEMINI_API_KEY", "g-admin"),
            ("OMNICHAT_GITHUB_CONNECTOR", "true"),
            ("UNSPLASH_ACCESS_KEY", "u-key"),
            ("SPOTIFY_ACCESS_TOKEN", "s-token"),
        ])
        .unwrap();

        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_backoff_ms, 100);
        assert_eq!(config.max_concurrent_models, 2);
        assert_eq!(config.generation.temperature, 0.2);
        assert_eq!(config.generation.max_tokens, Some(1024));
        assert_eq!(config.generation.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.endpoints.openai, "http://localhost:9000/v1");
        assert_eq!(
            config.admin_keys.get(Provider::OpenAi).unwrap().expose_secret(),
            "sk-admin"
        );
        assert_eq!(
            config.admin_keys.get(Provider::Google).unwrap().expose_secret(),
            "g-admin"
        );
        assert!(config.connectors.github_enabled);
        assert!(config.connectors.unsplash_access_key.is_some());
        assert!(config.connectors.youtube_api_key.is_none());
        assert_eq!(
            config.connectors.spotify_access_token.unwrap().expose_secret(),
            "s-token"
        );
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = load(&[("OMNICHAT_MAX_RETRIES", ""), ("OPENAI_API_KEY", "  ")]).unwrap();
        assert_eq!(config.retry.max_retries, 2);
        assert!(config.admin_keys.get(Provider::OpenAi).is_none());
    }

    #[test]
    fn test_invalid_number() {
        let err = load(&[("OMNICHAT_MAX_RETRIES", "lots")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "OMNICHAT_MAX_RETRIES"
        ));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = load(&[("OMNICHAT_MAX_CONCURRENT_MODELS", "0")]).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_invalid_log_format() {
        let err = load(&[("OMNICHAT_LOG_FORMAT", "xml")]).unwrap_err();
        assert!(err.to_string().contains("OMNICHAT_LOG_FORMAT"));
    }
}
