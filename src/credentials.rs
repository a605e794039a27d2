//! API key resolution.
//!
//! A key supplied by the user always wins; the administrator's fallback key
//! is used otherwise. Empty or whitespace-only keys count as absent.

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;
use crate::llm::Provider;

/// A set of per-provider API keys.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: HashMap<Provider, SecretString>,
}

impl ApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key for a provider. Blank keys leave it unset.
    pub fn with_key(mut self, provider: Provider, key: impl Into<String>) -> Self {
        self.set(provider, key);
        self
    }

    /// Set the key for a provider. Blank keys remove any existing key.
    pub fn set(&mut self, provider: Provider, key: impl Into<String>) {
        let key = key.into();
        if key.trim().is_empty() {
            self.keys.remove(&provider);
        } else {
            self.keys.insert(provider, SecretString::from(key));
        }
    }

    pub fn get(&self, provider: Provider) -> Option<&SecretString> {
        self.keys
            .get(&provider)
            .filter(|k| !k.expose_secret().trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Resolves the effective key for a provider: user key, then admin key.
#[derive(Debug, Clone, Default)]
pub struct CredentialResolver {
    user: ApiKeys,
    admin: ApiKeys,
}

impl CredentialResolver {
    pub fn new(user: ApiKeys, admin: ApiKeys) -> Self {
        Self { user, admin }
    }

    /// Replace the user-supplied keys, keeping the admin fallback.
    pub fn with_user_keys(mut self, user: ApiKeys) -> Self {
        self.user = user;
        self
    }

    /// Effective key, if any.
    pub fn lookup(&self, provider: Provider) -> Option<&SecretString> {
        self.user.get(provider).or_else(|| self.admin.get(provider))
    }

    /// Effective key, or [`LlmError::MissingCredential`] naming the provider.
    pub fn resolve(&self, provider: Provider) -> Result<SecretString, LlmError> {
        self.lookup(provider)
            .cloned()
            .ok_or_else(|| LlmError::MissingCredential {
                provider: provider.name().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_key_wins_over_admin() {
        let resolver = CredentialResolver::new(
            ApiKeys::new().with_key(Provider::OpenAi, "user-key"),
            ApiKeys::new().with_key(Provider::OpenAi, "admin-key"),
        );
        let key = resolver.resolve(Provider::OpenAi).unwrap();
        assert_eq!(key.expose_secret(), "user-key");
    }

    #[test]
    fn test_admin_key_is_fallback() {
        let resolver = CredentialResolver::new(
            ApiKeys::new(),
            ApiKeys::new().with_key(Provider::Groq, "admin-key"),
        );
        assert_eq!(resolver.resolve(Provider::Groq).unwrap().expose_secret(), "admin-key");
    }

    #[test]
    fn test_blank_user_key_falls_through() {
        let resolver = CredentialResolver::new(
            ApiKeys::new().with_key(Provider::Google, "   "),
            ApiKeys::new().with_key(Provider::Google, "admin-key"),
        );
        assert_eq!(resolver.resolve(Provider::Google).unwrap().expose_secret(), "admin-key");
    }

    #[test]
    fn test_missing_key_names_provider() {
        let resolver = CredentialResolver::default();
        let err = resolver.resolve(Provider::Anthropic).unwrap_err();
        assert!(err.is_missing_credential());
        assert_eq!(err.to_string(), "Anthropic API key missing. Please check your settings.");
    }

    #[test]
    fn test_set_blank_removes_key() {
        let mut keys = ApiKeys::new().with_key(Provider::DeepSeek, "k");
        keys.set(Provider::DeepSeek, "");
        assert!(keys.get(Provider::DeepSeek).is_none());
        assert!(keys.is_empty());
    }
}
