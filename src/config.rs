//! # Environment configuration for the Analysis Orchestrator
//!
//! Case Nexus talks to a single long-context model provider, so this module
//! is a much smaller surface than a multi-backend configuration layer: it
//! resolves the one required secret (the provider API key), an optional
//! second key for grounded web search, and override knobs for the base URL,
//! model name, and default thinking budgets — all environment-driven so the
//! server binary needs no config file to start.
//!
//! ## Environment Variables
//!
//! - `CASE_NEXUS_API_KEY` (required): the model provider's API key.
//! - `CASE_NEXUS_WEB_SEARCH_KEY` (optional): enables grounded web search for
//!   `search_case_law` / `verify_citations` when the model provider's own SDK
//!   doesn't bundle search.
//! - `CASE_NEXUS_BASE_URL` (optional): override the provider endpoint.
//! - `CASE_NEXUS_MODEL` (optional): override the model identifier.

use crate::{Error, Result};
use std::env;

/// Default provider endpoint, used when `CASE_NEXUS_BASE_URL` is unset.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Default model identifier, used when `CASE_NEXUS_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "claude-long-context";

/// Resolved connection settings for the Streaming Runner.
#[derive(Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub web_search_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"***")
            .field("web_search_key", &self.web_search_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl ProviderConfig {
    /// Resolve configuration entirely from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `CASE_NEXUS_API_KEY` is unset or empty —
    /// this is the one secret the core cannot run without (spec.md §6).
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("CASE_NEXUS_API_KEY")
            .map_err(|_| Error::config("CASE_NEXUS_API_KEY is not set"))?;
        if api_key.trim().is_empty() {
            return Err(Error::config("CASE_NEXUS_API_KEY is empty"));
        }

        let web_search_key = env::var("CASE_NEXUS_WEB_SEARCH_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let base_url = env::var("CASE_NEXUS_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = env::var("CASE_NEXUS_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Ok(Self {
            api_key,
            web_search_key,
            base_url,
            model,
        })
    }

    /// Whether a second, grounded web-search call is available for
    /// `search_case_law` / `verify_citations`.
    pub fn has_web_search(&self) -> bool {
        self.web_search_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation must be serialized across tests in this module.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        // SAFETY: serialized by ENV_LOCK; this process does not read these
        // vars from any other thread concurrently with tests.
        unsafe {
            env::remove_var("CASE_NEXUS_API_KEY");
            env::remove_var("CASE_NEXUS_WEB_SEARCH_KEY");
            env::remove_var("CASE_NEXUS_BASE_URL");
            env::remove_var("CASE_NEXUS_MODEL");
        }
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let result = ProviderConfig::from_env();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn defaults_apply_when_overrides_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("CASE_NEXUS_API_KEY", "sk-test");
        }
        let cfg = ProviderConfig::from_env().unwrap();
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert!(!cfg.has_web_search());
        clear_env();
    }

    #[test]
    fn overrides_take_effect() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("CASE_NEXUS_API_KEY", "sk-test");
            env::set_var("CASE_NEXUS_WEB_SEARCH_KEY", "sk-search");
            env::set_var("CASE_NEXUS_BASE_URL", "http://localhost:9999/v1");
            env::set_var("CASE_NEXUS_MODEL", "custom-model");
        }
        let cfg = ProviderConfig::from_env().unwrap();
        assert_eq!(cfg.base_url, "http://localhost:9999/v1");
        assert_eq!(cfg.model, "custom-model");
        assert!(cfg.has_web_search());
        clear_env();
    }
}
