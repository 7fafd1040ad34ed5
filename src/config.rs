//! Configuration: JSON file, environment overrides, and defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::orchestrator::KeywordTable;
use crate::provider::ProviderSettings;

/// Provider endpoint override.
pub const ENV_ENDPOINT: &str = "CADENZA_ENDPOINT";
/// API key override.
pub const ENV_API_KEY: &str = "CADENZA_API_KEY";
/// API key used when [`ENV_API_KEY`] is unset.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Generator model override.
pub const ENV_MODEL: &str = "CADENZA_MODEL";
/// Classifier model override.
pub const ENV_CLASSIFIER_MODEL: &str = "CADENZA_CLASSIFIER_MODEL";
/// Temperature override.
pub const ENV_TEMPERATURE: &str = "CADENZA_TEMPERATURE";
/// Output token cap override.
pub const ENV_MAX_TOKENS: &str = "CADENZA_MAX_TOKENS";
/// Per-call provider timeout override, in seconds.
pub const ENV_TIMEOUT_SECS: &str = "CADENZA_TIMEOUT_SECS";
/// Keyword table path override.
pub const ENV_KEYWORDS: &str = "CADENZA_KEYWORDS";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenzaConfig {
    /// Provider connection and models.
    pub provider: ProviderSettings,
    /// Keyword table file; the embedded table is used when unset.
    pub keywords_path: Option<PathBuf>,
    /// Deadline for a whole request, in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Whether the CLI streams actions by default.
    pub streaming: bool,
}

impl Default for CadenzaConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            keywords_path: None,
            request_timeout_secs: Some(120),
            streaming: false,
        }
    }
}

impl CadenzaConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Request deadline.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Keyword table from `keywords_path`, or the embedded one.
    pub fn keyword_table(&self) -> ConfigResult<KeywordTable> {
        match &self.keywords_path {
            Some(path) => KeywordTable::load(path),
            None => Ok(KeywordTable::embedded()),
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        if let Some(endpoint) = get(ENV_ENDPOINT) {
            self.provider.endpoint = endpoint.trim().trim_end_matches('/').to_string();
        }
        if let Some(key) = get(ENV_API_KEY).or_else(|| get(ENV_OPENAI_API_KEY)) {
            self.provider.api_key = Some(key.trim().to_string());
        }
        if let Some(model) = get(ENV_MODEL) {
            self.provider.model = model.trim().to_string();
        }
        if let Some(model) = get(ENV_CLASSIFIER_MODEL) {
            self.provider.classifier_model = model.trim().to_string();
        }
        if let Some(value) = get(ENV_TEMPERATURE) {
            self.provider.temperature = Some(parse_env(ENV_TEMPERATURE, &value)?);
        }
        if let Some(value) = get(ENV_MAX_TOKENS) {
            self.provider.max_output_tokens = Some(parse_env(ENV_MAX_TOKENS, &value)?);
        }
        if let Some(value) = get(ENV_TIMEOUT_SECS) {
            self.provider.timeout_secs = parse_env(ENV_TIMEOUT_SECS, &value)?;
        }
        if let Some(path) = get(ENV_KEYWORDS) {
            self.keywords_path = Some(PathBuf::from(path.trim()));
        }
        Ok(())
    }
}

fn parse_env<T>(var: &'static str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::Env {
        var,
        reason: format!("`{value}`: {err}"),
    })
}

/// Load configuration from a JSON file and apply environment overrides.
/// Missing fields take their defaults.
pub fn load_config(path: &Path) -> ConfigResult<CadenzaConfig> {
    let data = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: CadenzaConfig = serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.apply_env()?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Write configuration as pretty JSON. The API key is never written.
pub fn write_config(path: &Path, config: &CadenzaConfig) -> ConfigResult<()> {
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_vec_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json).map_err(io_error)?;
    fs::rename(&tmp, path).map_err(io_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn overrides_apply_and_blank_values_are_ignored() {
        let mut config = CadenzaConfig::default();
        config
            .apply_overrides(lookup(&[
                (ENV_MODEL, "gpt-5-mini"),
                (ENV_CLASSIFIER_MODEL, "  "),
                (ENV_OPENAI_API_KEY, "sk-test"),
                (ENV_MAX_TOKENS, "512"),
                (ENV_ENDPOINT, "http://localhost:8080/v1/"),
            ]))
            .expect("overrides");
        assert_eq!(config.provider.model, "gpt-5-mini");
        assert_eq!(config.provider.classifier_model, "gpt-4.1-mini");
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.provider.max_output_tokens, Some(512));
        assert_eq!(config.provider.endpoint, "http://localhost:8080/v1");
    }

    #[test]
    fn cadenza_key_wins_over_openai_key() {
        let mut config = CadenzaConfig::default();
        config
            .apply_overrides(lookup(&[(ENV_API_KEY, "sk-cadenza"), (ENV_OPENAI_API_KEY, "sk-openai")]))
            .expect("overrides");
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-cadenza"));
    }

    #[test]
    fn unparsable_override_is_an_error() {
        let mut config = CadenzaConfig::default();
        let err = config
            .apply_overrides(lookup(&[(ENV_TEMPERATURE, "warm")]))
            .expect_err("not a number");
        assert!(matches!(err, ConfigError::Env { var: ENV_TEMPERATURE, .. }));
    }
}
