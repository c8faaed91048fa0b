//! Configuration models for evalsynth.
//!
//! Everything here is optional: a missing config file yields defaults that
//! match the environment-variable conventions of the provider SDKs
//! (`OPENAI_API_KEY`, `OPENAI_MODEL`, ...). CLI flags override file values.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

/// Top-level configuration for evalsynth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Per-provider settings, keyed by provider name (`openai`, `anthropic`, ...)
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Batch generation settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
    Grok,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::Grok,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Grok => "grok",
        }
    }

    /// Environment variable consulted for the API key when none is configured.
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Grok => "GROK_API_KEY",
        }
    }

    /// Environment variable consulted for the model name when none is configured.
    pub fn default_model_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_MODEL",
            ProviderKind::Anthropic => "ANTHROPIC_MODEL",
            ProviderKind::Gemini => "GEMINI_MODEL",
            ProviderKind::Grok => "GROK_MODEL",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
            ProviderKind::Grok => "https://api.x.ai/v1",
        }
    }

    /// Example model names, shown when a model is missing.
    pub fn example_models(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o, gpt-4o-mini",
            ProviderKind::Anthropic => "claude-sonnet-4-20250514, claude-3-5-haiku-20241022",
            ProviderKind::Gemini => "gemini-1.5-pro, gemini-2.0-flash",
            ProviderKind::Grok => "grok-2, grok-2-mini",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown provider '{s}' (expected one of: {})",
                    ProviderKind::ALL.map(|k| k.as_str()).join(", ")
                )
            })
    }
}

/// Settings for a single provider.
///
/// Unset fields fall back to the provider's conventional environment
/// variables and public endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key (supports `${VAR}` expansion)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Model name
    #[serde(default)]
    pub model: Option<String>,

    /// Environment variable name for the model
    #[serde(default)]
    pub model_env: Option<String>,

    /// Base URL override
    #[serde(default)]
    pub base_url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts per request. 1 means a single attempt per batch window.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Share of batch windows dispatched to this provider in a multi-provider run
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    1
}

fn default_weight() -> u32 {
    1
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: None,
            model: None,
            model_env: None,
            base_url: None,
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            weight: default_weight(),
        }
    }
}

/// Fully resolved provider settings, ready to build a client from.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub kind: ProviderKind,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub weight: u32,
}

/// Batch generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Total datapoints to generate
    #[serde(default = "default_total")]
    pub total: usize,

    /// Datapoints requested per provider call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum output tokens per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Pause between consecutive calls to the same provider
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: f64,

    /// Batch windows in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_total() -> usize {
    100
}

fn default_batch_size() -> usize {
    25
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    16000
}

fn default_cooldown() -> f64 {
    2.0
}

fn default_concurrency() -> usize {
    1
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            total: default_total(),
            batch_size: default_batch_size(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            cooldown_secs: default_cooldown(),
            concurrency: default_concurrency(),
        }
    }
}

impl GenerationConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total == 0 {
            return Err(ConfigError::invalid("generation.total", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid(
                "generation.batch_size",
                "must be positive",
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::invalid(
                "generation.temperature",
                "must be between 0.0 and 2.0",
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::invalid(
                "generation.max_tokens",
                "must be positive",
            ));
        }
        if !self.cooldown_secs.is_finite() || self.cooldown_secs < 0.0 {
            return Err(ConfigError::invalid(
                "generation.cooldown_secs",
                "must be zero or positive",
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::invalid(
                "generation.concurrency",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the eval generation prompts
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,

    /// Directory for generated datasets
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directory for flattened datasets
    #[serde(default = "default_transformed_dir")]
    pub transformed_dir: PathBuf,

    /// Directory for run log files
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("dataset-generation-prompts")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_transformed_dir() -> PathBuf {
    PathBuf::from("output/transformed")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            prompts_dir: default_prompts_dir(),
            output_dir: default_output_dir(),
            transformed_dir: default_transformed_dir(),
            logs_dir: default_logs_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate everything that can be checked without touching the environment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in self.providers.keys() {
            name.parse::<ProviderKind>()
                .map_err(|_| ConfigError::UnknownProvider(name.clone()))?;
        }
        for (name, provider) in &self.providers {
            if provider.weight == 0 {
                return Err(ConfigError::invalid(
                    format!("providers.{name}.weight"),
                    "must be positive",
                ));
            }
            if provider.max_retries == 0 {
                return Err(ConfigError::invalid(
                    format!("providers.{name}.max_retries"),
                    "must be at least 1",
                ));
            }
        }
        self.generation.validate()
    }

    /// Provider settings for `kind`, or defaults when the file has no section for it.
    pub fn provider(&self, kind: ProviderKind) -> ProviderConfig {
        self.providers
            .get(kind.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Resolve credentials, model and endpoint for a provider.
    ///
    /// Explicit values win over environment variables.
    pub fn resolve_provider(&self, kind: ProviderKind) -> Result<ResolvedProvider, ConfigError> {
        let cfg = self.provider(kind);

        let api_key_env = cfg
            .api_key_env
            .clone()
            .unwrap_or_else(|| kind.default_api_key_env().to_string());
        let api_key = match &cfg.api_key {
            Some(key) => expand_env_vars(key),
            None => non_empty_env(&api_key_env).ok_or_else(|| ConfigError::MissingApiKey {
                provider: kind.to_string(),
                env_var: api_key_env.clone(),
            })?,
        };

        let model_env = cfg
            .model_env
            .clone()
            .unwrap_or_else(|| kind.default_model_env().to_string());
        let model = match &cfg.model {
            Some(model) => expand_env_vars(model),
            None => non_empty_env(&model_env).ok_or_else(|| ConfigError::MissingModel {
                provider: kind.to_string(),
                env_var: model_env.clone(),
                examples: kind.example_models().to_string(),
            })?,
        };

        let base_url = cfg
            .base_url
            .as_deref()
            .map(expand_env_vars)
            .unwrap_or_else(|| kind.default_base_url().to_string());

        Ok(ResolvedProvider {
            kind,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: cfg.timeout_secs,
            max_retries: cfg.max_retries,
            weight: cfg.weight,
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR_RE.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Load a `.env` file into the process environment.
///
/// Tries `.env` beside `config_path` first, then the working directory and
/// its parents. Variables already set in the environment are kept. A missing
/// file is not an error; returns the path that was loaded, if any.
pub fn load_env_file(config_path: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let beside_config = config_path
        .parent()
        .map(|dir| dir.join(".env"))
        .filter(|path| path.is_file());

    let loaded = match beside_config {
        Some(path) => dotenvy::from_path(&path).map(|()| path),
        None => dotenvy::dotenv(),
    };
    match loaded {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(ConfigError::EnvFile(e.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key for provider '{provider}': set {env_var} or api_key in config")]
    MissingApiKey { provider: String, env_var: String },

    #[error(
        "Missing model for provider '{provider}': set {env_var} or model in config (e.g. {examples})"
    )]
    MissingModel {
        provider: String,
        env_var: String,
        examples: String,
    },

    #[error("Unknown provider section: '{0}'")]
    UnknownProvider(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to load .env file: {0}")]
    EnvFile(String),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_file_beside_config_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "EVALSYNTH_ENV_FILE_TEST_KEY=from-env-file\n",
        )
        .unwrap();

        let loaded = load_env_file(&dir.path().join("evalsynth.toml")).unwrap();
        assert_eq!(loaded, Some(dir.path().join(".env")));
        assert_eq!(
            std::env::var("EVALSYNTH_ENV_FILE_TEST_KEY").unwrap(),
            "from-env-file"
        );
        assert_eq!(
            expand_env_vars("${EVALSYNTH_ENV_FILE_TEST_KEY}"),
            "from-env-file"
        );
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();

        assert_eq!(config.generation.total, 100);
        assert_eq!(config.generation.batch_size, 25);
        assert_eq!(config.generation.max_tokens, 16000);
        assert_eq!(config.generation.concurrency, 1);
        assert_eq!(config.paths.output_dir, PathBuf::from("output"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_provider_sections() {
        let config = Config::from_toml_str(
            r#"
[providers.anthropic]
api_key = "sk-test"
model = "claude-test"
weight = 3

[generation]
total = 40
batch_size = 10
cooldown_secs = 0.5
"#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.generation.total, 40);
        assert_eq!(config.generation.temperature, 0.7);

        let resolved = config.resolve_provider(ProviderKind::Anthropic).unwrap();
        assert_eq!(resolved.api_key, "sk-test");
        assert_eq!(resolved.model, "claude-test");
        assert_eq!(resolved.weight, 3);
        assert_eq!(resolved.max_retries, 1);
        assert_eq!(resolved.base_url, "https://api.anthropic.com");
    }

    #[test]
    fn test_resolve_from_custom_env_names() {
        let config = Config::from_toml_str(
            r#"
[providers.grok]
api_key_env = "EVALSYNTH_TEST_GROK_KEY"
model_env = "EVALSYNTH_TEST_GROK_MODEL"
base_url = "http://localhost:9000/v1/"
"#,
        )
        .unwrap();

        // SAFETY: variable names are unique to this test
        unsafe {
            std::env::set_var("EVALSYNTH_TEST_GROK_KEY", "xai-123");
            std::env::set_var("EVALSYNTH_TEST_GROK_MODEL", "grok-2");
        }

        let resolved = config.resolve_provider(ProviderKind::Grok).unwrap();
        assert_eq!(resolved.api_key, "xai-123");
        assert_eq!(resolved.model, "grok-2");
        assert_eq!(resolved.base_url, "http://localhost:9000/v1");
    }

    #[test]
    fn test_missing_model_names_env_var() {
        let config = Config::from_toml_str(
            r#"
[providers.gemini]
api_key = "g-key"
model_env = "EVALSYNTH_TEST_UNSET_MODEL"
"#,
        )
        .unwrap();

        let err = config.resolve_provider(ProviderKind::Gemini).unwrap_err();
        assert!(matches!(err, ConfigError::MissingModel { .. }));
        assert!(err.to_string().contains("EVALSYNTH_TEST_UNSET_MODEL"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config::from_toml_str("[generation]\nbatch_size = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let config = Config::from_toml_str("[providers.mistral]\nmodel = \"m\"\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("OpenAI".parse::<ProviderKind>(), Ok(ProviderKind::OpenAi));
        assert_eq!(" grok ".parse::<ProviderKind>(), Ok(ProviderKind::Grok));
        assert!("bard".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: variable name is unique to this test
        unsafe {
            std::env::set_var("EVALSYNTH_TEST_EXPAND", "value");
        }
        assert_eq!(expand_env_vars("a-${EVALSYNTH_TEST_EXPAND}-b"), "a-value-b");
        assert_eq!(
            expand_env_vars("${EVALSYNTH_TEST_NOT_SET}"),
            "${EVALSYNTH_TEST_NOT_SET}"
        );
    }
}
