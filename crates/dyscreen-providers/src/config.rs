//! Configuration loading and collaborator factories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use dyscreen_core::engine::ScreeningConfig;
use dyscreen_core::fallback::FallbackPolicy;
use dyscreen_core::prompt::{DEFAULT_BATTERY_PROMPT, DEFAULT_SYSTEM_PROMPT};
use dyscreen_core::traits::{AiGateway, DiagnosticScorer, Identity};

use crate::gemini::GeminiProvider;
use crate::identity::StaticIdentityVerifier;
use crate::mock::MockGateway;
use crate::openai::OpenAiProvider;
use crate::scorer::{FixedScorer, HttpScorer};

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "dyscreen.toml";

/// Configuration for a single AI gateway.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Gemini {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
    },
    OpenAI {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        org_id: Option<String>,
    },
    /// Offline gateway; answers with `response` or a built-in sample battery.
    Mock {
        #[serde(default)]
        response: Option<String>,
    },
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::Gemini {
                api_key: _,
                base_url,
            } => f
                .debug_struct("Gemini")
                .field("api_key", &"***")
                .field("base_url", base_url)
                .finish(),
            ProviderConfig::OpenAI {
                api_key: _,
                base_url,
                org_id,
            } => f
                .debug_struct("OpenAI")
                .field("api_key", &"***")
                .field("base_url", base_url)
                .field("org_id", org_id)
                .finish(),
            ProviderConfig::Mock { response } => f
                .debug_struct("Mock")
                .field("response", &response.as_ref().map(|r| r.len()))
                .finish(),
        }
    }
}

/// Diagnostic scorer settings. Without a `url` the fixed scorer is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_scorer_timeout")]
    pub timeout_secs: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_scorer_timeout(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

/// One bearer token accepted by the static identity verifier.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityEntry {
    pub token: String,
    pub subject: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture_url: Option<String>,
}

impl std::fmt::Debug for IdentityEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityEntry")
            .field("token", &"***")
            .field("subject", &self.subject)
            .field("email", &self.email)
            .finish()
    }
}

/// Top-level dyscreen configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DyscreenConfig {
    /// Gateway configurations keyed by name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Gateway used for battery generation.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Model passed to the gateway.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Max retries on gateway errors.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Bound on one gateway call.
    #[serde(default = "default_ai_timeout")]
    pub ai_timeout_secs: u64,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Return answer keys to clients on session start.
    #[serde(default)]
    pub echo_answer_key: bool,
    /// Replacement for the built-in battery prompt.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Bank questions per subtest when the AI path fails.
    #[serde(default)]
    pub fallback: FallbackPolicy,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub identities: Vec<IdentityEntry>,
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_ai_timeout() -> u64 {
    60
}
fn default_scorer_timeout() -> u64 {
    30
}
fn default_database_url() -> String {
    "sqlite://dyscreen.db".to_string()
}
fn default_address() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for DyscreenConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider(),
            default_model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
            ai_timeout_secs: default_ai_timeout(),
            database_url: default_database_url(),
            echo_answer_key: false,
            prompt: None,
            fallback: FallbackPolicy::default(),
            scorer: ScorerConfig::default(),
            server: ServerConfig::default(),
            identities: Vec::new(),
        }
    }
}

impl DyscreenConfig {
    /// Engine settings derived from this configuration.
    pub fn screening_config(&self) -> ScreeningConfig {
        ScreeningConfig {
            model: self.default_model.clone(),
            prompt: self
                .prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_BATTERY_PROMPT.to_string()),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            ai_timeout: Duration::from_secs(self.ai_timeout_secs),
            scorer_timeout: Duration::from_secs(self.scorer.timeout_secs),
            fallback: self.fallback.clone(),
            echo_answer_key: self.echo_answer_key,
        }
    }

    /// The gateway named by `default_provider`.
    pub fn default_gateway(&self) -> Result<Arc<dyn AiGateway>> {
        let config = self.providers.get(&self.default_provider).with_context(|| {
            format!(
                "provider '{}' is not configured; add [providers.{}] to {CONFIG_FILE_NAME} or set DYSCREEN_GEMINI_KEY",
                self.default_provider, self.default_provider
            )
        })?;
        create_gateway(config)
    }

    /// HTTP scorer when a URL is configured, otherwise the fixed scorer.
    pub fn create_scorer(&self) -> Result<Arc<dyn DiagnosticScorer>> {
        match &self.scorer.url {
            Some(url) if !url.is_empty() => {
                Ok(Arc::new(HttpScorer::new(url, self.scorer.timeout_secs)?))
            }
            _ => {
                tracing::info!("no scorer url configured, using fixed scorer");
                Ok(Arc::new(FixedScorer::default()))
            }
        }
    }

    /// Verifier accepting the configured `[[identities]]` tokens.
    pub fn identity_verifier(&self) -> StaticIdentityVerifier {
        StaticIdentityVerifier::new(
            self.identities
                .iter()
                .map(|entry| {
                    (
                        entry.token.clone(),
                        Identity {
                            subject: entry.subject.clone(),
                            email: entry.email.clone(),
                            name: entry.name.clone(),
                            picture_url: entry.picture_url.clone(),
                        },
                    )
                })
                .collect(),
        )
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    // Substituted text is never rescanned, so a value containing `${..}` stays literal.
    let mut pos = 0;
    while let Some(offset) = result[pos..].find("${") {
        let start = pos + offset;
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..start],
            value,
            &result[start + end + 1..]
        );
        pos = start + value.len();
    }
    result
}

/// Resolve env vars in a provider config.
fn resolve_provider_config(config: &ProviderConfig) -> ProviderConfig {
    match config {
        ProviderConfig::Gemini { api_key, base_url } => ProviderConfig::Gemini {
            api_key: resolve_env_vars(api_key),
            base_url: base_url.as_ref().map(|u| resolve_env_vars(u)),
        },
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => ProviderConfig::OpenAI {
            api_key: resolve_env_vars(api_key),
            base_url: base_url.as_ref().map(|u| resolve_env_vars(u)),
            org_id: org_id.as_ref().map(|o| resolve_env_vars(o)),
        },
        ProviderConfig::Mock { response } => ProviderConfig::Mock {
            response: response.clone(),
        },
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `dyscreen.toml` in the current directory
/// 2. `~/.config/dyscreen/config.toml`
///
/// Environment variable overrides: `DYSCREEN_GEMINI_KEY`,
/// `DYSCREEN_OPENAI_KEY`, `DYSCREEN_DATABASE_URL`.
pub fn load_config() -> Result<DyscreenConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<DyscreenConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            tracing::debug!("loading config from {}", path.display());
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<DyscreenConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => DyscreenConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());

    // Resolve env vars in all provider configs
    let resolved: HashMap<String, ProviderConfig> = config
        .providers
        .iter()
        .map(|(k, v)| (k.clone(), resolve_provider_config(v)))
        .collect();
    config.providers = resolved;
    config.database_url = resolve_env_vars(&config.database_url);
    config.scorer.url = config.scorer.url.as_deref().map(resolve_env_vars);

    Ok(config)
}

/// Apply `DYSCREEN_*` overrides, reading variables through `lookup`.
pub fn apply_env_overrides(config: &mut DyscreenConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(key) = lookup("DYSCREEN_GEMINI_KEY") {
        config
            .providers
            .entry("gemini".into())
            .or_insert(ProviderConfig::Gemini {
                api_key: String::new(),
                base_url: None,
            });
        if let Some(ProviderConfig::Gemini { api_key, .. }) = config.providers.get_mut("gemini") {
            *api_key = key;
        }
    }

    if let Some(key) = lookup("DYSCREEN_OPENAI_KEY") {
        config
            .providers
            .entry("openai".into())
            .or_insert(ProviderConfig::OpenAI {
                api_key: String::new(),
                base_url: None,
                org_id: None,
            });
        if let Some(ProviderConfig::OpenAI { api_key, .. }) = config.providers.get_mut("openai") {
            *api_key = key;
        }
    }

    if let Some(url) = lookup("DYSCREEN_DATABASE_URL") {
        config.database_url = url;
    }
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("dyscreen"))
}

/// Create a gateway instance from its configuration.
pub fn create_gateway(config: &ProviderConfig) -> Result<Arc<dyn AiGateway>> {
    match config {
        ProviderConfig::Gemini { api_key, base_url } => {
            Ok(Arc::new(GeminiProvider::new(api_key, base_url.clone())?))
        }
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => Ok(Arc::new(OpenAiProvider::new(
            api_key,
            base_url.clone(),
            org_id.clone(),
        )?)),
        ProviderConfig::Mock { response } => Ok(Arc::new(match response {
            Some(text) => MockGateway::with_fixed_response(text),
            None => MockGateway::with_sample_battery(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use dyscreen_core::model::SubtestKind;

    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_DYSCREEN_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_DYSCREEN_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_DYSCREEN_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("no vars"), "no vars");
        std::env::remove_var("_DYSCREEN_TEST_VAR");
    }

    #[test]
    fn resolve_env_vars_does_not_expand_values() {
        std::env::set_var("_DYSCREEN_SELF_REF", "${_DYSCREEN_SELF_REF}");
        std::env::set_var("_DYSCREEN_OTHER_REF", "a${_DYSCREEN_SELF_REF}b");
        assert_eq!(
            resolve_env_vars("${_DYSCREEN_SELF_REF}"),
            "${_DYSCREEN_SELF_REF}"
        );
        assert_eq!(
            resolve_env_vars("x ${_DYSCREEN_OTHER_REF} ${_DYSCREEN_SELF_REF}"),
            "x a${_DYSCREEN_SELF_REF}b ${_DYSCREEN_SELF_REF}"
        );
        std::env::remove_var("_DYSCREEN_SELF_REF");
        std::env::remove_var("_DYSCREEN_OTHER_REF");
    }

    #[test]
    fn default_config() {
        let config = DyscreenConfig::default();
        assert_eq!(config.default_provider, "gemini");
        assert_eq!(config.default_model, "gemini-1.5-flash");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.database_url, "sqlite://dyscreen.db");
        assert_eq!(config.server.address, "127.0.0.1:8080");
        assert!(!config.echo_answer_key);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
default_provider = "openai"
default_model = "gpt-4.1-mini"
max_retries = 5
echo_answer_key = true
database_url = "sqlite:///tmp/screen.db"

[providers.gemini]
type = "gemini"
api_key = "AIza-test"

[providers.openai]
type = "openai"
api_key = "sk-openai"
base_url = "http://localhost:8000"

[providers.offline]
type = "mock"

[fallback]
addition = 4

[scorer]
url = "http://localhost:5000/predict"
timeout_secs = 10

[server]
address = "0.0.0.0:9000"

[[identities]]
token = "tok-ada"
subject = "sub-ada"
email = "ada@example.com"
name = "Ada"
"#;
        let config: DyscreenConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.providers.len(), 3);
        assert!(matches!(
            config.providers.get("offline"),
            Some(ProviderConfig::Mock { response: None })
        ));
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.fallback.count(SubtestKind::Addition), 4);
        assert_eq!(config.fallback.count(SubtestKind::Dot), 2);
        assert_eq!(config.scorer.timeout_secs, 10);
        assert_eq!(config.server.address, "0.0.0.0:9000");
        assert_eq!(config.identities.len(), 1);

        let screening = config.screening_config();
        assert_eq!(screening.model, "gpt-4.1-mini");
        assert_eq!(screening.max_retries, 5);
        assert_eq!(screening.scorer_timeout, Duration::from_secs(10));
        assert!(screening.echo_answer_key);
    }

    #[test]
    fn debug_masks_secrets() {
        let config = DyscreenConfig {
            providers: HashMap::from([(
                "gemini".to_string(),
                ProviderConfig::Gemini {
                    api_key: "AIza-secret".into(),
                    base_url: None,
                },
            )]),
            identities: vec![IdentityEntry {
                token: "tok-secret".into(),
                subject: "s".into(),
                email: "e".into(),
                name: "n".into(),
                picture_url: None,
            }],
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("AIza-secret"));
        assert!(!debug.contains("tok-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn env_overrides_keys_and_database() {
        let mut config = DyscreenConfig::default();
        let env = HashMap::from([
            ("DYSCREEN_GEMINI_KEY", "AIza-env"),
            ("DYSCREEN_DATABASE_URL", "sqlite::memory:"),
        ]);
        apply_env_overrides(&mut config, |name| env.get(name).map(|v| v.to_string()));

        assert!(matches!(
            config.providers.get("gemini"),
            Some(ProviderConfig::Gemini { api_key, .. }) if api_key == "AIza-env"
        ));
        assert!(!config.providers.contains_key("openai"));
        assert_eq!(config.database_url, "sqlite::memory:");
    }

    #[test]
    fn load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "default_provider = \"offline\"\n\n[providers.offline]\ntype = \"mock\""
        )
        .unwrap();

        let config = load_config_from(Some(file.path())).unwrap();
        let gateway = config.default_gateway().unwrap();
        assert_eq!(gateway.name(), "mock");
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = load_config_from(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn unconfigured_default_provider_is_explained() {
        let config = DyscreenConfig::default();
        let err = config.default_gateway().err().unwrap();
        assert!(err.to_string().contains("provider 'gemini' is not configured"));
    }

    #[tokio::test]
    async fn scorer_defaults_to_fixed() {
        let scorer = DyscreenConfig::default().create_scorer().unwrap();
        assert_eq!(scorer.name(), "fixed");
    }

    #[tokio::test]
    async fn identities_become_verifier_tokens() {
        use dyscreen_core::traits::IdentityVerifier;

        let config: DyscreenConfig = toml::from_str(
            r#"
[[identities]]
token = "tok-1"
subject = "sub-1"
email = "one@example.com"
name = "One"
"#,
        )
        .unwrap();
        let verifier = config.identity_verifier();
        assert_eq!(verifier.verify("tok-1").await.unwrap().subject, "sub-1");
    }
}
