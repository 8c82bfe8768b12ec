use serde::Deserialize;
use std::time::Duration;
use std::{env, fmt, fs, io, path::PathBuf};
use toml::de::Error as TomlError;

use wedge_lsp::{LspConfig, ServerConfig};
use wedge_providers::{ApiConfig, Provider};
use wedge_types::{CONTEXT_RADIUS, MAX_DEPTH, ObligationSyntax};

use crate::driver::DriverOptions;
use crate::feedback::SeverityClassifier;
use crate::orchestrator::OrchestratorConfig;

/// Contents of `~/.wedge/config.toml`. Every section is optional.
///
/// ```toml
/// [decompose]
/// max_depth = 5
///
/// [oracle]
/// provider = "claude"
/// api_key = "${ANTHROPIC_API_KEY}"
///
/// [lsp.servers.dafny]
/// command = "dafny"
/// args = ["server"]
/// language_id = "dafny"
/// file_extensions = ["dfy"]
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WedgeConfig {
    pub decompose: DecomposeConfig,
    pub syntax: ObligationSyntax,
    pub classifier: SeverityClassifier,
    pub oracle: OracleConfig,
    /// Language servers acting as the verifier. Defaults to `dafny server`.
    pub lsp: Option<LspConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: TomlError,
    },
    #[error("no API key for {provider}: set {env_var} or [oracle] api_key")]
    MissingApiKey {
        provider: Provider,
        env_var: &'static str,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::MissingApiKey { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DecomposeConfig {
    pub max_depth: u32,
    /// Lines of context on each side of the target in the oracle prompt.
    pub context_radius: u32,
    /// Cap on how much of the buffer is sent to the oracle.
    pub max_buffer_bytes: usize,
    pub verification_timeout_secs: u64,
    /// Wait for further diagnostics this long before acting; 0 disables.
    pub settle_millis: u64,
}

impl Default for DecomposeConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
            context_radius: CONTEXT_RADIUS,
            max_buffer_bytes: 64 * 1024,
            verification_timeout_secs: 120,
            settle_millis: 750,
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub provider: Provider,
    pub model: Option<String>,
    /// Literal key or `${ENV_VAR}` reference. Falls back to the provider's
    /// standard environment variable.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAI,
            model: None,
            api_key: None,
            base_url: None,
            timeout_secs: 60,
            temperature: 0.2,
        }
    }
}

// Manual Debug impl to prevent leaking API keys in logs.
impl fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field(
                "api_key",
                &if self.api_key.is_some() { "[REDACTED]" } else { "None" },
            )
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl OracleConfig {
    /// Resolve the provider settings, including the API key.
    pub fn api_config(&self) -> Result<ApiConfig, ConfigError> {
        let configured = self
            .api_key
            .as_deref()
            .map(expand_env_vars)
            .filter(|key| !key.trim().is_empty());
        let key = configured
            .or_else(|| env::var(self.provider.env_var()).ok())
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey {
                provider: self.provider,
                env_var: self.provider.env_var(),
            })?;

        let model = self
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string());
        let mut config = ApiConfig::new(self.provider, key.trim(), model)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_temperature(self.temperature);
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(expand_env_vars(base_url));
        }
        Ok(config)
    }
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut i = 0;

    while i < value.len() {
        if value[i..].starts_with("${") {
            let start = i + 2;
            if let Some(end_rel) = value[start..].find('}') {
                let end = start + end_rel;
                let var = &value[start..end];
                if !var.is_empty() {
                    let replacement = env::var(var).unwrap_or_default();
                    out.push_str(&replacement);
                }
                i = end + 1;
                continue;
            }
        }

        let Some(ch) = value[i..].chars().next() else {
            break;
        };
        out.push(ch);
        i += ch.len_utf8();
    }

    out
}

impl WedgeConfig {
    /// Load the user config, or `None` when there is none.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(path).map(Some)
    }

    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse { path, source: err })
            }
        }
    }

    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_depth: self.decompose.max_depth,
            context_radius: self.decompose.context_radius,
            syntax: self.syntax.clone(),
        }
    }

    #[must_use]
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            verification_timeout: Duration::from_secs(self.decompose.verification_timeout_secs),
            settle: Duration::from_millis(self.decompose.settle_millis),
        }
    }

    /// Configured language servers, or the Dafny server when none are set.
    #[must_use]
    pub fn lsp_config(&self) -> LspConfig {
        match &self.lsp {
            Some(lsp) if !lsp.is_empty() => lsp.clone(),
            _ => LspConfig::default().with_server("dafny", ServerConfig::dafny()),
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".wedge").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wedge_lsp::DiagnosticSeverity;

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("hello world"), "hello world");
    }

    #[test]
    fn expand_env_vars_single_var() {
        unsafe {
            env::set_var("WEDGE_TEST_CONFIG_VAR", "replaced");
        }
        let result = expand_env_vars("prefix ${WEDGE_TEST_CONFIG_VAR} suffix");
        assert_eq!(result, "prefix replaced suffix");
        unsafe {
            env::remove_var("WEDGE_TEST_CONFIG_VAR");
        }
    }

    #[test]
    fn expand_env_vars_missing_var_becomes_empty() {
        unsafe {
            env::remove_var("WEDGE_MISSING_VAR_FOR_TEST");
        }
        let result = expand_env_vars("before ${WEDGE_MISSING_VAR_FOR_TEST} after");
        assert_eq!(result, "before  after");
    }

    #[test]
    fn expand_env_vars_unclosed_brace_preserved() {
        assert_eq!(expand_env_vars("test ${UNCLOSED"), "test ${UNCLOSED");
        assert_eq!(expand_env_vars("naïve ${} ok"), "naïve  ok");
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: WedgeConfig = toml::from_str("").unwrap();
        assert_eq!(config.decompose, DecomposeConfig::default());
        assert_eq!(config.syntax, ObligationSyntax::default());
        assert_eq!(config.oracle.provider, Provider::OpenAI);
        assert_eq!(config.orchestrator_config(), OrchestratorConfig::default());
        assert_eq!(config.driver_options(), DriverOptions::default());
    }

    #[test]
    fn parse_full_config() {
        let config: WedgeConfig = toml::from_str(
            r#"
[decompose]
max_depth = 3
settle_millis = 0

[syntax]
keyword = "check"

[classifier]
min_severity = "warning"

[oracle]
provider = "claude"
model = "claude-opus-4"
timeout_secs = 10

[lsp.servers.boogie]
command = "boogie-lsp"
language_id = "boogie"
file_extensions = ["bpl"]
"#,
        )
        .unwrap();

        assert_eq!(config.decompose.max_depth, 3);
        assert_eq!(config.decompose.context_radius, CONTEXT_RADIUS);
        assert!(config.driver_options().settle.is_zero());
        assert_eq!(config.syntax.keyword, "check");
        assert_eq!(config.syntax.terminator, ";");
        assert_eq!(config.classifier.min_severity, DiagnosticSeverity::Warning);
        assert_eq!(config.oracle.provider, Provider::Claude);
        assert_eq!(config.oracle.model.as_deref(), Some("claude-opus-4"));
        let lsp = config.lsp_config();
        assert!(lsp.servers().contains_key("boogie"));
        assert!(!lsp.servers().contains_key("dafny"));
    }

    #[test]
    fn lsp_defaults_to_dafny() {
        let lsp = WedgeConfig::default().lsp_config();
        let dafny = &lsp.servers()["dafny"];
        assert_eq!(dafny.command(), "dafny");
        assert_eq!(dafny.args(), ["server".to_string()]);
    }

    #[test]
    fn api_config_expands_key_reference() {
        unsafe {
            env::set_var("WEDGE_TEST_ORACLE_KEY", "sk-from-env");
        }
        let oracle = OracleConfig {
            provider: Provider::Claude,
            api_key: Some("${WEDGE_TEST_ORACLE_KEY}".to_string()),
            base_url: Some("http://127.0.0.1:9/v1/".to_string()),
            ..OracleConfig::default()
        };
        let api = oracle.api_config().unwrap();
        assert_eq!(api.api_key(), "sk-from-env");
        assert_eq!(api.model(), Provider::Claude.default_model());
        assert_eq!(api.base_url(), "http://127.0.0.1:9/v1");
        unsafe {
            env::remove_var("WEDGE_TEST_ORACLE_KEY");
        }
    }

    #[test]
    fn api_config_requires_a_key() {
        let oracle = OracleConfig {
            api_key: Some("${WEDGE_TEST_UNSET_ORACLE_KEY}".to_string()),
            ..OracleConfig::default()
        };
        // Only meaningful when the provider's own variable is unset too.
        if env::var(oracle.provider.env_var()).is_err() {
            assert!(matches!(
                oracle.api_config(),
                Err(ConfigError::MissingApiKey { .. })
            ));
        }
    }

    #[test]
    fn oracle_debug_redacts_key() {
        let oracle = OracleConfig {
            api_key: Some("sk-secret".to_string()),
            ..OracleConfig::default()
        };
        let debug = format!("{oracle:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-secret"));
    }

    #[test]
    fn config_error_path_accessor() {
        let path = PathBuf::from("/test/path");
        let err = ConfigError::Read {
            path: path.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(err.path(), Some(&path));

        let parse_err = ConfigError::Parse {
            path: path.clone(),
            source: toml::from_str::<WedgeConfig>("invalid toml [").unwrap_err(),
        };
        assert_eq!(parse_err.path(), Some(&path));
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[decompose]\nmax_depth = \"five\"\n").unwrap();
        assert!(matches!(
            WedgeConfig::load_from(path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
