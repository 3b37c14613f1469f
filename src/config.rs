use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default request body cap (16 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub attachments: AttachmentsConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub require_api_key: bool,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_api_key: true,
            api_key_env: default_api_key_env(),
        }
    }
}

impl AuthConfig {
    /// The expected `X-API-Key` value, or `None` when the check is off.
    ///
    /// # Errors
    ///
    /// Fails when the check is on but the key variable is unset or empty.
    pub fn resolve_key(&self) -> Result<Option<String>> {
        if !self.require_api_key {
            return Ok(None);
        }
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.is_empty() => Ok(Some(key)),
            _ => bail!(
                "auth.require_api_key is set but {} is not; set it or disable the check",
                self.api_key_env
            ),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            base_url: default_base_url(),
            api_key_env: default_openai_key_env(),
        }
    }
}

fn default_completion_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct AttachmentsConfig {
    #[serde(default)]
    pub extract_documents: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_provider")]
    pub provider: String,
    #[serde(default)]
    pub fixture: Option<PathBuf>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub emulator_host: Option<String>,
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            fixture: None,
            project_id: None,
            database: default_database(),
            emulator_host: None,
            access_token_env: default_access_token_env(),
        }
    }
}

fn default_store_provider() -> String {
    "memory".to_string()
}
fn default_database() -> String {
    "(default)".to_string()
}
fn default_access_token_env() -> String {
    "FIRESTORE_ACCESS_TOKEN".to_string()
}

impl Config {
    /// All defaults. Used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Applies `PORT` (port of `server.bind`) and `FIRESTORE_EMULATOR_HOST`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            let host = self
                .server
                .bind
                .rsplit_once(':')
                .map(|(h, _)| h.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.bind = format!("{}:{}", host, port);
        }
        if self.store.emulator_host.is_none() {
            if let Ok(host) = std::env::var("FIRESTORE_EMULATOR_HOST") {
                self.store.emulator_host = Some(host);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.max_upload_bytes == 0 {
            bail!("server.max_upload_bytes must be > 0");
        }

        if self.completion.max_tokens == 0 {
            bail!("completion.max_tokens must be > 0");
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            bail!("completion.temperature must be in [0.0, 2.0]");
        }
        match self.completion.provider.as_str() {
            "openai" | "disabled" => {}
            other => bail!(
                "Unknown completion provider: '{}'. Must be openai or disabled.",
                other
            ),
        }

        match self.store.provider.as_str() {
            "memory" => {}
            "firestore" => {
                if self.store.project_id.as_deref().unwrap_or("").is_empty() {
                    bail!("store.project_id must be set when provider is 'firestore'");
                }
            }
            other => bail!(
                "Unknown store provider: '{}'. Must be memory or firestore.",
                other
            ),
        }

        Ok(())
    }
}

/// Human-readable "16MB"-style size for display.
pub fn format_size(bytes: usize) -> String {
    const MB: usize = 1024 * 1024;
    if bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else {
        format!("{}B", bytes)
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config = parse_config(&content)?;
    config.apply_env_overrides();
    Ok(config)
}
