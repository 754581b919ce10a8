use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

pub const ENV_BASE_URL: &str = "JIRA_BASE_URL";
pub const ENV_EMAIL: &str = "JIRA_EMAIL";
pub const ENV_TIMEOUT_SECS: &str = "JIRA_TIMEOUT_SECS";
/// Primary token variable; always wins when set.
pub const ENV_API_TOKEN: &str = "JIRA_API_TOKEN";
/// Consulted only when the primary token variable is unset or empty.
pub const ENV_API_TOKEN_FALLBACK: &str = "ATLASSIAN_API_TOKEN";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Optional on-disk defaults. The API token is never read from disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Load configuration from the provided path or the default config file.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let path = path
            .map(|p| p.as_ref().to_path_buf())
            .unwrap_or_else(FileConfig::default_path);

        if !path.exists() {
            debug!(path = %path.display(), "No config file, using environment only");
            return Ok(FileConfig::default());
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Unable to read config file at {}", path.display()))?;

        serde_yaml::from_str(&raw)
            .with_context(|| format!("Malformed YAML in config file {}", path.display()))
    }

    fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".jira-cli");
        path.push("config.yaml");
        path
    }
}

/// Validated connection settings handed to the request executor.
#[derive(Clone)]
pub struct Settings {
    pub base_url: Url,
    pub email: String,
    pub api_token: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("base_url", &self.base_url.as_str())
            .field("email", &self.email)
            .field("api_token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Settings {
    /// Reads the config file, then applies the process environment on top.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let file = FileConfig::load(path)?;
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merges file values with variables returned by `env`. Environment
    /// values win; blank values count as unset, except for the API token
    /// where only an empty primary falls through to the fallback.
    pub fn resolve<F>(file: FileConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = |key: &str| env(key).filter(|v| !v.is_empty());
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let base_url = env(ENV_BASE_URL)
            .or(file.base_url)
            .ok_or_else(|| anyhow!("No Jira site configured. Set {ENV_BASE_URL}."))?;
        let base_url = validate_base_url(&base_url)?;

        let email = env(ENV_EMAIL)
            .or(file.email)
            .ok_or_else(|| anyhow!("No account email configured. Set {ENV_EMAIL}."))?;

        let api_token = token(ENV_API_TOKEN)
            .or_else(|| token(ENV_API_TOKEN_FALLBACK))
            .ok_or_else(|| {
                anyhow!("No API token found. Set {ENV_API_TOKEN} (or {ENV_API_TOKEN_FALLBACK}).")
            })?;

        let timeout_secs = match env(ENV_TIMEOUT_SECS) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{ENV_TIMEOUT_SECS} must be a whole number of seconds"))?,
            None => file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        if timeout_secs == 0 {
            bail!("Request timeout must be greater than zero");
        }

        Ok(Settings {
            base_url,
            email: email.trim().to_string(),
            api_token,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// The executor only talks to sites over https with a real host.
pub fn validate_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid base URL '{raw}'"))?;

    if url.scheme() != "https" {
        bail!("Base URL '{raw}' must use https");
    }
    if url.host_str().map_or(true, str::is_empty) {
        bail!("Base URL '{raw}' has no host");
    }

    Ok(url)
}
