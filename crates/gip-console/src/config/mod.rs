//! Console settings.
//!
//! Layering, lowest first: built-in defaults, the TOML file, environment
//! (`GIP_BASE_URL`, `GIP_API_PREFIX`, `.env` honoured), command-line flags.
//! Each layer is a TOML table merged over the previous one; the result is
//! deserialized once and validated.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use toml::Value;

use crate::api::normalize_prefix;
use crate::error::{Error, Result};

pub const ENV_BASE_URL: &str = "GIP_BASE_URL";
pub const ENV_API_PREFIX: &str = "GIP_API_PREFIX";

fn default_base_url() -> String {
    "http://localhost:3000".into()
}

fn default_api_prefix() -> String {
    "/v1".into()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_banner_ttl_secs() -> u64 {
    5
}

fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsoleConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_banner_ttl_secs")]
    pub banner_ttl_secs: u64,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    pub poll: PollConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_prefix: default_api_prefix(),
            request_timeout_secs: default_request_timeout_secs(),
            banner_ttl_secs: default_banner_ttl_secs(),
            download_dir: default_download_dir(),
            poll: PollConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    pub build_secs: u64,
    pub agent_secs: u64,
    pub agents_list_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            build_secs: 3,
            agent_secs: 5,
            agents_list_secs: 10,
        }
    }
}

impl ConsoleConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn banner_ttl(&self) -> Duration {
        Duration::from_secs(self.banner_ttl_secs)
    }

    pub fn build_poll(&self) -> Duration {
        Duration::from_secs(self.poll.build_secs)
    }

    pub fn agent_poll(&self) -> Duration {
        Duration::from_secs(self.poll.agent_secs)
    }

    pub fn agents_list_poll(&self) -> Duration {
        Duration::from_secs(self.poll.agents_list_secs)
    }

    fn validate(mut self) -> Result<Self> {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if self.base_url.is_empty() {
            return Err(Error::validation("base_url must not be empty"));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::validation(format!(
                "base_url must start with http:// or https:// (got '{}')",
                self.base_url
            )));
        }
        self.api_prefix = normalize_prefix(&self.api_prefix);
        for (name, secs) in [
            ("poll.build_secs", self.poll.build_secs),
            ("poll.agent_secs", self.poll.agent_secs),
            ("poll.agents_list_secs", self.poll.agents_list_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("banner_ttl_secs", self.banner_ttl_secs),
        ] {
            if secs == 0 {
                return Err(Error::validation(format!("{name} must be > 0")));
            }
        }
        Ok(self)
    }
}

/// Values that beat the file: environment and command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub api_prefix: Option<String>,
}

impl Overrides {
    /// Read `GIP_*` variables, loading `.env` first when one exists.
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        Self {
            base_url: std::env::var(ENV_BASE_URL).ok().filter(|v| !v.trim().is_empty()),
            api_prefix: std::env::var(ENV_API_PREFIX).ok(),
        }
    }

    /// `other` wins where it has a value.
    pub fn then(mut self, other: Overrides) -> Self {
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.api_prefix.is_some() {
            self.api_prefix = other.api_prefix;
        }
        self
    }

    fn to_value(&self) -> Value {
        let mut tbl = toml::value::Table::new();
        if let Some(v) = &self.base_url {
            tbl.insert("base_url".into(), Value::String(v.clone()));
        }
        if let Some(v) = &self.api_prefix {
            tbl.insert("api_prefix".into(), Value::String(v.clone()));
        }
        Value::Table(tbl)
    }
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(over_tbl)) => {
            for (k, v) in over_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn read_file(path: &Path) -> Result<Value> {
    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    toml::from_str(&data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))
}

/// Parse a config document from a string (no file, no overrides).
pub fn parse(text: &str) -> Result<ConsoleConfig> {
    let value: Value = toml::from_str(text)?;
    resolve(value, &Overrides::default())
}

fn resolve(mut value: Value, overrides: &Overrides) -> Result<ConsoleConfig> {
    merge_values(&mut value, overrides.to_value());
    let cfg: ConsoleConfig = value
        .try_into()
        .map_err(|e| Error::msg(format!("invalid config: {e}")))?;
    cfg.validate()
}

/// Load settings. An explicitly given file must exist; without one the
/// built-in defaults apply.
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<ConsoleConfig> {
    let value = match path {
        Some(p) => read_file(p)?,
        None => Value::Table(Default::default()),
    };
    let cfg = resolve(value, overrides)?;
    tracing::debug!(
        base_url = %cfg.base_url,
        api_prefix = %cfg.api_prefix,
        file = ?path,
        "config loaded"
    );
    Ok(cfg)
}
