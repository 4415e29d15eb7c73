//! Application configuration.
//!
//! Configuration is loaded once at startup into an [`AppConfig`] value and
//! passed to whatever needs it. Sources, lowest precedence first:
//! built-in defaults, the main TOML file, the secrets TOML file, then
//! `POMO__`-prefixed environment variables (`POMO__CREDENTIALS__AUTH_TOKEN`).
//!
//! The bare `AUTH_TOKEN` and `CLIENTID` variables are still honoured below
//! every other source, so older deployments keep working.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;

const APP_NAME: &str = "pomo";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "POMO";

/// Separator between nested keys in environment overrides.
pub const ENV_SEPARATOR: &str = "__";

const DEFAULT_DURATION: &str = "25m";
const DEFAULT_MAX_DURATION: &str = "4h";
const REDACTED: &str = "********";

/// Unprefixed credential variables, mapped to the key they fill in.
pub const LEGACY_ENV_ALIASES: [(&str, &str); 2] = [
    ("AUTH_TOKEN", "credentials.auth_token"),
    ("CLIENTID", "credentials.client_id"),
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("missing required config option {key:?} (set {env} in the environment)")]
    MissingRequired { key: &'static str, env: String },

    #[error("invalid duration for {key}: {value:?}")]
    InvalidDuration { key: &'static str, value: String },

    #[error("unable to determine configuration directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub profile: String,
    pub logging: LoggingConfig,
    pub timer: TimerConfig,
    pub credentials: Credentials,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: "default".to_string(),
            logging: LoggingConfig::default(),
            timer: TimerConfig::default(),
            credentials: Credentials::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON log lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Session length used when a start request names none
    pub default_duration: String,
    /// Longest session a start request may ask for
    pub max_duration: String,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            default_duration: DEFAULT_DURATION.to_string(),
            max_duration: DEFAULT_MAX_DURATION.to_string(),
        }
    }
}

impl TimerConfig {
    pub fn default_duration(&self) -> Result<Duration, ConfigError> {
        parse_setting("timer.default_duration", &self.default_duration)
    }

    pub fn max_duration(&self) -> Result<Duration, ConfigError> {
        parse_setting("timer.max_duration", &self.max_duration)
    }
}

fn parse_setting(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        key,
        value: value.to_string(),
    })
}

/// Chat platform credentials. Usually supplied by the secrets file or the
/// environment rather than the main config file.
///
/// The console driver does not talk to a chat platform, so `run` only warns
/// when these are missing. [`AppConfig::validate`] still treats them as
/// required for a deployment that does.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub auth_token: Option<String>,
}

/// Where [`AppConfig::load`] reads from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub config_file: Option<PathBuf>,
    pub secrets_file: Option<PathBuf>,
    /// Explicit environment; `None` reads the process environment
    pub env: Option<config::Map<String, String>>,
}

impl ConfigSources {
    /// Resolve file locations, defaulting to `config.toml` and `secrets.toml`
    /// in the user's config directory. The secrets file defaults to a sibling
    /// of the config file.
    pub fn discover(
        config_file: Option<PathBuf>,
        secrets_file: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let config_file = match config_file {
            Some(path) => path,
            None => default_config_dir()?.join("config.toml"),
        };
        let secrets_file = secrets_file.unwrap_or_else(|| {
            config_file
                .parent()
                .map(|dir| dir.join("secrets.toml"))
                .unwrap_or_else(|| PathBuf::from("secrets.toml"))
        });

        Ok(Self {
            config_file: Some(config_file),
            secrets_file: Some(secrets_file),
            env: None,
        })
    }

    /// Read an unprefixed variable from the injected map or the process.
    fn env_value(&self, name: &str) -> Option<String> {
        let value = match &self.env {
            Some(vars) => vars.get(name).cloned(),
            None => env::var(name).ok(),
        };
        value.filter(|v| !v.is_empty())
    }
}

impl AppConfig {
    /// Load configuration from all sources. Missing files are skipped.
    pub fn load(sources: &ConfigSources) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("profile", "default")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("timer.default_duration", DEFAULT_DURATION)?
            .set_default("timer.max_duration", DEFAULT_MAX_DURATION)?;

        let has_secrets = sources.secrets_file.as_deref().is_some_and(Path::exists);
        for (var, key) in LEGACY_ENV_ALIASES {
            if let Some(value) = sources.env_value(var) {
                if !has_secrets {
                    warn!("No secrets file, using {var} from the environment for {key}");
                }
                builder = builder.set_default(key, value)?;
            }
        }

        for path in [&sources.config_file, &sources.secrets_file]
            .into_iter()
            .flatten()
        {
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let mut environment = Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true);
        if let Some(vars) = &sources.env {
            environment = environment.source(Some(vars.clone()));
        }

        let config: AppConfig = builder.add_source(environment).build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that credentials are present and durations parse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_credentials()?;
        self.timer.default_duration()?;
        self.timer.max_duration()?;
        Ok(())
    }

    /// Check that every chat credential is set and non-empty.
    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        let required = [
            ("credentials.client_id", &self.credentials.client_id),
            ("credentials.client_secret", &self.credentials.client_secret),
            ("credentials.auth_token", &self.credentials.auth_token),
        ];

        for (key, value) in required {
            if value.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::MissingRequired {
                    key,
                    env: env_var_for(key),
                });
            }
        }
        Ok(())
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mask = |value: &Option<String>| value.as_ref().map(|_| REDACTED.to_string());
        let mut config = self.clone();
        config.credentials = Credentials {
            client_id: self.credentials.client_id.clone(),
            client_secret: mask(&self.credentials.client_secret),
            auth_token: mask(&self.credentials.auth_token),
        };
        config
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Environment variable that overrides a dotted config key.
pub fn env_var_for(key: &str) -> String {
    let mut name = ENV_PREFIX.to_string();
    for part in key.split('.') {
        name.push_str(ENV_SEPARATOR);
        name.push_str(&part.to_ascii_uppercase());
    }
    name
}

/// Write a default config file, creating parent directories as needed.
pub fn write_default(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push('\n');
    body.push_str("# File: ");
    body.push_str(&path.display().to_string());
    body.push('\n');
    body.push_str("# Credentials belong in secrets.toml or ");
    body.push_str(&env_var_for("credentials.auth_token"));
    body.push_str(" style environment variables.\n\n");
    body.push_str(&AppConfig::default().to_toml()?);

    fs::write(path, body)?;
    Ok(())
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or(ConfigError::NoConfigDir)
}
