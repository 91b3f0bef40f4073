//! Settings of greeting programs: how long the launched task delays, how long fire-and-forget
//! variant waits before exit and how many scheduling threads serve tasks.
//!
//! Settings are layered: defaults, then TOML file named by `LAUNCHPAD_CONFIG`, then environment
//! variables `LAUNCHPAD_DELAY_MS`, `LAUNCHPAD_GRACE_MS` and `LAUNCHPAD_PARALLELISM`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::runtime;

pub const CONFIG_ENV: &str = "LAUNCHPAD_CONFIG";
pub const DELAY_ENV: &str = "LAUNCHPAD_DELAY_MS";
pub const GRACE_ENV: &str = "LAUNCHPAD_GRACE_MS";
pub const PARALLELISM_ENV: &str = "LAUNCHPAD_PARALLELISM";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Delay of launched task before it prints "World".
    pub delay: Duration,
    /// Blocking sleep of fire-and-forget variant before exit.
    pub grace: Duration,
    /// Scheduling threads, defaults to available parallelism.
    pub parallelism: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config { delay: Duration::from_millis(1000), grace: Duration::from_millis(2000), parallelism: None }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    delay_ms: Option<u64>,
    grace_ms: Option<u64>,
    parallelism: Option<usize>,
}

impl Config {
    /// Loads config from process environment.
    pub fn load() -> Result<Config, ConfigError> {
        Config::load_from(|name| std::env::var(name).ok())
    }

    /// Loads config with environment lookup `env`.
    pub fn load_from(env: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        if let Some(path) = env(CONFIG_ENV) {
            config.merge_file(Path::new(&path))?;
        }
        if let Some(value) = env(DELAY_ENV) {
            config.delay = Duration::from_millis(parse_env(DELAY_ENV, value)?);
        }
        if let Some(value) = env(GRACE_ENV) {
            config.grace = Duration::from_millis(parse_env(GRACE_ENV, value)?);
        }
        if let Some(value) = env(PARALLELISM_ENV) {
            let parallelism = parse_env(PARALLELISM_ENV, value)?;
            config.parallelism = Some(check_parallelism(PARALLELISM_ENV, parallelism)?);
        }
        Ok(config)
    }

    /// Loads config from process environment, falls back to defaults on error.
    pub fn load_or_default() -> Config {
        match Config::load() {
            Ok(config) => {
                tracing::debug!(?config, "config loaded");
                config
            },
            Err(err) => {
                tracing::warn!("{}, using defaults", err);
                Config::default()
            },
        }
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: PathBuf::from(path), source })?;
        let file: FileConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse { path: PathBuf::from(path), source })?;
        if let Some(millis) = file.delay_ms {
            self.delay = Duration::from_millis(millis);
        }
        if let Some(millis) = file.grace_ms {
            self.grace = Duration::from_millis(millis);
        }
        if let Some(parallelism) = file.parallelism {
            self.parallelism = Some(check_parallelism("parallelism", parallelism)?);
        }
        Ok(())
    }

    /// Runtime builder with configured parallelism.
    pub fn runtime(&self) -> runtime::Builder {
        let mut builder = runtime::Builder::default();
        if let Some(parallelism) = self.parallelism {
            builder.parallelism(parallelism);
        }
        builder
    }
}

fn parse_env<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value.trim().parse() {
        Ok(parsed) => Ok(parsed),
        Err(err) => Err(ConfigError::Invalid { name, reason: err.to_string(), value }),
    }
}

fn check_parallelism(name: &'static str, parallelism: usize) -> Result<usize, ConfigError> {
    if parallelism == 0 {
        return Err(ConfigError::Invalid { name, value: "0".to_string(), reason: "must be positive".to_string() });
    }
    Ok(parallelism)
}
