//! Tool-wide configuration from frankenrepo.toml
//!
//! Holds defaults for every invocation. Command-line flags override these
//! values and the merged result becomes an immutable [`ExecutorConfig`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FrankenError, Result};
use crate::executor::{ExecutorConfig, FailurePolicy, OutputMode};
use crate::graph::DependencyPolicy;

/// Config file name searched for in the home directories
pub const CONFIG_FILE: &str = "frankenrepo.toml";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

/// Global settings for frankenrepo behavior
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Default parallelism level (0 = number of CPUs)
    #[serde(default)]
    pub parallelism: usize,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub dependency_policy: DependencyPolicy,

    /// Cancel a run after this many seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Run commands through the shell
    #[serde(default)]
    pub shell: bool,

    #[serde(default)]
    pub output: OutputMode,
}

impl Config {
    /// Load configuration from the specified path or search for it.
    ///
    /// An explicit path must exist; when searching, a missing file simply
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let config_path = match path {
            Some(p) => {
                if p.exists() {
                    Some(p.to_path_buf())
                } else {
                    return Err(FrankenError::ConfigNotFound {
                        searched: vec![p.to_path_buf()],
                    });
                }
            }
            None => Self::find_config(),
        };

        let Some(config_path) = config_path else {
            return Ok((Self::default(), None));
        };

        let content = std::fs::read_to_string(&config_path)?;
        let config = Self::parse(&content, &config_path)?;

        Ok((config, Some(config_path)))
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| FrankenError::ConfigParse {
            source: e,
            path: path.to_path_buf(),
        })
    }

    /// Search `$HOME`, `$HOME/.config` and `$HOME/.config/frankenrepo`
    fn find_config() -> Option<PathBuf> {
        let dirs = directories::BaseDirs::new()?;
        Self::search_paths(dirs.home_dir())
            .into_iter()
            .find(|candidate| candidate.exists())
    }

    fn search_paths(home: &Path) -> Vec<PathBuf> {
        vec![
            home.join(CONFIG_FILE),
            home.join(".config").join(CONFIG_FILE),
            home.join(".config").join("frankenrepo").join(CONFIG_FILE),
        ]
    }

    /// Executor settings before any command-line overrides
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            parallelism: self.settings.parallelism,
            failure_policy: self.settings.failure_policy,
            timeout: self.settings.timeout_secs.map(Duration::from_secs),
            shell: self.settings.shell,
            output: self.settings.output,
            progress: false,
        }
    }
}
