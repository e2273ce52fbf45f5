//! Session defaults for a client
//!
//! The library reads no environment variables; the `singclient` binary maps
//! its own variables onto this struct.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::command::DEFAULT_BINARY;
use crate::executor::{default_environment, ExecOptions};

/// Client-wide configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Runtime binary, `singularity` by default
    pub binary: String,
    /// Run every runtime call behind `sudo`
    pub sudo: bool,
    /// Start runtime calls from `environment` instead of inheriting ours
    pub clean_env: bool,
    /// Environment for clean runs
    pub environment: BTreeMap<String, String>,
    /// Parent of the per-instance scratch directories
    pub scratch_root: PathBuf,
    /// Kill runtime calls that take longer than this
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            sudo: false,
            clean_env: true,
            environment: default_environment(),
            scratch_root: env::temp_dir(),
            timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn with_clean_env(mut self, clean_env: bool) -> Self {
        self.clean_env = clean_env;
        self
    }

    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_scratch_root(mut self, scratch_root: impl Into<PathBuf>) -> Self {
        self.scratch_root = scratch_root.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Environment an instance is started with, captured now
    pub fn snapshot_environment(&self) -> BTreeMap<String, String> {
        if self.clean_env {
            self.environment.clone()
        } else {
            env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect()
        }
    }

    /// Options for runtime calls made on behalf of the session
    pub fn exec_options(&self) -> ExecOptions {
        ExecOptions {
            clean_env: self.clean_env,
            env: if self.clean_env {
                self.environment.clone()
            } else {
                BTreeMap::new()
            },
            timeout: self.timeout,
            ..ExecOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.binary, "singularity");
        assert!(!config.sudo);
        assert!(config.clean_env);
        assert!(config.timeout.is_none());
        assert!(config.environment.contains_key("PATH"));
    }

    #[test]
    fn test_exec_options_follow_clean_env() {
        let options = ClientConfig::default().exec_options();
        assert!(options.clean_env);
        assert!(options.env.contains_key("PATH"));

        let inherited = ClientConfig::default().with_clean_env(false).exec_options();
        assert!(!inherited.clean_env);
        assert!(inherited.env.is_empty());
    }

    #[test]
    fn test_snapshot_inherits_when_not_clean() {
        let config = ClientConfig::default().with_clean_env(false);
        let snapshot = config.snapshot_environment();
        if let Ok(path) = env::var("PATH") {
            assert_eq!(snapshot.get("PATH"), Some(&path));
        }
    }
}
