//! Process backend configuration

use std::path::PathBuf;

/// Configuration for the process backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Directory steps run in; the current directory if unset
    pub working_dir: Option<PathBuf>,

    /// Timeout for a task in seconds, used when its contract sets none
    pub timeout_secs: u64,

    /// Extra environment variables for every step
    pub env: Vec<(String, String)>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            timeout_secs: 3600,
            env: Vec::new(),
        }
    }
}

impl BackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }
}
