//! Executor configuration files.
//!
//! One YAML document selects a backend with `backend:` and carries that
//! backend's settings alongside it:
//!
//! ```yaml
//! backend: ssh
//! host: build-01
//! user: deploy
//! options: [StrictHostKeyChecking=no]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::{ContainerConfig, Executor, LocalConfig, SshConfig};
use crate::error::ExecError;


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum ExecutorConfig {
    Local(LocalConfig),
    Ssh(SshConfig),
    Container(ContainerConfig),
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig::Local(LocalConfig::default())
    }
}

impl ExecutorConfig {
    /// Load from a YAML file.
    pub fn load(path: &Path) -> Result<ExecutorConfig, ExecError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExecError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse from a YAML string.
    pub fn parse(content: &str) -> Result<ExecutorConfig, ExecError> {
        serde_yaml::from_str(content)
            .map_err(|e| ExecError::Config(format!("invalid executor config: {}", e)))
    }

    pub fn to_yaml(&self) -> Result<String, ExecError> {
        serde_yaml::to_string(self)
            .map_err(|e| ExecError::Config(format!("cannot serialize executor config: {}", e)))
    }

    /// Validate and construct the executor.
    pub fn build(&self) -> Result<Executor, ExecError> {
        match self {
            ExecutorConfig::Local(c) => Executor::local(c.clone()),
            ExecutorConfig::Ssh(c) => Executor::ssh(c.clone()),
            ExecutorConfig::Container(c) => Executor::container(c.clone()),
        }
    }
}
