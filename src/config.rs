//! TOML run descriptions.
//!
//! ```toml
//! n = 8
//! workers = 4
//! strategy = "block"
//! operation = "matmul"
//! seed = 7
//! verify = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DistError;
use crate::plan::{plan, PartitionPlan};
use crate::strategy::{Operation, Strategy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid run file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("run cannot be planned: {0}")]
    Invalid(#[from] DistError),
}

fn default_operation() -> Operation {
    Operation::MatMul
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub n: usize,
    pub workers: usize,
    pub strategy: Strategy,
    #[serde(default = "default_operation")]
    pub operation: Operation,
    /// Seed for the random operands; fresh entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Compare against the serial reference product.
    #[serde(default)]
    pub verify: bool,
}

impl RunConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject runs that could never be distributed, before any rank starts.
    pub fn validate(&self) -> Result<PartitionPlan, DistError> {
        plan(self.n, self.workers, self.strategy, self.operation)
    }
}
