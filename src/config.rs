use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::{PackOptions, PackageRequest};

/// Baseline exclusions used when no exclude list is configured.
pub const DEFAULT_SOURCE_CODE_EXCLUDE: &[&str] = &[
    ".git",
    ".terraform*",
    "logs",
    "node_modules",
    "__pycache__",
    "venv",
    "terraform.tfstate*",
];

/// File looked up under the source root when no config path is given.
pub const CONFIG_FILE_NAME: &str = "srcpack.json";

pub fn default_source_code_exclude() -> Vec<String> {
    DEFAULT_SOURCE_CODE_EXCLUDE
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceConfig {
    #[serde(default)]
    pub include: Vec<String>,

    /// `None` means the baseline set; an explicit empty list excludes nothing.
    #[serde(default)]
    pub exclude: Option<Vec<String>>,

    #[serde(flatten)]
    pub options: PackOptions,
}

impl SourceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&txt).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Reads `srcpack.json` under `root`, falling back to defaults when absent.
    pub fn discover(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(SourceConfig::default());
        }
        Self::load(&path)
    }

    pub fn effective_exclude(&self) -> Vec<String> {
        match &self.exclude {
            Some(list) => list.clone(),
            None => default_source_code_exclude(),
        }
    }

    pub fn into_request(self, root: impl Into<PathBuf>) -> PackageRequest {
        let exclude = self.effective_exclude();
        PackageRequest::new(root)
            .include(self.include)
            .exclude(exclude)
            .options(self.options)
    }
}
