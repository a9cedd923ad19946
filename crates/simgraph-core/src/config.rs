//! Run configuration, optionally loaded from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimgraphError};

pub const DEFAULT_THRESHOLD: f64 = 0.8;
pub const DEFAULT_MIN_LEN: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// In-process printable-run scanner.
    #[default]
    Builtin,
    /// The OS `strings` utility.
    Strings,
}

impl std::str::FromStr for ExtractorKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "builtin" => Ok(ExtractorKind::Builtin),
            "strings" => Ok(ExtractorKind::Strings),
            _ => Err(format!("Unknown extractor: {s}. Use 'builtin' or 'strings'.")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub kind: ExtractorKind,
    pub min_len: usize,
    /// Program used by the `strings` extractor.
    pub program: PathBuf,
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            kind: ExtractorKind::Builtin,
            min_len: DEFAULT_MIN_LEN,
            program: PathBuf::from("strings"),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Everything a run needs. `target_dir` and `output_path` come from the
/// command line; the rest may come from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    #[serde(skip)]
    pub target_dir: PathBuf,
    #[serde(skip)]
    pub output_path: PathBuf,
    pub threshold: f64,
    /// Worker threads for extraction and comparison; `None` uses rayon's default.
    pub jobs: Option<usize>,
    pub extractor: ExtractorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::new(),
            output_path: PathBuf::new(),
            threshold: DEFAULT_THRESHOLD,
            jobs: None,
            extractor: ExtractorConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new(target_dir: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            output_path: output_path.into(),
            ..Self::default()
        }
    }

    /// Reject anything that would make the run meaningless before it starts.
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.threshold)?;

        if !self.target_dir.is_dir() {
            return Err(SimgraphError::config(format!(
                "target directory {} does not exist or is not a directory",
                self.target_dir.display()
            )));
        }
        if fs::read_dir(&self.target_dir).is_err() {
            return Err(SimgraphError::config(format!(
                "target directory {} is not readable",
                self.target_dir.display()
            )));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(SimgraphError::config("output path is empty"));
        }
        if self.jobs == Some(0) {
            return Err(SimgraphError::config("jobs must be at least 1"));
        }
        if self.extractor.min_len == 0 {
            return Err(SimgraphError::config("min_len must be at least 1"));
        }
        if self.extractor.timeout_secs == 0 {
            return Err(SimgraphError::config("timeout_secs must be at least 1"));
        }
        Ok(())
    }
}

pub fn validate_threshold(threshold: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(SimgraphError::config(format!(
            "threshold {threshold} is outside [0, 1]"
        )));
    }
    Ok(())
}

/// Load a JSON config file. Fields not present keep their defaults.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let data = fs::read_to_string(path).map_err(|source| SimgraphError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|e| {
        SimgraphError::config(format!("cannot parse {}: {e}", path.display()))
    })
}
