//! Error taxonomy for the clustering pipeline.
//!
//! Per-sample failures (`Extraction`) are recovered by the caller and the
//! sample is skipped. Configuration, emission and cancellation errors are
//! fatal for the run.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SimgraphError>;

#[derive(Debug, Error)]
pub enum SimgraphError {
    /// String extraction failed for one sample.
    #[error("feature extraction failed for {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    /// Similarity requested for two empty feature sets.
    #[error("similarity is undefined for two empty feature sets")]
    DegenerateInput,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The graph could not be written to its destination.
    #[error("cannot write graph to {}: {source}", path.display())]
    Emission {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("run cancelled")]
    Cancelled,
}

impl SimgraphError {
    pub fn extraction(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Whether this error only concerns a single sample and the run can go on.
    pub fn is_per_sample(&self) -> bool {
        matches!(self, Self::Extraction { .. })
    }
}
