//! simgraph-core — shared library for string-set malware clustering.
//!
//! Provides feature extraction, Jaccard similarity, corpus ingestion,
//! similarity-graph construction, DOT emission and run reporting used by
//! the CLI frontend.

pub mod config;
pub mod corpus;
pub mod emit;
pub mod error;
pub mod features;
pub mod graph;
pub mod pipeline;
pub mod report;
pub mod similarity;

pub use config::PipelineConfig;
pub use error::{Result, SimgraphError};
pub use features::{FeatureExtractor, FeatureSet};
pub use graph::SimilarityGraph;
pub use pipeline::{run_pipeline, RunProgress};
