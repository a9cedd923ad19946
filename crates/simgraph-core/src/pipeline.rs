//! Run orchestrator with progress tracking.
//!
//! Phases run strictly in sequence: validate, collect, ingest, compare,
//! emit. Nothing is written unless every phase before emission succeeded.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use rayon::ThreadPoolBuilder;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::corpus::{collect_files, filter_samples, ingest, Corpus, SkippedSample};
use crate::emit::{check_writable, write_dot};
use crate::error::{Result, SimgraphError};
use crate::features::{extractor_from_config, FeatureExtractor};
use crate::graph::{build_with_progress, SimilarityGraph};
use crate::report::RunSummary;

/// Atomic progress counters, readable from another thread while a run is going.
#[derive(Debug)]
pub struct RunProgress {
    pub candidate_files: AtomicUsize,
    pub rejected_files: AtomicUsize,
    pub ingested: AtomicUsize,
    pub skipped: AtomicUsize,
    pub pairs_compared: AtomicUsize,
    pub edges: AtomicUsize,
    cancel: AtomicBool,
}

impl RunProgress {
    pub fn new() -> Self {
        Self {
            candidate_files: AtomicUsize::new(0),
            rejected_files: AtomicUsize::new(0),
            ingested: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            pairs_compared: AtomicUsize::new(0),
            edges: AtomicUsize::new(0),
            cancel: AtomicBool::new(false),
        }
    }

    /// Ask the run to stop at the next checkpoint. Nothing is emitted afterwards.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

impl Default for RunProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutput {
    pub corpus: Corpus,
    pub skipped: Vec<SkippedSample>,
    pub graph: SimilarityGraph,
}

impl RunOutput {
    pub fn summary(&self, config: &PipelineConfig) -> RunSummary {
        RunSummary::new(config, &self.corpus, &self.skipped, &self.graph)
    }
}

fn checkpoint(progress: &RunProgress) -> Result<()> {
    if progress.is_cancelled() {
        return Err(SimgraphError::Cancelled);
    }
    Ok(())
}

/// Run ingestion and comparison without writing anything.
pub fn analyze(
    config: &PipelineConfig,
    extractor: &dyn FeatureExtractor,
    progress: &RunProgress,
) -> Result<RunOutput> {
    config.validate()?;

    let mut builder = ThreadPoolBuilder::new();
    if let Some(jobs) = config.jobs {
        builder = builder.num_threads(jobs);
    }
    let pool = builder
        .build()
        .map_err(|e| SimgraphError::config(format!("cannot start worker pool: {e}")))?;

    pool.install(|| {
        checkpoint(progress)?;
        let started = Instant::now();
        let files = filter_samples(collect_files(&config.target_dir), progress);
        info!(
            candidates = progress.candidate_files.load(Ordering::Relaxed),
            samples = files.len(),
            extractor = extractor.name(),
            "collected samples"
        );

        checkpoint(progress)?;
        let ingested = ingest(&files, extractor, progress)?;
        debug!(elapsed = ?started.elapsed(), "ingestion finished");

        checkpoint(progress)?;
        let started = Instant::now();
        let graph = build_with_progress(&ingested.corpus, config.threshold, progress)?;
        debug!(
            elapsed = ?started.elapsed(),
            pairs = progress.pairs_compared.load(Ordering::Relaxed),
            "comparison finished"
        );

        Ok(RunOutput {
            corpus: ingested.corpus,
            skipped: ingested.skipped,
            graph,
        })
    })
}

/// Full run: validate, probe the output, analyze, then write the DOT file once.
pub fn run_pipeline(config: &PipelineConfig, progress: &RunProgress) -> Result<RunOutput> {
    config.validate()?;
    check_writable(&config.output_path)?;

    let extractor = extractor_from_config(&config.extractor);
    let output = analyze(config, extractor.as_ref(), progress)?;

    checkpoint(progress)?;
    write_dot(&output.graph, &config.output_path)?;
    info!(
        path = %config.output_path.display(),
        nodes = output.graph.node_count(),
        edges = output.graph.edge_count(),
        "graph written"
    );
    Ok(output)
}
