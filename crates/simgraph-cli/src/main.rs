//! Malware similarity graph CLI - clusters PE samples by shared strings.
//!
//! Usage:
//!   malware-simgraph /path/to/samples graph.dot
//!   malware-simgraph /path/to/samples graph.dot --threshold 0.6 --format json
//!   malware-simgraph /path/to/samples graph.dot --extractor strings --timeout-secs 10

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use simgraph_core::config::{load_config, ExtractorKind, PipelineConfig};
use simgraph_core::report::{print_summary, OutputFormat};
use simgraph_core::{run_pipeline, RunProgress};

#[derive(Parser)]
#[command(name = "malware-simgraph")]
#[command(about = "Identify similarities between malware samples and build a similarity graph")]
struct Cli {
    /// Directory containing malware samples (walked recursively)
    target_directory: PathBuf,

    /// Where to save the output graph DOT file
    output_dot_file: PathBuf,

    /// Jaccard index above which to create an edge between samples (0.0-1.0)
    #[arg(short = 'j', long)]
    threshold: Option<f64>,

    /// JSON config file; command-line flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// String extractor: builtin or strings
    #[arg(long)]
    extractor: Option<ExtractorKind>,

    /// Minimum printable run length
    #[arg(long)]
    min_len: Option<usize>,

    /// Per-sample timeout for the strings extractor, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Worker threads (default: one per CPU)
    #[arg(long)]
    jobs: Option<usize>,

    /// Summary format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<(PipelineConfig, OutputFormat)> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        config.target_dir = self.target_directory;
        config.output_path = self.output_dot_file;
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(kind) = self.extractor {
            config.extractor.kind = kind;
        }
        if let Some(min_len) = self.min_len {
            config.extractor.min_len = min_len;
        }
        if let Some(timeout) = self.timeout_secs {
            config.extractor.timeout_secs = timeout;
        }
        if self.jobs.is_some() {
            config.jobs = self.jobs;
        }
        Ok((config, self.format))
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (config, format) = cli.into_config()?;
    info!(
        dir = %config.target_dir.display(),
        threshold = config.threshold,
        "building similarity graph"
    );

    let progress = RunProgress::new();
    let output = run_pipeline(&config, &progress).context("similarity graph run failed")?;

    info!(
        candidates = progress.candidate_files.load(Ordering::Relaxed),
        rejected = progress.rejected_files.load(Ordering::Relaxed),
        pairs = progress.pairs_compared.load(Ordering::Relaxed),
        "done"
    );

    print_summary(&output.summary(&config), format);
    Ok(())
}
