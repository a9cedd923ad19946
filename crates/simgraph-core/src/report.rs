//! Output formatting for run summaries.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::PipelineConfig;
use crate::corpus::{Corpus, SkippedSample};
use crate::graph::SimilarityGraph;

#[derive(Debug, Clone, Serialize)]
pub struct SampleSummary {
    pub path: PathBuf,
    pub label: String,
    pub features: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeSummary {
    pub a: PathBuf,
    pub b: PathBuf,
    pub score: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub target: PathBuf,
    pub output: PathBuf,
    pub threshold: f64,
    pub samples: Vec<SampleSummary>,
    pub skipped: Vec<SkippedSample>,
    pub edges: Vec<EdgeSummary>,
}

impl RunSummary {
    pub fn new(
        config: &PipelineConfig,
        corpus: &Corpus,
        skipped: &[SkippedSample],
        graph: &SimilarityGraph,
    ) -> Self {
        let samples = corpus
            .iter()
            .zip(graph.nodes())
            .map(|(sample, node)| SampleSummary {
                path: sample.path.clone(),
                label: node.label.clone(),
                features: sample.features.len(),
                sha256: sample.sha256.clone(),
            })
            .collect();
        let edges = graph
            .edges()
            .map(|(a, b, edge)| EdgeSummary {
                a: a.path.clone(),
                b: b.path.clone(),
                score: edge.score,
                weight: edge.weight,
            })
            .collect();
        Self {
            target: config.target_dir.clone(),
            output: config.output_path.clone(),
            threshold: graph.threshold(),
            samples,
            skipped: skipped.to_vec(),
            edges,
        }
    }

    /// Samples sharing a SHA-256 with an earlier sample.
    pub fn identical_copies(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        self.samples
            .iter()
            .filter_map(|s| s.sha256.as_deref())
            .filter(|digest| !seen.insert(*digest))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {s}. Use 'text' or 'json'.")),
        }
    }
}

pub fn print_summary(summary: &RunSummary, format: OutputFormat) {
    match format {
        OutputFormat::Text => print!("{}", render_text(summary)),
        OutputFormat::Json => println!("{}", render_json(summary)),
    }
}

pub fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    let rule = "=".repeat(70);

    out.push_str(&format!("\n{rule}\n"));
    out.push_str(&format!("SIMILARITY GRAPH (threshold: {:.2})\n", summary.threshold));
    out.push_str(&format!("{rule}\n"));

    if !summary.edges.is_empty() {
        out.push_str(&format!("\nSIMILAR PAIRS ({}):\n", summary.edges.len()));
        for e in &summary.edges {
            out.push_str(&format!(
                "  [{:.4}] {} <-> {}\n",
                e.score,
                e.a.display(),
                e.b.display()
            ));
        }
    }

    if !summary.skipped.is_empty() {
        out.push_str(&format!("\nSKIPPED ({}):\n", summary.skipped.len()));
        for s in &summary.skipped {
            out.push_str(&format!("  [SKIP] {} -- {}\n", s.path.display(), s.reason));
        }
    }

    out.push_str("\nSUMMARY:\n");
    out.push_str(&format!("  Samples:             {}\n", summary.samples.len()));
    out.push_str(&format!("  Identical copies:    {}\n", summary.identical_copies()));
    out.push_str(&format!("  Skipped:             {}\n", summary.skipped.len()));
    out.push_str(&format!("  Edges:               {}\n", summary.edges.len()));
    out.push_str(&format!("  Graph written to:    {}\n", summary.output.display()));
    out.push_str(&format!("{rule}\n"));
    out
}

pub fn render_json(summary: &RunSummary) -> String {
    let output = serde_json::json!({
        "run": summary,
        "totals": {
            "samples": summary.samples.len(),
            "identical_copies": summary.identical_copies(),
            "skipped": summary.skipped.len(),
            "edges": summary.edges.len(),
        }
    });
    serde_json::to_string_pretty(&output).unwrap_or_default()
}
