//! All-pairs similarity graph.
//!
//! Nodes are added in corpus order, so node index `i` is corpus entry `i`.
//! Pair rows `(i, j > i)` are scored on the rayon pool; each worker returns
//! the edges of its row and the coordinator appends them in row order. The
//! resulting edge list is the same as the one a sequential nested loop
//! would produce.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use petgraph::graph::{NodeIndex, UnGraph};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::validate_threshold;
use crate::corpus::{Corpus, Sample};
use crate::error::{Result, SimgraphError};
use crate::pipeline::RunProgress;
use crate::similarity::jaccard;

/// Label length shown on rendered nodes.
pub const LABEL_LEN: usize = 10;
/// Multiplier turning the score margin over the threshold into pen width.
pub const WEIGHT_SCALE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleNode {
    pub path: PathBuf,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityEdge {
    pub score: f64,
    pub weight: f64,
}

/// Base file name truncated to [`LABEL_LEN`] characters.
pub fn node_label(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().chars().take(LABEL_LEN).collect(),
        None => path.display().to_string().chars().take(LABEL_LEN).collect(),
    }
}

pub fn edge_weight(score: f64, threshold: f64) -> f64 {
    1.0 + (score - threshold) * WEIGHT_SCALE
}

/// Undirected graph of samples; at most one edge per pair, no self-loops.
#[derive(Debug, Clone)]
pub struct SimilarityGraph {
    graph: UnGraph<SampleNode, SimilarityEdge>,
    index: HashMap<PathBuf, NodeIndex>,
    threshold: f64,
}

impl SimilarityGraph {
    fn with_nodes(corpus: &Corpus, threshold: f64) -> Self {
        let mut graph = UnGraph::with_capacity(corpus.len(), 0);
        let mut index = HashMap::with_capacity(corpus.len());
        for sample in corpus.iter() {
            let node = graph.add_node(SampleNode {
                path: sample.path.clone(),
                label: node_label(&sample.path),
            });
            index.insert(sample.path.clone(), node);
        }
        Self {
            graph,
            index,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SampleNode> {
        self.graph.node_indices().map(move |i| &self.graph[i])
    }

    /// Edges in insertion order as `(a, b, edge)` with `a` before `b` in corpus order.
    pub fn edges(&self) -> impl Iterator<Item = (&SampleNode, &SampleNode, &SimilarityEdge)> {
        self.graph
            .raw_edges()
            .iter()
            .map(move |e| (&self.graph[e.source()], &self.graph[e.target()], &e.weight))
    }

    pub fn edge_between(&self, a: &Path, b: &Path) -> Option<&SimilarityEdge> {
        let a = *self.index.get(a)?;
        let b = *self.index.get(b)?;
        self.graph
            .find_edge(a, b)
            .and_then(|e| self.graph.edge_weight(e))
    }

    pub fn as_petgraph(&self) -> &UnGraph<SampleNode, SimilarityEdge> {
        &self.graph
    }
}

/// Build the graph with a throwaway progress tracker.
pub fn build(corpus: &Corpus, threshold: f64) -> Result<SimilarityGraph> {
    build_with_progress(corpus, threshold, &RunProgress::new())
}

/// Score every unordered pair once and connect those strictly above `threshold`.
pub fn build_with_progress(
    corpus: &Corpus,
    threshold: f64,
    progress: &RunProgress,
) -> Result<SimilarityGraph> {
    validate_threshold(threshold)?;

    let mut graph = SimilarityGraph::with_nodes(corpus, threshold);
    let samples: Vec<&Sample> = corpus.iter().collect();
    let n = samples.len();

    let rows: Vec<Vec<(usize, usize, f64)>> = (0..n)
        .into_par_iter()
        .map(|i| {
            if progress.is_cancelled() {
                return Vec::new();
            }
            let row = compare_row(&samples, i, threshold);
            progress
                .pairs_compared
                .fetch_add(n - 1 - i, Ordering::Relaxed);
            row
        })
        .collect();

    if progress.is_cancelled() {
        return Err(SimgraphError::Cancelled);
    }

    for (i, j, score) in rows.into_iter().flatten() {
        let weight = edge_weight(score, threshold);
        info!(
            a = %samples[i].path.display(),
            b = %samples[j].path.display(),
            score,
            "similar pair"
        );
        graph.graph.add_edge(
            NodeIndex::new(i),
            NodeIndex::new(j),
            SimilarityEdge { score, weight },
        );
        progress.edges.fetch_add(1, Ordering::Relaxed);
    }

    Ok(graph)
}

fn compare_row(samples: &[&Sample], i: usize, threshold: f64) -> Vec<(usize, usize, f64)> {
    let a = samples[i];
    samples
        .iter()
        .enumerate()
        .skip(i + 1)
        .filter_map(|(j, b)| match jaccard(&a.features, &b.features) {
            Ok(score) if score > threshold => Some((i, j, score)),
            Ok(_) => None,
            Err(e) => {
                debug!(
                    a = %a.path.display(),
                    b = %b.path.display(),
                    error = %e,
                    "no edge"
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSet;
    use proptest::collection::{hash_set, vec};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn sample(path: &str, items: &[&str]) -> Sample {
        Sample::new(path, items.iter().copied().collect())
    }

    fn scenario() -> Corpus {
        [
            sample("/samples/S1", &["MZ", "abc", "http://x"]),
            sample("/samples/S2", &["abc", "http://x", "def"]),
            sample("/samples/S3", &["zzz"]),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn three_sample_scenario() {
        let graph = build(&scenario(), 0.3).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 1);

        let edge = graph
            .edge_between(Path::new("/samples/S1"), Path::new("/samples/S2"))
            .unwrap();
        assert_eq!(edge.score, 0.5);
        assert!((edge.weight - 3.0).abs() < 1e-9);

        // Undirected lookup.
        assert!(graph
            .edge_between(Path::new("/samples/S2"), Path::new("/samples/S1"))
            .is_some());
        assert!(graph
            .edge_between(Path::new("/samples/S1"), Path::new("/samples/S3"))
            .is_none());
    }

    #[test]
    fn threshold_is_strict() {
        let corpus: Corpus = [
            sample("/s/a", &["one", "two"]),
            sample("/s/b", &["one", "two"]),
        ]
        .into_iter()
        .collect();

        assert_eq!(build(&corpus, 1.0).unwrap().edge_count(), 0);
        assert_eq!(build(&corpus, 0.999).unwrap().edge_count(), 1);

        // 0.5 exactly at threshold 0.5 is not an edge either.
        let half = build(&scenario(), 0.5).unwrap();
        assert_eq!(half.edge_count(), 0);
    }

    #[test]
    fn identical_sets_connect_at_zero_threshold() {
        let corpus: Corpus = [sample("/s/a", &["x"]), sample("/s/b", &["x"])]
            .into_iter()
            .collect();
        let graph = build(&corpus, 0.0).unwrap();
        let edge = graph.edge_between(Path::new("/s/a"), Path::new("/s/b")).unwrap();
        assert_eq!(edge.score, 1.0);
        assert!((edge.weight - 11.0).abs() < 1e-9);
    }

    #[test]
    fn empty_samples_never_connect() {
        let corpus: Corpus = [
            Sample::new("/s/a", FeatureSet::new()),
            Sample::new("/s/b", FeatureSet::new()),
        ]
        .into_iter()
        .collect();
        let graph = build(&corpus, 0.0).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        for bad in [-0.1, 1.1, f64::NAN] {
            let err = build(&scenario(), bad).unwrap_err();
            assert!(matches!(err, SimgraphError::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn labels_truncate_base_name() {
        assert_eq!(node_label(Path::new("/x/y/abcdefghijklmnop.exe")), "abcdefghij");
        assert_eq!(node_label(Path::new("short.exe")), "short.exe");
        assert_eq!(node_label(Path::new("/x/ééééééééééééé")), "éééééééééé");

        let graph = build(&scenario(), 0.3).unwrap();
        let labels: Vec<_> = graph.nodes().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["S1", "S2", "S3"]);
    }

    #[test]
    fn weight_grows_with_margin() {
        assert_eq!(edge_weight(0.8, 0.8), 1.0);
        assert!(edge_weight(0.9, 0.8) < edge_weight(0.95, 0.8));
    }

    #[test]
    fn cancelled_build_returns_error() {
        let progress = RunProgress::new();
        progress.cancel();
        let err = build_with_progress(&scenario(), 0.3, &progress).unwrap_err();
        assert!(matches!(err, SimgraphError::Cancelled));
    }

    #[test]
    fn counts_every_pair_once() {
        let corpus: Corpus = (0..7)
            .map(|i| sample(&format!("/s/{i}"), &["shared"]))
            .collect();
        let progress = RunProgress::new();
        let graph = build_with_progress(&corpus, 0.5, &progress).unwrap();
        assert_eq!(progress.pairs_compared.load(Ordering::Relaxed), 21);
        assert_eq!(graph.edge_count(), 21);
        assert_eq!(progress.edges.load(Ordering::Relaxed), 21);
    }

    fn corpus_strategy() -> impl Strategy<Value = Corpus> {
        vec(hash_set("[a-e]", 1..5), 0..9).prop_map(|sets| {
            sets.into_iter()
                .enumerate()
                .map(|(i, s)| Sample::new(format!("/p/{i}"), s.into_iter().collect()))
                .collect::<Corpus>()
        })
    }

    proptest! {
        #[test]
        fn edges_are_exactly_pairs_above_threshold(
            corpus in corpus_strategy(),
            threshold in 0.0f64..=1.0,
        ) {
            let graph = build(&corpus, threshold).unwrap();
            let samples: Vec<_> = corpus.iter().collect();

            let mut seen = HashSet::new();
            for (a, b, _) in graph.edges() {
                prop_assert_ne!(&a.path, &b.path);
                let key = if a.path < b.path {
                    (a.path.clone(), b.path.clone())
                } else {
                    (b.path.clone(), a.path.clone())
                };
                prop_assert!(seen.insert(key));
            }

            let mut expected = 0;
            for (i, a) in samples.iter().enumerate() {
                for b in &samples[i + 1..] {
                    let score = jaccard(&a.features, &b.features).unwrap();
                    let edge = graph.edge_between(&a.path, &b.path);
                    prop_assert_eq!(edge.is_some(), score > threshold);
                    if score > threshold {
                        expected += 1;
                    }
                }
            }
            prop_assert_eq!(graph.edge_count(), expected);
        }
    }
}
