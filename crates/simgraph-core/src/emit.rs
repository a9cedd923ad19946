//! DOT output for the finished graph.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use petgraph::dot::Dot;
use petgraph::visit::EdgeRef;

use crate::error::{Result, SimgraphError};
use crate::graph::{SampleNode, SimilarityEdge, SimilarityGraph};

impl fmt::Display for SampleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl fmt::Display for SimilarityEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.score)
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render as an undirected DOT graph. Nodes get `label` and `tooltip`
/// (full path); edges get `label` (score) and `penwidth` (weight).
pub fn render_dot(graph: &SimilarityGraph) -> String {
    let dot = Dot::with_attr_getters(
        graph.as_petgraph(),
        &[],
        &|_, edge| format!("penwidth = {:.3} ", EdgeRef::weight(&edge).weight),
        &|_, (_, node)| format!("tooltip = \"{}\" ", escape(&node.path.to_string_lossy())),
    );
    format!("{dot}")
}

/// Fail early if `path` cannot be written, before any expensive work.
/// Leaves an existing file untouched and removes a file it had to create.
pub fn check_writable(path: &Path) -> Result<()> {
    let emission = |source: io::Error| SimgraphError::Emission {
        path: path.to_path_buf(),
        source,
    };

    if path.is_dir() {
        return Err(emission(io::Error::other("output path is a directory")));
    }

    let existed = path.exists();
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(emission)?;
    if !existed {
        fs::remove_file(path).map_err(emission)?;
    }
    Ok(())
}

/// Write to a sibling temp file and rename it into place, so `path` only
/// ever holds a complete graph.
pub fn write_dot(graph: &SimilarityGraph, path: &Path) -> Result<()> {
    let emission = |source: io::Error| SimgraphError::Emission {
        path: path.to_path_buf(),
        source,
    };

    let text = render_dot(graph);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".simgraph-")
        .suffix(".dot.tmp")
        .tempfile_in(dir)
        .map_err(emission)?;
    tmp.write_all(text.as_bytes()).map_err(emission)?;
    tmp.flush().map_err(emission)?;
    tmp.persist(path).map_err(|e| emission(e.error))?;
    Ok(())
}
