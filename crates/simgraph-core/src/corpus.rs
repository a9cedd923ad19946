//! Corpus ingestion: candidate discovery, format filtering and parallel
//! feature extraction into an insertion-ordered store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, SimgraphError};
use crate::features::{is_valid_format, FeatureExtractor, FeatureSet};
use crate::pipeline::RunProgress;

/// One ingested sample. Immutable once in the corpus.
#[derive(Debug, Clone)]
pub struct Sample {
    pub path: PathBuf,
    pub features: FeatureSet,
    pub sha256: Option<String>,
}

impl Sample {
    pub fn new(path: impl Into<PathBuf>, features: FeatureSet) -> Self {
        Self {
            path: path.into(),
            features,
            sha256: None,
        }
    }
}

/// A sample left out of the corpus, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedSample {
    pub path: PathBuf,
    pub reason: String,
}

/// Samples keyed by path, in ingestion order.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    samples: IndexMap<PathBuf, Sample>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` and keeps the existing entry if the path is already present.
    pub fn insert(&mut self, sample: Sample) -> bool {
        if self.samples.contains_key(&sample.path) {
            return false;
        }
        self.samples.insert(sample.path.clone(), sample);
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&Sample> {
        self.samples.get(path)
    }

    pub fn get_index(&self, index: usize) -> Option<&Sample> {
        self.samples.get_index(index).map(|(_, sample)| sample)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Sample> {
        self.samples.values()
    }
}

impl FromIterator<Sample> for Corpus {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        let mut corpus = Corpus::new();
        for sample in iter {
            corpus.insert(sample);
        }
        corpus
    }
}

/// Every regular file under `root`, sorted by name at each level so runs
/// over an unchanged tree enumerate identically.
pub fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "skipping unreadable entry"),
        }
    }
    files
}

/// Keep only files carrying the executable magic marker. Order is preserved.
pub fn filter_samples(files: Vec<PathBuf>, progress: &RunProgress) -> Vec<PathBuf> {
    progress.candidate_files.store(files.len(), Ordering::Relaxed);
    files
        .into_iter()
        .filter(|path| {
            let valid = is_valid_format(path);
            if !valid {
                debug!(path = %path.display(), "format rejected");
                progress.rejected_files.fetch_add(1, Ordering::Relaxed);
            }
            valid
        })
        .collect()
}

/// SHA-256 of a file, lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let data = fs::read(path).map_err(|source| SimgraphError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(format!("{:x}", Sha256::digest(&data)))
}

/// Read the sample once; the same buffer feeds the digest and, for
/// byte-based extractors, the feature scan.
fn load_sample(path: &Path, extractor: &dyn FeatureExtractor) -> Result<Sample> {
    let data = fs::read(path).map_err(|e| SimgraphError::extraction(path, e))?;
    let features = extractor.extract_from(path, &data)?;
    Ok(Sample {
        path: path.to_path_buf(),
        features,
        sha256: Some(format!("{:x}", Sha256::digest(&data))),
    })
}

/// Result of the ingestion phase.
#[derive(Debug, Default)]
pub struct Ingested {
    pub corpus: Corpus,
    pub skipped: Vec<SkippedSample>,
}

/// Extract every sample in parallel on the current rayon pool.
///
/// Failing and empty samples are logged and skipped; only cancellation
/// aborts the phase. Corpus order follows `files`.
pub fn ingest(
    files: &[PathBuf],
    extractor: &dyn FeatureExtractor,
    progress: &RunProgress,
) -> Result<Ingested> {
    let loaded: Vec<Option<Result<Sample>>> = files
        .par_iter()
        .map(|path| {
            if progress.is_cancelled() {
                return None;
            }
            Some(load_sample(path, extractor))
        })
        .collect();

    if progress.is_cancelled() {
        return Err(SimgraphError::Cancelled);
    }

    let mut out = Ingested::default();
    for (path, result) in files.iter().zip(loaded) {
        let reason = match result {
            Some(Ok(sample)) if sample.features.is_empty() => "no strings extracted".to_string(),
            Some(Ok(sample)) => {
                info!(
                    path = %path.display(),
                    features = sample.features.len(),
                    "extracted features"
                );
                if out.corpus.insert(sample) {
                    progress.ingested.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                "duplicate path".to_string()
            }
            Some(Err(e)) => e.to_string(),
            None => return Err(SimgraphError::Cancelled),
        };
        warn!(path = %path.display(), %reason, "skipping sample");
        progress.skipped.fetch_add(1, Ordering::Relaxed);
        out.skipped.push(SkippedSample {
            path: path.clone(),
            reason,
        });
    }
    Ok(out)
}
