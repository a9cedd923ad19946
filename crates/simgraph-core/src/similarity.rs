//! Jaccard similarity over feature sets.

use crate::error::{Result, SimgraphError};
use crate::features::FeatureSet;

/// `|A ∩ B| / |A ∪ B|` in [0, 1].
///
/// Fails with [`SimgraphError::DegenerateInput`] when both sets are empty;
/// callers keep empty samples out of the corpus instead of guessing a value.
pub fn jaccard(a: &FeatureSet, b: &FeatureSet) -> Result<f64> {
    let intersection = a.intersection_len(b);
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return Err(SimgraphError::DegenerateInput);
    }
    Ok(intersection as f64 / union as f64)
}
