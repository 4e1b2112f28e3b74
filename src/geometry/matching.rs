use nalgebra::Vector3;
use rayon::prelude::*;
use std::collections::HashMap;

use crate::error::ExtractError;
use crate::io::ItemRecord;

/// Nearest source row for one query item: index into the source item
/// table plus the Euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub source_index: usize,
    pub distance: f64,
}

/// For every query item, finds the closest source item restricted to the
/// same unit. Exact brute force per unit; group sizes are expected in the
/// hundreds, so no spatial index is warranted.
///
/// A unit present among the query items but absent from the source set is
/// a fatal error (the correspondence would be undefined), never a silent
/// drop. Results are aligned with the query slice order.
pub fn find_min_distances(
    query: &[ItemRecord],
    source: &[ItemRecord],
) -> Result<Vec<MatchResult>, ExtractError> {
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, item) in source.iter().enumerate() {
        groups.entry(item.unit_id.as_str()).or_default().push(i);
    }

    query
        .par_iter()
        .map(|item| {
            let candidates = groups
                .get(item.unit_id.as_str())
                .ok_or_else(|| ExtractError::MissingGroup(item.unit_id.clone()))?;
            let p = Vector3::from(item.coord_reg);
            let mut best = MatchResult {
                source_index: candidates[0],
                distance: f64::INFINITY,
            };
            for &j in candidates {
                let d = (Vector3::from(source[j].coord_reg) - p).norm();
                if d < best.distance {
                    best = MatchResult {
                        source_index: j,
                        distance: d,
                    };
                }
            }
            Ok(best)
        })
        .collect()
}
