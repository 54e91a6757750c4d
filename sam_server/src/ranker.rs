//! Ordering of candidate masks by confidence.

use std::cmp::Ordering;

use crate::shared::MaskRecord;

/// Anything carrying a stability score.
pub trait Scored {
    fn stability_score(&self) -> f64;
}

impl Scored for MaskRecord {
    fn stability_score(&self) -> f64 {
        self.stability_score
    }
}

/// Sort by stability score, highest first.
///
/// The sort is stable: records with equal scores keep their input order.
/// NaN scores go after every numeric score.
pub fn rank<T: Scored>(mut records: Vec<T>) -> Vec<T> {
    records.sort_by(|a, b| descending(a.stability_score(), b.stability_score()));
    records
}

/// Rank, then keep at most `k` records.
pub fn top_k<T: Scored>(records: Vec<T>, k: usize) -> Vec<T> {
    let mut ranked = rank(records);
    ranked.truncate(k);
    ranked
}

fn descending(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        // Neither is NaN, so partial_cmp is total here; 0.0 and -0.0 tie.
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}
