//! Metrics Module for Binary Classification
//!
//! Accuracy, precision and recall for the positive class (Pneumonia),
//! accumulated from thresholded probabilities.

use serde::{Deserialize, Serialize};

/// Decision threshold on P(Pneumonia)
pub const DECISION_THRESHOLD: f32 = 0.5;

/// 2x2 confusion counts with Pneumonia as the positive class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryConfusion {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl BinaryConfusion {
    /// Create an empty confusion matrix
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one prediction
    pub fn record(&mut self, predicted_positive: bool, actual_positive: bool) {
        match (predicted_positive, actual_positive) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_negatives += 1,
        }
    }

    /// Record a batch of probabilities against 0/1 labels
    pub fn record_probabilities(&mut self, probabilities: &[f32], labels: &[i64]) {
        for (&p, &label) in probabilities.iter().zip(labels.iter()) {
            self.record(p > DECISION_THRESHOLD, label == 1);
        }
    }

    /// Merge counts from another matrix
    pub fn merge(&mut self, other: &BinaryConfusion) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.true_negatives += other.true_negatives;
        self.false_negatives += other.false_negatives;
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    /// Fraction of correct predictions (0.0 when empty)
    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    /// TP / (TP + FP), 0.0 when nothing was predicted positive
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// TP / (TP + FN), 0.0 when there are no positives
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Harmonic mean of precision and recall
    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

impl std::fmt::Display for BinaryConfusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "                 pred NORMAL  pred PNEUMONIA")?;
        writeln!(
            f,
            "  NORMAL         {:>11}  {:>14}",
            self.true_negatives, self.false_positives
        )?;
        write!(
            f,
            "  PNEUMONIA      {:>11}  {:>14}",
            self.false_negatives, self.true_positives
        )
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_confusion_is_zero() {
        let cm = BinaryConfusion::new();
        assert_eq!(cm.total(), 0);
        assert_eq!(cm.accuracy(), 0.0);
        assert_eq!(cm.precision(), 0.0);
        assert_eq!(cm.recall(), 0.0);
    }

    #[test]
    fn test_metrics_from_probabilities() {
        let mut cm = BinaryConfusion::new();
        // TP, FP, TN, FN, TP
        cm.record_probabilities(&[0.9, 0.7, 0.2, 0.4, 0.51], &[1, 0, 0, 1, 1]);

        assert_eq!(cm.true_positives, 2);
        assert_eq!(cm.false_positives, 1);
        assert_eq!(cm.true_negatives, 1);
        assert_eq!(cm.false_negatives, 1);
        assert!((cm.accuracy() - 0.6).abs() < 1e-9);
        assert!((cm.precision() - 2.0 / 3.0).abs() < 1e-9);
        assert!((cm.recall() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut cm = BinaryConfusion::new();
        cm.record_probabilities(&[0.5], &[1]);
        assert_eq!(cm.false_negatives, 1);
    }

    #[test]
    fn test_merge() {
        let mut a = BinaryConfusion::new();
        a.record(true, true);
        let mut b = BinaryConfusion::new();
        b.record(false, true);
        a.merge(&b);
        assert_eq!(a.total(), 2);
        assert_eq!(a.recall(), 0.5);
    }
}
