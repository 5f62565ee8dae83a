use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use super::features::{feature_matrix, targets, FeatureRow};
use super::forest::RandomForest;

/// 2x2 confusion matrix, rows = actual, columns = predicted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tp: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(actual: &[u8], predicted: &[u8]) -> Self {
        let mut cm = Self::default();
        for (&a, &p) in actual.iter().zip(predicted.iter()) {
            match (a == 1, p == 1) {
                (false, false) => cm.tn += 1,
                (false, true) => cm.fp += 1,
                (true, false) => cm.fn_ += 1,
                (true, true) => cm.tp += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.tn + self.fp + self.fn_ + self.tp
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tn + self.tp, self.total())
    }

    /// Precision/recall/F1/support for one class label
    pub fn class_metrics(&self, class: u8) -> ClassMetrics {
        let (true_pos, false_pos, false_neg) = if class == 1 {
            (self.tp, self.fp, self.fn_)
        } else {
            (self.tn, self.fn_, self.fp)
        };
        let precision = ratio(true_pos, true_pos + false_pos);
        let recall = ratio(true_pos, true_pos + false_neg);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        ClassMetrics {
            precision,
            recall,
            f1,
            support: true_pos + false_neg,
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// In-sample evaluation of the model on one period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
    /// Index 0 = down/flat, index 1 = up
    pub classes: [ClassMetrics; 2],
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl Evaluation {
    pub fn from_predictions(actual: &[u8], predicted: &[u8]) -> Self {
        let confusion = ConfusionMatrix::from_predictions(actual, predicted);
        let classes = [confusion.class_metrics(0), confusion.class_metrics(1)];
        let total = confusion.total();

        let macro_avg = ClassMetrics {
            precision: (classes[0].precision + classes[1].precision) / 2.0,
            recall: (classes[0].recall + classes[1].recall) / 2.0,
            f1: (classes[0].f1 + classes[1].f1) / 2.0,
            support: total,
        };

        let weight = |f: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                return 0.0;
            }
            classes.iter().map(|c| f(c) * c.support as f64).sum::<f64>() / total as f64
        };
        let weighted_avg = ClassMetrics {
            precision: weight(|c| c.precision),
            recall: weight(|c| c.recall),
            f1: weight(|c| c.f1),
            support: total,
        };

        Self {
            accuracy: confusion.accuracy(),
            confusion,
            classes,
            macro_avg,
            weighted_avg,
        }
    }

    pub fn log(&self) {
        info!("Accuracy: {:.4}", self.accuracy);
        for line in self.to_string().lines() {
            info!("{}", line);
        }
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cm = &self.confusion;
        writeln!(f, "Confusion matrix (rows = actual, cols = predicted):")?;
        writeln!(f, "  [{:>6} {:>6}]", cm.tn, cm.fp)?;
        writeln!(f, "  [{:>6} {:>6}]", cm.fn_, cm.tp)?;
        writeln!(f, "{:>14} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        for (label, m) in [("0", &self.classes[0]), ("1", &self.classes[1]), ("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            writeln!(
                f,
                "{:>14} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                label, m.precision, m.recall, m.f1, m.support
            )?;
        }
        write!(f, "{:>14} {:>9} {:>9} {:>9.2} {:>9}", "accuracy", "", "", self.accuracy, cm.total())
    }
}

/// Predict `rows` with `model` and score against their targets
pub fn evaluate(model: &RandomForest, rows: &[FeatureRow]) -> Result<Evaluation> {
    let x = feature_matrix(rows);
    let predicted = model.predict(x.view())?;
    Ok(Evaluation::from_predictions(&targets(rows), &predicted))
}
