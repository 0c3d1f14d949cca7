use std::fmt;

use linfa::prelude::*;
use linfa_trees::{DecisionTree, SplitQuality};
use log::debug;
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::model::{ClassIndex, Classify, FitError};

#[derive(Debug, Clone, PartialEq)]
pub struct AdaBoostParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
}

impl Default for AdaBoostParams {
    fn default() -> Self {
        AdaBoostParams {
            n_estimators: 50,
            learning_rate: 1.0,
        }
    }
}

impl AdaBoostParams {
    /// Multiclass boosting (SAMME) of depth-one Gini decision trees.
    pub fn fit(&self, x: ArrayView2<f64>, y: &[usize]) -> Result<AdaBoost, FitError> {
        let ClassIndex { classes, positions } = ClassIndex::build(x, y)?;
        let n_classes = classes.len() as f64;
        let n_samples = y.len() as f64;

        // Trees are fitted on positions into `classes`, so their outputs
        // index the score table directly:
        let targets = Array1::from(positions);
        let mut data = linfa::Dataset::new(x.to_owned(), targets.clone());

        // Normalised to sum to one; the trees see them scaled by the row
        // count so linfa's minimum leaf weights stay meaningful.
        let mut sample_weights = vec![1.0 / n_samples; y.len()];
        let mut trees = Vec::new();
        let mut estimator_weights = Vec::new();

        for round in 0..self.n_estimators {
            data = data.with_weights(
                sample_weights
                    .iter()
                    .map(|&w| (w * n_samples) as f32)
                    .collect(),
            );
            let tree = DecisionTree::<f64, usize>::params()
                .split_quality(SplitQuality::Gini)
                .max_depth(Some(1))
                .min_weight_split(1e-6)
                .min_weight_leaf(1e-6)
                .fit(&data)
                .map_err(|err| FitError::WeakLearnerFit {
                    round,
                    message: err.to_string(),
                })?;

            let predicted: Array1<usize> = tree.predict(&x);
            let missed: Vec<bool> = predicted
                .iter()
                .zip(&targets)
                .map(|(guess, truth)| guess != truth)
                .collect();

            let total: f64 = sample_weights.iter().sum();
            let error = sample_weights
                .iter()
                .zip(&missed)
                .filter(|&(_, &miss)| miss)
                .map(|(w, _)| w)
                .sum::<f64>()
                / total;

            if error <= 0.0 {
                debug!("adaboost: round {round} fits perfectly, stopping");
                trees.push(tree);
                estimator_weights.push(1.0);
                break;
            }

            if error >= 1.0 - 1.0 / n_classes {
                if trees.is_empty() {
                    return Err(FitError::WeakLearner { error });
                }
                debug!("adaboost: round {round} no better than chance ({error:.3}), stopping");
                break;
            }

            let weight =
                self.learning_rate * (((1.0 - error) / error).ln() + (n_classes - 1.0).ln());
            debug!("adaboost: round {round} error {error:.4} weight {weight:.4}");

            if round + 1 < self.n_estimators {
                let boost = weight.exp();
                for (w, &miss) in sample_weights.iter_mut().zip(&missed) {
                    if miss {
                        *w *= boost;
                    }
                }
                let total: f64 = sample_weights.iter().sum();
                sample_weights.iter_mut().for_each(|w| *w /= total);
            }

            trees.push(tree);
            estimator_weights.push(weight);
        }

        Ok(AdaBoost {
            n_features: x.ncols(),
            classes,
            trees,
            estimator_weights,
        })
    }
}

/// A fitted SAMME ensemble. Tree outputs are positions into `classes`.
#[derive(Serialize, Deserialize)]
pub struct AdaBoost {
    n_features: usize,
    classes: Vec<usize>,
    trees: Vec<DecisionTree<f64, usize>>,
    estimator_weights: Vec<f64>,
}

impl AdaBoost {
    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }
}

impl fmt::Debug for AdaBoost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaBoost")
            .field("n_features", &self.n_features)
            .field("classes", &self.classes)
            .field("n_estimators", &self.trees.len())
            .field("estimator_weights", &self.estimator_weights)
            .finish()
    }
}

impl Classify for AdaBoost {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn classify(&self, x: ArrayView2<f64>) -> Vec<usize> {
        let mut scores = vec![vec![0.0; self.classes.len()]; x.nrows()];
        for (tree, weight) in self.trees.iter().zip(&self.estimator_weights) {
            let predicted: Array1<usize> = tree.predict(&x);
            for (row, position) in scores.iter_mut().zip(predicted) {
                if let Some(score) = row.get_mut(position) {
                    *score += weight;
                }
            }
        }

        scores
            .iter()
            .map(|row| {
                let (best, _) = row.iter().enumerate().fold(
                    (0, f64::NEG_INFINITY),
                    |(best, best_score), (position, &score)| {
                        if score > best_score {
                            (position, score)
                        } else {
                            (best, best_score)
                        }
                    },
                );
                self.classes[best]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn perfect_first_round_stops_early() {
        let x = array![[0.0], [1.0], [10.0], [11.0]];
        let y = [0, 0, 1, 1];
        let model = AdaBoostParams::default().fit(x.view(), &y).unwrap();

        assert_eq!(model.n_estimators(), 1);
        assert_eq!(model.estimator_weights, vec![1.0]);
        assert_eq!(model.classify(array![[10.5], [0.5]].view()), vec![1, 0]);
    }

    #[test]
    fn boosting_combines_trees() {
        // No single threshold separates class 1 from the rest.
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = [0, 0, 1, 1, 2, 2];
        let model = AdaBoostParams::default().fit(x.view(), &y).unwrap();

        assert!(model.n_estimators() > 1);
        let hits = model
            .classify(x.view())
            .iter()
            .zip(&y)
            .filter(|(p, t)| p == t)
            .count();
        assert!(hits >= 4, "{hits} of 6");
    }

    #[test]
    fn sparse_codes_are_reported_as_given() {
        let x = array![[0.0], [1.0], [10.0], [11.0]];
        let y = [4, 4, 9, 9];
        let model = AdaBoostParams::default().fit(x.view(), &y).unwrap();
        assert_eq!(model.classify(x.view()), y);
    }

    #[test]
    fn indistinguishable_rows_cannot_boost() {
        let x = array![[1.0], [1.0], [1.0], [1.0]];
        let err = AdaBoostParams::default().fit(x.view(), &[0, 1, 0, 1]).unwrap_err();
        assert!(matches!(err, FitError::WeakLearner { .. }), "{err}");
    }

    #[test]
    fn weights_follow_the_boosting_rule() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = [0, 0, 1, 1, 2, 2];
        let model = AdaBoostParams::default().fit(x.view(), &y).unwrap();

        // A depth-one tree on three balanced classes misses at least a third,
        // so the first weight is at most ln(2) + ln(2).
        let first = model.estimator_weights[0];
        assert!(first > 0.0 && first <= 2.0 * 2f64.ln() + 1e-9, "{first}");
    }
}
