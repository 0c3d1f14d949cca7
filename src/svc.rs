use std::{
    fmt, fs,
    io::{self, Write},
};

use libsvm_rs::io::{load_model, save_model};
use libsvm_rs::predict::predict;
use libsvm_rs::train::svm_train;
use libsvm_rs::{set_quiet, KernelType, SvmModel, SvmNode, SvmParameter, SvmProblem, SvmType};
use log::debug;
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::{ClassIndex, Classify, FitError};

/// Coefficient of the RBF kernel `exp(-gamma * |a - b|^2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gamma {
    /// `1 / (n_features * var(X))`, with the variance taken over every cell.
    Scale,
    Value(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SvcParams {
    pub c: f64,
    pub gamma: Gamma,
}

impl Default for SvcParams {
    fn default() -> Self {
        SvcParams {
            c: 1.0,
            gamma: Gamma::Scale,
        }
    }
}

impl SvcParams {
    /// Trains a libsvm C-SVC with an RBF kernel. Multiclass problems are
    /// handled by libsvm's one-vs-one voting.
    pub fn fit(&self, x: ArrayView2<f64>, y: &[usize]) -> Result<Svc, FitError> {
        let index = ClassIndex::build(x, y)?;
        let gamma = match self.gamma {
            Gamma::Scale => scaled_gamma(x),
            Gamma::Value(gamma) => gamma,
        };
        debug!("svc: gamma = {gamma}, {} classes", index.classes.len());

        let problem = SvmProblem {
            labels: y.iter().map(|&code| code as f64).collect(),
            instances: x.outer_iter().map(nodes).collect(),
        };
        let param = SvmParameter {
            svm_type: SvmType::CSvc,
            kernel_type: KernelType::Rbf,
            gamma,
            c: self.c,
            ..Default::default()
        };

        // libsvm reports solver progress on stdout otherwise:
        set_quiet(true);
        let model = svm_train(&problem, &param);

        Ok(Svc {
            gamma,
            n_features: x.ncols(),
            model,
        })
    }
}

/// A fitted RBF support-vector classifier.
///
/// Persisted as libsvm's own text model, embedded in the artifact.
pub struct Svc {
    gamma: f64,
    n_features: usize,
    model: SvmModel,
}

impl Svc {
    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}

impl fmt::Debug for Svc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Svc")
            .field("gamma", &self.gamma)
            .field("n_features", &self.n_features)
            .finish_non_exhaustive()
    }
}

impl Classify for Svc {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn classify(&self, x: ArrayView2<f64>) -> Vec<usize> {
        x.outer_iter()
            .map(|row| predict(&self.model, &nodes(row)) as usize)
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct SvcRecord {
    gamma: f64,
    n_features: usize,
    libsvm_model: String,
}

impl Serialize for Svc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let libsvm_model =
            model_to_text(&self.model).map_err(<S::Error as serde::ser::Error>::custom)?;
        SvcRecord {
            gamma: self.gamma,
            n_features: self.n_features,
            libsvm_model,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Svc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = SvcRecord::deserialize(deserializer)?;
        let model = model_from_text(&record.libsvm_model)
            .map_err(<D::Error as serde::de::Error>::custom)?;
        Ok(Svc {
            gamma: record.gamma,
            n_features: record.n_features,
            model,
        })
    }
}

/// libsvm reads and writes models by path, so the text goes through a
/// scratch file.
fn model_to_text(model: &SvmModel) -> io::Result<String> {
    let file = tempfile::NamedTempFile::new()?;
    save_model(file.path(), model).map_err(|err| io::Error::other(err.to_string()))?;
    fs::read_to_string(file.path())
}

fn model_from_text(text: &str) -> io::Result<SvmModel> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    load_model(file.path()).map_err(|err| io::Error::other(err.to_string()))
}

/// Dense row to libsvm's 1-based sparse nodes.
fn nodes(row: ArrayView1<f64>) -> Vec<SvmNode> {
    row.iter()
        .enumerate()
        .map(|(j, &value)| SvmNode {
            index: j as i32 + 1,
            value,
        })
        .collect()
}

fn scaled_gamma(x: ArrayView2<f64>) -> f64 {
    let n = x.len() as f64;
    let mean = x.sum() / n;
    let variance = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if variance > 0.0 {
        1.0 / (x.ncols() as f64 * variance)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn scale_gamma_uses_overall_variance() {
        let x = array![[0.0, 2.0], [2.0, 0.0]];
        // mean 1, variance 1, two features
        assert!((scaled_gamma(x.view()) - 0.5).abs() < 1e-12);

        let constant = array![[3.0, 3.0], [3.0, 3.0]];
        assert_eq!(scaled_gamma(constant.view()), 1.0);
    }

    #[test]
    fn separates_two_clusters() {
        let x = array![
            [1.0, 1.0],
            [1.2, 0.8],
            [0.9, 1.1],
            [5.0, 5.0],
            [5.1, 4.8],
            [4.9, 5.2],
        ];
        let y = [0, 0, 0, 1, 1, 1];
        let model = SvcParams::default().fit(x.view(), &y).unwrap();

        assert_eq!(model.classify(x.view()), y);
        assert_eq!(model.classify(array![[0.5, 0.7], [6.0, 5.5]].view()), vec![0, 1]);
    }

    #[test]
    fn three_classes_vote() {
        let x = array![
            [0.0, 0.0],
            [0.2, 0.1],
            [4.0, 0.0],
            [4.1, 0.2],
            [0.0, 4.0],
            [0.2, 4.1],
        ];
        let y = [0, 0, 1, 1, 2, 2];
        let model = SvcParams::default().fit(x.view(), &y).unwrap();

        assert_eq!(model.classify(x.view()), y);
    }

    #[test]
    fn fit_is_deterministic() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [3.0, 4.0], [4.0, 3.0]];
        let y = [0, 0, 1, 1];
        let first = SvcParams::default().fit(x.view(), &y).unwrap();
        let second = SvcParams::default().fit(x.view(), &y).unwrap();

        let unseen = array![[0.5, 0.5], [2.0, 2.0], [3.5, 3.5]];
        assert_eq!(first.classify(unseen.view()), second.classify(unseen.view()));
        assert_eq!(first.gamma(), second.gamma());
    }

    #[test]
    fn single_class_is_rejected() {
        let x = array![[0.0, 1.0], [1.0, 0.0]];
        let err = SvcParams::default().fit(x.view(), &[0, 0]).unwrap_err();
        assert!(matches!(err, FitError::TooFewClasses { found: 1 }));
    }

    #[test]
    fn missing_codes_are_kept() {
        // Classes 0 and 2 only: predictions must use the original codes.
        let x = array![[0.0], [0.1], [5.0], [5.1]];
        let y = [0, 0, 2, 2];
        let model = SvcParams::default().fit(x.view(), &y).unwrap();
        assert_eq!(model.classify(array![[5.05], [0.05]].view()), vec![2, 0]);
    }

    #[test]
    fn libsvm_text_survives_serde() {
        let x = array![[0.0, 0.0], [0.2, 0.1], [4.0, 0.0], [4.1, 0.2], [0.0, 4.0], [0.2, 4.1]];
        let y = [0, 0, 1, 1, 2, 2];
        let model = SvcParams::default().fit(x.view(), &y).unwrap();

        let json = serde_json::to_string(&model).unwrap();
        let reloaded: Svc = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.gamma(), model.gamma());
        assert_eq!(reloaded.n_features(), 2);
        assert_eq!(reloaded.classify(x.view()), model.classify(x.view()));
    }

    #[test]
    fn large_training_sets_fit() {
        // 20k rows would need 3.2 GB for a dense kernel matrix.
        let n = 20_000;
        let x = ndarray::Array2::from_shape_fn((n, 2), |(i, j)| {
            let offset = if i % 2 == 0 { 0.0 } else { 10.0 };
            offset + ((i * 7 + j * 13) % 100) as f64 / 100.0
        });
        let y: Vec<usize> = (0..n).map(|i| i % 2).collect();

        let model = SvcParams::default().fit(x.view(), &y).unwrap();
        assert_eq!(model.classify(array![[0.5, 0.5], [10.5, 10.5]].view()), vec![0, 1]);
    }
}
