use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::info;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::{
    adaboost::AdaBoost,
    dataset::{Dataset, LabelEncoding},
    svc::Svc,
};

/// Bumped whenever the artifact layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum FitError {
    #[error("cannot fit on an empty dataset")]
    EmptyDataset,
    #[error("feature table has {rows} rows but {targets} targets were given")]
    LengthMismatch { rows: usize, targets: usize },
    #[error("feature table has a non-finite value in row {row}")]
    NonFinite { row: usize },
    #[error("need at least two classes to fit, found {found}")]
    TooFewClasses { found: usize },
    #[error("first weak learner is no better than chance (weighted error {error:.3})")]
    WeakLearner { error: f64 },
    #[error("weak learner failed to fit in round {round}: {message}")]
    WeakLearnerFit { round: usize, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model expects {expected} features but the data has {found}")]
    FeatureMismatch { expected: usize, found: usize },
    #[error("cannot score an empty dataset")]
    EmptyDataset,
    #[error("failed to read model {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write model {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("malformed model {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode model {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("model {} has format version {found}, expected {}", path.display(), FORMAT_VERSION)]
    Version { path: PathBuf, found: u32 },
}

/// Shared by every fitted model: a fixed input width and one class code per
/// row.
pub trait Classify {
    fn n_features(&self) -> usize;

    /// Class codes for every row of `x`, which must be `n_features` wide.
    fn classify(&self, x: ArrayView2<f64>) -> Vec<usize>;
}

/// The distinct class codes of a validated training set, plus each row's
/// position in that sorted list.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClassIndex {
    pub classes: Vec<usize>,
    pub positions: Vec<usize>,
}

impl ClassIndex {
    pub fn build(x: ArrayView2<f64>, y: &[usize]) -> Result<ClassIndex, FitError> {
        if x.nrows() != y.len() {
            return Err(FitError::LengthMismatch {
                rows: x.nrows(),
                targets: y.len(),
            });
        }
        if y.is_empty() {
            return Err(FitError::EmptyDataset);
        }
        if let Some(row) = x
            .outer_iter()
            .position(|row| row.iter().any(|v| !v.is_finite()))
        {
            return Err(FitError::NonFinite { row });
        }

        let mut rows_by_code: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, &code) in y.iter().enumerate() {
            rows_by_code.entry(code).or_default().push(row);
        }
        if rows_by_code.len() < 2 {
            return Err(FitError::TooFewClasses {
                found: rows_by_code.len(),
            });
        }

        let mut classes = Vec::with_capacity(rows_by_code.len());
        let mut positions = vec![0; y.len()];
        for (position, (code, rows)) in rows_by_code.into_iter().enumerate() {
            classes.push(code);
            for row in rows {
                positions[row] = position;
            }
        }
        Ok(ClassIndex { classes, positions })
    }
}

/// Fraction of predictions equal to the true code.
pub fn accuracy(predicted: &[usize], truth: &[usize]) -> f64 {
    let hits = predicted
        .iter()
        .zip(truth)
        .filter(|(p, t)| p == t)
        .count();
    hits as f64 / truth.len() as f64
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    Svc(Svc),
    AdaBoost(AdaBoost),
}

impl Classifier {
    pub fn name(&self) -> &'static str {
        match self {
            Classifier::Svc(_) => "svc",
            Classifier::AdaBoost(_) => "adaboost",
        }
    }

    fn inner(&self) -> &dyn Classify {
        match self {
            Classifier::Svc(model) => model,
            Classifier::AdaBoost(model) => model,
        }
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<usize>, ModelError> {
        let model = self.inner();
        if x.ncols() != model.n_features() {
            return Err(ModelError::FeatureMismatch {
                expected: model.n_features(),
                found: x.ncols(),
            });
        }
        Ok(model.classify(x))
    }

    pub fn score(&self, dataset: &Dataset) -> Result<f64, ModelError> {
        if dataset.is_empty() {
            return Err(ModelError::EmptyDataset);
        }
        let predicted = self.predict(dataset.features.view())?;
        Ok(accuracy(&predicted, &dataset.targets))
    }
}

impl Classify for Classifier {
    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn classify(&self, x: ArrayView2<f64>) -> Vec<usize> {
        self.inner().classify(x)
    }
}

impl From<Svc> for Classifier {
    fn from(model: Svc) -> Self {
        Classifier::Svc(model)
    }
}

impl From<AdaBoost> for Classifier {
    fn from(model: AdaBoost) -> Self {
        Classifier::AdaBoost(model)
    }
}

/// Everything needed to score a fitted model later: the classifier and the
/// label encoding its class codes refer to.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub classes: LabelEncoding,
    pub n_features: usize,
    pub classifier: Classifier,
}

impl ModelArtifact {
    pub fn new<C: Into<Classifier>>(classifier: C, classes: LabelEncoding) -> Self {
        let classifier = classifier.into();
        ModelArtifact {
            format_version: FORMAT_VERSION,
            classes,
            n_features: classifier.n_features(),
            classifier,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        let path = path.as_ref();
        let write_err = |source| ModelError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut writer = BufWriter::new(File::create(path).map_err(write_err)?);
        serde_json::to_writer(&mut writer, self).map_err(|source| ModelError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(write_err)?;

        info!("wrote {} model to {}", self.classifier.name(), path.display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        // Check the version before decoding the rest, so old layouts get a
        // clear error instead of a missing-field one:
        #[derive(Deserialize)]
        struct Header {
            format_version: u32,
        }
        let header: Header = serde_json::from_str(&text).map_err(|source| ModelError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        if header.format_version != FORMAT_VERSION {
            return Err(ModelError::Version {
                path: path.to_path_buf(),
                found: header.format_version,
            });
        }

        let artifact: ModelArtifact =
            serde_json::from_str(&text).map_err(|source| ModelError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        if artifact.n_features != artifact.classifier.n_features() {
            return Err(ModelError::FeatureMismatch {
                expected: artifact.classifier.n_features(),
                found: artifact.n_features,
            });
        }
        Ok(artifact)
    }

    /// Accuracy on `dataset`, which must be coded with this artifact's
    /// label encoding.
    pub fn score(&self, dataset: &Dataset) -> Result<f64, ModelError> {
        if dataset.n_features() != self.n_features {
            return Err(ModelError::FeatureMismatch {
                expected: self.n_features,
                found: dataset.n_features(),
            });
        }
        self.classifier.score(dataset)
    }
}
