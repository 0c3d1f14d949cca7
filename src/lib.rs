pub mod adaboost;
pub mod dataset;
pub mod model;
pub mod svc;

pub use adaboost::{AdaBoost, AdaBoostParams};
pub use dataset::{Dataset, DatasetError, LabelEncoding};
pub use model::{accuracy, Classifier, Classify, FitError, ModelArtifact, ModelError};
pub use svc::{Gamma, Svc, SvcParams};

/// File names inside the data directory.
pub const TRAIN_FILE: &str = "iris_train.csv";
pub const TEST_FILE: &str = "iris_test.csv";

/// File names inside the models directory.
pub const MODEL_A_FILE: &str = "model_a.joblib";
pub const MODEL_B_FILE: &str = "model_b.joblib";
