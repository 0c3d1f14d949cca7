use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use iris_models::{
    AdaBoostParams, Classifier, Dataset, ModelArtifact, SvcParams, MODEL_A_FILE, MODEL_B_FILE,
    TEST_FILE, TRAIN_FILE,
};

/// Fits the two demo classifiers on the bundled iris split and writes them to
/// the models directory.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory holding iris_train.csv and iris_test.csv.
    #[arg(long, env = "IRIS_DATA_DIR", default_value = "demo/data")]
    data_dir: PathBuf,

    /// Directory receiving model_a.joblib and model_b.joblib.
    #[arg(long, env = "IRIS_MODELS_DIR", default_value = "demo/models")]
    models_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let train_path = args.data_dir.join(TRAIN_FILE);
    let train = Dataset::load(&train_path)
        .with_context(|| format!("loading training split {}", train_path.display()))?;
    info!(
        "training on {} rows, classes {:?}",
        train.len(),
        train.encoding.classes()
    );

    let model_a: Classifier = SvcParams::default()
        .fit(train.features.view(), &train.targets)
        .context("fitting model A (svc)")?
        .into();
    let model_b: Classifier = AdaBoostParams::default()
        .fit(train.features.view(), &train.targets)
        .context("fitting model B (adaboost)")?
        .into();

    println!("train");
    println!("├─ model A score: {:.3}", model_a.score(&train)?);
    println!("└─ model B score: {:.3}", model_b.score(&train)?);

    // The held-out split is coded with the training classes, so codes agree
    // even when a class is missing from it:
    let test_path = args.data_dir.join(TEST_FILE);
    let test = Dataset::load_with_encoding(&test_path, &train.encoding)
        .with_context(|| format!("loading test split {}", test_path.display()))?;

    println!("\ntest (debugging only. you wouldn't see these irl)");
    println!("├─ model A score: {:.3}", model_a.score(&test)?);
    println!("└─ model B score: {:.3}", model_b.score(&test)?);

    fs::create_dir_all(&args.models_dir)
        .with_context(|| format!("creating {}", args.models_dir.display()))?;
    for (model, file) in [(model_a, MODEL_A_FILE), (model_b, MODEL_B_FILE)] {
        let path = args.models_dir.join(file);
        ModelArtifact::new(model, train.encoding.clone())
            .save(&path)
            .with_context(|| format!("saving {}", path.display()))?;
    }

    Ok(())
}
