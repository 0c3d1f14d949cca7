use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use iris_models::{Dataset, ModelArtifact};

/// Prints the accuracy of a saved model on a dataset.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long)]
    model_path: PathBuf,

    #[arg(long)]
    data_path: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let model = ModelArtifact::load(&args.model_path)
        .with_context(|| format!("loading model {}", args.model_path.display()))?;
    info!(
        "loaded {} model over {} features",
        model.classifier.name(),
        model.n_features
    );

    let data = Dataset::load_with_encoding(&args.data_path, &model.classes)
        .with_context(|| format!("loading data {}", args.data_path.display()))?;

    let score = model
        .score(&data)
        .with_context(|| format!("scoring {}", args.data_path.display()))?;
    println!("{score}");

    Ok(())
}
