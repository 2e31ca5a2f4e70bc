use clap::Parser;
use env_logger::Env;
use log::{error, info};
use plate_checker::dataset::{split_dataset, SplitLayout};
use std::path::PathBuf;
use std::process;

/// Splits the plate images and their labels into train and validation sets.
#[derive(Parser, Debug)]
#[command(name = "split_dataset")]
struct Args {
    #[arg(long = "images", value_name = "DIR", default_value = "archive/images")]
    images: PathBuf,

    #[arg(long = "labels", value_name = "DIR", default_value = "yolo_labels")]
    labels: PathBuf,

    #[arg(long = "output", value_name = "DIR", default_value = "datasets")]
    output: PathBuf,

    #[arg(long = "train-ratio", value_name = "RATIO", default_value_t = 0.8)]
    train_ratio: f64,

    #[arg(long = "seed", default_value_t = 42)]
    seed: u64,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let layout = SplitLayout {
        images: args.images,
        labels: args.labels,
        output: args.output,
    };

    match split_dataset(&layout, args.train_ratio, args.seed) {
        Ok(summary) => info!(
            "Dataset split: {} training, {} validation",
            summary.train, summary.val
        ),
        Err(e) => {
            error!("Split failed: {}", e);
            process::exit(1);
        }
    }
}
