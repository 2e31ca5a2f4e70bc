use clap::Parser;
use env_logger::Env;
use log::{error, info};
use plate_checker::dataset::convert_annotations;
use std::path::PathBuf;
use std::process;

/// Converts Pascal-VOC plate annotations into YOLO label files.
#[derive(Parser, Debug)]
#[command(name = "voc2yolo")]
struct Args {
    #[arg(long = "annotations", value_name = "DIR", default_value = "archive/annotations")]
    annotations: PathBuf,

    #[arg(long = "labels", value_name = "DIR", default_value = "yolo_labels")]
    labels: PathBuf,

    /// Object names in class-index order.
    #[arg(long = "class", value_name = "NAME", default_value = "licence")]
    classes: Vec<String>,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match convert_annotations(&args.annotations, &args.labels, &args.classes) {
        Ok(count) => info!("Converted {} annotations", count),
        Err(e) => {
            error!("Conversion failed: {}", e);
            process::exit(1);
        }
    }
}
