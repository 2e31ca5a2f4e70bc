//! Training-data preparation for the plate detector: Pascal-VOC annotations to
//! YOLO label files, and a seeded train/validation split.

use failure::Error;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use roxmltree::{Document, Node};
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

/// YOLO labels for one annotated image.
#[derive(Debug, Clone, PartialEq)]
pub struct YoloLabels {
    /// Label file name: the image file name with a `.txt` extension.
    pub file_name: String,
    pub lines: Vec<String>,
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>, Error> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .ok_or_else(|| format_err!("Missing <{}> in <{}>", name, node.tag_name().name()))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, Error> {
    Ok(child(node, name)?.text().unwrap_or("").trim())
}

fn child_number(node: Node, name: &str) -> Result<f64, Error> {
    let text = child_text(node, name)?;
    text.parse::<f64>()
        .map_err(|_| format_err!("<{}> is not a number: {:?}", name, text))
}

/// Converts one VOC annotation document. `classes` lists the object names in
/// class-index order; objects with other names are skipped.
pub fn voc_to_yolo(xml: &str, classes: &[String]) -> Result<YoloLabels, Error> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();

    let image_name = child_text(root, "filename")?;
    // Directory parts are dropped so labels stay inside the output directory.
    let file_name = Path::new(image_name)
        .file_name()
        .map(|name| Path::new(name).with_extension("txt"))
        .ok_or_else(|| format_err!("Unusable <filename> {:?}", image_name))?
        .to_string_lossy()
        .into_owned();

    let size = child(root, "size")?;
    let img_w = child_number(size, "width")?;
    let img_h = child_number(size, "height")?;
    if img_w <= 0.0 || img_h <= 0.0 {
        return Err(format_err!("{} has an empty image size", image_name));
    }

    let mut lines = Vec::new();
    for object in root.children().filter(|n| n.has_tag_name("object")) {
        let name = child_text(object, "name").unwrap_or("");
        let class = match classes.iter().position(|c| c == name) {
            Some(i) => i,
            None => {
                warn!("{}: skipping object of unknown class {:?}", image_name, name);
                continue;
            }
        };
        let bbox = child(object, "bndbox")?;
        let xmin = child_number(bbox, "xmin")?;
        let ymin = child_number(bbox, "ymin")?;
        let xmax = child_number(bbox, "xmax")?;
        let ymax = child_number(bbox, "ymax")?;

        let x_center = (xmin + xmax) / (2.0 * img_w);
        let y_center = (ymin + ymax) / (2.0 * img_h);
        let width = (xmax - xmin) / img_w;
        let height = (ymax - ymin) / img_h;
        lines.push(format!(
            "{} {} {} {} {}",
            class, x_center, y_center, width, height
        ));
    }
    Ok(YoloLabels { file_name, lines })
}

/// Converts every `.xml` file in `annotations_dir`, writing label files into
/// `labels_dir`. Unreadable annotations are logged and skipped. Returns the
/// number of label files written.
pub fn convert_annotations(
    annotations_dir: &Path,
    labels_dir: &Path,
    classes: &[String],
) -> Result<usize, Error> {
    fs::create_dir_all(labels_dir)?;
    let mut written = 0;
    for entry in fs::read_dir(annotations_dir)? {
        let path = entry?.path();
        if path.extension().map_or(true, |e| e != "xml") {
            continue;
        }
        let labels = match fs::read_to_string(&path)
            .map_err(Error::from)
            .and_then(|xml| voc_to_yolo(&xml, classes))
        {
            Ok(labels) => labels,
            Err(e) => {
                warn!("Skipping {:?}: {}", path, e);
                continue;
            }
        };
        fs::write(labels_dir.join(&labels.file_name), labels.lines.join("\n"))?;
        written += 1;
    }
    info!("Wrote {} label files to {:?}", written, labels_dir);
    Ok(written)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSummary {
    pub train: usize,
    pub val: usize,
}

/// Where `split_dataset` reads from and writes to.
#[derive(Debug, Clone)]
pub struct SplitLayout {
    pub images: PathBuf,
    pub labels: PathBuf,
    /// Receives `images/{train,val}` and `labels/{train,val}`.
    pub output: PathBuf,
}

/// Shuffles the images with a fixed seed and copies the first `train_ratio`
/// share (and their label files, when present) into the train set, the rest
/// into the validation set.
pub fn split_dataset(layout: &SplitLayout, train_ratio: f64, seed: u64) -> Result<SplitSummary, Error> {
    if !(0.0..=1.0).contains(&train_ratio) {
        return Err(format_err!("Train ratio must be within 0..=1, got {}", train_ratio));
    }

    let mut images = Vec::new();
    for entry in fs::read_dir(&layout.images)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
            images.push(name);
        }
    }
    // The split depends only on the seed, never on directory order.
    images.sort();
    images.shuffle(&mut StdRng::seed_from_u64(seed));

    let split_idx = (images.len() as f64 * train_ratio) as usize;
    let (train, val) = images.split_at(split_idx);
    copy_split(layout, "train", train)?;
    copy_split(layout, "val", val)?;

    Ok(SplitSummary {
        train: train.len(),
        val: val.len(),
    })
}

fn copy_split(layout: &SplitLayout, split: &str, images: &[String]) -> Result<(), Error> {
    let image_dir = layout.output.join("images").join(split);
    let label_dir = layout.output.join("labels").join(split);
    fs::create_dir_all(&image_dir)?;
    fs::create_dir_all(&label_dir)?;

    for name in images {
        fs::copy(layout.images.join(name), image_dir.join(name))?;
        let stem = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let label = format!("{}.txt", stem);
        let source = layout.labels.join(&label);
        if source.exists() {
            fs::copy(&source, label_dir.join(&label))?;
        }
    }
    Ok(())
}
