use super::Detector;
use crate::types::Detection;
use failure::Error;
use image::{imageops::FilterType, RgbImage};
use log::{debug, info};
use ndarray::{s, Array, ArrayView, Axis, Ix3, IxDyn};
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::path::Path;

const INPUT_SIZE: u32 = 640;

/// YOLOv8-style plate detector exported to ONNX.
pub struct YoloDetector {
    session: Session,
    iou_threshold: f32,
}

impl YoloDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, iou_threshold: f32) -> Result<Self, Error> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(format_err!("Model file not found at {:?}", model_path));
        }
        let session = Session::builder()
            .map_err(|e| format_err!("Failed to create session: {}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| format_err!("Failed to set optimization level: {}", e))?
            .with_intra_threads(4)
            .map_err(|e| format_err!("Failed to set thread count: {}", e))?
            .commit_from_file(model_path)
            .map_err(|e| format_err!("Failed to load model {:?}: {}", model_path, e))?;
        info!("Loaded detection model from {:?}", model_path);
        Ok(YoloDetector {
            session,
            iou_threshold,
        })
    }

    fn prepare_input(&self, frame: &RgbImage) -> Result<Tensor<f32>, Error> {
        let resized = image::imageops::resize(frame, INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);
        let mut input = Array::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = pixel.0;
            input[[0, 0, y, x]] = (r as f32) / 255.0;
            input[[0, 1, y, x]] = (g as f32) / 255.0;
            input[[0, 2, y, x]] = (b as f32) / 255.0;
        }
        Tensor::from_array(input).map_err(|e| format_err!("Failed to build input tensor: {}", e))
    }

    fn process_output(
        &self,
        output: Array<f32, Ix3>,
        confidence: f32,
        width: u32,
        height: u32,
    ) -> Vec<Detection> {
        let sx = width as f32 / INPUT_SIZE as f32;
        let sy = height as f32 / INPUT_SIZE as f32;
        let mut boxes = Vec::new();
        for row in output.slice(s![0, .., ..]).axis_iter(Axis(0)) {
            let score = row
                .iter()
                .skip(4)
                .cloned()
                .fold(0.0_f32, f32::max);
            if score < confidence {
                continue;
            }
            let (xc, yc, w, h) = (row[0] * sx, row[1] * sy, row[2] * sx, row[3] * sy);
            boxes.push(Detection::new(
                xc - w / 2.0,
                yc - h / 2.0,
                xc + w / 2.0,
                yc + h / 2.0,
                score,
            ));
        }

        boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut kept: Vec<Detection> = Vec::new();
        for candidate in boxes {
            if kept.iter().all(|k| iou(k, &candidate) < self.iou_threshold) {
                kept.push(candidate);
            }
        }
        kept
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &RgbImage, confidence: f32) -> Result<Vec<Detection>, Error> {
        let input = self.prepare_input(frame)?;
        let output = {
            let outputs = self
                .session
                .run(inputs!["images" => input])
                .map_err(|e| format_err!("Inference failed: {}", e))?;
            let (shape, data) = outputs["output0"]
                .try_extract_tensor::<f32>()
                .map_err(|e| format_err!("Unexpected model output: {}", e))?;
            let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            ArrayView::from_shape(IxDyn(&shape), data)?
                .into_dimensionality::<Ix3>()
                .map_err(|e| format_err!("Unexpected model output shape: {}", e))?
                // (1, 4 + classes, anchors) -> (1, anchors, 4 + classes)
                .permuted_axes([0, 2, 1])
                .to_owned()
        };
        let detections = self.process_output(output, confidence, frame.width(), frame.height());
        debug!("Detector found {} candidate plates", detections.len());
        Ok(detections)
    }
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = ix * iy;
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
