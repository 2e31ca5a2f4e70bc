use crate::annotate::{annotate, Annotation};
use crate::camera::FrameSource;
use crate::detector::{Detector, CONFIDENCE_THRESHOLD};
use crate::error::PipelineError;
use crate::label::LabelFont;
use crate::recognizer::Recognizer;
use crate::registry::VehicleLookup;
use crate::status::classify;
use crate::types::{normalize_plate, Detection, PlateReport};
use bytes::Bytes;
use failure::Error;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};

/// Uploads larger than this on their longest side are scaled down first.
pub const MAX_DIMENSION: u32 = 1024;

/// Detector, recognizer and registry wired together. Built once at startup
/// and shared by every request and stream.
pub struct ImagePipeline {
    detector: Mutex<Box<dyn Detector + Send>>,
    recognizer: Arc<dyn Recognizer>,
    registry: Arc<dyn VehicleLookup>,
    font: Option<LabelFont>,
    jpeg_quality: u8,
}

impl ImagePipeline {
    pub fn new(
        detector: Box<dyn Detector + Send>,
        recognizer: Arc<dyn Recognizer>,
        registry: Arc<dyn VehicleLookup>,
        jpeg_quality: u8,
    ) -> ImagePipeline {
        ImagePipeline {
            detector: Mutex::new(detector),
            recognizer,
            registry,
            font: None,
            jpeg_quality,
        }
    }

    /// Labels streamed boxes with plate text and status.
    pub fn with_font(mut self, font: LabelFont) -> ImagePipeline {
        self.font = Some(font);
        self
    }

    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, Error> {
        let mut detector = self
            .detector
            .lock()
            .map_err(|_| format_err!("Detector lock poisoned"))?;
        detector.detect(frame, CONFIDENCE_THRESHOLD)
    }

    /// Reads the best plate in one uploaded image.
    pub fn process_upload(&self, data: &[u8]) -> Result<PlateReport, PipelineError> {
        let image = image::load_from_memory(data)
            .map_err(|e| {
                debug!("Upload did not decode: {}", e);
                PipelineError::Input("Failed to read image".to_string())
            })?
            .to_rgb8();
        let image = downscale(image, MAX_DIMENSION);

        let detections = self.detect(&image).map_err(PipelineError::unexpected)?;
        let detection = match detections.first() {
            Some(d) => *d,
            None => return Err(PipelineError::NotFound),
        };

        let pixels = detection
            .pixel_box(image.width(), image.height())
            .ok_or_else(|| PipelineError::Input("Invalid plate region".to_string()))?;
        let region = image::imageops::crop_imm(
            &image,
            pixels.x1,
            pixels.y1,
            pixels.width(),
            pixels.height(),
        )
        .to_image();

        let unreadable = || PipelineError::Recognition("Could not read license plate".to_string());
        let raw = match self.recognizer.recognize(&region) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(unreadable()),
            Err(e) => {
                warn!("Recognizer failed on uploaded plate: {}", e);
                return Err(unreadable());
            }
        };
        let plate_number = normalize_plate(&raw);
        if plate_number.is_empty() {
            return Err(unreadable());
        }

        let vehicle_info = self.registry.lookup(&plate_number);
        let status = classify(vehicle_info.as_ref()).label;
        info!("Read plate {} ({:.2}): {}", plate_number, detection.confidence, status);
        Ok(PlateReport {
            plate_number,
            confidence: detection.confidence,
            vehicle_info,
            status,
        })
    }

    /// Detects and annotates every plate in `frame` in place.
    pub fn annotate_frame(&self, frame: &mut RgbImage) -> Result<Annotation, PipelineError> {
        let detections = self.detect(frame).map_err(PipelineError::unexpected)?;
        annotate(
            frame,
            &detections,
            &*self.recognizer,
            &*self.registry,
            self.font.as_ref(),
        )
    }

    pub fn encode_jpeg(&self, frame: &RgbImage) -> Result<Vec<u8>, Error> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality).encode_image(frame)?;
        Ok(jpeg)
    }

    /// Pulls frames from `source` until it runs dry or fails, handing each
    /// annotated frame to `sink` as one multipart chunk. Stops early when
    /// `sink` returns false. Returns the number of chunks delivered.
    pub fn stream_frames<S, F>(&self, source: &mut S, mut sink: F) -> usize
    where
        S: FrameSource + ?Sized,
        F: FnMut(Bytes) -> bool,
    {
        let mut delivered = 0;
        while let Some(next) = source.next_frame() {
            let mut frame = match next {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Error: Could not read frame: {}", e);
                    break;
                }
            };
            if let Err(e) = self.annotate_frame(&mut frame) {
                warn!("Frame left unannotated: {}", e);
            }
            let jpeg = match self.encode_jpeg(&frame) {
                Ok(jpeg) => jpeg,
                Err(e) => {
                    warn!("Dropping frame that failed to encode: {}", e);
                    continue;
                }
            };
            if !sink(multipart_chunk(&jpeg)) {
                debug!("Stream consumer went away");
                break;
            }
            delivered += 1;
        }
        delivered
    }
}

/// One part of a `multipart/x-mixed-replace; boundary=frame` body.
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 64);
    payload.extend_from_slice(b"--frame\r\n");
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

/// Scales `image` so its longest side is at most `max`, keeping the aspect
/// ratio.
pub fn downscale(image: RgbImage, max: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max {
        return image;
    }
    let scale = max as f32 / longest as f32;
    let new_width = ((width as f32 * scale).round() as u32).max(1);
    let new_height = ((height as f32 * scale).round() as u32).max(1);
    image::imageops::resize(&image, new_width, new_height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::StillImage;
    use crate::registry::Registry;
    use crate::types::VehicleRecord;
    use image::{DynamicImage, ImageOutputFormat};
    use std::io::Cursor;

    struct FixedDetector {
        detections: Vec<Detection>,
        seen: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl Detector for FixedDetector {
        fn detect(&mut self, frame: &RgbImage, confidence: f32) -> Result<Vec<Detection>, Error> {
            assert_eq!(confidence, 0.25);
            self.seen.lock().unwrap().push(frame.dimensions());
            Ok(self.detections.clone())
        }
    }

    struct BrokenDetector;

    impl Detector for BrokenDetector {
        fn detect(&mut self, _frame: &RgbImage, _confidence: f32) -> Result<Vec<Detection>, Error> {
            Err(format_err!("model not loaded"))
        }
    }

    struct FixedText(Option<&'static str>);

    impl Recognizer for FixedText {
        fn recognize(&self, _region: &RgbImage) -> Result<Option<String>, Error> {
            Ok(self.0.map(String::from))
        }
    }

    struct FailingRecognizer;

    impl Recognizer for FailingRecognizer {
        fn recognize(&self, _region: &RgbImage) -> Result<Option<String>, Error> {
            Err(format_err!("quota exceeded"))
        }
    }

    fn valid() -> VehicleRecord {
        VehicleRecord {
            valid: true,
            expired: false,
            cases: false,
        }
    }

    fn build(
        detections: Vec<Detection>,
        recognizer: Arc<dyn Recognizer>,
        registry: Registry,
    ) -> (ImagePipeline, Arc<Mutex<Vec<(u32, u32)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = FixedDetector {
            detections,
            seen: seen.clone(),
        };
        (
            ImagePipeline::new(Box::new(detector), recognizer, Arc::new(registry), 80),
            seen,
        )
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    fn plate_box() -> Detection {
        Detection::new(10.0, 10.0, 90.0, 40.0, 0.91)
    }

    #[test]
    fn registered_plate_is_valid() {
        let (pipeline, _) = build(
            vec![plate_box()],
            Arc::new(FixedText(Some("mh01ab1234"))),
            Registry::from_records(vec![("MH01AB1234", valid())]),
        );
        let report = pipeline.process_upload(&png(200, 100)).unwrap();
        assert_eq!(
            report,
            PlateReport {
                plate_number: "MH01AB1234".into(),
                confidence: 0.91,
                vehicle_info: Some(valid()),
                status: "Valid".into(),
            }
        );
    }

    #[test]
    fn empty_registry_reports_not_available() {
        let (pipeline, _) = build(
            vec![plate_box()],
            Arc::new(FixedText(Some("KA01EF9012"))),
            Registry::default(),
        );
        let report = pipeline.process_upload(&png(200, 100)).unwrap();
        assert_eq!(report.vehicle_info, None);
        assert_eq!(report.status, "Not Available in System");
    }

    #[test]
    fn no_detections_is_not_found() {
        let (pipeline, _) = build(vec![], Arc::new(FixedText(Some("X"))), Registry::default());
        assert_eq!(
            pipeline.process_upload(&png(200, 100)),
            Err(PipelineError::NotFound)
        );
    }

    #[test]
    fn only_the_first_detection_is_read() {
        let (pipeline, _) = build(
            vec![
                Detection::new(5.0, 5.0, 5.0, 30.0, 0.9),
                plate_box(),
            ],
            Arc::new(FixedText(Some("AB1234"))),
            Registry::default(),
        );
        assert_eq!(
            pipeline.process_upload(&png(200, 100)),
            Err(PipelineError::Input("Invalid plate region".into()))
        );
    }

    #[test]
    fn undecodable_upload_is_input_error() {
        let (pipeline, seen) = build(vec![plate_box()], Arc::new(FixedText(None)), Registry::default());
        assert_eq!(
            pipeline.process_upload(b"definitely not an image"),
            Err(PipelineError::Input("Failed to read image".into()))
        );
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unreadable_plate_is_recognition_error() {
        let (pipeline, _) = build(vec![plate_box()], Arc::new(FixedText(None)), Registry::default());
        assert!(matches!(
            pipeline.process_upload(&png(200, 100)),
            Err(PipelineError::Recognition(_))
        ));

        let (pipeline, _) = build(vec![plate_box()], Arc::new(FailingRecognizer), Registry::default());
        assert!(matches!(
            pipeline.process_upload(&png(200, 100)),
            Err(PipelineError::Recognition(_))
        ));
    }

    #[test]
    fn detector_failure_is_unexpected() {
        let pipeline = ImagePipeline::new(
            Box::new(BrokenDetector),
            Arc::new(FixedText(None)),
            Arc::new(Registry::default()),
            80,
        );
        assert_eq!(
            pipeline.process_upload(&png(20, 20)),
            Err(PipelineError::Unexpected("model not loaded".into()))
        );
    }

    #[test]
    fn large_uploads_are_downscaled_before_detection() {
        let (pipeline, seen) = build(vec![], Arc::new(FixedText(None)), Registry::default());
        let _ = pipeline.process_upload(&png(2048, 1024));
        let _ = pipeline.process_upload(&png(300, 1500));
        let _ = pipeline.process_upload(&png(640, 480));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1024, 512), (205, 1024), (640, 480)]
        );
    }

    #[test]
    fn stream_emits_one_chunk_per_frame() {
        let (pipeline, _) = build(
            vec![plate_box()],
            Arc::new(FixedText(Some("MH01AB1234"))),
            Registry::from_records(vec![("MH01AB1234", valid())]),
        );
        let mut source = StillImage::new(RgbImage::new(160, 120));
        let mut chunks = Vec::new();
        let delivered = pipeline.stream_frames(&mut source, |chunk| {
            chunks.push(chunk);
            true
        });
        assert_eq!(delivered, 1);
        let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(chunks[0].starts_with(header));
        assert!(chunks[0].ends_with(b"\r\n"));
        let jpeg = &chunks[0][header.len()..chunks[0].len() - 2];
        let decoded = image::load_from_memory(jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (160, 120));
    }

    #[test]
    fn stream_survives_detector_failure() {
        let pipeline = ImagePipeline::new(
            Box::new(BrokenDetector),
            Arc::new(FixedText(None)),
            Arc::new(Registry::default()),
            80,
        );
        let mut source = StillImage::new(RgbImage::new(32, 32));
        assert_eq!(pipeline.stream_frames(&mut source, |_| true), 1);
    }

    #[test]
    fn stream_stops_when_consumer_leaves() {
        struct Endless;
        impl FrameSource for Endless {
            fn next_frame(&mut self) -> Option<Result<RgbImage, Error>> {
                Some(Ok(RgbImage::new(16, 16)))
            }
        }
        let (pipeline, _) = build(vec![], Arc::new(FixedText(None)), Registry::default());
        let mut remaining = 3;
        let delivered = pipeline.stream_frames(&mut Endless, |_| {
            remaining -= 1;
            remaining > 0
        });
        assert_eq!(delivered, 2);
    }

    #[test]
    fn stream_ends_on_source_error() {
        struct Unplugged;
        impl FrameSource for Unplugged {
            fn next_frame(&mut self) -> Option<Result<RgbImage, Error>> {
                Some(Err(format_err!("device unplugged")))
            }
        }
        let (pipeline, _) = build(vec![], Arc::new(FixedText(None)), Registry::default());
        assert_eq!(pipeline.stream_frames(&mut Unplugged, |_| true), 0);
    }
}
