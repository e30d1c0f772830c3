//! Pluggable capture and inference backends.
//!
//! The built-in modules handle ports, parameters and field naming; the actual
//! pixel work is delegated to these traits. Each trait has a simple default
//! implementation so pipelines run end to end without external libraries.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::frame::{FieldValue, Frame};

/// Source of raw images for a [`Camera`](super::Camera).
pub trait CaptureDevice: Send {
    /// Prepare the device for capturing `width` x `height` images.
    fn open(&mut self, width: u32, height: u32) -> PipelineResult<()>;

    /// Grab the next image. `None` means the device is exhausted.
    fn capture(&mut self) -> PipelineResult<Option<Vec<u8>>>;

    fn close(&mut self);
}

/// Generates a deterministic gradient image per frame.
#[derive(Debug, Default)]
pub struct SyntheticCapture {
    width: u32,
    height: u32,
    counter: u8,
    open: bool,
}

impl SyntheticCapture {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptureDevice for SyntheticCapture {
    fn open(&mut self, width: u32, height: u32) -> PipelineResult<()> {
        self.width = width;
        self.height = height;
        self.open = true;
        Ok(())
    }

    fn capture(&mut self) -> PipelineResult<Option<Vec<u8>>> {
        if !self.open {
            return Err(PipelineError::InvalidState {
                operation: "capture",
                state: "closed".to_string(),
            });
        }
        let len = self.width as usize * self.height as usize;
        let seed = self.counter;
        self.counter = self.counter.wrapping_add(1);
        Ok(Some(
            (0..len).map(|i| (i as u8).wrapping_add(seed)).collect(),
        ))
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

impl BoundingBox {
    pub fn new(x: i64, y: i64, w: i64, h: i64) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> i64 {
        self.w.max(0) * self.h.max(0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);
        let inter = (x2 - x1).max(0) * (y2 - y1).max(0);
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            0.0
        } else {
            inter as f64 / union as f64
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame::with_capacity(4)
            .with("x", self.x)
            .with("y", self.y)
            .with("w", self.w)
            .with("h", self.h)
    }

    pub fn from_frame(frame: &Frame) -> PipelineResult<Self> {
        Ok(Self {
            x: frame.get_i64("x")?,
            y: frame.get_i64("y")?,
            w: frame.get_i64("w")?,
            h: frame.get_i64("h")?,
        })
    }
}

/// Read a `bounding_boxes` list field. Missing field means no boxes.
pub fn boxes_from_field(frame: &Frame, field: &str) -> PipelineResult<Vec<BoundingBox>> {
    if !frame.contains(field) {
        return Ok(Vec::new());
    }
    frame
        .get_list(field)?
        .iter()
        .map(|value| match value {
            FieldValue::Frame(f) => BoundingBox::from_frame(f),
            other => Err(PipelineError::TypeMismatch {
                field: field.to_string(),
                expected: "frame",
                found: other.field_type().name(),
            }),
        })
        .collect()
}

pub fn boxes_to_field(boxes: &[BoundingBox]) -> FieldValue {
    FieldValue::List(boxes.iter().map(|b| b.to_frame().into()).collect())
}

/// One raw detection before filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

pub trait DetectionBackend: Send {
    /// Load the named model. Called from the detector's start hook.
    fn load(&mut self, _detector_type: &str, _model: &str) -> PipelineResult<()> {
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> PipelineResult<Vec<Detection>>;
}

/// Returns the same detections for every frame; empty by default.
#[derive(Debug, Clone, Default)]
pub struct StaticDetections {
    detections: Vec<Detection>,
}

impl StaticDetections {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl DetectionBackend for StaticDetections {
    fn detect(&mut self, _frame: &Frame) -> PipelineResult<Vec<Detection>> {
        Ok(self.detections.clone())
    }
}

pub trait ClassificationBackend: Send {
    fn load(&mut self, _model: &str) -> PipelineResult<()> {
        Ok(())
    }

    /// Label/probability pairs in any order.
    fn classify(&mut self, image: &[u8]) -> PipelineResult<Vec<(String, f64)>>;
}

/// Returns fixed scores for every image; empty by default.
#[derive(Debug, Clone, Default)]
pub struct StaticScores {
    scores: Vec<(String, f64)>,
}

impl StaticScores {
    pub fn new(scores: Vec<(String, f64)>) -> Self {
        Self { scores }
    }
}

impl ClassificationBackend for StaticScores {
    fn classify(&mut self, _image: &[u8]) -> PipelineResult<Vec<(String, f64)>> {
        Ok(self.scores.clone())
    }
}

pub trait TransformBackend: Send {
    /// Convert `image` to a `width` x `height` x `channels` model input.
    fn transform(
        &mut self,
        image: &[u8],
        width: u32,
        height: u32,
        channels: u32,
    ) -> PipelineResult<Vec<u8>>;
}

/// Passes the image bytes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl TransformBackend for IdentityTransform {
    fn transform(&mut self, image: &[u8], _: u32, _: u32, _: u32) -> PipelineResult<Vec<u8>> {
        Ok(image.to_vec())
    }
}

pub trait TrackingBackend: Send {
    /// Assign one id per box, stable across frames for the same object.
    fn track(&mut self, boxes: &[BoundingBox]) -> PipelineResult<Vec<u64>>;
}

/// Greedy IoU matcher against the previous frame's boxes. With a threshold
/// above 1.0 nothing ever matches and every box gets a fresh id.
#[derive(Debug, Clone)]
pub struct IouTracker {
    threshold: f64,
    next_id: u64,
    previous: Vec<(u64, BoundingBox)>,
}

impl IouTracker {
    pub const DEFAULT_THRESHOLD: f64 = 0.3;

    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            next_id: 0,
            previous: Vec::new(),
        }
    }

    /// Tracker that never matches.
    pub fn sequential() -> Self {
        Self::new(f64::INFINITY)
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

impl TrackingBackend for IouTracker {
    fn track(&mut self, boxes: &[BoundingBox]) -> PipelineResult<Vec<u64>> {
        let mut unmatched = std::mem::take(&mut self.previous);
        let mut ids = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            let best = unmatched
                .iter()
                .enumerate()
                .map(|(i, (_, prev))| (i, prev.iou(bbox)))
                .filter(|(_, iou)| *iou >= self.threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            let id = match best {
                Some((i, _)) => unmatched.swap_remove(i).0,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    id
                }
            };
            ids.push(id);
            self.previous.push((id, *bbox));
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 0, 10, 10);
        assert!((a.iou(&a) - 1.0).abs() < 1e-9);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-9);
        assert_eq!(a.iou(&BoundingBox::new(100, 100, 1, 1)), 0.0);
    }

    #[test]
    fn test_iou_tracker_keeps_ids_for_overlapping_boxes() {
        let mut tracker = IouTracker::default();
        let first = tracker
            .track(&[BoundingBox::new(0, 0, 10, 10), BoundingBox::new(50, 50, 10, 10)])
            .unwrap();
        assert_eq!(first, vec![0, 1]);

        let second = tracker
            .track(&[BoundingBox::new(51, 51, 10, 10), BoundingBox::new(1, 0, 10, 10)])
            .unwrap();
        assert_eq!(second, vec![1, 0]);

        let third = tracker.track(&[BoundingBox::new(200, 200, 5, 5)]).unwrap();
        assert_eq!(third, vec![2]);
    }

    #[test]
    fn test_sequential_tracker_never_matches() {
        let mut tracker = IouTracker::sequential();
        let bbox = BoundingBox::new(0, 0, 10, 10);
        assert_eq!(tracker.track(&[bbox]).unwrap(), vec![0]);
        assert_eq!(tracker.track(&[bbox]).unwrap(), vec![1]);
    }

    #[test]
    fn test_boxes_field_round_trip() {
        let boxes = vec![BoundingBox::new(1, 2, 3, 4)];
        let frame = Frame::new().with("bounding_boxes", boxes_to_field(&boxes));
        assert_eq!(boxes_from_field(&frame, "bounding_boxes").unwrap(), boxes);
        assert!(boxes_from_field(&frame, "missing").unwrap().is_empty());
    }

    #[test]
    fn test_synthetic_capture_requires_open() {
        let mut capture = SyntheticCapture::new();
        assert!(capture.capture().is_err());
        capture.open(4, 2).unwrap();
        assert_eq!(capture.capture().unwrap().unwrap().len(), 8);
    }
}
