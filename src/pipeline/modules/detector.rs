//! Object detector.
//!
//! Runs a [`DetectionBackend`] on every frame and annotates it with `tags`,
//! `confidences` and `bounding_boxes`. A detection is kept only when its
//! confidence is strictly above the threshold, its label is one of the target
//! labels (if any are configured) and its box area lies within
//! `[min_size, max_size]`.
//!
//! With `batch_size = n` the detector exposes `input0..n` and `output0..n`;
//! frames from `input{i}` leave on `output{i}`.

use super::backend::{boxes_to_field, Detection, DetectionBackend, StaticDetections};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::frame::{FieldValue, Frame};
use crate::pipeline::module::{ModuleContext, Step};
use crate::pipeline::port::{PortDescriptor, PortDirection, PortKind};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub name: String,
    pub detector_type: String,
    pub model: String,
    pub confidence_threshold: f64,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub target_labels: Vec<String>,
    pub batch_size: usize,
    /// Frames arriving within this interval of the last detection on the
    /// same input pass through unannotated.
    pub idle_interval_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            name: "detector".to_string(),
            detector_type: String::new(),
            model: String::new(),
            confidence_threshold: 0.5,
            min_size: None,
            max_size: None,
            target_labels: Vec::new(),
            batch_size: 1,
            idle_interval_ms: 0,
        }
    }
}

impl DetectorConfig {
    fn validate(&self) -> PipelineResult<()> {
        let fail = |msg: String| Err(PipelineError::Config(format!("detector {:?}: {}", self.name, msg)));
        if self.detector_type.trim().is_empty() {
            return fail("detector_type is required".into());
        }
        if self.model.trim().is_empty() {
            return fail("model is required".into());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return fail(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min > max {
                return fail(format!("min_size {} exceeds max_size {}", min, max));
            }
        }
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".into());
        }
        Ok(())
    }
}

pub struct Detector {
    config: DetectorConfig,
    backend: Box<dyn DetectionBackend>,
    ports: Vec<PortDescriptor>,
    closed: Vec<bool>,
    idle_interval: Duration,
    /// Per input.
    last_detection: Vec<Option<Instant>>,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> PipelineResult<Self> {
        Self::with_backend(config, Box::new(StaticDetections::default()))
    }

    pub fn with_backend(
        config: DetectorConfig,
        backend: Box<dyn DetectionBackend>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let mut ports = Vec::with_capacity(config.batch_size * 2);
        for i in 0..config.batch_size {
            ports.push(PortDescriptor::named(
                Self::input_name(i),
                PortDirection::Input,
                PortKind::Video,
            ));
        }
        for i in 0..config.batch_size {
            ports.push(PortDescriptor::named(
                Self::output_name(i),
                PortDirection::Output,
                PortKind::Video,
            ));
        }
        Ok(Self {
            closed: vec![false; config.batch_size],
            last_detection: vec![None; config.batch_size],
            idle_interval: Duration::from_millis(config.idle_interval_ms),
            config,
            backend,
            ports,
        })
    }

    fn input_name(i: usize) -> String {
        format!("input{}", i)
    }

    fn output_name(i: usize) -> String {
        format!("output{}", i)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn on_start(&mut self) -> PipelineResult<()> {
        self.backend
            .load(&self.config.detector_type, &self.config.model)?;
        self.closed.iter_mut().for_each(|c| *c = false);
        self.last_detection.iter_mut().for_each(|t| *t = None);
        tracing::info!(
            "Detector '{}' loaded {} model {:?}",
            self.config.name,
            self.config.detector_type,
            self.config.model
        );
        Ok(())
    }

    pub fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        for i in 0..self.config.batch_size {
            if self.closed[i] {
                continue;
            }
            let input = Self::input_name(i);
            if !ctx.is_input_connected(&input) {
                self.closed[i] = true;
                continue;
            }
            match ctx.pop(&input) {
                Ok(frame) => {
                    let frame = self.annotate(i, frame)?;
                    ctx.push(&Self::output_name(i), frame)?;
                }
                Err(e) if e.is_closed() => self.closed[i] = true,
                Err(e) => return Err(e),
            }
        }

        if self.closed.iter().all(|c| *c) {
            return Ok(Step::Finished);
        }
        Ok(Step::Continue)
    }

    fn annotate(&mut self, input: usize, mut frame: Frame) -> PipelineResult<Frame> {
        if let Some(last) = self.last_detection[input] {
            if last.elapsed() < self.idle_interval {
                return Ok(frame);
            }
        }

        let detections = self.backend.detect(&frame)?;
        self.last_detection[input] = Some(Instant::now());

        let kept: Vec<Detection> = detections
            .into_iter()
            .filter(|d| self.accepts(d))
            .collect();
        tracing::trace!("Detector '{}' kept {} detections", self.config.name, kept.len());

        let tags: Vec<FieldValue> = kept.iter().map(|d| d.label.as_str().into()).collect();
        let confidences: Vec<FieldValue> = kept.iter().map(|d| d.confidence.into()).collect();
        let boxes: Vec<_> = kept.iter().map(|d| d.bbox).collect();

        frame.set("tags", tags);
        frame.set("confidences", confidences);
        frame.set("bounding_boxes", boxes_to_field(&boxes));
        Ok(frame)
    }

    fn accepts(&self, detection: &Detection) -> bool {
        if detection.confidence <= self.config.confidence_threshold {
            return false;
        }
        if !self.config.target_labels.is_empty()
            && !self.config.target_labels.iter().any(|l| *l == detection.label)
        {
            return false;
        }
        let area = detection.bbox.area();
        if self.config.min_size.is_some_and(|min| area < min) {
            return false;
        }
        if self.config.max_size.is_some_and(|max| area > max) {
            return false;
        }
        true
    }

    pub fn on_stop(&mut self) {}

    pub fn on_clean(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::modules::backend::BoundingBox;

    fn config() -> DetectorConfig {
        DetectorConfig {
            detector_type: "ssd".into(),
            model: "mobilenet".into(),
            ..Default::default()
        }
    }

    fn detection(label: &str, confidence: f64, side: i64) -> Detection {
        Detection {
            label: label.into(),
            confidence,
            bbox: BoundingBox::new(0, 0, side, side),
        }
    }

    #[test]
    fn test_requires_type_and_model() {
        assert!(Detector::new(DetectorConfig::default()).is_err());
        assert!(Detector::new(config()).is_ok());
    }

    #[test]
    fn test_batch_ports() {
        let detector = Detector::new(DetectorConfig {
            batch_size: 2,
            ..config()
        })
        .unwrap();
        let names: Vec<&str> = detector.ports().iter().map(|p| p.name.as_ref()).collect();
        assert_eq!(names, vec!["input0", "input1", "output0", "output1"]);
    }

    #[test]
    fn test_filtering() {
        let cfg = DetectorConfig {
            confidence_threshold: 0.5,
            target_labels: vec!["person".into()],
            min_size: Some(100),
            max_size: Some(10_000),
            ..config()
        };
        let backend = StaticDetections::new(vec![
            detection("person", 0.9, 20),
            detection("person", 0.5, 20),
            detection("car", 0.9, 20),
            detection("person", 0.9, 5),
            detection("person", 0.9, 200),
        ]);
        let mut detector = Detector::with_backend(cfg, Box::new(backend)).unwrap();
        let frame = detector.annotate(0, Frame::new().with("frame_id", 0u64)).unwrap();

        let tags = frame.get_list("tags").unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].as_str(), Some("person"));
        assert_eq!(frame.get_list("confidences").unwrap()[0].as_f64(), Some(0.9));
        assert_eq!(frame.get_list("bounding_boxes").unwrap().len(), 1);
    }

    #[test]
    fn test_idle_interval_passes_frames_through() {
        let cfg = DetectorConfig {
            idle_interval_ms: 60_000,
            ..config()
        };
        let mut detector = Detector::new(cfg).unwrap();
        let first = detector.annotate(0, Frame::new()).unwrap();
        assert!(first.contains("tags"));
        let second = detector.annotate(0, Frame::new()).unwrap();
        assert!(!second.contains("tags"));

        detector.on_start().unwrap();
        assert!(detector.annotate(0, Frame::new()).unwrap().contains("tags"));
    }

    #[test]
    fn test_idle_interval_is_tracked_per_input() {
        let cfg = DetectorConfig {
            batch_size: 2,
            idle_interval_ms: 60_000,
            ..config()
        };
        let mut detector = Detector::new(cfg).unwrap();
        assert!(detector.annotate(0, Frame::new()).unwrap().contains("tags"));
        assert!(detector.annotate(1, Frame::new()).unwrap().contains("tags"));
        assert!(!detector.annotate(0, Frame::new()).unwrap().contains("tags"));
        assert!(!detector.annotate(1, Frame::new()).unwrap().contains("tags"));
    }
}
