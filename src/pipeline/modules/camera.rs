//! Camera source: pulls images from a [`CaptureDevice`] at a target rate.

use super::backend::{CaptureDevice, SyntheticCapture};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::frame::Frame;
use crate::pipeline::module::{ModuleContext, Step};
use crate::pipeline::port::{PortDescriptor, PortKind};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

static PORTS: &[PortDescriptor] = &[PortDescriptor::output("output", PortKind::Video)];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub name: String,
    /// Target frame rate; 0 captures as fast as downstream accepts.
    pub fps: f64,
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            name: "camera".to_string(),
            fps: 0.0,
            max_frames: None,
            width: 64,
            height: 48,
        }
    }
}

pub struct Camera {
    config: CameraConfig,
    device: Box<dyn CaptureDevice>,
    opened: bool,
    frame_id: u64,
    /// `None` captures as fast as downstream accepts.
    interval: Option<Duration>,
    next_due: Option<Instant>,
}

impl Camera {
    pub fn new(config: CameraConfig) -> PipelineResult<Self> {
        Self::with_device(config, Box::new(SyntheticCapture::new()))
    }

    pub fn with_device(
        config: CameraConfig,
        device: Box<dyn CaptureDevice>,
    ) -> PipelineResult<Self> {
        if !config.fps.is_finite() || config.fps < 0.0 {
            return Err(PipelineError::Config(format!(
                "camera {:?}: fps must be a non-negative number, got {}",
                config.name, config.fps
            )));
        }
        if config.width == 0 || config.height == 0 {
            return Err(PipelineError::Config(format!(
                "camera {:?}: image size must be non-zero",
                config.name
            )));
        }
        let interval = if config.fps > 0.0 {
            let interval = Duration::try_from_secs_f64(1.0 / config.fps).map_err(|e| {
                PipelineError::Config(format!(
                    "camera {:?}: fps {} is too small: {}",
                    config.name, config.fps, e
                ))
            })?;
            Some(interval)
        } else {
            None
        };
        Ok(Self {
            config,
            device,
            opened: false,
            frame_id: 0,
            interval,
            next_due: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn on_start(&mut self) -> PipelineResult<()> {
        self.device.open(self.config.width, self.config.height)?;
        self.opened = true;
        self.frame_id = 0;
        self.next_due = None;
        tracing::info!(
            "Camera '{}' opened ({}x{}, {} fps)",
            self.config.name,
            self.config.width,
            self.config.height,
            self.config.fps
        );
        Ok(())
    }

    pub fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        if let Some(max) = self.config.max_frames {
            if self.frame_id >= max {
                return Ok(Step::Finished);
            }
        }

        if let Some(interval) = self.interval {
            let now = Instant::now();
            let due = self.next_due.unwrap_or(now);
            if due > now && !ctx.sleep(due - now) {
                return Ok(Step::Idle);
            }
            let next = due.max(now).checked_add(interval).ok_or_else(|| {
                PipelineError::module(&self.config.name, "frame interval overflows the clock")
            })?;
            self.next_due = Some(next);
        }

        let Some(image) = self.device.capture()? else {
            tracing::info!("Camera '{}' exhausted after {} frames", self.config.name, self.frame_id);
            return Ok(Step::Finished);
        };

        let frame = Frame::with_capacity(4)
            .with("frame_id", self.frame_id)
            .with("camera_name", self.config.name.as_str())
            .with("capture_time_micros", chrono::Utc::now().timestamp_micros())
            .with("original_image", image);
        tracing::trace!("Camera '{}' captured frame {}", self.config.name, self.frame_id);
        self.frame_id += 1;
        ctx.push("output", frame)?;
        Ok(Step::Continue)
    }

    pub fn on_stop(&mut self) {}

    pub fn on_clean(&mut self) -> PipelineResult<()> {
        if self.opened {
            self.device.close();
            self.opened = false;
        }
        Ok(())
    }
}
