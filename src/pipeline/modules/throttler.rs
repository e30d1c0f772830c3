//! Rate limiter: forwards at most `fps` frames per second and drops the rest.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::module::{ModuleContext, Step};
use crate::pipeline::port::{PortDescriptor, PortKind};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("input", PortKind::Any),
    PortDescriptor::output("output", PortKind::Any),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlerConfig {
    pub name: String,
    /// 0 disables throttling.
    pub fps: f64,
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        Self {
            name: "throttler".to_string(),
            fps: 0.0,
        }
    }
}

pub struct Throttler {
    config: ThrottlerConfig,
    min_interval: Duration,
    last_forwarded: Option<Instant>,
    dropped: u64,
}

impl Throttler {
    pub fn new(config: ThrottlerConfig) -> PipelineResult<Self> {
        if !config.fps.is_finite() || config.fps < 0.0 {
            return Err(PipelineError::Config(format!(
                "throttler {:?}: fps cannot be negative, got {}",
                config.name, config.fps
            )));
        }
        let min_interval = if config.fps == 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(1.0 / config.fps).map_err(|e| {
                PipelineError::Config(format!(
                    "throttler {:?}: fps {} is too small: {}",
                    config.name, config.fps, e
                ))
            })?
        };
        Ok(Self {
            config,
            min_interval,
            last_forwarded: None,
            dropped: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Whether a frame arriving at `now` should be forwarded.
    fn admit(&mut self, now: Instant) -> bool {
        match self.last_forwarded {
            Some(last) if now.duration_since(last) < self.min_interval => {
                self.dropped += 1;
                false
            }
            _ => {
                self.last_forwarded = Some(now);
                true
            }
        }
    }

    pub fn on_start(&mut self) -> PipelineResult<()> {
        self.last_forwarded = None;
        Ok(())
    }

    pub fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        let frame = ctx.pop("input")?;
        if self.admit(Instant::now()) {
            ctx.push("output", frame)?;
        } else {
            tracing::trace!("Throttler '{}' dropped a frame", self.config.name);
        }
        Ok(Step::Continue)
    }

    pub fn on_stop(&mut self) {
        if self.dropped > 0 {
            tracing::debug!("Throttler '{}' dropped {} frames", self.config.name, self.dropped);
        }
    }

    pub fn on_clean(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}
