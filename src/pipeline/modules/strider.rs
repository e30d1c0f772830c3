//! Forwards every `stride`-th frame, starting with the first.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::module::{ModuleContext, Step};
use crate::pipeline::port::{PortDescriptor, PortKind};
use serde::{Deserialize, Serialize};

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("input", PortKind::Any),
    PortDescriptor::output("output", PortKind::Any),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StriderConfig {
    pub name: String,
    pub stride: u64,
}

impl Default for StriderConfig {
    fn default() -> Self {
        Self {
            name: "strider".to_string(),
            stride: 1,
        }
    }
}

pub struct Strider {
    config: StriderConfig,
    index: u64,
}

impl Strider {
    pub fn new(config: StriderConfig) -> PipelineResult<Self> {
        if config.stride == 0 {
            return Err(PipelineError::Config(format!(
                "strider {:?}: stride must be at least 1",
                config.name
            )));
        }
        Ok(Self { config, index: 0 })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    fn admit(&mut self) -> bool {
        let pass = self.index % self.config.stride == 0;
        self.index += 1;
        pass
    }

    pub fn on_start(&mut self) -> PipelineResult<()> {
        self.index = 0;
        Ok(())
    }

    pub fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        let frame = ctx.pop("input")?;
        if self.admit() {
            ctx.push("output", frame)?;
        }
        Ok(Step::Continue)
    }

    pub fn on_stop(&mut self) {}

    pub fn on_clean(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_stride_rejected() {
        let config = StriderConfig {
            stride: 0,
            ..Default::default()
        };
        assert!(Strider::new(config).is_err());
    }

    #[test]
    fn test_every_third() {
        let mut s = Strider::new(StriderConfig {
            stride: 3,
            ..Default::default()
        })
        .unwrap();
        let passed: Vec<bool> = (0..7).map(|_| s.admit()).collect();
        assert_eq!(passed, vec![true, false, false, true, false, false, true]);
    }
}
