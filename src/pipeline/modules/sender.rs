//! Network sink: encodes frames into wire envelopes and sends them to a
//! receiver endpoint.
//!
//! The connection is opened lazily on the first frame, with retries and
//! exponential backoff. Every failed attempt is reported as a transport
//! error event; running out of attempts faults the module. A failed send
//! triggers one reconnect cycle before the frame is given up.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::module::{ModuleContext, Step};
use crate::pipeline::port::{PortDescriptor, PortKind};
use crate::pipeline::transport::{self, Endpoint, MessageSink};
use crate::pipeline::wire::{self, PackageType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

static PORTS: &[PortDescriptor] = &[PortDescriptor::input("input", PortKind::Any)];

pub const DEFAULT_CONNECT_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    pub name: String,
    pub endpoint: String,
    pub package_type: String,
    /// Attempts after the first failed connect.
    pub connect_retries: u32,
    /// Delay before the first retry; doubles per attempt up to 5 s.
    pub retry_backoff_ms: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            name: "sender".to_string(),
            endpoint: String::new(),
            package_type: "frame".to_string(),
            connect_retries: DEFAULT_CONNECT_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

pub struct Sender {
    config: SenderConfig,
    endpoint: Endpoint,
    package_type: PackageType,
    sink: Option<Box<dyn MessageSink>>,
    sent: u64,
}

impl Sender {
    pub fn new(config: SenderConfig) -> PipelineResult<Self> {
        let endpoint = Endpoint::parse(&config.endpoint)?;
        let package_type = PackageType::parse(&config.package_type);
        if !package_type.is_known() {
            return Err(PipelineError::Config(format!(
                "sender {:?}: unknown package type {:?}",
                config.name, config.package_type
            )));
        }
        Ok(Self {
            config,
            endpoint,
            package_type,
            sink: None,
            sent: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn on_start(&mut self) -> PipelineResult<()> {
        Ok(())
    }

    fn connect(&self, ctx: &ModuleContext<'_>) -> PipelineResult<Box<dyn MessageSink>> {
        let attempts = self.config.connect_retries.saturating_add(1);
        let mut backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut attempt = 1;
        loop {
            match transport::connect(&self.endpoint) {
                Ok(sink) => {
                    tracing::info!("Sender '{}' connected to {}", self.config.name, self.endpoint);
                    return Ok(sink);
                }
                Err(e) => {
                    ctx.report_transport_error(format!(
                        "connect attempt {}/{} to {} failed: {}",
                        attempt, attempts, self.endpoint, e
                    ));
                    if attempt >= attempts {
                        return Err(e);
                    }
                    if !ctx.sleep(backoff) {
                        return Err(PipelineError::Closed);
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
            }
        }
    }

    pub fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        let frame = ctx.pop("input")?;
        let payload = wire::encode(&self.package_type, &self.package_type.project(&frame))?;

        let mut sink = match self.sink.take() {
            Some(sink) => sink,
            None => self.connect(ctx)?,
        };
        if let Err(e) = sink.send(&payload) {
            ctx.report_transport_error(format!("send to {} failed: {}", self.endpoint, e));
            sink.close();
            sink = self.connect(ctx)?;
            sink.send(&payload)?;
        }
        self.sink = Some(sink);
        self.sent += 1;
        tracing::trace!("Sender '{}' sent envelope {}", self.config.name, self.sent);
        Ok(Step::Continue)
    }

    pub fn on_stop(&mut self) {}

    pub fn on_clean(&mut self) -> PipelineResult<()> {
        if let Some(mut sink) = self.sink.take() {
            sink.close();
            tracing::info!(
                "Sender '{}' closed connection after {} envelopes",
                self.config.name,
                self.sent
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str, package_type: &str) -> SenderConfig {
        SenderConfig {
            endpoint: endpoint.into(),
            package_type: package_type.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_unknown_package_type_rejected() {
        let err = Sender::new(config("ws://localhost:9002", "thumbnail")).err().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        assert!(Sender::new(config("udp://localhost:9002", "frame")).is_err());
        assert!(Sender::new(config("tcp://localhost:9002", "metadata")).is_ok());
    }
}
