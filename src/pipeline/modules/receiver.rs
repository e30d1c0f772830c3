//! Network source: accepts a peer on its endpoint and decodes envelopes into
//! frames.
//!
//! The endpoint is bound in the start hook, so a bind failure aborts engine
//! start. Peer disconnects are reported as transport errors and the receiver
//! goes back to accepting. Frames whose envelope carries a package type other
//! than the configured one are passed through with a `package_type` field
//! unless they already carry one.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::frame::Frame;
use crate::pipeline::module::{ModuleContext, Step};
use crate::pipeline::port::{PortDescriptor, PortKind};
use crate::pipeline::transport::{self, Endpoint, Listener, MessageSource, Received};
use crate::pipeline::wire::{self, Envelope, PackageType};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

static PORTS: &[PortDescriptor] = &[PortDescriptor::output("output", PortKind::Any)];

/// Internal poll interval so the worker observes stop requests.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub name: String,
    pub endpoint: String,
    pub package_type: String,
    /// Fault the module when no peer connects within this time.
    pub accept_timeout_ms: Option<u64>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            name: "receiver".to_string(),
            endpoint: String::new(),
            package_type: "frame".to_string(),
            accept_timeout_ms: None,
        }
    }
}

pub struct Receiver {
    config: ReceiverConfig,
    endpoint: Endpoint,
    package_type: PackageType,
    listener: Option<Box<dyn Listener>>,
    peer: Option<Box<dyn MessageSource>>,
    waiting_since: Option<Instant>,
    received: u64,
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> PipelineResult<Self> {
        let endpoint = Endpoint::parse(&config.endpoint)?;
        let package_type = PackageType::parse(&config.package_type);
        if !package_type.is_known() {
            tracing::debug!(
                "Receiver '{}' uses custom package type {:?}",
                config.name,
                package_type.as_str()
            );
        }
        Ok(Self {
            config,
            endpoint,
            package_type,
            listener: None,
            peer: None,
            waiting_since: None,
            received: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    /// Address actually bound; useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn on_start(&mut self) -> PipelineResult<()> {
        self.listener = Some(transport::bind(&self.endpoint)?);
        self.waiting_since = None;
        tracing::info!("Receiver '{}' listening on {}", self.config.name, self.endpoint);
        Ok(())
    }

    fn accept(&mut self) -> PipelineResult<bool> {
        let since = *self.waiting_since.get_or_insert_with(Instant::now);
        if let Some(limit) = self.config.accept_timeout_ms.map(Duration::from_millis) {
            if since.elapsed() >= limit {
                return Err(PipelineError::Transport(format!(
                    "no peer connected to {} within {:?}",
                    self.endpoint, limit
                )));
            }
        }
        let listener = self.listener.as_mut().ok_or_else(|| {
            PipelineError::module(&self.config.name, "endpoint is not bound")
        })?;
        match listener.accept_timeout(POLL_INTERVAL)? {
            Some(peer) => {
                tracing::info!("Receiver '{}' accepted a peer", self.config.name);
                self.peer = Some(peer);
                self.waiting_since = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        if self.peer.is_none() && !self.accept()? {
            return Ok(Step::Idle);
        }
        let Some(peer) = self.peer.as_mut() else {
            return Ok(Step::Idle);
        };

        match peer.recv_timeout(POLL_INTERVAL)? {
            Received::Message(bytes) => {
                let frame = self.unwrap_envelope(wire::decode(&bytes)?);
                self.received += 1;
                ctx.push("output", frame)?;
                Ok(Step::Continue)
            }
            Received::Timeout => Ok(Step::Idle),
            Received::Disconnected => {
                ctx.report_transport_error(format!(
                    "peer on {} disconnected after {} envelopes",
                    self.endpoint, self.received
                ));
                self.peer = None;
                Ok(Step::Idle)
            }
        }
    }

    /// Frames of a package type other than the configured one are tagged with
    /// `package_type`, unless the sender's frame already has that field.
    fn unwrap_envelope(&self, envelope: Envelope) -> Frame {
        let mut frame = envelope.frame;
        if envelope.package_type != self.package_type {
            if frame.contains("package_type") {
                tracing::debug!(
                    "Receiver '{}' keeps the sender's package_type field on a {} package",
                    self.config.name,
                    envelope.package_type
                );
            } else {
                frame.set("package_type", envelope.package_type.as_str());
            }
        }
        frame
    }

    pub fn on_stop(&mut self) {}

    pub fn on_clean(&mut self) -> PipelineResult<()> {
        self.peer = None;
        if self.listener.take().is_some() {
            tracing::info!("Receiver '{}' released {}", self.config.name, self.endpoint);
        }
        Ok(())
    }
}
