//! Length-prefixed envelopes over std TCP.

use super::{Endpoint, Listener, MessageSink, MessageSource, Received};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::wire::MAX_ENVELOPE_SIZE;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

const ACCEPT_POLL: Duration = Duration::from_millis(10);

pub struct TcpSink {
    stream: TcpStream,
}

impl TcpSink {
    pub fn connect(endpoint: &Endpoint) -> PipelineResult<Self> {
        let stream = TcpStream::connect(endpoint.authority()).map_err(|e| {
            PipelineError::Transport(format!("connect to {} failed: {}", endpoint, e))
        })?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

impl MessageSink for TcpSink {
    fn send(&mut self, message: &[u8]) -> PipelineResult<()> {
        let len = u32::try_from(message.len())
            .map_err(|_| PipelineError::Protocol("message too large".into()))?;
        self.stream
            .write_all(&len.to_be_bytes())
            .and_then(|_| self.stream.write_all(message))
            .and_then(|_| self.stream.flush())
            .map_err(|e| PipelineError::Transport(format!("send failed: {}", e)))
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

pub struct TcpMessageListener {
    listener: TcpListener,
}

impl TcpMessageListener {
    pub fn bind(endpoint: &Endpoint) -> PipelineResult<Self> {
        let listener = TcpListener::bind(endpoint.authority()).map_err(|e| {
            PipelineError::Transport(format!("bind {} failed: {}", endpoint, e))
        })?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }
}

impl Listener for TcpMessageListener {
    fn accept_timeout(
        &mut self,
        timeout: Duration,
    ) -> PipelineResult<Option<Box<dyn MessageSource>>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!("Accepted TCP peer {}", peer);
                    stream.set_nonblocking(false)?;
                    return Ok(Some(Box::new(TcpSource::new(stream))));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(ACCEPT_POLL.min(deadline - now));
                }
                Err(e) => return Err(PipelineError::Transport(format!("accept failed: {}", e))),
            }
        }
    }

    fn local_addr(&self) -> PipelineResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Reassembles length-prefixed messages from partial reads.
pub struct TcpSource {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl TcpSource {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    fn take_message(&mut self) -> PipelineResult<Option<Vec<u8>>> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&self.buffer[..4]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > MAX_ENVELOPE_SIZE {
            return Err(PipelineError::Protocol(format!(
                "incoming message of {} bytes exceeds the limit",
                len
            )));
        }
        if self.buffer.len() < 4 + len {
            return Ok(None);
        }
        let message = self.buffer[4..4 + len].to_vec();
        self.buffer.drain(..4 + len);
        Ok(Some(message))
    }
}

impl MessageSource for TcpSource {
    fn recv_timeout(&mut self, timeout: Duration) -> PipelineResult<Received> {
        if let Some(message) = self.take_message()? {
            return Ok(Received::Message(message));
        }
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 16 * 1024];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Received::Timeout);
            }
            self.stream.set_read_timeout(Some(remaining))?;
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(Received::Disconnected),
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    if let Some(message) = self.take_message()? {
                        return Ok(Received::Message(message));
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(Received::Timeout)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
                ) =>
                {
                    return Ok(Received::Disconnected)
                }
                Err(e) => return Err(PipelineError::Transport(format!("read failed: {}", e))),
            }
        }
    }
}
