//! Byte-stream transports for the sender/receiver bridge.
//!
//! An endpoint URI (`tcp://host:port` or `ws://host:port`) selects the
//! transport. Both move whole envelopes as discrete messages:
//!
//! - `tcp`: 4-byte big-endian length prefix over a plain TCP stream.
//! - `ws`: one binary WebSocket message per envelope.
//!
//! Senders get a [`MessageSink`] from [`connect`]; receivers get a
//! [`Listener`] from [`bind`] and accept one peer at a time.

mod tcp;
mod websocket;

use crate::pipeline::error::{PipelineError, PipelineResult};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Ws,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Ws => "ws",
        }
    }
}

/// Parsed `scheme://host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn parse(uri: &str) -> PipelineResult<Self> {
        let bad = |reason: &str| PipelineError::Config(format!("invalid endpoint {:?}: {}", uri, reason));

        let (scheme, rest) = uri.trim().split_once("://").ok_or_else(|| bad("missing scheme"))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "tcp" => Scheme::Tcp,
            "ws" => Scheme::Ws,
            other => return Err(bad(&format!("unsupported scheme {:?}", other))),
        };
        let rest = rest.trim_end_matches('/');
        let (host, port) = rest.rsplit_once(':').ok_or_else(|| bad("missing port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(bad("missing host"));
        }
        let port = port.parse::<u16>().map_err(|_| bad("port is not a number"))?;
        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    /// `host:port`, suitable for socket connect/bind calls.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.authority())
    }
}

/// Result of waiting for one message.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Message(Vec<u8>),
    /// Nothing arrived within the poll interval.
    Timeout,
    /// The peer closed the connection.
    Disconnected,
}

/// Outgoing half of a transport connection.
pub trait MessageSink: Send {
    fn send(&mut self, message: &[u8]) -> PipelineResult<()>;

    fn close(&mut self);
}

/// Incoming half of an accepted transport connection.
pub trait MessageSource: Send {
    fn recv_timeout(&mut self, timeout: Duration) -> PipelineResult<Received>;
}

/// Bound endpoint accepting one peer at a time.
pub trait Listener: Send {
    /// Accept the next peer, or `None` after `timeout`.
    fn accept_timeout(&mut self, timeout: Duration)
        -> PipelineResult<Option<Box<dyn MessageSource>>>;

    fn local_addr(&self) -> PipelineResult<SocketAddr>;
}

pub fn connect(endpoint: &Endpoint) -> PipelineResult<Box<dyn MessageSink>> {
    match endpoint.scheme {
        Scheme::Tcp => Ok(Box::new(tcp::TcpSink::connect(endpoint)?)),
        Scheme::Ws => Ok(Box::new(websocket::WsSink::connect(endpoint)?)),
    }
}

pub fn bind(endpoint: &Endpoint) -> PipelineResult<Box<dyn Listener>> {
    match endpoint.scheme {
        Scheme::Tcp => Ok(Box::new(tcp::TcpMessageListener::bind(endpoint)?)),
        Scheme::Ws => Ok(Box::new(websocket::WsListener::bind(endpoint)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let ep = Endpoint::parse("ws://localhost:9002").unwrap();
        assert_eq!(ep.scheme, Scheme::Ws);
        assert_eq!(ep.host, "localhost");
        assert_eq!(ep.port, 9002);
        assert_eq!(ep.to_string(), "ws://localhost:9002");

        let ep: Endpoint = "tcp://[::1]:7000".parse().unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.authority(), "[::1]:7000");
    }

    #[test]
    fn test_parse_endpoint_errors() {
        for uri in ["localhost:9002", "http://host:80", "ws://host", "ws://:80", "tcp://h:port"] {
            assert!(
                matches!(Endpoint::parse(uri), Err(PipelineError::Config(_))),
                "{uri} should be rejected"
            );
        }
    }
}
