//! WebSocket transport: one binary message per envelope.
//!
//! Each endpoint owns a small tokio runtime and blocks on it from the module
//! worker thread, so the rest of the engine stays synchronous.

use super::{Endpoint, Listener, MessageSink, MessageSource, Received};
use crate::pipeline::error::{PipelineError, PipelineResult};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

fn runtime() -> PipelineResult<Arc<Runtime>> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("vidpipe-ws")
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| PipelineError::Transport(format!("failed to start I/O runtime: {}", e)))
}

// Sockets are declared before the runtime so they drop while it is alive.
pub struct WsSink {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    runtime: Arc<Runtime>,
}

impl WsSink {
    pub fn connect(endpoint: &Endpoint) -> PipelineResult<Self> {
        let runtime = runtime()?;
        let url = endpoint.to_string();
        let (socket, _response) = runtime
            .block_on(tokio_tungstenite::connect_async(url.as_str()))
            .map_err(|e| PipelineError::Transport(format!("connect to {} failed: {}", url, e)))?;
        Ok(Self { socket, runtime })
    }
}

impl MessageSink for WsSink {
    fn send(&mut self, message: &[u8]) -> PipelineResult<()> {
        self.runtime
            .block_on(self.socket.send(Message::binary(message.to_vec())))
            .map_err(|e| PipelineError::Transport(format!("send failed: {}", e)))
    }

    fn close(&mut self) {
        let _ = self.runtime.block_on(self.socket.close(None));
    }
}

pub struct WsListener {
    listener: TcpListener,
    runtime: Arc<Runtime>,
}

impl WsListener {
    pub fn bind(endpoint: &Endpoint) -> PipelineResult<Self> {
        let runtime = runtime()?;
        let listener = runtime
            .block_on(TcpListener::bind(endpoint.authority()))
            .map_err(|e| PipelineError::Transport(format!("bind {} failed: {}", endpoint, e)))?;
        Ok(Self { listener, runtime })
    }
}

impl Listener for WsListener {
    fn accept_timeout(
        &mut self,
        timeout: Duration,
    ) -> PipelineResult<Option<Box<dyn MessageSource>>> {
        let accepted = self
            .runtime
            .block_on(tokio::time::timeout(timeout, self.listener.accept()));
        let (stream, peer) = match accepted {
            Err(_elapsed) => return Ok(None),
            Ok(result) => result
                .map_err(|e| PipelineError::Transport(format!("accept failed: {}", e)))?,
        };
        let socket = self
            .runtime
            .block_on(tokio_tungstenite::accept_async(stream))
            .map_err(|e| {
                PipelineError::Transport(format!("WebSocket handshake with {} failed: {}", peer, e))
            })?;
        tracing::debug!("Accepted WebSocket peer {}", peer);
        Ok(Some(Box::new(WsSource {
            socket,
            runtime: Arc::clone(&self.runtime),
        })))
    }

    fn local_addr(&self) -> PipelineResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

pub struct WsSource {
    socket: WebSocketStream<TcpStream>,
    runtime: Arc<Runtime>,
}

impl MessageSource for WsSource {
    fn recv_timeout(&mut self, timeout: Duration) -> PipelineResult<Received> {
        let next = self
            .runtime
            .block_on(tokio::time::timeout(timeout, self.socket.next()));
        match next {
            Err(_elapsed) => Ok(Received::Timeout),
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => Ok(Received::Disconnected),
            Ok(Some(Ok(Message::Binary(data)))) => Ok(Received::Message(data.to_vec())),
            // Control frames are answered by tungstenite; text is not an envelope.
            Ok(Some(Ok(_))) => Ok(Received::Timeout),
            Ok(Some(Err(e))) => {
                tracing::debug!("WebSocket read error treated as disconnect: {}", e);
                Ok(Received::Disconnected)
            }
        }
    }
}
