//! Bounded single-producer/single-consumer frame queues.
//!
//! A `Connection` is a crossbeam bounded channel paired with a close signal.
//! Every blocking point `select!`s over the data channel and the close
//! signal, so closing a connection wakes both a producer blocked on a full
//! queue and a consumer blocked on an empty one.
//!
//! - `push` blocks while the queue is full (backpressure).
//! - `pop` blocks while the queue is empty and open; once closed, buffered
//!   frames are still delivered and then `Closed` is returned.
//! - `detach` is used when the consumer faults: buffered frames are discarded
//!   and later pushes are accepted and dropped, so the producer is not stalled.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::frame::Frame;
use crate::pipeline::id::ConnectionId;
use crate::pipeline::stats::RateMeter;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// End-of-stream signal returned by blocking queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("closed")]
pub struct Closed;

/// One-shot broadcast: every clone of `rx` becomes ready once `close` runs.
pub(crate) struct CloseSignal {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
    closed: AtomicBool,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns true the first time the signal fires.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Dropping the only sender disconnects the channel and wakes all selects.
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// A bounded frame queue between one output port and one input port.
pub struct Connection {
    id: ConnectionId,
    capacity: usize,
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    close: CloseSignal,
    detached: AtomicBool,
    push_rate: RateMeter,
    popped: AtomicU64,
}

impl Connection {
    /// Create a queue holding at most `capacity` frames.
    pub fn new(id: ConnectionId, capacity: usize, rate_window: Duration) -> PipelineResult<Self> {
        if capacity == 0 {
            return Err(PipelineError::Structural(format!(
                "connection {} capacity must be greater than zero",
                id
            )));
        }
        let (tx, rx) = bounded(capacity);
        Ok(Self {
            id,
            capacity,
            tx,
            rx,
            close: CloseSignal::new(),
            detached: AtomicBool::new(false),
            push_rate: RateMeter::new(rate_window),
            popped: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently buffered.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Enqueue a frame, blocking while the queue is full.
    pub fn push(&self, frame: Frame) -> Result<(), Closed> {
        if self.is_detached() {
            tracing::trace!("{} detached, dropping frame", self.id);
            return Ok(());
        }
        if self.is_closed() {
            return Err(Closed);
        }

        let frame = match self.tx.try_send(frame) {
            Ok(()) => {
                self.push_rate.record();
                return Ok(());
            }
            Err(TrySendError::Full(frame)) => frame,
            Err(TrySendError::Disconnected(_)) => return Err(Closed),
        };

        select! {
            send(self.tx, frame) -> res => match res {
                Ok(()) => {
                    self.push_rate.record();
                    Ok(())
                }
                Err(_) => Err(Closed),
            },
            recv(self.close.receiver()) -> _ => {
                if self.is_detached() { Ok(()) } else { Err(Closed) }
            },
        }
    }

    /// Dequeue a frame, blocking while the queue is empty and open.
    pub fn pop(&self) -> Result<Frame, Closed> {
        if let Ok(frame) = self.rx.try_recv() {
            return Ok(self.popped(frame));
        }
        if self.is_closed() {
            return Err(Closed);
        }

        select! {
            recv(self.rx) -> msg => msg.map(|f| self.popped(f)).map_err(|_| Closed),
            recv(self.close.receiver()) -> _ => {
                self.rx.try_recv().map(|f| self.popped(f)).map_err(|_| Closed)
            },
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`, returning `Ok(None)`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<Frame>, Closed> {
        if let Ok(frame) = self.rx.try_recv() {
            return Ok(Some(self.popped(frame)));
        }
        if self.is_closed() {
            return Err(Closed);
        }

        select! {
            recv(self.rx) -> msg => msg.map(|f| Some(self.popped(f))).map_err(|_| Closed),
            recv(self.close.receiver()) -> _ => match self.rx.try_recv() {
                Ok(f) => Ok(Some(self.popped(f))),
                Err(_) => Err(Closed),
            },
            default(timeout) => Ok(None),
        }
    }

    fn popped(&self, frame: Frame) -> Frame {
        self.popped.fetch_add(1, Ordering::Relaxed);
        frame
    }

    /// Mark end of stream. Buffered frames remain poppable.
    pub fn close(&self) {
        if self.close.close() {
            tracing::trace!("{} closed with {} frames buffered", self.id, self.len());
        }
    }

    /// Consumer is gone: discard buffered frames and drop future pushes.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        let discarded = self.rx.try_iter().count();
        tracing::debug!("{} detached, discarded {} frames", self.id, discarded);
    }

    pub fn push_fps(&self) -> f64 {
        self.push_rate.fps()
    }

    pub fn pushed_total(&self) -> u64 {
        self.push_rate.total()
    }

    pub fn popped_total(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .field("detached", &self.is_detached())
            .finish()
    }
}
