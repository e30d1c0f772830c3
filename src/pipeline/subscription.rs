//! Subscription taps: diagnostic readers attached to module outputs.
//!
//! A tap owns its own bounded queue. The producing module offers every frame
//! it emits on the tapped port with a non-blocking call; when the tap is full
//! the oldest buffered frame is evicted. Taps therefore never slow down the
//! module or its real connections.
//!
//! # Layout
//!
//! ```text
//! [module worker] ──push──► Connection ──► consumer
//!        │
//!        └──offer──► TapList ──► Tap ──pop_frame──► Subscription (caller)
//!                            └─► Tap ──pop_frame──► Subscription (caller)
//! ```
//!
//! The registry hands out one shared `TapList` per (module, output port). The
//! worker reads it on every push, so subscribing while the engine is running
//! takes effect on the next emitted frame.

use crate::pipeline::connection::{CloseSignal, Closed};
use crate::pipeline::frame::Frame;
use crate::pipeline::id::SubscriptionId;
use crate::pipeline::stats::RateMeter;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

/// Default tap queue depth.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 16;

/// Taps currently attached to one output port.
pub type TapList = Arc<RwLock<Vec<Arc<Tap>>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Queue and counters behind one subscription.
pub struct Tap {
    id: SubscriptionId,
    module: String,
    port: String,
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    close: CloseSignal,
    push_rate: RateMeter,
    pop_rate: RateMeter,
    dropped: AtomicU64,
}

impl Tap {
    fn new(
        id: SubscriptionId,
        module: &str,
        port: &str,
        capacity: usize,
        rate_window: Duration,
    ) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            id,
            module: module.to_string(),
            port: port.to_string(),
            tx,
            rx,
            close: CloseSignal::new(),
            push_rate: RateMeter::new(rate_window),
            pop_rate: RateMeter::new(rate_window),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Offer a frame without blocking, evicting the oldest frame when full.
    pub fn offer(&self, frame: Frame) {
        if self.close.is_closed() {
            return;
        }
        self.push_rate.record();

        let mut frame = frame;
        for _ in 0..4 {
            match self.tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    frame = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
        // Reader and writer kept racing for the last slot; give up on this frame.
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn pop(&self, timeout: Option<Duration>) -> Result<Option<Frame>, Closed> {
        if self.close.is_closed() {
            return Err(Closed);
        }
        if let Ok(frame) = self.rx.try_recv() {
            self.pop_rate.record();
            return Ok(Some(frame));
        }

        let received = match timeout {
            Some(timeout) => select! {
                recv(self.rx) -> msg => msg.ok(),
                recv(self.close.receiver()) -> _ => return Err(Closed),
                default(timeout) => return Ok(None),
            },
            None => select! {
                recv(self.rx) -> msg => msg.ok(),
                recv(self.close.receiver()) -> _ => return Err(Closed),
            },
        };

        match received {
            Some(frame) if !self.close.is_closed() => {
                self.pop_rate.record();
                Ok(Some(frame))
            }
            _ => Err(Closed),
        }
    }

    /// Close the tap and discard anything still buffered.
    pub fn close(&self) {
        if self.close.close() {
            let discarded = self.rx.try_iter().count();
            tracing::debug!(
                "{} on {}.{} closed ({} buffered frames discarded)",
                self.id,
                self.module,
                self.port,
                discarded
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }
}

struct RegistryInner {
    lists: Mutex<HashMap<(String, String), TapList>>,
    taps: Mutex<HashMap<SubscriptionId, Arc<Tap>>>,
    next_id: AtomicU32,
    closed: AtomicBool,
    rate_window: Duration,
}

impl RegistryInner {
    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some(tap) = lock(&self.taps).remove(&id) else {
            return false;
        };
        if let Some(list) = lock(&self.lists).get(&(tap.module.clone(), tap.port.clone())) {
            list.write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|t| t.id != id);
        }
        tap.close();
        tracing::debug!("Unsubscribed {} from {}.{}", id, tap.module, tap.port);
        true
    }
}

/// Owner of all taps for one engine.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new(rate_window: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                lists: Mutex::new(HashMap::new()),
                taps: Mutex::new(HashMap::new()),
                next_id: AtomicU32::new(0),
                closed: AtomicBool::new(false),
                rate_window,
            }),
        }
    }

    /// Shared tap list for an output port, created on first use.
    pub fn tap_list(&self, module: &str, port: &str) -> TapList {
        lock(&self.inner.lists)
            .entry((module.to_string(), port.to_string()))
            .or_default()
            .clone()
    }

    /// Attach a new tap. Names must already be resolved by the caller.
    ///
    /// Once the registry has been closed (engine stopped) the returned tap is
    /// already closed, so its reader sees `Closed` instead of waiting forever.
    pub fn subscribe(&self, module: &str, port: &str, capacity: usize) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let tap = Arc::new(Tap::new(id, module, port, capacity, self.inner.rate_window));

        if self.inner.closed.load(Ordering::Acquire) {
            tap.close();
        } else {
            self.tap_list(module, port)
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(tap.clone());
            lock(&self.inner.taps).insert(id, tap.clone());
        }

        tracing::debug!("Subscribed {} to {}.{} (capacity {})", id, module, port, capacity);
        Subscription {
            tap,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Detach and close a tap. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    /// Number of live taps.
    pub fn len(&self) -> usize {
        lock(&self.inner.taps).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every tap; taps created afterwards start closed.
    pub fn close_all(&self) {
        self.inner.closed.store(true, Ordering::Release);
        for tap in lock(&self.inner.taps).values() {
            tap.close();
        }
    }

    /// Close and forget every tap and tap list.
    pub fn clear(&self) {
        self.close_all();
        lock(&self.inner.taps).clear();
        for list in lock(&self.inner.lists).values() {
            list.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("taps", &self.len())
            .finish()
    }
}

/// Reader handle for one tap. Dropping it unsubscribes.
pub struct Subscription {
    tap: Arc<Tap>,
    registry: Weak<RegistryInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.tap.id
    }

    pub fn module(&self) -> &str {
        &self.tap.module
    }

    pub fn port(&self) -> &str {
        &self.tap.port
    }

    /// Next frame, blocking until one arrives or the tap is closed.
    pub fn pop_frame(&self) -> Result<Frame, Closed> {
        match self.tap.pop(None)? {
            Some(frame) => Ok(frame),
            None => Err(Closed),
        }
    }

    /// Next frame, or `Ok(None)` if nothing arrived within `timeout`.
    pub fn pop_frame_timeout(&self, timeout: Duration) -> Result<Option<Frame>, Closed> {
        self.tap.pop(Some(timeout))
    }

    /// Next frame if one is buffered right now.
    pub fn try_pop_frame(&self) -> Result<Option<Frame>, Closed> {
        self.tap.pop(Some(Duration::ZERO))
    }

    /// Rate at which the module offered frames to this tap.
    pub fn push_fps(&self) -> f64 {
        self.tap.push_rate.fps()
    }

    /// Rate at which this reader consumed frames.
    pub fn pop_fps(&self) -> f64 {
        self.tap.pop_rate.fps()
    }

    /// Frames offered within the trailing window.
    pub fn push_count(&self) -> usize {
        self.tap.push_rate.events_in_window()
    }

    /// Frames popped within the trailing window.
    pub fn pop_count(&self) -> usize {
        self.tap.pop_rate.events_in_window()
    }

    /// Frames offered since the tap was created.
    pub fn pushed_total(&self) -> u64 {
        self.tap.push_rate.total()
    }

    /// Frames evicted by the drop-oldest policy.
    pub fn dropped_count(&self) -> u64 {
        self.tap.dropped.load(Ordering::Relaxed)
    }

    /// Frames currently buffered.
    pub fn len(&self) -> usize {
        self.tap.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tap.rx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.tap.is_closed()
    }

    /// Detach from the module. Safe to call more than once.
    pub fn unsubscribe(&self) {
        match self.registry.upgrade() {
            Some(registry) => {
                registry.unsubscribe(self.tap.id);
            }
            None => self.tap.close(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.tap.id)
            .field("module", &self.tap.module)
            .field("port", &self.tap.port)
            .field("closed", &self.is_closed())
            .finish()
    }
}
