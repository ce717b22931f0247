//! Live-session bookkeeping
//!
//! A [`Capacity`] token is a semaphore permit taken *before* `accept()` is
//! called, so at most [`MAX_CLIENTS`] sessions ever exist and any further
//! connection attempts wait in the kernel backlog. Registering a token yields
//! a [`SessionSlot`]; dropping the slot unregisters the session and frees the
//! permit, which wakes the accept loop at once.

use super::EventSink;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Maximum number of concurrently live sessions
pub const MAX_CLIENTS: usize = 1024;

/// Permission to accept one more connection
#[derive(Debug)]
pub struct Capacity {
    _permit: OwnedSemaphorePermit,
}

/// Tracks live sessions against a fixed ceiling
#[derive(Debug)]
pub struct SessionRegistry {
    permits: Arc<Semaphore>,
    capacity: usize,
    live: AtomicUsize,
    sink: Arc<dyn EventSink>,
}

impl SessionRegistry {
    /// Registry with the default [`MAX_CLIENTS`] ceiling
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_capacity(MAX_CLIENTS, sink)
    }

    /// Registry with a custom ceiling
    pub fn with_capacity(capacity: usize, sink: Arc<dyn EventSink>) -> Self {
        SessionRegistry {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            live: AtomicUsize::new(0),
            sink,
        }
    }

    /// Wait until a session slot is free.
    ///
    /// Returns `None` once the registry has been closed.
    pub async fn wait_for_capacity(&self) -> Option<Capacity> {
        let permit = self.permits.clone().acquire_owned().await.ok()?;
        Some(Capacity { _permit: permit })
    }

    /// Take a slot if one is free right now
    pub fn try_capacity(&self) -> Option<Capacity> {
        let permit = self.permits.clone().try_acquire_owned().ok()?;
        Some(Capacity { _permit: permit })
    }

    /// Turn a capacity token into a live session
    pub fn register(self: &Arc<Self>, capacity: Capacity) -> SessionSlot {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.on_connections_changed(live);
        SessionSlot {
            registry: Arc::clone(self),
            _capacity: capacity,
        }
    }

    /// Stop handing out capacity; pending waiters get `None`
    pub fn close(&self) {
        self.permits.close();
    }

    /// Number of registered sessions
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Ceiling on live sessions
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A registered session; unregisters itself on drop
#[derive(Debug)]
pub struct SessionSlot {
    registry: Arc<SessionRegistry>,
    _capacity: Capacity,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        let live = self.registry.live.fetch_sub(1, Ordering::SeqCst) - 1;
        self.registry.sink.on_connections_changed(live);
    }
}
