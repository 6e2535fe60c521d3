//! Bounded admission of link jobs.
//!
//! The gate wraps a fair [`Semaphore`]: waiters are admitted in arrival
//! order, and a slot is given back when the returned [`GatePermit`] drops.
//! Dropping a pending [`AdmissionGate::acquire`] future leaves the capacity
//! untouched.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone, Debug)]
pub struct AdmissionGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    waiting: AtomicUsize,
}

/// A reserved slot. The slot is released exactly once, when this drops.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

// Keeps `waiting` correct when an acquire future is dropped mid-wait.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(GateInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a free slot and reserve it.
    pub async fn acquire(&self) -> GatePermit {
        let _waiting = WaitingGuard::enter(&self.inner.waiting);
        // The semaphore is owned by the gate and never closed.
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore closed");
        GatePermit { _permit: permit }
    }

    /// Reserve a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.inner
            .semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Callers currently suspended in [`AdmissionGate::acquire`].
    #[inline]
    pub fn waiting(&self) -> usize {
        self.inner.waiting.load(Ordering::Acquire)
    }
}
