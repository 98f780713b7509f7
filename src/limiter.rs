//! Concurrency limiter for outbound bundle manager requests.
//!
//! A counting semaphore owned by one [`HttpClient`](crate::client::HttpClient)
//! and shared by every operation it performs. Each request holds one permit
//! from dispatch until the response headers arrive, so no more than
//! `capacity` requests are ever in flight, no matter how many tasks call the
//! client at once.
//!
//! Acquisition is cancel-safe: dropping a caller's future while it waits for
//! a slot leaves the permit count untouched.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ClientError;

/// Default number of simultaneous in-flight requests.
pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
pub struct Limiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Limiter {
    /// Create a limiter with `capacity` slots. A capacity of zero is raised
    /// to one so callers can never deadlock on an empty semaphore.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot. The slot is released when the returned permit
    /// is dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ClientError> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ClientError::LimiterClosed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
