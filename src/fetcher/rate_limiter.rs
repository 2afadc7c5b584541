//! Shared request limiter: bounds in-flight requests and spaces request starts.
//!
//! One limiter is shared by every worker of a run, so the configured interval
//! holds for the whole pipeline and not per unit.

use log::info;
use std::time::Duration;
use tokio::sync::{AcquireError, Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;

#[derive(Debug)]
pub struct RequestLimiter {
    semaphore: Semaphore,
    min_interval: Duration,
    /// Earliest instant the next request may start.
    next_slot: Mutex<Instant>,
}

impl RequestLimiter {
    pub fn new(max_in_flight: usize, min_interval: Duration) -> Self {
        Self {
            semaphore: Semaphore::new(max_in_flight.max(1)),
            min_interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Waits for an in-flight slot and for the next start slot. The request
    /// may run while the returned permit is alive.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        let permit = self.semaphore.acquire().await?;
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.min_interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
        Ok(permit)
    }

    /// Holds back every request until `wait` has passed.
    pub async fn pause_for(&self, wait: Duration) {
        let resume = Instant::now() + wait;
        let mut next = self.next_slot.lock().await;
        if resume > *next {
            info!("Pausing requests for {:?} to respect the provider's rate limit", wait);
            *next = resume;
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
