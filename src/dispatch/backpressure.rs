//! Per-session upstream buffer bounding concurrent in-flight sends.

use super::error::SessionError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting permit pool owned by one session.
#[derive(Debug, Clone)]
pub struct UpstreamBuffer {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// One in-flight send. The permit goes back to the buffer when this is released or
/// dropped, so it can only be returned once.
#[derive(Debug)]
#[must_use = "dropping the permit releases it immediately"]
pub struct UpstreamPermit {
    _permit: OwnedSemaphorePermit,
}

impl UpstreamPermit {
    pub fn release(self) {}
}

impl UpstreamBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a permit. Fails only once the buffer was closed.
    pub async fn acquire(&self) -> Result<UpstreamPermit, SessionError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SessionError::BufferClosed)?;
        Ok(UpstreamPermit { _permit: permit })
    }

    pub fn try_acquire(&self) -> Option<UpstreamPermit> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| UpstreamPermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Wake pending acquirers with an error; outstanding permits stay valid.
    pub fn close(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn permits_return_exactly_once() {
        let buffer = UpstreamBuffer::new(2);
        let a = buffer.acquire().await.unwrap();
        let b = buffer.acquire().await.unwrap();
        assert_eq!(buffer.available(), 0);
        assert_eq!(buffer.in_flight(), 2);
        assert!(buffer.try_acquire().is_none());

        a.release();
        assert_eq!(buffer.available(), 1);
        drop(b);
        assert_eq!(buffer.available(), 2);
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let buffer = UpstreamBuffer::new(1);
        let held = buffer.acquire().await.unwrap();
        let waiter = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        held.release();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn close_fails_waiters() {
        let buffer = UpstreamBuffer::new(1);
        let _held = buffer.acquire().await.unwrap();
        let waiter = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        buffer.close();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(SessionError::BufferClosed)
        ));
    }
}
