//! Bounded instance pool.
//!
//! Some unmarshalling engines keep per-instance state and cannot be shared
//! across calls. `Pool` hands such instances out under a semaphore with a
//! timeout-bounded acquire; exhaustion raises a hard failure instead of
//! blocking indefinitely, and instances return to the pool on both success
//! and failure paths via the guard's drop.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::RestError;

use super::Deserializer;

pub struct Pool<T> {
    items: Mutex<Vec<T>>,
    permits: Semaphore,
    acquire_timeout: Duration,
}

impl<T> Pool<T> {
    pub fn new(items: Vec<T>, acquire_timeout: Duration) -> Self {
        let permits = Semaphore::new(items.len());
        Self {
            items: Mutex::new(items),
            permits,
            acquire_timeout,
        }
    }

    /// Take an instance, waiting at most the configured timeout.
    pub async fn acquire(&self) -> Result<PoolGuard<'_, T>, RestError> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.acquire())
            .await
            .map_err(|_| {
                RestError::TimeoutError(format!(
                    "pool acquisition timed out after {:?}",
                    self.acquire_timeout
                ))
            })?
            .map_err(|_| RestError::InternalError("pool semaphore closed".into()))?;

        let item = self
            .items
            .lock()
            .map_err(|_| RestError::InternalError("pool lock poisoned".into()))?
            .pop()
            .ok_or_else(|| RestError::InternalError("pool permit without item".into()))?;

        // The permit is released together with the guard.
        permit.forget();
        Ok(PoolGuard {
            item: Some(item),
            pool: self,
        })
    }

    fn release(&self, item: T) {
        if let Ok(mut items) = self.items.lock() {
            items.push(item);
        }
        self.permits.add_permits(1);
    }
}

/// Scoped access to one pooled instance; returns it on drop.
pub struct PoolGuard<'a, T> {
    item: Option<T>,
    pool: &'a Pool<T>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for PoolGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("item", &self.item)
            .finish_non_exhaustive()
    }
}

impl<T> std::ops::Deref for PoolGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pool guard already released")
    }
}

impl<T> Drop for PoolGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

/// Synchronous unmarshalling engine suitable for pooling.
pub trait DeserializerEngine: Send + Sync {
    fn deserialize(&self, body: &[u8], charset: &str) -> Result<serde_json::Value, RestError>;
}

/// Adapts a bounded pool of engines to the `Deserializer` contract.
pub struct PooledDeserializer<E> {
    pool: Pool<E>,
}

impl<E: DeserializerEngine> PooledDeserializer<E> {
    pub fn new(engines: Vec<E>, acquire_timeout: Duration) -> Self {
        Self {
            pool: Pool::new(engines, acquire_timeout),
        }
    }
}

#[async_trait]
impl<E: DeserializerEngine> Deserializer for PooledDeserializer<E> {
    async fn deserialize(
        &self,
        body: &[u8],
        charset: &str,
    ) -> Result<serde_json::Value, RestError> {
        let engine = self.pool.acquire().await?;
        engine.deserialize(body, charset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_returns_instance_and_releases_on_drop() {
        let pool = Pool::new(vec![1u32], Duration::from_millis(50));
        {
            let guard = pool.acquire().await.unwrap();
            assert_eq!(*guard, 1);
        }
        let guard = pool.acquire().await.unwrap();
        assert_eq!(*guard, 1);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out_with_hard_failure() {
        let pool = Pool::new(vec![1u32], Duration::from_millis(20));
        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, RestError::TimeoutError(_)));
    }

    #[tokio::test]
    async fn instance_returns_after_failure_path() {
        struct Failing;
        impl DeserializerEngine for Failing {
            fn deserialize(
                &self,
                _body: &[u8],
                _charset: &str,
            ) -> Result<serde_json::Value, RestError> {
                Err(RestError::DeserializationError {
                    mime: "application/xml".into(),
                    message: "broken".into(),
                })
            }
        }

        let pooled = PooledDeserializer::new(vec![Failing], Duration::from_millis(50));
        assert!(pooled.deserialize(b"x", "utf-8").await.is_err());
        // The engine went back to the pool despite the failure.
        assert!(pooled.deserialize(b"x", "utf-8").await.is_err());
    }
}
