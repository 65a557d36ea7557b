//! Per-device concurrency gate.
//!
//! A lease is a short-lived grant allowing one job to talk to a device. At
//! most K leases (default 1) are active per device; each lease expires after
//! `lease_ttl` so a crashed worker cannot strand a device forever. Acquisition
//! returning false is not an error - it is the gating signal the retry
//! controller consumes.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::store::{KvStore, StoreResult};

pub struct DeviceSemaphore {
    store: Arc<dyn KvStore>,
    device_id: String,
    max_concurrent: usize,
    lease_ttl: Duration,
}

impl DeviceSemaphore {
    pub fn new(
        store: Arc<dyn KvStore>,
        device_id: impl Into<String>,
        max_concurrent: usize,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            store,
            device_id: device_id.into(),
            max_concurrent: max_concurrent.max(1),
            lease_ttl,
        }
    }

    pub fn lease_key(&self) -> String {
        lease_key(&self.device_id)
    }

    /// Try to acquire a lease for this device. True on success.
    ///
    /// A store outage here surfaces as an error, which the caller treats as
    /// transient and retryable.
    pub async fn acquire_lease(&self, job_id: &Uuid) -> StoreResult<bool> {
        let acquired = self
            .store
            .acquire_lease(
                &self.lease_key(),
                &job_id.to_string(),
                self.max_concurrent,
                self.lease_ttl,
            )
            .await?;
        tracing::debug!(
            device = %self.device_id,
            job_id = %job_id,
            acquired,
            "lease acquisition attempt"
        );
        Ok(acquired)
    }

    /// Release this job's lease. Idempotent; a store failure here is logged
    /// and swallowed - the lease will be freed by its TTL.
    pub async fn release_lease(&self, job_id: &Uuid) {
        if let Err(e) = self
            .store
            .release_lease(&self.lease_key(), &job_id.to_string())
            .await
        {
            tracing::error!(
                device = %self.device_id,
                job_id = %job_id,
                error = %e,
                "failed to release device lease; it will expire on its own"
            );
        }
    }

    /// Count of unexpired leases, for the monitoring surface.
    pub async fn active_leases(&self) -> StoreResult<usize> {
        self.store.lease_count(&self.lease_key()).await
    }
}

pub fn lease_key(device_id: &str) -> String {
    format!("device_lease:{device_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::store::MemoryStore;

    fn semaphore(store: Arc<dyn KvStore>, max: usize, ttl: Duration) -> DeviceSemaphore {
        DeviceSemaphore::new(store, "10.0.0.1:22", max, ttl)
    }

    #[tokio::test]
    async fn at_most_k_leases() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let sem = semaphore(store.clone(), 2, Duration::from_secs(60));
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert!(sem.acquire_lease(&a).await.unwrap());
        assert!(sem.acquire_lease(&b).await.unwrap());
        assert!(!sem.acquire_lease(&c).await.unwrap());
        assert_eq!(sem.active_leases().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn release_frees_a_slot() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let sem = semaphore(store, 1, Duration::from_secs(60));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(sem.acquire_lease(&a).await.unwrap());
        assert!(!sem.acquire_lease(&b).await.unwrap());
        sem.release_lease(&a).await;
        assert!(sem.acquire_lease(&b).await.unwrap());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let sem = semaphore(store, 1, Duration::from_secs(60));
        let a = Uuid::new_v4();

        assert!(sem.acquire_lease(&a).await.unwrap());
        sem.release_lease(&a).await;
        sem.release_lease(&a).await;
        assert_eq!(sem.active_leases().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stranded_lease_is_purged_after_ttl() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let sem = semaphore(store, 1, Duration::from_millis(20));
        let (crashed, next) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(sem.acquire_lease(&crashed).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sem.acquire_lease(&next).await.unwrap());
    }
}
