//! Central dependency container.
//!
//! One explicit context object threaded into the dispatcher, worker, and
//! plugin host - no module-global mutable state. Everything external sits
//! behind a trait so the test harness can swap in the in-memory store and
//! the fake driver.

use std::sync::Arc;

use super::cache::{CacheConfig, CacheManager};
use super::jobs::JobQueue;
use super::store::KvStore;
use crate::Settings;

#[derive(Clone)]
pub struct BrokerDeps {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn KvStore>,
    pub queue: Arc<JobQueue>,
    pub cache: Arc<CacheManager>,
}

impl BrokerDeps {
    pub fn new(settings: Arc<Settings>, store: Arc<dyn KvStore>) -> Self {
        let queue = Arc::new(JobQueue::new(store.clone(), settings.job_ttl()));
        let cache = Arc::new(CacheManager::new(
            store.clone(),
            CacheConfig::from_settings(&settings),
        ));
        Self {
            settings,
            store,
            queue,
            cache,
        }
    }
}
