//! Bounded blocking resource pool

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Resource pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourcePoolError {
    /// No pool registered under this resource type
    #[error("no resource pool registered for type: {0}")]
    UnknownPool(String),

    /// Pools must hold at least one handle
    #[error("resource pool '{0}' must have a capacity of at least 1")]
    InvalidCapacity(String),
}

/// A bounded pool of reusable handles of one resource type
///
/// Invariant: `available <= created <= capacity`. Each available handle is
/// backed by exactly one semaphore permit, so waiters wake only when a handle
/// can actually be popped.
#[derive(Debug)]
pub struct ResourcePool<T> {
    name: String,
    capacity: usize,
    available: Mutex<VecDeque<T>>,
    permits: Semaphore,
    created: AtomicUsize,
    leased: AtomicUsize,
}

impl<T: Send> ResourcePool<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self, ResourcePoolError> {
        let name = name.into();
        if capacity == 0 {
            return Err(ResourcePoolError::InvalidCapacity(name));
        }
        Ok(Self {
            name,
            capacity,
            available: Mutex::new(VecDeque::with_capacity(capacity)),
            permits: Semaphore::new(0),
            created: AtomicUsize::new(0),
            leased: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Handles currently waiting in the pool
    pub fn available(&self) -> usize {
        self.available.lock().len()
    }

    /// Handles ever added to the pool
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    /// Handles acquired and not yet released
    pub fn leased(&self) -> usize {
        self.leased.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for a handle
    ///
    /// Returns `None` when the timeout elapses or the pool is closed. This is
    /// a soft failure: callers are expected to skip the iteration.
    pub async fn acquire(&self, timeout: Duration) -> Option<T> {
        match tokio::time::timeout(timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                self.take()
            }
            Ok(Err(_)) => {
                debug!(pool = %self.name, "Acquire on closed pool");
                None
            }
            Err(_) => {
                warn!(
                    pool = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    leased = self.leased(),
                    capacity = self.capacity,
                    "No resource available before timeout"
                );
                None
            }
        }
    }

    /// Take a handle without waiting
    pub fn try_acquire(&self) -> Option<T> {
        let permit = self.permits.try_acquire().ok()?;
        permit.forget();
        self.take()
    }

    fn take(&self) -> Option<T> {
        let handle = self.available.lock().pop_front();
        match handle {
            Some(handle) => {
                self.leased.fetch_add(1, Ordering::AcqRel);
                Some(handle)
            }
            None => {
                // Unreachable while permits and queue stay in lockstep
                warn!(pool = %self.name, "Permit granted but pool queue empty");
                None
            }
        }
    }

    /// Return a handle to the pool
    ///
    /// If the pool already holds every handle it ever created (a double
    /// release, or a foreign handle) the handle is discarded and `false` is
    /// returned.
    pub fn release(&self, handle: T) -> bool {
        let mut available = self.available.lock();
        let limit = self.created().min(self.capacity);
        if available.len() >= limit {
            drop(available);
            warn!(
                pool = %self.name,
                capacity = self.capacity,
                "Pool already full, discarding released resource"
            );
            return false;
        }

        available.push_back(handle);
        let _ = self
            .leased
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
        self.permits.add_permits(1);
        true
    }

    /// Seed the pool with a new handle
    ///
    /// Returns `false` (and drops the handle) once `capacity` handles exist.
    pub fn add_resource(&self, handle: T) -> bool {
        let mut available = self.available.lock();
        if self.created() >= self.capacity {
            drop(available);
            warn!(
                pool = %self.name,
                capacity = self.capacity,
                "Pool at capacity, resource not added"
            );
            return false;
        }

        self.created.fetch_add(1, Ordering::AcqRel);
        available.push_back(handle);
        self.permits.add_permits(1);
        true
    }

    /// Stop handing out handles and return the ones still pooled
    ///
    /// Pending and future `acquire` calls resolve to `None`.
    pub fn close(&self) -> Vec<T> {
        self.permits.close();
        let drained: Vec<T> = self.available.lock().drain(..).collect();
        debug!(pool = %self.name, drained = drained.len(), "Pool closed");
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

impl<T> Drop for ResourcePool<T> {
    fn drop(&mut self) {
        let leased = *self.leased.get_mut();
        if leased > 0 {
            warn!(pool = %self.name, leased, "Resource pool dropped with leased resources (leak)");
        }
    }
}

/// Acquire timeout used by [`ResourcePools::acquire_default`] unless configured
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Registry of resource pools, isolated by type name
#[derive(Debug)]
pub struct ResourcePools<T> {
    pools: DashMap<String, Arc<ResourcePool<T>>>,
    acquire_timeout: Duration,
}

impl<T> Default for ResourcePools<T> {
    fn default() -> Self {
        Self {
            pools: DashMap::new(),
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl<T: Send> ResourcePools<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout applied by [`acquire_default`](Self::acquire_default)
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Register a pool if absent
    ///
    /// Idempotent per type: a second call returns the existing pool and
    /// ignores `max_size`.
    pub fn create_pool(
        &self,
        resource_type: &str,
        max_size: usize,
    ) -> Result<Arc<ResourcePool<T>>, ResourcePoolError> {
        if let Some(existing) = self.pools.get(resource_type) {
            if existing.capacity() != max_size {
                debug!(
                    pool = resource_type,
                    existing = existing.capacity(),
                    requested = max_size,
                    "Pool already exists, keeping original capacity"
                );
            }
            return Ok(Arc::clone(existing.value()));
        }

        let pool = self
            .pools
            .entry(resource_type.to_string())
            .or_try_insert_with(|| ResourcePool::new(resource_type, max_size).map(Arc::new))?;
        Ok(Arc::clone(pool.value()))
    }

    pub fn get(&self, resource_type: &str) -> Option<Arc<ResourcePool<T>>> {
        self.pools.get(resource_type).map(|p| Arc::clone(p.value()))
    }

    fn require(&self, resource_type: &str) -> Result<Arc<ResourcePool<T>>, ResourcePoolError> {
        self.get(resource_type)
            .ok_or_else(|| ResourcePoolError::UnknownPool(resource_type.to_string()))
    }

    /// Wait up to `timeout` for a handle of `resource_type`
    pub async fn acquire(&self, resource_type: &str, timeout: Duration) -> Option<T> {
        match self.get(resource_type) {
            Some(pool) => pool.acquire(timeout).await,
            None => {
                warn!(pool = resource_type, "Acquire from unknown resource pool");
                None
            }
        }
    }

    /// Wait up to the registry's default acquire timeout
    pub async fn acquire_default(&self, resource_type: &str) -> Option<T> {
        self.acquire(resource_type, self.acquire_timeout).await
    }

    /// Return a handle; see [`ResourcePool::release`]
    pub fn release(&self, resource_type: &str, handle: T) -> Result<bool, ResourcePoolError> {
        Ok(self.require(resource_type)?.release(handle))
    }

    /// Seed a pool; see [`ResourcePool::add_resource`]
    pub fn add_resource(&self, resource_type: &str, handle: T) -> Result<bool, ResourcePoolError> {
        Ok(self.require(resource_type)?.add_resource(handle))
    }

    pub fn remove_pool(&self, resource_type: &str) -> Option<Arc<ResourcePool<T>>> {
        self.pools.remove(resource_type).map(|(_, pool)| pool)
    }

    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(capacity: usize, handles: usize) -> ResourcePool<u32> {
        let pool = ResourcePool::new("driver", capacity).unwrap();
        for i in 0..handles {
            assert!(pool.add_resource(i as u32));
        }
        pool
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(
            ResourcePool::<u32>::new("driver", 0).unwrap_err(),
            ResourcePoolError::InvalidCapacity("driver".to_string())
        );
    }

    #[test]
    fn test_add_resource_stops_at_capacity() {
        let pool = seeded(2, 2);
        assert!(!pool.add_resource(99));
        assert_eq!(pool.created(), 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = seeded(2, 2);

        let a = pool.acquire(Duration::from_millis(10)).await.unwrap();
        let b = pool.try_acquire().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.leased(), 2);

        assert!(pool.release(a));
        assert!(pool.release(b));
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.leased(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_softly() {
        let pool = seeded(1, 1);
        let _held = pool.try_acquire().unwrap();

        let missing = pool.acquire(Duration::from_secs(2)).await;
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_never_hands_out_more_than_supplied() {
        let pool = seeded(5, 3);
        let mut taken = Vec::new();
        while let Some(h) = pool.try_acquire() {
            taken.push(h);
        }
        assert_eq!(taken.len(), 3);
        assert!(pool.acquire(Duration::from_millis(5)).await.is_none());
    }

    #[test]
    fn test_double_release_is_discarded() {
        let pool = seeded(3, 2);
        let h = pool.try_acquire().unwrap();
        assert!(pool.release(h));
        // Pool already holds every created handle
        assert!(!pool.release(42));
        assert_eq!(pool.available(), 2);
        assert!(pool.available() <= pool.created());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let pool = Arc::new(seeded(1, 1));
        let held = pool.try_acquire().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        pool.release(held);

        assert_eq!(waiter.await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let pool = Arc::new(seeded(1, 1));
        let _held = pool.try_acquire().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        assert!(pool.close().is_empty());
        assert!(pool.is_closed());
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_acquire_release_keeps_counts() {
        let pool = Arc::new(seeded(4, 4));
        let mut tasks = Vec::new();

        for _ in 0..16 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    if let Some(handle) = pool.acquire(Duration::from_secs(5)).await {
                        let available = pool.available();
                        assert!(available <= pool.capacity());
                        tokio::task::yield_now().await;
                        pool.release(handle);
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(pool.available(), 4);
        assert_eq!(pool.created(), 4);
        assert_eq!(pool.leased(), 0);
    }

    #[tokio::test]
    async fn test_registry_isolates_types() {
        let pools: ResourcePools<&'static str> = ResourcePools::new();
        pools.create_pool("browser", 1).unwrap();
        pools.create_pool("api", 1).unwrap();
        pools.add_resource("browser", "chrome").unwrap();

        assert!(pools.acquire("api", Duration::from_millis(5)).await.is_none());
        assert_eq!(
            pools.acquire("browser", Duration::from_millis(5)).await,
            Some("chrome")
        );
        assert_eq!(pools.pool_names(), vec!["api", "browser"]);
    }

    #[test]
    fn test_create_pool_is_idempotent() {
        let pools: ResourcePools<u8> = ResourcePools::new();
        let first = pools.create_pool("browser", 2).unwrap();
        let second = pools.create_pool("browser", 10).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.capacity(), 2);
        assert!(pools.create_pool("empty", 0).is_err());
        assert!(pools.get("empty").is_none());
    }

    #[tokio::test]
    async fn test_unknown_pool() {
        let pools: ResourcePools<u8> = ResourcePools::new();
        assert!(pools.acquire("nope", Duration::from_millis(1)).await.is_none());
        assert_eq!(
            pools.release("nope", 1).unwrap_err(),
            ResourcePoolError::UnknownPool("nope".to_string())
        );
        assert!(pools.add_resource("nope", 1).is_err());
        assert!(pools.remove_pool("nope").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_default_uses_configured_timeout() {
        let pools: ResourcePools<u8> =
            ResourcePools::new().with_acquire_timeout(Duration::from_millis(750));
        assert_eq!(pools.acquire_timeout(), Duration::from_millis(750));
        pools.create_pool("db", 1).unwrap();
        pools.add_resource("db", 9).unwrap();

        assert_eq!(pools.acquire_default("db").await, Some(9));

        let start = tokio::time::Instant::now();
        assert!(pools.acquire_default("db").await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(750));
    }
}
