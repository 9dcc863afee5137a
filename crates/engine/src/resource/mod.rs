//! Resource pools for expensive, reusable handles
//!
//! This module provides:
//! - [`ResourcePool`] - A bounded, blocking pool of handles of one type
//! - [`ResourcePools`] - A registry isolating pools by resource-type name
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use loadswarm_engine::resource::ResourcePools;
//!
//! # block_on(async {
//! let pools: ResourcePools<String> = ResourcePools::new();
//! pools.create_pool("browser", 2).unwrap();
//! pools.add_resource("browser", "chrome-1".to_string()).unwrap();
//!
//! let handle = pools.acquire("browser", Duration::from_millis(10)).await.unwrap();
//! // ... drive the target with the handle ...
//! pools.release("browser", handle).unwrap();
//! # });
//! # fn block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

mod pool;

pub use pool::{ResourcePool, ResourcePoolError, ResourcePools, DEFAULT_ACQUIRE_TIMEOUT};
