//! # tlcache
//!
//! Two-level memoization cache: a volatile in-process tier in front of a
//! persistent file-per-key tier, with TTL expiry, bounded size, and stale
//! fallback when the wrapped computation fails.
//!
//! ## Features
//!
//! - **Memoization**: wrap an async function; equal calls share one cached result
//! - **Two tiers**: memory for the working set, disk as a durable backstop
//! - **Degraded mode**: failed calls are answered with the last known value
//! - **Forced refresh**: a scope that recomputes every call made through it
//! - **Approximate eviction**: expired entries plus a third of the rest per prune pass
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use tlcache::TlCache;
//!
//! # async fn demo() -> tlcache::Result<()> {
//! let cache = Arc::new(TlCache::new("/tmp/tlcache", 1000, Duration::from_secs(300)).await?);
//! let lookup = cache
//!     .memoize("lookup", |(id,): (u64,)| async move {
//!         Ok::<_, std::io::Error>(Some(format!("user-{id}")))
//!     })
//!     .namespace("users")
//!     .timeout(Duration::from_secs(30));
//!
//! let name = lookup.call((42,)).await?;
//! assert_eq!(name.as_deref(), Some("user-42"));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod disk;
pub mod entry;
pub mod error;
pub mod key;
mod lock;
pub mod memory;
pub mod metrics;

pub use cache::{Memoized, RefreshScope, TlCache};
pub use config::{TlCacheBuilder, TlCacheConfig};
pub use disk::DiskTier;
pub use entry::{CacheEntry, Expiration};
pub use error::CacheError;
pub use key::{CacheArgs, CacheKey, CallArgs, Signature};
pub use memory::MemoryTier;
pub use metrics::{CacheMetrics, CacheStats};

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, CacheError>;
