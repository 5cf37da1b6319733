//! Two-tier cache for resolved series.
//!
//! - [`MemoryTier`]: bounded LRU of recently used entries
//! - [`DiskTier`]: SQLite store bounded by aggregate payload size
//! - [`TieredCache`]: write-through composition of both, plus the expiry sweep

mod config;
mod disk;
mod entry;
mod memory;
mod tiered;

pub use config::{CacheConfig, TtlPolicy};
pub use disk::DiskTier;
pub use entry::{CacheEntry, CacheLookup, CacheTier};
pub use memory::MemoryTier;
pub use tiered::{CacheStats, TieredCache};
