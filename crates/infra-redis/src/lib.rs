// Tiffin Infrastructure - Redis Adapter
// Implements: CacheBackend (ephemeral TTL tier of the tiered state store)

mod cache_backend;

pub use cache_backend::{RedisCacheBackend, RedisCacheError};
