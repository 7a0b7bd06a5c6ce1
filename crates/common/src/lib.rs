//! Common utilities and shared types for habitgraph.
//!
//! - **Configuration**: layered application settings via [`Config`]
//! - **Error handling**: unified error type with stable codes via [`AppError`]
//! - **ID generation**: ULID-based identifiers via [`IdGenerator`]
//! - **Caching**: Redis and in-process key-value backends via [`CacheBackend`]

pub mod cache;
pub mod config;
pub mod error;
pub mod id;

pub use cache::{CacheBackend, CacheError, InMemoryCache, RedisCache, SharedCache};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
