//! Client-side HTTP response cache enforcing the storage, freshness,
//! validation, and invalidation rules of RFC 9111.
//!
//! The engine answers a request with a reconstructed response, an
//! instruction to revalidate upstream, or a miss; and it decides whether
//! and how to persist an observed upstream response, including 304-driven
//! freshening of an existing entry. The key/value stores holding metadata
//! and bodies are supplied by the caller (see [`storage`]); the HTTP
//! transport is not this crate's business.

pub mod admission;
pub mod age;
pub mod body;
pub mod cache;
pub mod cache_control;
pub mod entry;
pub mod headers;
pub mod insert;
pub mod lookup;
pub mod settings;
pub mod storage;
pub mod tee;

pub use body::{BodyError, BodyReader, ResponseBody};
pub use cache::HttpCache;
pub use cache_control::Directives;
pub use entry::{CacheEntry, PersistedEntry};
pub use headers::{FieldValue, HeaderView};
pub use lookup::{CachedResponse, LookupOutcome, RevalidationRequest};
pub use settings::CacheSettings;
pub use storage::{BodyStore, MemoryStore, MetadataStore, blob_key};
pub use tee::{FastBody, SlowBody, tee};
