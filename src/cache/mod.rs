//! Local disk cache for HTTP-fetched scenery resources
//!
//! Objects are looked up by [`ResourceKey`]; the [`CacheManager`] decides per
//! request whether to serve the cached file, start a download, report a
//! download in progress, or refuse during a domain cool-down.

pub mod clock;
pub mod key;
pub mod manager;
pub mod object;
pub mod policy;
pub mod storage;

// Re-export main types
pub use key::ResourceKey;
pub use manager::CacheManager;
pub use object::{ObjectSnapshot, ObjectState, Response, ResponseKind};
pub use policy::{DomainPolicy, PolicyTable};
pub use storage::CacheStorage;
