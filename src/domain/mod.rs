//! Domain types shared by the cache, the worker and the proxy.

pub mod error;
pub mod generation;
pub mod request;
pub mod response;

pub use generation::{GenerationId, NamespaceName};
pub use request::{Destination, InterceptedRequest, RequestKey};
pub use response::CachedResponse;
