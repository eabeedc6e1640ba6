//! Cache keys and the content-addressed result store.

pub mod key;
pub mod store;

pub use key::{content_digest, get_key, run_key, set_key, CacheKey, KEY_VERSION};
pub use store::{CacheStore, Cached, Flight};
