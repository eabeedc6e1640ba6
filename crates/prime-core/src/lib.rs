//! Core of the Prime action engine.
//!
//! Holds everything that does not need a process, a network or a search
//! index: the UCM data model, the fence parser, cache keys and the cache
//! store, the file-first run log, session persistence and the capability
//! profiler / load governor state machines.

pub mod cache;
pub mod config;
pub mod error;
pub mod governor;
pub mod layout;
pub mod model;
pub mod parser;
pub mod runlog;
pub mod sessions;

pub use config::PrimeConfig;
pub use error::CoreError;
pub use layout::PrimeLayout;
