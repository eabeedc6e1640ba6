pub mod settings;

pub use settings::{BackendConfig, CacheConfig, ExecConfig, GovernorConfig, PrimeConfig};
