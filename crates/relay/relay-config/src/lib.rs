//! `relay-config`: TOML configuration for the relay demo binary.

mod config;

pub use config::{BackendSpec, ConfigError, RelayConfig};
