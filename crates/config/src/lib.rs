//! subgate-config: Configuration for subgate
//!
//! Defaults, TOML file loading, environment overrides and validation.

pub mod config;

pub use config::*;
