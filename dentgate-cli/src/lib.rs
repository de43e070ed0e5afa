//! Dentgate CLI Library
//!
//! Configuration loading for the `dentgate` binary, exposed for testing.

pub mod config;

pub use config::{CliConfig, load_config};
