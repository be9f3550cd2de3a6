//! CLI command implementations.

pub mod config;
pub mod peaks;
pub mod run;
