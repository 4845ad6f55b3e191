//! CLI Module Organization
//!
//! - args: CLI argument structures
//! - commands: pipeline run and configuration commands
//! - output: summary tables and report display

pub mod args;
pub mod commands;
pub mod output;

// Re-export commonly used items for convenience
pub use args::*;
pub use commands::*;
