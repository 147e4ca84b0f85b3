//! CLI command implementations for circuit-forge.
//!
//! Each module corresponds to a subcommand (`circuit-forge <command>`).

pub mod build;
pub mod check;
pub mod serve;
