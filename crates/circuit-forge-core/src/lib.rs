//! Core library for circuit-forge.
//!
//! Builds the per-circuit artifacts of a Circom project (R1CS and witness
//! bundle, proving key, verification key, published input script) by driving
//! the external compiler and key generator in a fixed order, skipping any
//! stage whose artifact already exists unless the build is forced.
//!
//! The entry point is [`pipeline::Pipeline::build`]. Paths come from
//! [`artifacts::ArtifactLayout`], subprocesses go through [`process::run`],
//! and the skip/force policy lives in [`cache::gate`].

pub mod artifacts;
pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod pipeline;
pub mod process;
pub mod stage;
pub mod store;
pub mod toolchain;

pub use config::ForgeConfig;
pub use error::{ForgeError, Result, StageError};
pub use identity::{BuildRequest, CircuitIdentity};
pub use pipeline::{BuildReport, Pipeline};
