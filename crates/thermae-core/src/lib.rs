//! Thermae-core: Shared types, errors, configuration and fixed-point math
//!
//! This crate provides the foundational types used across the Thermae workspace.

pub mod config;
pub mod errors;
pub mod math;
pub mod types;

pub use config::*;
pub use errors::*;
pub use types::*;
