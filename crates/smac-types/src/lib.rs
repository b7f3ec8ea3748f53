//! # smac-types
//!
//! Core types for the SMAC bridge: the parameter space model, parameter
//! assignments, run configuration and the error taxonomy.

pub mod config;
pub mod errors;
pub mod params;
pub mod space;

pub use config::*;
pub use errors::*;
pub use params::*;
pub use space::*;
