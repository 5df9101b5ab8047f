//! route-guard library
//!
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod geometry;
pub mod infra;
pub mod io;
pub mod services;
