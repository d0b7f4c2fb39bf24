//! CLI command implementations.

pub mod cache;
pub mod convert;
pub mod elevation;
pub mod info;
