//! TrackForge - GPS track editing core
//!
//! This library provides the pieces behind the TrackForge track editor: a
//! hierarchical document model for GPX files, a quirk-tolerant streaming
//! importer and a matching exporter, and an asynchronous elevation tile
//! service with an on-disk cache.

pub mod config;
pub mod elevation;
pub mod gpx;
pub mod meta;
pub mod model;
pub mod report;
