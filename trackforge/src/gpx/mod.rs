//! GPX 1.0/1.1 import and export.
//!
//! The importer is a streaming state machine over `quick-xml` pull events
//! that tolerates the quirks of legacy and third-party files (missing
//! namespaces, `<description>` for `<desc>`, timestamps outside
//! `<metadata>`, track points without a `<trkseg>`). Problems are collected
//! in an [`ImportReport`](crate::report::ImportReport) instead of aborting;
//! only malformed XML or a wrong root element is fatal.
//!
//! The exporter walks the item tree in document order and emits GPX 1.1
//! with the namespace set declared on the root element, partitioning each
//! item's metadata between inline core elements and `<extensions>` blocks.

pub mod export;
pub mod import;

pub use export::{ExportError, GpxExporter};
pub use import::{GpxImporter, ImportError};
