//! Hierarchical document model for loaded track files.
//!
//! A document is a tree of [`Item`]s rooted at a `File`. Containers (file,
//! track, route, segment, folder) own ordered child lists; point variants
//! carry a [`GeoPoint`] and never hold children. All per-item metadata lives
//! in a sparse table keyed by interned [`TagId`](crate::meta::TagId)s.

mod item;
mod value;

pub use item::{GeoPoint, Item, ItemKind};
pub use value::{MetaValue, Rgb};
