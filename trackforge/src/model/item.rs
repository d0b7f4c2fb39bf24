//! The document item tree.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::meta::TagId;

use super::value::MetaValue;

/// A geographic position carried by point items.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Latitude in decimal degrees, positive north.
    pub lat: f64,
    /// Longitude in decimal degrees, positive east.
    pub lon: f64,
    /// Elevation in metres, when known.
    pub ele: Option<f64>,
    /// Timestamp, when known.
    pub time: Option<DateTime<Utc>>,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            ele: None,
            time: None,
        }
    }
}

/// Item variant, one per structural element of a track document.
///
/// Dispatch over items is a plain exhaustive `match`; adding a variant makes
/// the compiler point at every place that needs a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    File,
    Track,
    Route,
    Segment,
    Folder,
    Trackpoint(GeoPoint),
    Routepoint(GeoPoint),
    Waypoint(GeoPoint),
}

impl ItemKind {
    /// Containers may hold children; point variants never do.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ItemKind::File | ItemKind::Track | ItemKind::Route | ItemKind::Segment | ItemKind::Folder
        )
    }

    pub fn is_point(&self) -> bool {
        matches!(
            self,
            ItemKind::Trackpoint(_) | ItemKind::Routepoint(_) | ItemKind::Waypoint(_)
        )
    }
}

/// A node of the document tree.
///
/// Every item carries an optional name (with an explicit/derived marker), a
/// sparse metadata table keyed by interned tag ids, and, for container
/// variants, an ordered child list.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    kind: ItemKind,
    name: Option<String>,
    name_explicit: bool,
    meta: BTreeMap<TagId, MetaValue>,
    children: Vec<Item>,
}

impl Item {
    pub fn new(kind: ItemKind) -> Self {
        Self {
            kind,
            name: None,
            name_explicit: false,
            meta: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn file() -> Self {
        Self::new(ItemKind::File)
    }

    pub fn track() -> Self {
        Self::new(ItemKind::Track)
    }

    pub fn route() -> Self {
        Self::new(ItemKind::Route)
    }

    pub fn segment() -> Self {
        Self::new(ItemKind::Segment)
    }

    pub fn folder(name: impl Into<String>) -> Self {
        let mut folder = Self::new(ItemKind::Folder);
        folder.set_name(name);
        folder
    }

    pub fn trackpoint(lat: f64, lon: f64) -> Self {
        Self::new(ItemKind::Trackpoint(GeoPoint::new(lat, lon)))
    }

    pub fn routepoint(lat: f64, lon: f64) -> Self {
        Self::new(ItemKind::Routepoint(GeoPoint::new(lat, lon)))
    }

    pub fn waypoint(lat: f64, lon: f64) -> Self {
        Self::new(ItemKind::Waypoint(GeoPoint::new(lat, lon)))
    }

    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    pub fn is_point(&self) -> bool {
        self.kind.is_point()
    }

    /// Position data for point variants.
    pub fn point(&self) -> Option<&GeoPoint> {
        match &self.kind {
            ItemKind::Trackpoint(p) | ItemKind::Routepoint(p) | ItemKind::Waypoint(p) => Some(p),
            _ => None,
        }
    }

    pub fn point_mut(&mut self) -> Option<&mut GeoPoint> {
        match &mut self.kind {
            ItemKind::Trackpoint(p) | ItemKind::Routepoint(p) | ItemKind::Waypoint(p) => Some(p),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// True when the name came from the source document rather than being
    /// derived by the application.
    pub fn has_explicit_name(&self) -> bool {
        self.name_explicit
    }

    /// Sets an explicit name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
        self.name_explicit = true;
    }

    /// Sets a derived name; derived names are not written on export.
    pub fn set_derived_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
        self.name_explicit = false;
    }

    pub fn meta(&self, tag: TagId) -> Option<&MetaValue> {
        self.meta.get(&tag)
    }

    pub fn has_meta(&self, tag: TagId) -> bool {
        self.meta.contains_key(&tag)
    }

    pub fn set_meta(&mut self, tag: TagId, value: MetaValue) {
        self.meta.insert(tag, value);
    }

    pub fn remove_meta(&mut self, tag: TagId) -> Option<MetaValue> {
        self.meta.remove(&tag)
    }

    /// Metadata entries in stable (id) order.
    pub fn meta_iter(&self) -> impl Iterator<Item = (TagId, &MetaValue)> {
        self.meta.iter().map(|(id, value)| (*id, value))
    }

    pub fn children(&self) -> &[Item] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Item> {
        &mut self.children
    }

    /// Appends a child item.
    ///
    /// Point items never hold children; pushing onto one is a programming
    /// error caught by a debug assertion.
    pub fn push_child(&mut self, child: Item) {
        debug_assert!(
            self.kind.is_container(),
            "child pushed onto non-container item"
        );
        self.children.push(child);
    }

    /// Depth-first visit of this item and all descendants.
    pub fn walk(&self, visit: &mut impl FnMut(&Item)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Finds or creates the folder chain for a slash-separated path,
    /// returning the innermost folder.
    ///
    /// Intended for the `File` root; missing folders are created in order of
    /// first use, and an empty path returns the receiver itself.
    pub fn folder_mut(&mut self, path: &str) -> &mut Item {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        self.folder_chain(&mut parts)
    }

    fn folder_chain<'p>(&mut self, parts: &mut impl Iterator<Item = &'p str>) -> &mut Item {
        match parts.next() {
            None => self,
            Some(part) => {
                let position = self.children.iter().position(|c| {
                    matches!(c.kind, ItemKind::Folder) && c.name.as_deref() == Some(part)
                });
                let index = match position {
                    Some(index) => index,
                    None => {
                        self.children.push(Item::folder(part));
                        self.children.len() - 1
                    }
                };
                self.children[index].folder_chain(parts)
            }
        }
    }
}
