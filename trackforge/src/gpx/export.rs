//! GPX writer.
//!
//! Walks the item tree in document order and emits GPX 1.1. Each item's
//! metadata is split into core elements written inline and everything else
//! inside a lazily opened `<extensions>` block; the split is a fixed table
//! over the item kind. Extension blocks are written before child elements,
//! which keeps an item's own data together at the top of its element (the
//! GPX convention puts them after the children; readers, including ours,
//! accept both).
//!
//! Folders emit no element of their own. Their waypoints carry the full
//! slash-separated folder path as an application extension instead, which is
//! what the importer routes on.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;

use crate::meta::{ns, tags, TagRegistry};
use crate::model::{GeoPoint, Item, ItemKind, MetaValue};

/// Written as the `creator` attribute when the file has none of its own.
pub const DEFAULT_CREATOR: &str = concat!("TrackForge ", env!("CARGO_PKG_VERSION"));

/// Export failure. The writer reports sink I/O problems through the same
/// channel as encoding ones.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("XML write failed: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// Serialises an item tree to GPX 1.1.
///
/// The registry resolves interned tag ids back to their qualified names and
/// classifies internal and application tags; the exporter never mutates it.
pub struct GpxExporter<'r> {
    registry: &'r TagRegistry,
    creator: Option<String>,
}

impl<'r> GpxExporter<'r> {
    pub fn new(registry: &'r TagRegistry) -> Self {
        Self {
            registry,
            creator: None,
        }
    }

    /// Creator stamped on files that carry none of their own, instead of
    /// [`DEFAULT_CREATOR`]. A file's own creator always wins.
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    /// Writes the whole document.
    pub fn save_to<W: Write>(&self, sink: W, root: &Item) -> Result<(), ExportError> {
        self.save_selection(sink, root, &|_| true)
    }

    /// Writes only the selected subset.
    ///
    /// An item is written when it is selected itself or lies on the path to
    /// a selected descendant. A selected container whose children carry no
    /// selection of their own is written whole; once any child is selected
    /// the container acts as a plain wrapper and only the selected children
    /// are written.
    pub fn save_selection<W: Write>(
        &self,
        sink: W,
        root: &Item,
        selected: &dyn Fn(&Item) -> bool,
    ) -> Result<(), ExportError> {
        let mut emitter = Emitter {
            registry: self.registry,
            writer: Writer::new_with_indent(sink, b' ', 2),
            selected,
            default_creator: self.creator.as_deref().unwrap_or(DEFAULT_CREATOR),
        };
        emitter.document(root)
    }

    /// [`save_to`](Self::save_to) into an in-memory string.
    pub fn save_to_string(&self, root: &Item) -> Result<String, ExportError> {
        let mut buf = Vec::new();
        self.save_to(&mut buf, root)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

struct Emitter<'e, W: Write> {
    registry: &'e TagRegistry,
    writer: Writer<W>,
    selected: &'e dyn Fn(&Item) -> bool,
    default_creator: &'e str,
}

impl<'e, W: Write> Emitter<'e, W> {
    fn document(&mut self, root: &Item) -> Result<(), ExportError> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let start = self.gpx_start(root);
        self.writer.write_event(Event::Start(start))?;
        self.file_metadata(root)?;

        let force = self.emit_fully(root);
        for child in root.children() {
            self.item(child, force, "")?;
        }

        self.writer.write_event(Event::End(BytesEnd::new("gpx")))?;
        Ok(())
    }

    fn gpx_start(&self, root: &Item) -> BytesStart<'static> {
        let mut start = BytesStart::new("gpx");
        start.push_attribute(("version", "1.1"));
        let creator = self
            .file_meta(root, tags::CREATOR)
            .and_then(MetaValue::as_text)
            .unwrap_or(self.default_creator);
        start.push_attribute(("creator", creator));
        start.push_attribute(("xmlns", ns::GPX_URI));
        start.push_attribute((format!("xmlns:{}", ns::XSI_PREFIX).as_str(), ns::XSI_URI));
        start.push_attribute(("xsi:schemaLocation", ns::SCHEMA_LOCATION));
        start.push_attribute((
            format!("xmlns:{}", ns::GARMIN_PREFIX).as_str(),
            ns::GARMIN_URI,
        ));
        start.push_attribute((format!("xmlns:{}", ns::APP_PREFIX).as_str(), ns::APP_URI));
        start.push_attribute((
            format!("xmlns:{}", ns::STYLE_PREFIX).as_str(),
            ns::STYLE_URI,
        ));
        // Third-party prefixes seen on import keep their declarations so the
        // output round-trips without warnings.
        for prefix in self.extra_prefixes(root) {
            if let Some(uri) = self.registry.namespace_uri(&prefix) {
                start.push_attribute((format!("xmlns:{prefix}").as_str(), uri));
            }
        }
        start
    }

    /// Prefixes used by interned tags beyond the fixed declaration set.
    fn extra_prefixes(&self, root: &Item) -> BTreeSet<String> {
        let mut prefixes = BTreeSet::new();
        root.walk(&mut |item| {
            for (id, _) in item.meta_iter() {
                let name = self.registry.qualified_name(id);
                if let Some((prefix, _)) = name.split_once(':') {
                    prefixes.insert(prefix.to_string());
                }
            }
        });
        for fixed in [
            ns::XSI_PREFIX,
            ns::GARMIN_PREFIX,
            ns::APP_PREFIX,
            ns::STYLE_PREFIX,
        ] {
            prefixes.remove(fixed);
        }
        prefixes
    }

    // ===== Tree walk =====

    fn item(&mut self, item: &Item, force: bool, folder_path: &str) -> Result<(), ExportError> {
        match item.kind() {
            ItemKind::Track => self.track(item, force),
            ItemKind::Route => self.route(item, force),
            ItemKind::Folder => self.folder(item, force, folder_path),
            ItemKind::Waypoint(geo) => {
                if force || self.is_selected(item) {
                    self.point("wpt", item, geo, Some(folder_path))?;
                }
                Ok(())
            }
            // Anything else at file level has no document form.
            _ => Ok(()),
        }
    }

    fn track(&mut self, track: &Item, force: bool) -> Result<(), ExportError> {
        let force = force || self.emit_fully(track);
        if !force && !self.has_selected_descendant(track) {
            return Ok(());
        }
        self.writer.write_event(Event::Start(BytesStart::new("trk")))?;
        self.item_name(track)?;
        self.core_meta(track)?;
        let entries = self.extension_entries(track);
        self.write_extensions(&entries, None)?;
        for child in track.children() {
            if matches!(child.kind(), ItemKind::Segment) {
                self.segment(child, force)?;
            }
        }
        self.writer.write_event(Event::End(BytesEnd::new("trk")))?;
        Ok(())
    }

    fn route(&mut self, route: &Item, force: bool) -> Result<(), ExportError> {
        let force = force || self.emit_fully(route);
        if !force && !self.has_selected_descendant(route) {
            return Ok(());
        }
        self.writer.write_event(Event::Start(BytesStart::new("rte")))?;
        self.item_name(route)?;
        self.core_meta(route)?;
        let entries = self.extension_entries(route);
        self.write_extensions(&entries, None)?;
        for child in route.children() {
            if let ItemKind::Routepoint(geo) = child.kind() {
                if force || self.is_selected(child) {
                    self.point("rtept", child, geo, None)?;
                }
            }
        }
        self.writer.write_event(Event::End(BytesEnd::new("rte")))?;
        Ok(())
    }

    fn segment(&mut self, segment: &Item, force: bool) -> Result<(), ExportError> {
        let force = force || self.emit_fully(segment);
        if !force && !self.has_selected_descendant(segment) {
            return Ok(());
        }
        self.writer
            .write_event(Event::Start(BytesStart::new("trkseg")))?;
        let entries = self.extension_entries(segment);
        self.write_extensions(&entries, None)?;
        for child in segment.children() {
            if let ItemKind::Trackpoint(geo) = child.kind() {
                if force || self.is_selected(child) {
                    self.point("trkpt", child, geo, None)?;
                }
            }
        }
        self.writer
            .write_event(Event::End(BytesEnd::new("trkseg")))?;
        Ok(())
    }

    fn folder(&mut self, folder: &Item, force: bool, parent_path: &str) -> Result<(), ExportError> {
        let force = force || self.emit_fully(folder);
        if !force && !self.has_selected_descendant(folder) {
            return Ok(());
        }
        let path = match folder.name() {
            Some(name) if parent_path.is_empty() => name.to_string(),
            Some(name) => format!("{parent_path}/{name}"),
            None => parent_path.to_string(),
        };
        for child in folder.children() {
            self.item(child, force, &path)?;
        }
        Ok(())
    }

    fn point(
        &mut self,
        element: &str,
        item: &Item,
        geo: &GeoPoint,
        folder_path: Option<&str>,
    ) -> Result<(), ExportError> {
        let mut start = BytesStart::new(element.to_string());
        start.push_attribute(("lat", format_degrees(geo.lat).as_str()));
        start.push_attribute(("lon", format_degrees(geo.lon).as_str()));

        let folder = folder_path.filter(|p| !p.is_empty());
        let entries = self.extension_entries(item);
        let has_name = item.has_explicit_name() && item.name().is_some();
        let has_core = core_tags(item.kind())
            .iter()
            .any(|tag| self.has_tag(item, tag));
        if !has_name
            && geo.ele.is_none()
            && geo.time.is_none()
            && !has_core
            && entries.is_empty()
            && folder.is_none()
        {
            self.writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        self.writer.write_event(Event::Start(start))?;
        if let Some(ele) = geo.ele {
            self.leaf("ele", &format_degrees(ele))?;
        }
        if let Some(time) = geo.time {
            self.leaf(tags::TIME, &format_time(time))?;
        }
        self.item_name(item)?;
        self.core_meta(item)?;
        self.write_extensions(&entries, folder)?;
        self.writer
            .write_event(Event::End(BytesEnd::new(element.to_string())))?;
        Ok(())
    }

    // ===== Metadata =====

    /// The `<metadata>` block for the file item, omitted entirely when the
    /// file carries nothing worth writing.
    fn file_metadata(&mut self, root: &Item) -> Result<(), ExportError> {
        let name = if root.has_explicit_name() {
            root.name()
        } else {
            None
        };
        let desc = self.file_meta(root, tags::DESC);
        let author = self.file_meta(root, tags::AUTHOR).and_then(MetaValue::as_text);
        let link = self.file_meta(root, tags::LINK).and_then(MetaValue::as_text);
        let time = self.file_meta(root, tags::TIME);
        let keywords = self
            .file_meta(root, tags::KEYWORDS)
            .and_then(MetaValue::as_text);
        let entries = self.extension_entries(root);

        if name.is_none()
            && desc.is_none()
            && author.is_none()
            && link.is_none()
            && time.is_none()
            && keywords.is_none()
            && entries.is_empty()
        {
            return Ok(());
        }

        self.writer
            .write_event(Event::Start(BytesStart::new("metadata")))?;
        if let Some(name) = name {
            self.leaf(tags::NAME, name)?;
        }
        if let Some(desc) = desc.and_then(MetaValue::as_text) {
            self.leaf(tags::DESC, desc)?;
        }
        if let Some(author) = author {
            // GPX 1.1 nests the author name in a person element.
            self.writer
                .write_event(Event::Start(BytesStart::new(tags::AUTHOR)))?;
            self.leaf(tags::NAME, author)?;
            self.writer
                .write_event(Event::End(BytesEnd::new(tags::AUTHOR)))?;
        }
        if let Some(link) = link {
            self.href_element(tags::LINK, link)?;
        }
        if let Some(time) = time {
            self.meta_element(tags::TIME, time)?;
        }
        if let Some(keywords) = keywords {
            self.leaf(tags::KEYWORDS, keywords)?;
        }
        self.write_extensions(&entries, None)?;
        self.writer
            .write_event(Event::End(BytesEnd::new("metadata")))?;
        Ok(())
    }

    fn item_name(&mut self, item: &Item) -> Result<(), ExportError> {
        if !item.has_explicit_name() {
            // Derived names are display sugar, not document content.
            return Ok(());
        }
        if let Some(name) = item.name() {
            self.leaf(tags::NAME, name)?;
        }
        Ok(())
    }

    /// Core metadata elements for this item kind, in schema order.
    fn core_meta(&mut self, item: &Item) -> Result<(), ExportError> {
        for tag in core_tags(item.kind()) {
            let Some(id) = self.registry.lookup(tag) else {
                continue;
            };
            let Some(value) = item.meta(id) else {
                continue;
            };
            self.meta_element(tag, value)?;
        }
        Ok(())
    }

    /// Extension-eligible metadata with output element names resolved.
    fn extension_entries<'a>(&self, item: &'a Item) -> Vec<(String, &'a MetaValue)> {
        let mut entries = Vec::new();
        for (id, value) in item.meta_iter() {
            let name = self.registry.qualified_name(id);
            if self.registry.is_internal_tag(name) {
                continue;
            }
            if !self.is_extension_tag(item.kind(), name) {
                continue;
            }
            if let MetaValue::Color(color) = value {
                if color.is_unset() {
                    continue;
                }
            }
            entries.push((self.extension_name(name).into_owned(), value));
        }
        entries
    }

    fn write_extensions(
        &mut self,
        entries: &[(String, &MetaValue)],
        folder: Option<&str>,
    ) -> Result<(), ExportError> {
        if entries.is_empty() && folder.is_none() {
            return Ok(());
        }
        self.writer
            .write_event(Event::Start(BytesStart::new("extensions")))?;
        if let Some(path) = folder {
            let element = format!("{}:{}", ns::APP_PREFIX, tags::FOLDER);
            self.leaf(&element, path)?;
        }
        for (name, value) in entries {
            self.meta_element(name, value)?;
        }
        self.writer
            .write_event(Event::End(BytesEnd::new("extensions")))?;
        Ok(())
    }

    fn meta_element(&mut self, name: &str, value: &MetaValue) -> Result<(), ExportError> {
        match value {
            MetaValue::Text(text) | MetaValue::Opaque(text) => {
                if name == tags::LINK {
                    self.href_element(name, text)?;
                } else {
                    self.leaf(name, text)?;
                }
            }
            MetaValue::Time(time) => self.leaf(name, &format_time(*time))?,
            MetaValue::Color(color) => {
                if !color.is_unset() {
                    self.leaf(name, &color.to_string())?;
                }
            }
        }
        Ok(())
    }

    fn href_element(&mut self, name: &str, url: &str) -> Result<(), ExportError> {
        let mut start = BytesStart::new(name.to_string());
        start.push_attribute(("href", url));
        self.writer.write_event(Event::Empty(start))?;
        Ok(())
    }

    fn leaf(&mut self, name: &str, text: &str) -> Result<(), ExportError> {
        self.writer
            .write_event(Event::Start(BytesStart::new(name.to_string())))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.writer
            .write_event(Event::End(BytesEnd::new(name.to_string())))?;
        Ok(())
    }

    // ===== Classification =====

    /// True when a tag goes to this kind's `<extensions>` block rather than
    /// an inline core element.
    fn is_extension_tag(&self, kind: &ItemKind, name: &str) -> bool {
        if self.registry.is_application_tag(name) {
            return true;
        }
        let exempt: &[&str] = match kind {
            ItemKind::File => &[
                tags::NAME,
                tags::DESC,
                tags::AUTHOR,
                tags::LINK,
                tags::TIME,
                tags::KEYWORDS,
                tags::CREATOR,
            ],
            ItemKind::Track | ItemKind::Route => &[tags::NAME, tags::DESC, tags::TYPE],
            ItemKind::Waypoint(_) => &[tags::NAME, tags::TIME, tags::HDOP, tags::LINK],
            ItemKind::Trackpoint(_) | ItemKind::Routepoint(_) => {
                &[tags::NAME, tags::TIME, tags::HDOP]
            }
            ItemKind::Segment | ItemKind::Folder => &[],
        };
        !exempt.contains(&name)
    }

    /// Output element name for an extension tag; application tags get their
    /// wire prefix here.
    fn extension_name<'n>(&self, name: &'n str) -> Cow<'n, str> {
        if name == tags::COLOR {
            Cow::Owned(format!("{}:{}", ns::STYLE_PREFIX, name))
        } else if name == tags::FOLDER {
            Cow::Owned(format!("{}:{}", ns::APP_PREFIX, name))
        } else {
            Cow::Borrowed(name)
        }
    }

    // ===== Lookups =====

    fn file_meta<'a>(&self, item: &'a Item, tag: &str) -> Option<&'a MetaValue> {
        self.registry.lookup(tag).and_then(|id| item.meta(id))
    }

    fn has_tag(&self, item: &Item, tag: &str) -> bool {
        self.registry
            .lookup(tag)
            .map_or(false, |id| item.has_meta(id))
    }

    // ===== Selection =====

    fn is_selected(&self, item: &Item) -> bool {
        (self.selected)(item)
    }

    fn any_child_selected(&self, item: &Item) -> bool {
        item.children().iter().any(|child| self.is_selected(child))
    }

    fn has_selected_descendant(&self, item: &Item) -> bool {
        item.children()
            .iter()
            .any(|child| self.is_selected(child) || self.has_selected_descendant(child))
    }

    /// A selected container with no individually selected children exports
    /// whole; otherwise it is only a wrapper for its selected descendants.
    fn emit_fully(&self, item: &Item) -> bool {
        self.is_selected(item) && !self.any_child_selected(item)
    }
}

fn core_tags(kind: &ItemKind) -> &'static [&'static str] {
    match kind {
        ItemKind::Track | ItemKind::Route => &[tags::DESC, tags::TYPE],
        ItemKind::Waypoint(_) => &[tags::LINK, tags::HDOP],
        ItemKind::Trackpoint(_) | ItemKind::Routepoint(_) => &[tags::HDOP],
        _ => &[],
    }
}

/// Fixed-point decimal, full double precision, never exponent notation.
fn format_degrees(value: f64) -> String {
    value.to_string()
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
