//! Streaming GPX reader.
//!
//! The reader walks `quick-xml` pull events and keeps one slot per structural
//! level (track, route, segment, point). Start tags open a slot, end tags
//! close it and hand the finished item to its parent. Leaf values are
//! captured in a pending-text buffer and assigned to the innermost open item
//! when the leaf's end tag arrives.
//!
//! Recoverable problems (a nested `<trk>`, a point without coordinates)
//! drop the offending element and its subtree by arming a depth counter; all
//! events up to the matching end tag are discarded, the rest of the file is
//! parsed normally. Only unparseable XML or a non-GPX root aborts the load.

use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::mem;

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;
use thiserror::Error;

use crate::meta::{ns, tags, TagId, TagRegistry};
use crate::model::{Item, ItemKind, MetaValue, Rgb};
use crate::report::ImportReport;

/// Folder receiving waypoints that carry no folder path of their own.
pub const DEFAULT_WAYPOINT_FOLDER: &str = "Waypoints";

/// Folder receiving media waypoints (photos, audio notes, video clips).
pub const MEDIA_WAYPOINT_FOLDER: &str = "Notes";

/// File name suffixes that mark a waypoint as a media note.
const MEDIA_SUFFIXES: &[&str] = &[
    ".wav", ".mp3", ".3gp", ".3gpp", ".mp4", ".jpg", ".jpeg", ".png",
];

/// Type/category values that mark a waypoint as a media note.
const MEDIA_TYPES: &[&str] = &["audio", "video", "photo"];

/// Failure that leaves no usable document behind.
///
/// Recoverable problems never surface here; they are collected in the
/// [`ImportReport`] and the load still returns a document.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The input could not be parsed as XML.
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
    /// The input is well-formed XML but its root element is not `<gpx>`.
    #[error("not a GPX document")]
    NotGpx,
}

/// Reads GPX 1.0/1.1 documents into an item tree.
///
/// The importer interns every tag name it encounters in the shared
/// [`TagRegistry`] and records all findings in the caller's
/// [`ImportReport`]; [`load`](GpxImporter::load) fails only when the report
/// holds a fatal finding.
///
/// # Examples
///
/// ```
/// use trackforge::gpx::GpxImporter;
/// use trackforge::meta::TagRegistry;
/// use trackforge::report::ImportReport;
///
/// let mut registry = TagRegistry::new();
/// let mut report = ImportReport::new();
/// let mut importer = GpxImporter::new(&mut registry);
///
/// let doc = r#"<gpx version="1.1" creator="demo">
///   <wpt lat="48.137" lon="11.575"><name>Marienplatz</name></wpt>
/// </gpx>"#;
/// let root = importer.load_str(doc, &mut report).unwrap();
///
/// assert!(report.is_clean());
/// assert_eq!(root.children().len(), 1); // the default waypoint folder
/// ```
pub struct GpxImporter<'r> {
    registry: &'r mut TagRegistry,
    needs_resave: bool,
}

impl<'r> GpxImporter<'r> {
    pub fn new(registry: &'r mut TagRegistry) -> Self {
        Self {
            registry,
            needs_resave: false,
        }
    }

    /// Reads one document from `input`.
    ///
    /// Returns the file item with all salvageable content attached, or an
    /// error when nothing usable could be read. Warnings and errors for
    /// dropped elements are in `report` either way.
    pub fn load<R: BufRead>(
        &mut self,
        input: R,
        report: &mut ImportReport,
    ) -> Result<Item, ImportError> {
        let mut session = Session::new(&mut *self.registry, report);
        let result = run(&mut session, input);
        self.needs_resave = session.needs_resave;
        result
    }

    /// [`load`](Self::load) over an in-memory document.
    pub fn load_str(
        &mut self,
        input: &str,
        report: &mut ImportReport,
    ) -> Result<Item, ImportError> {
        self.load(input.as_bytes(), report)
    }

    /// True when the last load found fixable legacy quirks (undeclared
    /// namespace prefixes) that writing the file back out would repair.
    pub fn needs_resave(&self) -> bool {
        self.needs_resave
    }
}

fn run<R: BufRead>(session: &mut Session<'_>, input: R) -> Result<Item, ImportError> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);

    let mut buf = Vec::new();
    loop {
        session.offset = reader.buffer_position() as u64;
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => {
                session.depth += 1;
                if session.skip_until.is_none() {
                    session.handle_start(&element)?;
                }
            }
            Ok(Event::Empty(element)) => {
                session.depth += 1;
                if session.skip_until.is_none() {
                    session.handle_start(&element)?;
                }
                if session.skip_until == Some(session.depth) {
                    // An empty element has no subtree to discard.
                    session.skip_until = None;
                } else if session.skip_until.is_none() {
                    let name = ElemName::from_qname(element.name());
                    session.handle_end(&name);
                }
                session.depth = session.depth.saturating_sub(1);
            }
            Ok(Event::End(element)) => {
                if let Some(armed) = session.skip_until {
                    if armed == session.depth {
                        session.skip_until = None;
                    }
                } else {
                    let name = ElemName::from_qname(element.name());
                    session.handle_end(&name);
                }
                session.depth = session.depth.saturating_sub(1);
            }
            Ok(Event::Text(text)) => {
                if session.skip_until.is_none() {
                    let text = text.unescape().map_err(|e| session.fatal_xml(e))?;
                    session.pending_text.push_str(&text);
                }
            }
            Ok(Event::CData(data)) => {
                if session.skip_until.is_none() {
                    session
                        .pending_text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(error) => return Err(session.fatal_xml(error)),
        }
        buf.clear();
    }
    session.finish()
}

/// Element name split into its raw parts plus a lowercased local name for
/// case-insensitive dispatch.
struct ElemName {
    prefix: Option<String>,
    local: String,
    lower: String,
}

impl ElemName {
    fn from_qname(qname: QName<'_>) -> Self {
        let prefix = qname
            .prefix()
            .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
        let local = String::from_utf8_lossy(qname.local_name().as_ref()).into_owned();
        let lower = local.to_ascii_lowercase();
        Self {
            prefix,
            local,
            lower,
        }
    }
}

/// Ids of the tags the reader assigns directly, resolved once per load.
struct KnownTags {
    desc: TagId,
    cmt: TagId,
    typ: TagId,
    category: TagId,
    src: TagId,
    sym: TagId,
    link: TagId,
    hdop: TagId,
    time: TagId,
    author: TagId,
    creator: TagId,
    keywords: TagId,
    folder: TagId,
    color: TagId,
    media_name: TagId,
}

impl KnownTags {
    fn resolve(registry: &mut TagRegistry) -> Self {
        Self {
            desc: registry.index(tags::DESC),
            cmt: registry.index(tags::CMT),
            typ: registry.index(tags::TYPE),
            category: registry.index(tags::CATEGORY),
            src: registry.index(tags::SRC),
            sym: registry.index(tags::SYM),
            link: registry.index(tags::LINK),
            hdop: registry.index(tags::HDOP),
            time: registry.index(tags::TIME),
            author: registry.index(tags::AUTHOR),
            creator: registry.index(tags::CREATOR),
            keywords: registry.index(tags::KEYWORDS),
            folder: registry.index(tags::FOLDER),
            color: registry.index(tags::COLOR),
            media_name: registry.index(tags::MEDIA_NAME),
        }
    }
}

/// Parser state for one document.
struct Session<'s> {
    registry: &'s mut TagRegistry,
    report: &'s mut ImportReport,
    known: KnownTags,
    root: Item,
    track: Option<Item>,
    route: Option<Item>,
    segment: Option<Item>,
    point: Option<Item>,
    implied_segment: bool,
    within_metadata: bool,
    within_extensions: bool,
    within_author: bool,
    seen_gpx: bool,
    done: bool,
    depth: u32,
    /// Depth of an element whose whole subtree is being discarded.
    skip_until: Option<u32>,
    pending_text: String,
    /// Prefix declarations seen in this document.
    namespaces: HashMap<String, String>,
    undefined_prefixes: HashSet<String>,
    needs_resave: bool,
    offset: u64,
}

impl<'s> Session<'s> {
    fn new(registry: &'s mut TagRegistry, report: &'s mut ImportReport) -> Self {
        let known = KnownTags::resolve(registry);
        Self {
            registry,
            report,
            known,
            root: Item::file(),
            track: None,
            route: None,
            segment: None,
            point: None,
            implied_segment: false,
            within_metadata: false,
            within_extensions: false,
            within_author: false,
            seen_gpx: false,
            done: false,
            depth: 0,
            skip_until: None,
            pending_text: String::new(),
            namespaces: HashMap::new(),
            undefined_prefixes: HashSet::new(),
            needs_resave: false,
            offset: 0,
        }
    }

    // ===== Event dispatch =====

    fn handle_start(&mut self, element: &BytesStart<'_>) -> Result<(), ImportError> {
        self.pending_text.clear();
        let name = ElemName::from_qname(element.name());
        let attrs = self.collect_attrs(element);
        self.scan_namespace_decls(&attrs);
        self.check_prefix(&name);

        if !self.seen_gpx {
            if name.lower == "gpx" {
                self.start_gpx(&attrs);
                return Ok(());
            }
            self.report.fatal(
                format!("Root element is <{}>, not <gpx>", name.local),
                Some(self.offset),
            );
            return Err(ImportError::NotGpx);
        }

        match name.lower.as_str() {
            "gpx" => self.error_skip("Nested <gpx> element"),
            "metadata" => {
                if self.within_metadata {
                    self.error_skip("Nested <metadata> block");
                } else {
                    self.within_metadata = true;
                }
            }
            "extensions" => {
                if self.within_extensions {
                    self.error_skip("Nested <extensions> block");
                } else {
                    self.within_extensions = true;
                }
            }
            "trk" => self.start_track(),
            "rte" => self.start_route(),
            "trkseg" => self.start_segment(),
            "trkpt" => self.start_trackpoint(&attrs),
            "rtept" => self.start_routepoint(&attrs),
            "wpt" => self.start_waypoint(&attrs),
            "link" => self.start_link(&attrs),
            "author" => self.within_author = true,
            "ele" => {
                if self.point.is_none() {
                    self.error_skip("An <ele> outside any point");
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_end(&mut self, name: &ElemName) {
        let text = mem::take(&mut self.pending_text);
        match name.lower.as_str() {
            "gpx" => self.end_gpx(),
            "metadata" => self.within_metadata = false,
            "extensions" => self.within_extensions = false,
            "trk" => self.end_track(),
            "rte" => self.end_route(),
            "trkseg" => self.end_segment(),
            "trkpt" => self.end_trackpoint(),
            "rtept" => self.end_routepoint(),
            "wpt" => self.end_waypoint(),
            "author" => self.end_author(text),
            "name" => self.end_name(text),
            "desc" | "description" => self.set_text_meta(self.known.desc, text),
            "cmt" => self.set_text_meta(self.known.cmt, text),
            "type" => self.set_text_meta(self.known.typ, text),
            "category" => self.set_text_meta(self.known.category, text),
            "src" => self.set_text_meta(self.known.src, text),
            "sym" => self.set_text_meta(self.known.sym, text),
            "keywords" => self.set_text_meta(self.known.keywords, text),
            "creator" => self.set_text_meta(self.known.creator, text),
            "url" => self.set_text_meta(self.known.link, text),
            "time" => self.end_time(text),
            "ele" => self.end_elevation(text),
            "hdop" => self.end_hdop(text),
            "color" => self.end_color(name, text),
            "folder" => self.end_folder(name, text),
            _ => self.end_unrecognized(name, text),
        }
    }

    // ===== Start handlers =====

    fn start_gpx(&mut self, attrs: &[(String, String)]) {
        self.seen_gpx = true;
        for (key, value) in attrs {
            match key.to_ascii_lowercase().as_str() {
                "version" => {
                    if value != "1.0" && value != "1.1" {
                        self.report.warning(
                            format!("Unsupported GPX version {value}"),
                            Some(self.offset),
                        );
                    }
                }
                "creator" => {
                    if !value.is_empty() {
                        self.root
                            .set_meta(self.known.creator, MetaValue::Text(value.clone()));
                    }
                }
                _ => {}
            }
        }
    }

    fn start_track(&mut self) {
        if self.track.is_some() {
            self.error_skip("Nested <trk> element");
        } else if self.route.is_some() {
            self.error_skip("A <trk> inside <rte>");
        } else {
            self.track = Some(Item::track());
        }
    }

    fn start_route(&mut self) {
        if self.route.is_some() {
            self.error_skip("Nested <rte> element");
        } else if self.track.is_some() {
            self.error_skip("A <rte> inside <trk>");
        } else {
            self.route = Some(Item::route());
        }
    }

    fn start_segment(&mut self) {
        if self.track.is_none() {
            self.error_skip("A <trkseg> outside any <trk>");
        } else if self.segment.is_some() {
            self.error_skip("Nested <trkseg> element");
        } else {
            self.segment = Some(Item::segment());
            self.implied_segment = false;
        }
    }

    fn start_trackpoint(&mut self, attrs: &[(String, String)]) {
        if self.track.is_none() {
            self.error_skip("A <trkpt> outside any <trk>");
            return;
        }
        if self.point.is_some() {
            self.error_skip("Nested point element");
            return;
        }
        if self.segment.is_none() {
            // Legacy writers put points directly under <trk>.
            self.report.warning(
                "A <trkpt> outside any <trkseg>; an implied segment was created",
                Some(self.offset),
            );
            self.segment = Some(Item::segment());
            self.implied_segment = true;
        }
        match coordinates(attrs) {
            Some((lat, lon)) => self.point = Some(Item::trackpoint(lat, lon)),
            None => self.error_skip("A <trkpt> without a valid lat/lon"),
        }
    }

    fn start_routepoint(&mut self, attrs: &[(String, String)]) {
        if self.route.is_none() {
            self.error_skip("A <rtept> outside any <rte>");
            return;
        }
        if self.point.is_some() {
            self.error_skip("Nested point element");
            return;
        }
        match coordinates(attrs) {
            Some((lat, lon)) => self.point = Some(Item::routepoint(lat, lon)),
            None => self.error_skip("A <rtept> without a valid lat/lon"),
        }
    }

    fn start_waypoint(&mut self, attrs: &[(String, String)]) {
        if self.track.is_some() || self.route.is_some() {
            self.error_skip("A <wpt> inside <trk> or <rte>");
            return;
        }
        if self.point.is_some() {
            self.error_skip("Nested point element");
            return;
        }
        match coordinates(attrs) {
            Some((lat, lon)) => self.point = Some(Item::waypoint(lat, lon)),
            None => self.error_skip("A <wpt> without a valid lat/lon"),
        }
    }

    fn start_link(&mut self, attrs: &[(String, String)]) {
        let mut link = None;
        let mut href = None;
        for (key, value) in attrs {
            match key.to_ascii_lowercase().as_str() {
                "link" => link = Some(value.clone()),
                "href" => href = Some(value.clone()),
                _ => {}
            }
        }
        match link.or(href) {
            Some(url) if !url.is_empty() => {
                let id = self.known.link;
                self.target_mut().set_meta(id, MetaValue::Text(url));
            }
            _ => self
                .report
                .warning("A <link> without a target URL", Some(self.offset)),
        }
        // Nested <text>/<type> children carry nothing we keep.
        self.skip_until = Some(self.depth);
    }

    // ===== End handlers =====

    fn end_gpx(&mut self) {
        self.done = true;
        self.validate_termination();
    }

    fn end_track(&mut self) {
        if self.implied_segment {
            self.end_segment();
        }
        if let Some(track) = self.track.take() {
            self.root.push_child(track);
        }
    }

    fn end_route(&mut self) {
        if let Some(route) = self.route.take() {
            self.root.push_child(route);
        }
    }

    fn end_segment(&mut self) {
        self.implied_segment = false;
        let Some(segment) = self.segment.take() else {
            return;
        };
        if let Some(track) = self.track.as_mut() {
            track.push_child(segment);
        }
    }

    fn end_trackpoint(&mut self) {
        let Some(point) = self.point.take() else {
            return;
        };
        // The start handler created the segment, implied if need be.
        if let Some(segment) = self.segment.as_mut() {
            segment.push_child(point);
        }
    }

    fn end_routepoint(&mut self) {
        let Some(point) = self.point.take() else {
            return;
        };
        if let Some(route) = self.route.as_mut() {
            route.push_child(point);
        }
    }

    fn end_waypoint(&mut self) {
        let Some(mut waypoint) = self.point.take() else {
            return;
        };
        let is_media = self.is_media_waypoint(&waypoint);
        if is_media {
            if let Some(name) = waypoint.name() {
                let name = name.to_string();
                waypoint.set_meta(self.known.media_name, MetaValue::Text(name));
            }
        }
        let path = match waypoint.remove_meta(self.known.folder) {
            Some(value) => value
                .as_text()
                .unwrap_or(DEFAULT_WAYPOINT_FOLDER)
                .to_string(),
            None if is_media => MEDIA_WAYPOINT_FOLDER.to_string(),
            None => DEFAULT_WAYPOINT_FOLDER.to_string(),
        };
        self.root.folder_mut(&path).push_child(waypoint);
    }

    fn end_author(&mut self, text: String) {
        // GPX 1.0 carries the author as leaf text; 1.1 nests it in a
        // <name> child handled by end_name.
        self.within_author = false;
        self.set_text_meta(self.known.author, text);
    }

    fn end_name(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        if self.within_author {
            self.set_text_meta(self.known.author, text);
        } else {
            self.target_mut().set_name(text);
        }
    }

    fn end_time(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        match parse_timestamp(&text) {
            Some(time) => {
                if let Some(point) = self.point.as_mut() {
                    if let Some(geo) = point.point_mut() {
                        geo.time = Some(time);
                    }
                } else {
                    let id = self.known.time;
                    self.target_mut().set_meta(id, MetaValue::Time(time));
                }
            }
            None => {
                self.report
                    .warning(format!("Unparseable timestamp: {text}"), Some(self.offset));
                if self.point.is_none() {
                    // Keep the raw text so the value survives a round trip.
                    let id = self.known.time;
                    self.target_mut().set_meta(id, MetaValue::Text(text));
                }
            }
        }
    }

    fn end_elevation(&mut self, text: String) {
        let Some(point) = self.point.as_mut() else {
            return;
        };
        let Some(geo) = point.point_mut() else {
            return;
        };
        match text.parse::<f64>() {
            Ok(ele) if ele.is_finite() => geo.ele = Some(ele),
            _ => self
                .report
                .warning(format!("Unparseable elevation: {text}"), Some(self.offset)),
        }
    }

    fn end_hdop(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        let id = self.known.hdop;
        if self.point.is_some() {
            self.target_mut().set_meta(id, MetaValue::Text(text));
        } else {
            self.target_mut().set_meta(id, MetaValue::Opaque(text));
        }
    }

    fn end_color(&mut self, name: &ElemName, text: String) {
        if text.is_empty() {
            return;
        }
        match Rgb::parse_hex(&text) {
            Some(color) => {
                let id = self.known.color;
                // A namespaced colour (style or application extension) is
                // authoritative; a bare legacy <color> only fills a gap.
                let qualified = name.prefix.is_some();
                let target = self.target_mut();
                if qualified || !target.has_meta(id) {
                    target.set_meta(id, MetaValue::Color(color));
                }
            }
            None => self
                .report
                .warning(format!("Invalid colour value: {text}"), Some(self.offset)),
        }
    }

    fn end_folder(&mut self, name: &ElemName, text: String) {
        if text.is_empty() {
            return;
        }
        if self.point.is_some() {
            let id = self.known.folder;
            self.target_mut().set_meta(id, MetaValue::Text(text));
        } else {
            self.end_unrecognized_owned(name, text);
        }
    }

    fn end_unrecognized(&mut self, name: &ElemName, text: String) {
        if text.is_empty() {
            return;
        }
        self.end_unrecognized_owned(name, text);
    }

    fn end_unrecognized_owned(&mut self, name: &ElemName, text: String) {
        let id = self
            .registry
            .index_qualified(name.prefix.as_deref().unwrap_or(""), &name.local);
        self.target_mut().set_meta(id, MetaValue::Opaque(text));
    }

    // ===== Shared helpers =====

    fn set_text_meta(&mut self, id: TagId, text: String) {
        if text.is_empty() {
            return;
        }
        self.target_mut().set_meta(id, MetaValue::Text(text));
    }

    /// The innermost open item a leaf value belongs to, falling back to the
    /// file itself. Inside a `<metadata>` block everything is file-level.
    fn target_mut(&mut self) -> &mut Item {
        if !self.within_metadata {
            if let Some(point) = self.point.as_mut() {
                return point;
            }
            if let Some(segment) = self.segment.as_mut() {
                return segment;
            }
            if let Some(track) = self.track.as_mut() {
                return track;
            }
            if let Some(route) = self.route.as_mut() {
                return route;
            }
        }
        &mut self.root
    }

    fn error_skip(&mut self, message: &str) {
        self.report.error(message, Some(self.offset));
        self.skip_until = Some(self.depth);
    }

    fn fatal_xml(&mut self, error: quick_xml::Error) -> ImportError {
        self.report
            .fatal(format!("XML error: {error}"), Some(self.offset));
        ImportError::Xml(error)
    }

    fn collect_attrs(&mut self, element: &BytesStart<'_>) -> Vec<(String, String)> {
        let mut attrs = Vec::new();
        for attr in element.attributes() {
            let attr = match attr {
                Ok(attr) => attr,
                Err(error) => {
                    self.report
                        .warning(format!("Bad attribute: {error}"), Some(self.offset));
                    continue;
                }
            };
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            match attr.unescape_value() {
                Ok(value) => attrs.push((key, value.into_owned())),
                Err(_) => self.report.warning(
                    format!("Unreadable value for attribute {key}"),
                    Some(self.offset),
                ),
            }
        }
        attrs
    }

    fn scan_namespace_decls(&mut self, attrs: &[(String, String)]) {
        for (key, value) in attrs {
            if let Some(prefix) = key.strip_prefix("xmlns:") {
                self.namespaces.insert(prefix.to_string(), value.clone());
                self.registry.set_namespace_uri(prefix, value);
            }
        }
    }

    /// Warns once per prefix used without a declaration; such files are
    /// flagged for resaving, which writes the missing declarations.
    fn check_prefix(&mut self, name: &ElemName) {
        let Some(prefix) = name.prefix.as_deref() else {
            return;
        };
        if prefix == ns::XML_PREFIX || self.namespaces.contains_key(prefix) {
            return;
        }
        if self.undefined_prefixes.insert(prefix.to_string()) {
            self.report.warning(
                format!("Undeclared namespace prefix: {prefix}"),
                Some(self.offset),
            );
            self.needs_resave = true;
        }
    }

    fn is_media_waypoint(&self, waypoint: &Item) -> bool {
        if let Some(name) = waypoint.name() {
            let lower = name.to_ascii_lowercase();
            if MEDIA_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
                return true;
            }
        }
        for id in [self.known.typ, self.known.category] {
            let Some(value) = waypoint.meta(id).and_then(MetaValue::as_text) else {
                continue;
            };
            if MEDIA_TYPES.iter().any(|t| value.eq_ignore_ascii_case(t)) {
                return true;
            }
        }
        false
    }

    // ===== Document finish =====

    fn validate_termination(&mut self) {
        if self.point.take().is_some() {
            self.report
                .error("A point was not terminated", Some(self.offset));
        }
        if self.segment.take().is_some() {
            self.report
                .error("A <trkseg> was not terminated", Some(self.offset));
        }
        if self.track.take().is_some() {
            self.report
                .error("A <trk> was not terminated", Some(self.offset));
        }
        if self.route.take().is_some() {
            self.report
                .error("A <rte> was not terminated", Some(self.offset));
        }
        if self.within_metadata {
            self.report
                .error("A <metadata> block was not terminated", Some(self.offset));
            self.within_metadata = false;
        }
        if self.within_extensions {
            self.report
                .error("An <extensions> block was not terminated", Some(self.offset));
            self.within_extensions = false;
        }
    }

    fn finish(&mut self) -> Result<Item, ImportError> {
        if !self.seen_gpx {
            self.report.fatal("No <gpx> root element found", None);
            return Err(ImportError::NotGpx);
        }
        if !self.done {
            self.report
                .error("Document ended before </gpx>", Some(self.offset));
            self.validate_termination();
        }
        self.merge_file_meta();
        Ok(mem::replace(&mut self.root, Item::file()))
    }

    /// Copies file-level creator/author/time/keywords onto every top-level
    /// track that lacks its own value.
    fn merge_file_meta(&mut self) {
        let merge = [
            self.known.creator,
            self.known.author,
            self.known.time,
            self.known.keywords,
        ];
        for id in merge {
            let Some(value) = self.root.meta(id).cloned() else {
                continue;
            };
            for child in self.root.children_mut() {
                if matches!(child.kind(), ItemKind::Track) && !child.has_meta(id) {
                    child.set_meta(id, value.clone());
                }
            }
        }
    }
}

fn coordinates(attrs: &[(String, String)]) -> Option<(f64, f64)> {
    let mut lat = None;
    let mut lon = None;
    for (key, value) in attrs {
        match key.to_ascii_lowercase().as_str() {
            "lat" => lat = value.parse::<f64>().ok().filter(|v| v.is_finite()),
            "lon" => lon = value.parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => {}
        }
    }
    lat.zip(lon)
}

/// Parses an RFC 3339 timestamp, falling back to the zone-less form some
/// legacy writers produce (taken as UTC).
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Some(time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn import(doc: &str) -> (Item, ImportReport) {
        let mut registry = TagRegistry::new();
        let mut report = ImportReport::new();
        let mut importer = GpxImporter::new(&mut registry);
        let root = importer
            .load_str(doc, &mut report)
            .expect("import should succeed");
        (root, report)
    }

    fn tag(name: &str) -> TagId {
        TagRegistry::new().lookup(name).unwrap()
    }

    #[test]
    fn test_minimal_track() {
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="TestWriter" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <name>Morning Ride</name>
    <trkseg>
      <trkpt lat="48.1374" lon="11.5755"><ele>519.0</ele><time>2024-05-01T10:00:00Z</time></trkpt>
      <trkpt lat="48.1380" lon="11.5760"><ele>521.5</ele><time>2024-05-01T10:00:10Z</time></trkpt>
    </trkseg>
  </trk>
</gpx>"#;
        let (root, report) = import(doc);
        assert!(report.is_clean(), "unexpected findings: {:?}", report);

        assert_eq!(
            root.meta(tag(tags::CREATOR)).and_then(MetaValue::as_text),
            Some("TestWriter")
        );
        assert_eq!(root.children().len(), 1);

        let track = &root.children()[0];
        assert_eq!(*track.kind(), ItemKind::Track);
        assert_eq!(track.name(), Some("Morning Ride"));
        assert_eq!(track.children().len(), 1);

        let segment = &track.children()[0];
        assert_eq!(segment.children().len(), 2);
        let first = segment.children()[0].point().unwrap();
        assert_eq!(first.lat, 48.1374);
        assert_eq!(first.lon, 11.5755);
        assert_eq!(first.ele, Some(519.0));
        assert_eq!(
            first.time,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_file_metadata_merges_onto_tracks() {
        let doc = r#"<gpx version="1.1" creator="App">
  <metadata>
    <name>Collection</name>
    <author><name>Jane Doe</name></author>
    <time>2024-01-01T00:00:00Z</time>
    <keywords>alps, summer</keywords>
  </metadata>
  <trk><name>A</name></trk>
  <trk><name>B</name><time>2024-02-02T00:00:00Z</time></trk>
</gpx>"#;
        let (root, report) = import(doc);
        assert!(report.is_clean(), "unexpected findings: {:?}", report);

        assert_eq!(root.name(), Some("Collection"));
        assert_eq!(
            root.meta(tag(tags::AUTHOR)).and_then(MetaValue::as_text),
            Some("Jane Doe")
        );

        let file_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = &root.children()[0];
        let b = &root.children()[1];
        assert_eq!(a.meta(tag(tags::TIME)).and_then(MetaValue::as_time), Some(file_time));
        assert_eq!(
            b.meta(tag(tags::TIME)).and_then(MetaValue::as_time),
            Some(Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap())
        );
        for track in [a, b] {
            assert_eq!(
                track.meta(tag(tags::CREATOR)).and_then(MetaValue::as_text),
                Some("App")
            );
            assert_eq!(
                track.meta(tag(tags::KEYWORDS)).and_then(MetaValue::as_text),
                Some("alps, summer")
            );
        }
    }

    #[test]
    fn test_description_is_alias_for_desc() {
        let doc = r#"<gpx version="1.1">
  <trk><name>A</name><description>legacy text</description></trk>
  <rte><name>B</name><desc>standard text</desc></rte>
</gpx>"#;
        let (root, report) = import(doc);
        assert!(report.is_clean());
        assert_eq!(
            root.children()[0]
                .meta(tag(tags::DESC))
                .and_then(MetaValue::as_text),
            Some("legacy text")
        );
        assert_eq!(
            root.children()[1]
                .meta(tag(tags::DESC))
                .and_then(MetaValue::as_text),
            Some("standard text")
        );
    }

    #[test]
    fn test_implied_segment_single_warning() {
        let doc = r#"<gpx version="1.1">
  <trk>
    <name>T</name>
    <trkpt lat="1.0" lon="2.0"/>
    <trkpt lat="3.0" lon="4.0"/>
  </trk>
</gpx>"#;
        let (root, report) = import(doc);
        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.error_count(), 0);

        let track = &root.children()[0];
        assert_eq!(track.children().len(), 1);
        let segment = &track.children()[0];
        assert_eq!(*segment.kind(), ItemKind::Segment);
        assert_eq!(segment.children().len(), 2);
    }

    #[test]
    fn test_nested_track_is_dropped() {
        let doc = r#"<gpx version="1.1">
  <trk>
    <name>One</name>
    <trkseg><trkpt lat="1.0" lon="2.0"/></trkseg>
    <trk><name>Two</name><trkseg><trkpt lat="9.0" lon="9.0"/></trkseg></trk>
  </trk>
</gpx>"#;
        let (root, report) = import(doc);
        assert_eq!(report.error_count(), 1);

        assert_eq!(root.children().len(), 1);
        let track = &root.children()[0];
        assert_eq!(track.name(), Some("One"));
        assert_eq!(track.children().len(), 1);
        assert_eq!(track.children()[0].children().len(), 1);
    }

    #[test]
    fn test_point_outside_track_is_dropped() {
        let doc = r#"<gpx version="1.1"><trkpt lat="1.0" lon="2.0"><ele>5</ele></trkpt></gpx>"#;
        let (root, report) = import(doc);
        assert_eq!(report.error_count(), 1);
        assert!(root.children().is_empty());
    }

    #[test]
    fn test_elevation_outside_point_is_dropped() {
        let doc = r#"<gpx version="1.1"><trk><name>T</name><ele>500</ele></trk></gpx>"#;
        let (root, report) = import(doc);
        assert_eq!(report.error_count(), 1);

        // The skipped value must not survive as opaque metadata either.
        let track = &root.children()[0];
        assert_eq!(track.meta_iter().count(), 0);
    }

    #[test]
    fn test_waypoint_default_folder() {
        let doc = r#"<gpx version="1.1"><wpt lat="47.0" lon="12.0"><name>Summit</name></wpt></gpx>"#;
        let (root, report) = import(doc);
        assert!(report.is_clean());

        assert_eq!(root.children().len(), 1);
        let folder = &root.children()[0];
        assert_eq!(*folder.kind(), ItemKind::Folder);
        assert_eq!(folder.name(), Some(DEFAULT_WAYPOINT_FOLDER));
        assert_eq!(folder.children()[0].name(), Some("Summit"));
    }

    #[test]
    fn test_media_waypoints_route_to_notes() {
        let doc = r#"<gpx version="1.1">
  <wpt lat="47.0" lon="12.0"><name>IMG_0001.JPG</name></wpt>
  <wpt lat="47.1" lon="12.1"><name>voice note</name><type>Audio</type></wpt>
</gpx>"#;
        let (root, report) = import(doc);
        assert!(report.is_clean());

        assert_eq!(root.children().len(), 1);
        let notes = &root.children()[0];
        assert_eq!(notes.name(), Some(MEDIA_WAYPOINT_FOLDER));
        assert_eq!(notes.children().len(), 2);
        assert_eq!(
            notes.children()[0]
                .meta(tag(tags::MEDIA_NAME))
                .and_then(MetaValue::as_text),
            Some("IMG_0001.JPG")
        );
    }

    #[test]
    fn test_folder_extension_routes_waypoint() {
        let doc = r#"<gpx version="1.1" xmlns:tf="https://trackforge.dev/xmlschemas/v1">
  <wpt lat="47.0" lon="12.0">
    <name>Camp</name>
    <extensions><tf:folder>Trips/2024</tf:folder></extensions>
  </wpt>
</gpx>"#;
        let (root, report) = import(doc);
        assert!(report.is_clean(), "unexpected findings: {:?}", report);

        let trips = &root.children()[0];
        assert_eq!(trips.name(), Some("Trips"));
        let year = &trips.children()[0];
        assert_eq!(year.name(), Some("2024"));
        let camp = &year.children()[0];
        assert_eq!(camp.name(), Some("Camp"));
        // The path lives in the tree now, not on the waypoint.
        assert!(!camp.has_meta(tag(tags::FOLDER)));
    }

    #[test]
    fn test_undeclared_prefix_warns_once_and_flags_resave() {
        let doc = r#"<gpx version="1.1">
  <wpt lat="1.0" lon="2.0"><extensions><gpxx:Temperature>21</gpxx:Temperature></extensions></wpt>
  <wpt lat="3.0" lon="4.0"><extensions><gpxx:Temperature>22</gpxx:Temperature></extensions></wpt>
</gpx>"#;
        let mut registry = TagRegistry::new();
        let mut report = ImportReport::new();
        let mut importer = GpxImporter::new(&mut registry);
        let root = importer.load_str(doc, &mut report).unwrap();

        assert_eq!(report.warning_count(), 1);
        assert!(importer.needs_resave());

        let id = registry.lookup("gpxx:Temperature").unwrap();
        let folder = &root.children()[0];
        assert_eq!(
            folder.children()[0].meta(id).and_then(MetaValue::as_text),
            Some("21")
        );
    }

    #[test]
    fn test_declared_prefix_is_clean() {
        let doc = r#"<gpx version="1.1" xmlns:gpxx="http://www.garmin.com/xmlschemas/GpxExtensions/v3">
  <wpt lat="1.0" lon="2.0"><extensions><gpxx:Temperature>21</gpxx:Temperature></extensions></wpt>
</gpx>"#;
        let mut registry = TagRegistry::new();
        let mut report = ImportReport::new();
        let mut importer = GpxImporter::new(&mut registry);
        importer.load_str(doc, &mut report).unwrap();

        assert!(report.is_clean());
        assert!(!importer.needs_resave());
    }

    #[test]
    fn test_namespaced_colour_wins_over_bare() {
        let style = "http://www.topografix.com/GPX/gpx_style/0/2";
        let doc = format!(
            r#"<gpx version="1.1" xmlns:gpx_style="{style}">
  <trk>
    <name>A</name>
    <color>ff0000</color>
    <extensions><gpx_style:color>00ff00</gpx_style:color></extensions>
  </trk>
  <trk>
    <name>B</name>
    <extensions><gpx_style:color>0000ff</gpx_style:color></extensions>
    <color>ff0000</color>
  </trk>
</gpx>"#
        );
        let (root, report) = import(&doc);
        assert!(report.is_clean(), "unexpected findings: {:?}", report);

        let a = root.children()[0].meta(tag(tags::COLOR)).unwrap();
        assert_eq!(a.as_color().unwrap().to_string(), "#00ff00");
        // The bare colour after an explicit one must not overwrite it.
        let b = root.children()[1].meta(tag(tags::COLOR)).unwrap();
        assert_eq!(b.as_color().unwrap().to_string(), "#0000ff");
    }

    #[test]
    fn test_link_attribute_preference_and_subtree_skip() {
        let doc = r#"<gpx version="1.1">
  <wpt lat="1.0" lon="2.0">
    <name>W</name>
    <link link="https://a.example" href="https://b.example"><text>label</text></link>
  </wpt>
</gpx>"#;
        let mut registry = TagRegistry::new();
        let mut report = ImportReport::new();
        let mut importer = GpxImporter::new(&mut registry);
        let root = importer.load_str(doc, &mut report).unwrap();

        assert!(report.is_clean());
        let waypoint = &root.children()[0].children()[0];
        assert_eq!(
            waypoint.meta(tag(tags::LINK)).and_then(MetaValue::as_text),
            Some("https://a.example")
        );
        // The <text> child was consumed, not stored as opaque metadata.
        assert!(registry.lookup("text").is_none());
    }

    #[test]
    fn test_gpx10_url_element() {
        let doc = r#"<gpx version="1.0">
  <wpt lat="1.0" lon="2.0"><name>W</name><url>https://example.org</url></wpt>
</gpx>"#;
        let (root, report) = import(doc);
        assert!(report.is_clean());
        let waypoint = &root.children()[0].children()[0];
        assert_eq!(
            waypoint.meta(tag(tags::LINK)).and_then(MetaValue::as_text),
            Some("https://example.org")
        );
    }

    #[test]
    fn test_hdop_kept_verbatim() {
        let doc = r#"<gpx version="1.1">
  <trk><trkseg><trkpt lat="1.0" lon="2.0"><hdop>1.20</hdop></trkpt></trkseg></trk>
</gpx>"#;
        let (root, report) = import(doc);
        assert!(report.is_clean());
        let point = &root.children()[0].children()[0].children()[0];
        assert_eq!(
            point.meta(tag(tags::HDOP)).and_then(MetaValue::as_text),
            Some("1.20")
        );
    }

    #[test]
    fn test_naive_timestamp_fallback() {
        let doc = r#"<gpx version="1.1">
  <trk><trkseg><trkpt lat="1.0" lon="2.0"><time>2024-05-01T10:00:00</time></trkpt></trkseg></trk>
</gpx>"#;
        let (root, report) = import(doc);
        assert!(report.is_clean());
        let point = root.children()[0].children()[0].children()[0]
            .point()
            .unwrap();
        assert_eq!(
            point.time,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_bad_timestamp_warns() {
        let doc = r#"<gpx version="1.1">
  <trk><trkseg><trkpt lat="1.0" lon="2.0"><time>yesterday</time></trkpt></trkseg></trk>
</gpx>"#;
        let (root, report) = import(doc);
        assert_eq!(report.warning_count(), 1);
        let point = root.children()[0].children()[0].children()[0]
            .point()
            .unwrap();
        assert_eq!(point.time, None);
    }

    #[test]
    fn test_route_parses() {
        let doc = r#"<gpx version="1.1">
  <rte><name>Ferry</name><rtept lat="54.0" lon="10.0"/><rtept lat="54.5" lon="10.5"/></rte>
</gpx>"#;
        let (root, report) = import(doc);
        assert!(report.is_clean());
        let route = &root.children()[0];
        assert_eq!(*route.kind(), ItemKind::Route);
        assert_eq!(route.children().len(), 2);
        assert!(matches!(
            route.children()[0].kind(),
            ItemKind::Routepoint(_)
        ));
    }

    #[test]
    fn test_wrong_root_is_fatal() {
        let mut registry = TagRegistry::new();
        let mut report = ImportReport::new();
        let mut importer = GpxImporter::new(&mut registry);
        let result = importer.load_str("<kml><Document/></kml>", &mut report);

        assert!(matches!(result, Err(ImportError::NotGpx)));
        assert!(report.is_fatal());
    }

    #[test]
    fn test_mismatched_tags_are_fatal() {
        let mut registry = TagRegistry::new();
        let mut report = ImportReport::new();
        let mut importer = GpxImporter::new(&mut registry);
        let result = importer.load_str(r#"<gpx version="1.1"><trk></gpx>"#, &mut report);

        assert!(matches!(result, Err(ImportError::Xml(_))));
        assert!(report.is_fatal());
    }

    #[test]
    fn test_truncated_document_reports_unterminated() {
        let doc = r#"<gpx version="1.1"><trk><name>T</name><trkseg>"#;
        let (root, report) = import(doc);

        assert!(report.error_count() >= 2);
        assert!(!report.is_fatal());
        // The unterminated track is dropped, not half-attached.
        assert!(root.children().is_empty());
    }

    #[test]
    fn test_point_without_coordinates_is_dropped() {
        let doc = r#"<gpx version="1.1">
  <trk><trkseg>
    <trkpt lat="bogus" lon="2.0"><ele>5</ele></trkpt>
    <trkpt lat="1.0" lon="2.0"/>
  </trkseg></trk>
</gpx>"#;
        let (root, report) = import(doc);
        assert_eq!(report.error_count(), 1);
        let segment = &root.children()[0].children()[0];
        assert_eq!(segment.children().len(), 1);
    }
}
