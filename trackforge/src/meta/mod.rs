//! Tag name interning and classification.
//!
//! Every metadata tag that appears in a track document is interned once by the
//! [`TagRegistry`], and items store values keyed by the resulting [`TagId`].
//! The registry also remembers namespace prefix/URI pairs seen while reading,
//! so later documents (and the exporter) can resolve them.

mod registry;

pub use registry::{TagId, TagRegistry};

/// Well-known tag names.
///
/// Core GPX tags are interned as their plain local name; only unrecognised
/// third-party tags keep their `prefix:local` qualified form.
pub mod tags {
    /// Item display name.
    pub const NAME: &str = "name";
    /// Free-form description.
    pub const DESC: &str = "desc";
    /// GPS comment.
    pub const CMT: &str = "cmt";
    /// Classification of an item.
    pub const TYPE: &str = "type";
    /// Source of the data.
    pub const SRC: &str = "src";
    /// Waypoint symbol.
    pub const SYM: &str = "sym";
    /// Link URL.
    pub const LINK: &str = "link";
    /// Horizontal dilution of precision.
    pub const HDOP: &str = "hdop";
    /// Timestamp (file level or per track).
    pub const TIME: &str = "time";
    /// Document author.
    pub const AUTHOR: &str = "author";
    /// Writing application, kept as the `creator` attribute on export.
    pub const CREATOR: &str = "creator";
    /// File keywords.
    pub const KEYWORDS: &str = "keywords";
    /// Waypoint category.
    pub const CATEGORY: &str = "category";
    /// Waypoint folder path, always written as an application extension.
    pub const FOLDER: &str = "folder";
    /// Line/point colour, always written as a style extension.
    pub const COLOR: &str = "color";
    /// Original name of a media waypoint, never exported.
    pub const MEDIA_NAME: &str = "media-name";
}

/// Namespace prefixes and URIs used on the GPX wire.
pub mod ns {
    /// GPX 1.1 core namespace (default, unprefixed).
    pub const GPX_URI: &str = "http://www.topografix.com/GPX/1/1";
    pub const XSI_PREFIX: &str = "xsi";
    pub const XSI_URI: &str = "http://www.w3.org/2001/XMLSchema-instance";
    pub const SCHEMA_LOCATION: &str =
        "http://www.topografix.com/GPX/1/1 http://www.topografix.com/GPX/1/1/gpx.xsd";
    /// Garmin GPX extensions.
    pub const GARMIN_PREFIX: &str = "gpxx";
    pub const GARMIN_URI: &str = "http://www.garmin.com/xmlschemas/GpxExtensions/v3";
    /// TrackForge's own extension namespace.
    pub const APP_PREFIX: &str = "tf";
    pub const APP_URI: &str = "https://trackforge.dev/xmlschemas/v1";
    /// Shared style extension namespace (line colours and the like).
    pub const STYLE_PREFIX: &str = "gpx_style";
    pub const STYLE_URI: &str = "http://www.topografix.com/GPX/gpx_style/0/2";
    /// Reserved XML prefix, defined by the XML spec itself.
    pub const XML_PREFIX: &str = "xml";
}
