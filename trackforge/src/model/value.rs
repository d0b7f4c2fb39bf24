//! Metadata value types.

use chrono::{DateTime, Utc};

/// RGB colour as carried by line/point colour metadata.
///
/// An alpha of zero means "no colour set"; such values are skipped on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgb {
    /// Creates an opaque colour.
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xff }
    }

    /// True when the alpha channel marks this colour as unset.
    pub fn is_unset(&self) -> bool {
        self.a == 0
    }

    /// Parses `rrggbb` or `#rrggbb`, case-insensitive.
    pub fn parse_hex(input: &str) -> Option<Self> {
        let hex = input.trim().strip_prefix('#').unwrap_or_else(|| input.trim());
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self::new(r, g, b))
    }
}

impl std::fmt::Display for Rgb {
    /// Lower-case `#rrggbb`; the alpha channel is not part of the wire form.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// A single metadata value attached to a document item.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// Plain text: descriptions, symbols, comments and the like.
    Text(String),
    /// Timestamp, always UTC.
    Time(DateTime<Utc>),
    /// Line or point colour.
    Color(Rgb),
    /// Unrecognised third-party content, preserved verbatim.
    Opaque(String),
}

impl MetaValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) | MetaValue::Opaque(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            MetaValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Rgb> {
        match self {
            MetaValue::Color(c) => Some(*c),
            _ => None,
        }
    }
}
