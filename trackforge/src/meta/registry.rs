//! The tag interning table.

use std::collections::HashMap;

use super::{ns, tags};

/// Tags that exist only for the application's own bookkeeping and are never
/// written back out.
const INTERNAL_TAGS: &[&str] = &[tags::MEDIA_NAME];

/// Tags that always land in an `<extensions>` block, whatever the item kind.
const APPLICATION_TAGS: &[&str] = &[tags::FOLDER, tags::COLOR];

/// Tag names pre-interned by [`TagRegistry::new`].
const WELL_KNOWN_TAGS: &[&str] = &[
    tags::NAME,
    tags::DESC,
    tags::CMT,
    tags::TYPE,
    tags::SRC,
    tags::SYM,
    tags::LINK,
    tags::HDOP,
    tags::TIME,
    tags::AUTHOR,
    tags::CREATOR,
    tags::KEYWORDS,
    tags::CATEGORY,
    tags::FOLDER,
    tags::COLOR,
    tags::MEDIA_NAME,
];

/// Interned identifier for a metadata tag name.
///
/// Ids are stable for the lifetime of the registry that minted them; equal
/// names always intern to the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId(u32);

/// Interning table mapping tag names to dense ids, plus the namespace
/// prefix/URI pairs seen so far.
///
/// The registry is constructed explicitly and handed to the importer and
/// exporter; nothing in the crate keeps a global one. [`TagRegistry::new`]
/// pre-interns the well-known tag set so read-only users can resolve those
/// without a mutable borrow.
#[derive(Debug)]
pub struct TagRegistry {
    names: Vec<String>,
    ids: HashMap<String, TagId>,
    namespaces: HashMap<String, String>,
}

impl TagRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            names: Vec::new(),
            ids: HashMap::new(),
            namespaces: HashMap::new(),
        };
        for name in WELL_KNOWN_TAGS {
            registry.index(name);
        }
        registry.set_namespace_uri(ns::XSI_PREFIX, ns::XSI_URI);
        registry.set_namespace_uri(ns::GARMIN_PREFIX, ns::GARMIN_URI);
        registry.set_namespace_uri(ns::APP_PREFIX, ns::APP_URI);
        registry.set_namespace_uri(ns::STYLE_PREFIX, ns::STYLE_URI);
        registry
    }

    /// Interns a tag name, returning its stable id.
    pub fn index(&mut self, name: &str) -> TagId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = TagId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Interns a namespace-qualified tag name.
    ///
    /// An empty prefix interns the bare local name.
    pub fn index_qualified(&mut self, prefix: &str, local: &str) -> TagId {
        if prefix.is_empty() {
            self.index(local)
        } else {
            self.index(&format!("{}:{}", prefix, local))
        }
    }

    /// Id of an already-interned name, if any.
    pub fn lookup(&self, name: &str) -> Option<TagId> {
        self.ids.get(name).copied()
    }

    /// Reverse lookup of an interned id.
    ///
    /// Ids are only minted by this registry, so an out-of-range id is a
    /// caller bug and panics.
    pub fn qualified_name(&self, id: TagId) -> &str {
        &self.names[id.0 as usize]
    }

    /// Number of interned tags.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Registers (or updates) the URI a namespace prefix resolves to.
    pub fn set_namespace_uri(&mut self, prefix: &str, uri: &str) {
        self.namespaces.insert(prefix.to_string(), uri.to_string());
    }

    /// URI previously registered for a prefix.
    pub fn namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.namespaces.get(prefix).map(String::as_str)
    }

    /// True for tags that must never appear in exported output.
    pub fn is_internal_tag(&self, name: &str) -> bool {
        INTERNAL_TAGS.contains(&name)
    }

    /// True for tags that are always routed to an `<extensions>` block.
    pub fn is_application_tag(&self, name: &str) -> bool {
        APPLICATION_TAGS.contains(&name)
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_same_id() {
        let mut registry = TagRegistry::new();
        let a = registry.index("gpxx:Depth");
        let b = registry.index("gpxx:Depth");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_names_different_ids() {
        let mut registry = TagRegistry::new();
        let a = registry.index("gpxx:Depth");
        let b = registry.index("gpxx:Temperature");
        assert_ne!(a, b);
    }

    #[test]
    fn test_reverse_lookup() {
        let mut registry = TagRegistry::new();
        let id = registry.index("gpxx:Depth");
        assert_eq!(registry.qualified_name(id), "gpxx:Depth");
    }

    #[test]
    fn test_well_known_tags_preinterned() {
        let registry = TagRegistry::new();
        assert!(registry.lookup(tags::NAME).is_some());
        assert!(registry.lookup(tags::FOLDER).is_some());
        assert!(registry.lookup(tags::MEDIA_NAME).is_some());
        assert!(registry.lookup("gpxx:Depth").is_none());
    }

    #[test]
    fn test_index_qualified() {
        let mut registry = TagRegistry::new();
        let plain = registry.index_qualified("", "desc");
        assert_eq!(plain, registry.lookup(tags::DESC).unwrap());

        let qualified = registry.index_qualified("gpxx", "Depth");
        assert_eq!(registry.qualified_name(qualified), "gpxx:Depth");
    }

    #[test]
    fn test_namespace_registration() {
        let mut registry = TagRegistry::new();
        assert_eq!(registry.namespace_uri(ns::APP_PREFIX), Some(ns::APP_URI));
        assert_eq!(registry.namespace_uri("opencpn"), None);

        registry.set_namespace_uri("opencpn", "http://www.opencpn.org");
        assert_eq!(
            registry.namespace_uri("opencpn"),
            Some("http://www.opencpn.org")
        );
    }

    #[test]
    fn test_classification() {
        let registry = TagRegistry::new();
        assert!(registry.is_internal_tag(tags::MEDIA_NAME));
        assert!(!registry.is_internal_tag(tags::FOLDER));

        assert!(registry.is_application_tag(tags::FOLDER));
        assert!(registry.is_application_tag(tags::COLOR));
        assert!(!registry.is_application_tag(tags::DESC));
    }
}
