// Service listing types
//
// A listing is an immutable snapshot of the service registry as one process
// sees it. A service contributes one plain entry (carrying its properties) and
// one additional tap entry per tap placed on it, all under the same name.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::properties::{PropertyList, PropertyParseError};

/// Kind of a listing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceKind {
    /// The service itself, local or remote
    Plain,
    /// A tap relation placed on the named service
    Tap,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Plain => write!(f, "plain"),
            ServiceKind::Tap => write!(f, "tap"),
        }
    }
}

/// Delivery reliability requested for a tap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TapMode {
    /// Copy with the reliability of the original message
    #[default]
    Keep,
    Reliable,
    BestEffort,
}

impl fmt::Display for TapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapMode::Keep => write!(f, "keep"),
            TapMode::Reliable => write!(f, "reliable"),
            TapMode::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// One row of a service listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub kind: ServiceKind,
    /// Process (node) that provides the service, or the tapper's process for taps
    pub process: String,
    /// Tapper service name, only on tap entries
    pub tapper: Option<String>,
    /// Encoded property list, empty when there are none
    pub properties: String,
}

impl ServiceEntry {
    pub fn plain(name: &str, process: &str, properties: &PropertyList) -> Self {
        Self {
            name: name.to_string(),
            kind: ServiceKind::Plain,
            process: process.to_string(),
            tapper: None,
            properties: properties.encode(),
        }
    }

    pub fn tap(tappee: &str, tapper: &str, tapper_process: &str) -> Self {
        Self {
            name: tappee.to_string(),
            kind: ServiceKind::Tap,
            process: tapper_process.to_string(),
            tapper: Some(tapper.to_string()),
            properties: String::new(),
        }
    }

    pub fn is_tap(&self) -> bool {
        self.kind == ServiceKind::Tap || self.tapper.is_some()
    }

    /// Decode the property suffix of this entry
    pub fn property_list(&self) -> Result<PropertyList, PropertyParseError> {
        PropertyList::parse(&self.properties)
    }
}

/// Snapshot of the registry, enumerable by index until exhausted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceListing {
    entries: Vec<ServiceEntry>,
}

impl ServiceListing {
    pub fn new(entries: Vec<ServiceEntry>) -> Self {
        Self { entries }
    }

    /// Entry at `index`, `None` past the end of the listing
    pub fn get(&self, index: usize) -> Option<&ServiceEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceEntry> {
        self.entries.iter()
    }

    /// Every entry named `name`; always scans the whole listing
    pub fn entries_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ServiceEntry> {
        self.entries.iter().filter(move |e| e.name == name)
    }

    /// The plain entry of `name`, if listed
    pub fn plain_entry<'a>(&'a self, name: &str) -> Option<&'a ServiceEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name && e.kind == ServiceKind::Plain && e.tapper.is_none())
    }

    pub fn tap_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_tap()).count()
    }
}

impl<'a> IntoIterator for &'a ServiceListing {
    type Item = &'a ServiceEntry;
    type IntoIter = std::slice::Iter<'a, ServiceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> ServiceListing {
        let mut props = PropertyList::new();
        props.set("norwegian", "Blåbærsyltetøy");
        ServiceListing::new(vec![
            ServiceEntry::plain("pubunistr0", "pub", &props),
            ServiceEntry::tap("pubunistr0", "subunistr0", "pub"),
            ServiceEntry::plain("subunistr0", "pub", &PropertyList::new()),
        ])
    }

    #[test]
    fn test_enumerate_until_absent() {
        let listing = listing();
        let mut i = 0;
        while listing.get(i).is_some() {
            i += 1;
        }
        assert_eq!(i, 3);
        assert_eq!(listing.len(), 3);
    }

    #[test]
    fn test_entries_share_name() {
        let listing = listing();
        assert_eq!(listing.entries_named("pubunistr0").count(), 2);
        let plain = listing.plain_entry("pubunistr0").unwrap();
        assert_eq!(plain.kind, ServiceKind::Plain);
        assert_eq!(
            plain.property_list().unwrap().get("norwegian"),
            Some("Blåbærsyltetøy")
        );
        assert_eq!(listing.tap_count(), 1);
    }

    #[test]
    fn test_plain_entry_outlives_name() {
        let listing = listing();
        let found = {
            let name = String::from("subunistr0");
            listing.plain_entry(&name)
        };
        assert_eq!(found.map(|e| e.process.as_str()), Some("pub"));
        assert!(listing.plain_entry("missing").is_none());
    }
}
