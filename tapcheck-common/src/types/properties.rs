// Service property lists
//
// Properties travel inside a service's listing entry as one string:
// ";key:value;key2:value2;". Inside keys and values the characters ':' ';'
// and '\' are escaped with a backslash. Text is otherwise kept byte for byte.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropertyParseError {
    #[error("Property string must start with ';'")]
    MissingLeadingSeparator,
    #[error("Property '{0}' has no ':' separator")]
    MissingValue(String),
    #[error("Dangling escape at end of property string")]
    DanglingEscape,
}

/// Ordered key/value list, keys unique
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyList {
    entries: Vec<(String, String)>,
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        if matches!(c, ':' | ';' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, overwriting any previous value in place
    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    /// Remove `key`; returns whether it was present
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        before != self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Encode as the listing suffix; an empty list encodes as ""
    pub fn encode(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let mut out = String::from(";");
        for (key, value) in &self.entries {
            escape_into(&mut out, key);
            out.push(':');
            escape_into(&mut out, value);
            out.push(';');
        }
        out
    }

    /// Parse a listing suffix produced by [`PropertyList::encode`]
    pub fn parse(encoded: &str) -> Result<Self, PropertyParseError> {
        let mut list = PropertyList::new();
        if encoded.is_empty() || encoded == ";" {
            return Ok(list);
        }
        let body = encoded
            .strip_prefix(';')
            .ok_or(PropertyParseError::MissingLeadingSeparator)?;

        let mut key = String::new();
        let mut current = String::new();
        let mut in_value = false;
        let mut chars = body.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    let escaped = chars.next().ok_or(PropertyParseError::DanglingEscape)?;
                    current.push(escaped);
                }
                ':' if !in_value => {
                    key = std::mem::take(&mut current);
                    in_value = true;
                }
                ';' => {
                    if !in_value {
                        return Err(PropertyParseError::MissingValue(current));
                    }
                    list.set(&key, &current);
                    current.clear();
                    key.clear();
                    in_value = false;
                }
                other => current.push(other),
            }
        }
        if in_value {
            // final entry without trailing ';'
            list.set(&key, &current);
        } else if !current.is_empty() {
            return Err(PropertyParseError::MissingValue(current));
        }
        Ok(list)
    }
}
