//! Case-insensitive, insertion-ordered SIP header container.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::header_name::HeaderName;

/// Multi-entry header map preserving insertion order
///
/// Lookups are by [`HeaderName`], so case-insensitivity and compact-form
/// expansion happen once, at parse time. The same name may appear multiple
/// times (`Via`, `Record-Route`); iteration yields entries in the order they
/// were inserted.
///
/// # Examples
///
/// ```rust
/// use voxsip_sip_core::{HeaderName, Headers};
///
/// let mut headers = Headers::new();
/// headers.push(HeaderName::Via, "SIP/2.0/UDP a.example.com;branch=z9hG4bK1");
/// headers.push(HeaderName::Via, "SIP/2.0/UDP b.example.com;branch=z9hG4bK2");
/// headers.push(HeaderName::CallId, "abc@host");
///
/// assert_eq!(headers.get(&HeaderName::CallId), Some("abc@host"));
/// assert_eq!(headers.get_all(&HeaderName::Via).count(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    entries: Vec<(HeaderName, String)>,
}

impl Headers {
    /// Creates an empty container
    pub fn new() -> Self {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Appends a header, keeping any existing entries with the same name
    pub fn push(&mut self, name: HeaderName, value: impl Into<String>) {
        self.entries.push((name, value.into()));
    }

    /// Sets a header value.
    ///
    /// Replaces the first occurrence in place (preserving its position) and
    /// drops any further duplicates; appends when the name is absent.
    pub fn set(&mut self, name: HeaderName, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter().position(|(n, _)| *n == name) {
            Some(index) => {
                self.entries[index].1 = value;
                let mut i = index + 1;
                while i < self.entries.len() {
                    if self.entries[i].0 == name {
                        self.entries.remove(i);
                    } else {
                        i += 1;
                    }
                }
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Returns the first value for `name`
    pub fn get(&self, name: &HeaderName) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value for `name`, in insertion order
    pub fn get_all<'a>(
        &'a self,
        name: &'a HeaderName,
    ) -> impl DoubleEndedIterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Removes every occurrence of `name`, returning how many were removed
    pub fn remove(&mut self, name: &HeaderName) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n != name);
        before - self.entries.len()
    }

    /// True when at least one entry with `name` exists
    pub fn contains(&self, name: &HeaderName) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Iterates over `(name, value)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &str)> {
        self.entries.iter().map(|(n, v)| (n, v.as_str()))
    }

    /// Number of header entries (duplicates counted)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no headers are present
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses `name` as a header line name and appends the entry.
    ///
    /// Compact names are expanded and unknown names canonicalized; the
    /// original line's value whitespace is up to the caller.
    pub fn push_raw(&mut self, name: &str, value: impl Into<String>) -> crate::Result<()> {
        let name = HeaderName::from_str(name)?;
        self.push(name, value);
        Ok(())
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(HeaderName, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (HeaderName, String)>>(iter: T) -> Self {
        Headers {
            entries: iter.into_iter().collect(),
        }
    }
}
