//! Domain suffix set for split-horizon routing.
//!
//! Loads a static list of domain suffixes at startup and provides
//! suffix-match lookup: an entry matches the name itself and every
//! name under it.

use std::io;
use std::path::Path;

use rustc_hash::FxHashSet;

/// A set of domain suffixes routed through the proxy address.
pub struct DomainSet {
    suffixes: FxHashSet<String>,
}

impl DomainSet {
    /// Load a newline-delimited suffix file.
    ///
    /// Blank lines and `#` comments are skipped; entries are lowercased
    /// and stripped of a trailing root dot.
    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_lines(contents.lines()))
    }

    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let suffixes = lines
            .into_iter()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    return None;
                }
                Some(line.trim_end_matches('.').to_lowercase())
            })
            .collect();

        Self { suffixes }
    }

    /// Check whether a domain falls under any suffix in the set.
    ///
    /// An exact hash lookup is the fast path; otherwise the name matches
    /// when it ends with any stored suffix (so "sub.example.com" matches
    /// an "example.com" entry).
    pub fn matches(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();

        if self.suffixes.contains(&domain) {
            return true;
        }
        self.suffixes
            .iter()
            .any(|suffix| domain.ends_with(suffix.as_str()))
    }

    /// Returns the number of suffixes in the set.
    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }
}
