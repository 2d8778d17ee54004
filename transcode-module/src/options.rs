//! Module option strings.
//!
//! Options are `:` separated; each entry is either a bare flag or a
//! `key=value` pair, e.g. `bitrate=1800:interlaced:preset=slow`.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Maximum number of entries in one option string.
pub const MAX_OPTIONS: usize = 16;

const SEPARATOR: char = ':';

/// A parsed option string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionString {
    entries: Vec<(String, Option<String>)>,
}

impl OptionString {
    /// An option string without entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse `key=value:flag` syntax. Empty entries are ignored.
    pub fn parse(s: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for raw in s.split(SEPARATOR) {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let entry = match raw.split_once('=') {
                Some((key, value)) => (key.trim().to_string(), Some(value.trim().to_string())),
                None => (raw.to_string(), None),
            };
            if entry.0.is_empty() {
                return Err(Error::InvalidOption(format!("empty key in '{}'", raw)));
            }
            entries.push(entry);
        }
        if entries.len() > MAX_OPTIONS {
            return Err(Error::InvalidOption(format!(
                "{} options given, at most {} allowed",
                entries.len(),
                MAX_OPTIONS
            )));
        }
        Ok(Self { entries })
    }

    /// Check whether `name` appears, with or without a value.
    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    /// Raw value of `name`; the first occurrence wins.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Parse the value of `name`. `Ok(None)` when the option is absent.
    pub fn get<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.value(name) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                Error::InvalidOption(format!("bad value '{}' for option '{}'", raw, name))
            }),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }
}

impl FromStr for OptionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for OptionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            match value {
                Some(value) => write!(f, "{}={}", key, value)?,
                None => write!(f, "{}", key)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags_and_values() {
        let opts = OptionString::parse("bitrate=1800:interlaced:preset = slow").unwrap();
        assert_eq!(opts.len(), 3);
        assert!(opts.has("interlaced"));
        assert_eq!(opts.value("interlaced"), None);
        assert_eq!(opts.get::<u32>("bitrate").unwrap(), Some(1800));
        assert_eq!(opts.value("preset"), Some("slow"));
        assert_eq!(opts.get::<u32>("missing").unwrap(), None);
        assert!(opts.get::<u32>("preset").is_err());
    }

    #[test]
    fn test_parse_edge_cases() {
        assert!(OptionString::parse("").unwrap().is_empty());
        assert_eq!(OptionString::parse("::a::").unwrap().len(), 1);
        assert!(OptionString::parse("=1").is_err());

        let many = (0..=MAX_OPTIONS).map(|i| format!("o{}", i)).collect::<Vec<_>>().join(":");
        assert!(OptionString::parse(&many).is_err());
    }

    #[test]
    fn test_display() {
        let opts: OptionString = "a=1:b".parse().unwrap();
        assert_eq!(opts.to_string(), "a=1:b");
    }
}
