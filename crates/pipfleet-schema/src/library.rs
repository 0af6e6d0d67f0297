use serde::{Deserialize, Serialize};
use std::fmt;

/// One installed (or desired) Python distribution.
///
/// Equality is exact on both fields: two entries that differ only in version
/// are distinct libraries, never an in-place upgrade.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Library {
    pub name: String,
    pub version: String,
}

impl Library {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

/// Parse a pinned requirement of the form `name==version`.
///
/// Surrounding whitespace is ignored. Returns `None` when either side is
/// empty or the `==` separator is absent.
pub fn parse_requirement(input: &str) -> Option<Library> {
    let (name, version) = input.trim().split_once("==")?;
    let name = name.trim();
    let version = version.trim();
    if name.is_empty() || version.is_empty() || version.contains("==") {
        return None;
    }
    Some(Library::new(name, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_strict_on_version() {
        assert_ne!(Library::new("flask", "1.0"), Library::new("flask", "2.0"));
        assert_eq!(Library::new("flask", "1.0"), Library::new("flask", "1.0"));
    }

    #[test]
    fn display_uses_pip_pin_syntax() {
        assert_eq!(Library::new("requests", "2.31.0").to_string(), "requests==2.31.0");
    }

    #[test]
    fn parse_requirement_accepts_pins() {
        assert_eq!(
            parse_requirement("  numpy == 1.26.4 "),
            Some(Library::new("numpy", "1.26.4"))
        );
    }

    #[test]
    fn parse_requirement_rejects_malformed() {
        assert_eq!(parse_requirement("numpy"), None);
        assert_eq!(parse_requirement("==1.0"), None);
        assert_eq!(parse_requirement("numpy=="), None);
        assert_eq!(parse_requirement("a==1==2"), None);
    }
}
