//! Line grammar playbooks use to report facts back.
//!
//! Playbooks print markers through Ansible `debug` messages, so a marker can
//! appear anywhere in a line and is usually wrapped in JSON quoting:
//!
//! ```text
//! ok: [10.0.0.5] => {
//!     "msg": "pipfleet.library: numpy==1.26.4"
//! }
//! ```
//!
//! The payload runs from the end of the marker token to the next `"` (or end
//! of line) and is trimmed.

use pipfleet_schema::{parse_requirement, validate_env_name, Library};
use tracing::debug;

/// Starts a fresh library listing; anything listed before it is discarded.
pub const LIBRARIES_BEGIN: &str = "pipfleet.libraries.begin";
/// One installed library, as `name==version`.
pub const LIBRARY: &str = "pipfleet.library:";
/// One virtual environment found on the host.
pub const VIRTUAL_ENV: &str = "pipfleet.virtual_env:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    LibrariesBegin,
    Library(Library),
    VirtualEnv(String),
}

fn payload_after<'a>(line: &'a str, token: &str) -> Option<&'a str> {
    let start = line.find(token)? + token.len();
    let rest = &line[start..];
    let end = rest.find('"').unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// Recognize a marker in one output line. Lines without a marker, and
/// markers with a malformed payload, yield `None`.
pub fn parse(line: &str) -> Option<Marker> {
    if line.contains(LIBRARIES_BEGIN) {
        return Some(Marker::LibrariesBegin);
    }
    if let Some(payload) = payload_after(line, LIBRARY) {
        return match parse_requirement(payload) {
            Some(lib) => Some(Marker::Library(lib)),
            None => {
                debug!("ignoring malformed library marker payload '{payload}'");
                None
            }
        };
    }
    if let Some(payload) = payload_after(line, VIRTUAL_ENV) {
        return match validate_env_name(payload) {
            Ok(()) => Some(Marker::VirtualEnv(payload.to_owned())),
            Err(e) => {
                debug!("ignoring virtual env marker: {e}");
                None
            }
        };
    }
    None
}

pub fn format_library(lib: &Library) -> String {
    format!("{LIBRARY} {lib}")
}

pub fn format_virtual_env(name: &str) -> String {
    format!("{VIRTUAL_ENV} {name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_marker_inside_json_quoting() {
        assert_eq!(
            parse(r#"    "msg": "pipfleet.library: numpy==1.26.4""#),
            Some(Marker::Library(Library::new("numpy", "1.26.4")))
        );
    }

    #[test]
    fn list_item_with_trailing_comma() {
        assert_eq!(
            parse(r#"        "pipfleet.virtual_env: analytics","#),
            Some(Marker::VirtualEnv("analytics".to_owned()))
        );
    }

    #[test]
    fn bare_markers() {
        assert_eq!(parse("pipfleet.libraries.begin"), Some(Marker::LibrariesBegin));
        assert_eq!(
            parse("pipfleet.library:flask==2.0"),
            Some(Marker::Library(Library::new("flask", "2.0")))
        );
    }

    #[test]
    fn ordinary_output_is_ignored() {
        assert_eq!(parse("TASK [Gathering Facts] ****"), None);
        assert_eq!(parse("ok: [10.0.0.5] => (item=numpy==1.26.4)"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn malformed_payloads_are_ignored() {
        assert_eq!(parse(r#""msg": "pipfleet.library: numpy""#), None);
        assert_eq!(parse(r#""msg": "pipfleet.virtual_env: ../etc""#), None);
        assert_eq!(parse(r#""msg": "pipfleet.virtual_env: ""#), None);
    }

    #[test]
    fn formatted_markers_parse_back() {
        let lib = Library::new("requests", "2.31.0");
        assert_eq!(parse(&format_library(&lib)), Some(Marker::Library(lib)));
        assert_eq!(
            parse(&format_virtual_env("ml")),
            Some(Marker::VirtualEnv("ml".to_owned()))
        );
    }
}
