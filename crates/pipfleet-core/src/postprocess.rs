//! Per-kind consumers of an operation's output stream.
//!
//! A post-processor sees every line exactly once, in order, and turns the
//! markers it cares about into [`ExtractedFacts`] when the stream ends.

use pipfleet_runtime::markers::{self, Marker};
use pipfleet_schema::Library;
use std::collections::HashSet;

/// What a finished post-processor learned about the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedFacts {
    None,
    /// Complete listing of one environment's installed libraries.
    InstalledLibraries(Vec<Library>),
    VirtualEnvironments(Vec<String>),
}

pub trait OutputPostProcessor: Send {
    fn post_process_line(&mut self, line: &str);

    fn finish(self: Box<Self>) -> ExtractedFacts;
}

/// Ignores everything.
#[derive(Debug, Default)]
pub struct NullPostProcessor;

impl OutputPostProcessor for NullPostProcessor {
    fn post_process_line(&mut self, _line: &str) {}

    fn finish(self: Box<Self>) -> ExtractedFacts {
        ExtractedFacts::None
    }
}

/// Collects library markers. A new listing header discards anything seen
/// before it, so only the last complete listing survives. Without any header
/// the host was never listed and nothing is extracted.
#[derive(Debug, Default)]
pub struct InstalledLibrariesPostProcessor {
    began: bool,
    libraries: Vec<Library>,
    seen: HashSet<Library>,
}

impl OutputPostProcessor for InstalledLibrariesPostProcessor {
    fn post_process_line(&mut self, line: &str) {
        match markers::parse(line) {
            Some(Marker::LibrariesBegin) => {
                self.began = true;
                self.libraries.clear();
                self.seen.clear();
            }
            Some(Marker::Library(lib)) if self.began => {
                if self.seen.insert(lib.clone()) {
                    self.libraries.push(lib);
                }
            }
            _ => {}
        }
    }

    fn finish(self: Box<Self>) -> ExtractedFacts {
        if self.began {
            ExtractedFacts::InstalledLibraries(self.libraries)
        } else {
            ExtractedFacts::None
        }
    }
}

#[derive(Debug, Default)]
pub struct InstalledVirtualEnvsPostProcessor {
    names: Vec<String>,
}

impl OutputPostProcessor for InstalledVirtualEnvsPostProcessor {
    fn post_process_line(&mut self, line: &str) {
        if let Some(Marker::VirtualEnv(name)) = markers::parse(line) {
            if !self.names.contains(&name) {
                self.names.push(name);
            }
        }
    }

    fn finish(self: Box<Self>) -> ExtractedFacts {
        ExtractedFacts::VirtualEnvironments(self.names)
    }
}
