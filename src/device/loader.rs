//! Source loading seam.
//!
//! The resolver reads included files through a trait so tests can supply
//! an in-memory corpus instead of touching the filesystem.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Provider of source text by path.
pub trait SourceLoader {
    fn load(&self, path: &Path) -> io::Result<String>;
}

/// Filesystem-backed loader used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// In-memory loader for tests and embedded corpora.
#[derive(Debug, Default, Clone)]
pub struct MapLoader {
    files: HashMap<PathBuf, String>,
}

impl MapLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> &mut Self {
        self.files.insert(path.into(), text.into());
        self
    }

    pub fn with(mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }
}

impl SourceLoader for MapLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            )
        })
    }
}

/// Lexically normalize `.` and `..` components so the include cache and
/// cycle detection treat spellings of the same path alike.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dot_segments() {
        assert_eq!(
            normalize(Path::new("configs/./base/../sky140.nemc")),
            PathBuf::from("configs/sky140.nemc")
        );
    }

    #[test]
    fn map_loader_round_trips() {
        let loader = MapLoader::new().with("a.nemc", "device x {}");
        assert_eq!(loader.load(Path::new("a.nemc")).unwrap(), "device x {}");
        assert!(loader.load(Path::new("b.nemc")).is_err());
    }
}
