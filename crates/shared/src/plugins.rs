use std::path::{Path, PathBuf};

use ahash::AHashSet;

use crate::error::Result;
use crate::fs::DirectoryProbe;
use crate::validate::{validate_directory, PluginDir};

/// Ordered, append-only set of plugin search directories.
///
/// Filled while the command line is resolved and read-only afterwards. Earlier
/// entries take precedence when plugins are looked up.
#[derive(Debug, Default, Clone)]
pub struct PluginPathRegistry {
    paths: Vec<PathBuf>,
    seen: AHashSet<PathBuf>,
}

impl PluginPathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the directory was already registered.
    pub fn register(&mut self, dir: PluginDir) -> bool {
        if self.seen.contains(dir.as_path()) {
            return false;
        }
        let path = dir.into_path_buf();
        self.seen.insert(path.clone());
        self.paths.push(path);
        true
    }

    /// Validates every path before registering any of them.
    ///
    /// On the first invalid path the error is returned and the registry is left
    /// untouched. Returns how many new entries were added.
    pub fn register_all<P, S>(&mut self, probe: &P, paths: &[S]) -> Result<usize>
    where
        P: DirectoryProbe + ?Sized,
        S: AsRef<Path>,
    {
        let dirs = paths
            .iter()
            .map(|p| validate_directory(probe, p.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        Ok(dirs
            .into_iter()
            .map(|dir| self.register(dir))
            .filter(|added| *added)
            .count())
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.seen.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
