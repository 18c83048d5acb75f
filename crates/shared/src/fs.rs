use std::path::Path;

/// The only filesystem question configuration resolution asks.
pub trait DirectoryProbe {
    fn is_dir(&self, path: &Path) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsDirectoryProbe;

impl DirectoryProbe for OsDirectoryProbe {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}
