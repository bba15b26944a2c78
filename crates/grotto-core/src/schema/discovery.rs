//! Discovery of local `.proto` files.

use crate::config::SchemaConfig;
use crate::{GrottoError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::{DirEntry, WalkDir};

/// A restartable scan over a set of search roots.
///
/// Each call to [`ProtoDiscovery::iter`] starts a fresh walk; entries are
/// produced lazily and sorted by file name within each directory. Hidden
/// directories are skipped, missing roots yield nothing.
#[derive(Debug, Clone, Default)]
pub struct ProtoDiscovery {
    roots: Vec<PathBuf>,
}

impl ProtoDiscovery {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn iter(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.roots.iter().flat_map(walk)
    }

    /// Owning form of [`ProtoDiscovery::iter`].
    pub fn into_paths(self) -> impl Iterator<Item = PathBuf> {
        self.roots.into_iter().flat_map(walk)
    }
}

fn walk(root: impl AsRef<Path>) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_proto_extension(e.path()))
        .map(|e| e.into_path())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn has_proto_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(SchemaConfig::PROTO_EXTENSION))
        .unwrap_or(false)
}

/// SHA-256 over `(path, size, mtime)` of every file, in the given order.
///
/// Any addition, removal or modification changes the fingerprint.
pub fn fingerprint(paths: &[PathBuf]) -> Result<String> {
    let mut hasher = Sha256::new();
    for path in paths {
        let meta = std::fs::metadata(path).map_err(|e| GrottoError::io_with_path(e, path))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(meta.len().to_le_bytes());
        hasher.update(mtime.to_le_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_discovery_finds_sorted_protos_and_skips_hidden() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("b.proto"), "");
        touch(&root.join("a.proto"), "");
        touch(&root.join("nested/c.PROTO"), "");
        touch(&root.join("notes.txt"), "");
        touch(&root.join(".git/hidden.proto"), "");

        let discovery = ProtoDiscovery::new(vec![root.to_path_buf()]);
        let names: Vec<_> = discovery
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.proto"),
                PathBuf::from("b.proto"),
                PathBuf::from("nested/c.PROTO"),
            ]
        );

        // Restartable: a second walk yields the same sequence.
        assert_eq!(discovery.iter().count(), 3);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let discovery = ProtoDiscovery::new(vec![PathBuf::from("/definitely/not/here")]);
        assert_eq!(discovery.iter().count(), 0);
        assert_eq!(ProtoDiscovery::default().iter().count(), 0);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.proto");
        touch(&file, "syntax = \"proto3\";");
        let first = fingerprint(&[file.clone()]).unwrap();
        assert_eq!(first, fingerprint(&[file.clone()]).unwrap());

        touch(&file, "syntax = \"proto3\"; message A {}");
        assert_ne!(first, fingerprint(&[file.clone()]).unwrap());
        assert_ne!(first, fingerprint(&[]).unwrap());
    }
}
