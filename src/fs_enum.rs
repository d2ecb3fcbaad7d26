use crate::error::{Result, TransferError};
use crate::logger::Logger;
use crate::protocol::ROOT_NAME;
use std::path::{Component, Path, PathBuf};
// Filesystem enumeration for directory transfers

/// One file or directory found under the transfer root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Relative to the walk root; `.` for the root itself
    pub relative_path: PathBuf,
    pub is_dir: bool,
    /// Byte length at walk time; always 0 for directories
    pub size: u64,
}

impl FileEntry {
    /// Relative path as sent on the wire (`/` separated, UTF-8)
    pub fn wire_name(&self) -> Result<String> {
        wire_name(&self.relative_path)
    }
}

fn wire_name(rel: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(s) => parts.push(s.to_str().ok_or_else(|| {
                TransferError::io(
                    format!("encoding name {}", rel.display()),
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "file name is not valid UTF-8",
                    ),
                )
            })?),
            Component::CurDir => {}
            _ => {
                return Err(TransferError::io(
                    format!("encoding name {}", rel.display()),
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a relative path"),
                ))
            }
        }
    }
    if parts.is_empty() {
        Ok(ROOT_NAME.to_string())
    } else {
        Ok(parts.join("/"))
    }
}

/// Walk `root` into a deterministic transfer order: the root first, then every
/// directory, then every file, each group sorted by relative path.
pub fn walk_directory(root: &Path, logger: &dyn Logger) -> Result<Vec<FileEntry>> {
    use walkdir::WalkDir;

    logger.debug(&format!("Walking directory: {}", root.display()));

    let mut entries = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| root.display().to_string());
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk failed"));
            TransferError::io(format!("walking {}", path), source)
        })?;

        let relative_path = entry
            .path()
            .strip_prefix(root)
            .map(|p| {
                if p.as_os_str().is_empty() {
                    PathBuf::from(ROOT_NAME)
                } else {
                    p.to_path_buf()
                }
            })
            .unwrap_or_else(|_| PathBuf::from(ROOT_NAME));

        let file_type = entry.file_type();
        if file_type.is_dir() {
            entries.push(FileEntry {
                path: entry.path().to_path_buf(),
                relative_path,
                is_dir: true,
                size: 0,
            });
        } else if file_type.is_file() {
            let metadata = entry
                .metadata()
                .map_err(|e| {
                    let source = e.into_io_error().unwrap_or_else(|| {
                        std::io::Error::new(std::io::ErrorKind::Other, "stat failed")
                    });
                    TransferError::io(format!("stat {}", entry.path().display()), source)
                })?;
            entries.push(FileEntry {
                path: entry.path().to_path_buf(),
                relative_path,
                is_dir: false,
                size: metadata.len(),
            });
        } else {
            logger.debug(&format!(
                "Skipping non-regular entry: {}",
                entry.path().display()
            ));
        }
    }

    sort_entries(&mut entries);
    logger.info(&format!("Found {} entries in directory", entries.len()));
    Ok(entries)
}

/// Root first, directories before files, lexicographic within each group
pub fn sort_entries(entries: &mut [FileEntry]) {
    entries.sort_by_cached_key(|e| {
        let name = wire_name(&e.relative_path).unwrap_or_else(|_| {
            e.relative_path.to_string_lossy().replace('\\', "/")
        });
        (name != ROOT_NAME, !e.is_dir, name)
    });
}

/// Total bytes across all file entries
pub fn total_size(entries: &[FileEntry]) -> u64 {
    entries.iter().filter(|e| !e.is_dir).map(|e| e.size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;
    use std::fs;
    use tempfile::TempDir;

    fn names(entries: &[FileEntry]) -> Vec<String> {
        entries.iter().map(|e| e.wire_name().unwrap()).collect()
    }

    fn sample_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("b/inner")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("z.txt"), b"zz").unwrap();
        fs::write(root.join("a/one.bin"), b"1").unwrap();
        fs::write(root.join("b/inner/deep.txt"), b"deep!").unwrap();
        fs::write(root.join("0first.txt"), b"").unwrap();
        tmp
    }

    #[test]
    fn test_walk_order_dirs_then_files() {
        let tmp = sample_tree();
        let entries = walk_directory(tmp.path(), &NoopLogger).unwrap();
        assert_eq!(
            names(&entries),
            vec![
                ".",
                "a",
                "b",
                "b/inner",
                "0first.txt",
                "a/one.bin",
                "b/inner/deep.txt",
                "z.txt",
            ]
        );

        let first_file = entries.iter().position(|e| !e.is_dir).unwrap();
        assert!(entries[..first_file].iter().all(|e| e.is_dir));
        assert!(entries[first_file..].iter().all(|e| !e.is_dir));
    }

    #[test]
    fn test_walk_sizes() {
        let tmp = sample_tree();
        let entries = walk_directory(tmp.path(), &NoopLogger).unwrap();
        for e in &entries {
            if e.is_dir {
                assert_eq!(e.size, 0);
            } else {
                assert_eq!(e.size, fs::metadata(&e.path).unwrap().len());
            }
        }
        assert_eq!(total_size(&entries), 8);
    }

    #[test]
    fn test_rewalk_is_identical() {
        let tmp = sample_tree();
        let first = walk_directory(tmp.path(), &NoopLogger).unwrap();
        let second = walk_directory(tmp.path(), &NoopLogger).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_root_first_even_when_names_sort_lower() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("-dash")).unwrap();
        fs::create_dir(tmp.path().join("!bang")).unwrap();
        let entries = walk_directory(tmp.path(), &NoopLogger).unwrap();
        assert_eq!(names(&entries), vec![".", "!bang", "-dash"]);
    }

    #[test]
    fn test_empty_directory_yields_root_only() {
        let tmp = TempDir::new().unwrap();
        let entries = walk_directory(tmp.path(), &NoopLogger).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].relative_path, PathBuf::from("."));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("real.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real.txt"), tmp.path().join("link.txt"))
            .unwrap();
        let entries = walk_directory(tmp.path(), &NoopLogger).unwrap();
        assert_eq!(names(&entries), vec![".", "real.txt"]);
    }
}
