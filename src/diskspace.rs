//! Free-space queries for the destination filesystem

use std::io;
use std::path::{Path, PathBuf};

/// Source of "bytes available" for a destination path
pub trait SpaceProbe: Send + Sync {
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// Asks the operating system
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        available_space(path)
    }
}

/// Reports a constant; lets callers exercise the space check deterministically
pub struct FixedSpace(pub u64);

impl SpaceProbe for FixedSpace {
    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// Nearest ancestor of `path` (inclusive) that exists
fn nearest_existing(path: &Path) -> PathBuf {
    let mut cur = path;
    loop {
        if cur.exists() {
            return cur.to_path_buf();
        }
        match cur.parent() {
            Some(p) if !p.as_os_str().is_empty() => cur = p,
            _ => return PathBuf::from("."),
        }
    }
}

/// Available bytes for unprivileged writes on the filesystem holding `path`.
/// Missing trailing components are resolved to their nearest existing ancestor.
pub fn available_space(path: &Path) -> io::Result<u64> {
    let check_path = nearest_existing(path);
    platform_available_space(&check_path)
}

#[cfg(unix)]
fn platform_available_space(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL byte"))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    let r = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if r != 0 {
        return Err(io::Error::last_os_error());
    }
    let stat = unsafe { stat.assume_init() };
    #[allow(clippy::unnecessary_cast)]
    let avail = (stat.f_bavail as u64)
        .checked_mul(stat.f_frsize as u64)
        .unwrap_or(u64::MAX);
    Ok(avail)
}

#[cfg(windows)]
fn platform_available_space(path: &Path) -> io::Result<u64> {
    use std::os::windows::ffi::OsStrExt;
    use windows::core::PCWSTR;
    use windows::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;

    let wide: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();
    let mut free_to_caller = 0u64;
    unsafe {
        GetDiskFreeSpaceExW(
            PCWSTR(wide.as_ptr()),
            Some(&mut free_to_caller as *mut u64),
            None,
            None,
        )
    }
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    Ok(free_to_caller)
}

#[cfg(not(any(unix, windows)))]
fn platform_available_space(_path: &Path) -> io::Result<u64> {
    Ok(u64::MAX)
}

/// True when `available` covers `required` plus a 10% margin.
/// A margin that overflows never fits.
pub fn has_room(available: u64, required: u64) -> bool {
    match required.checked_add(required.div_ceil(10)) {
        Some(needed) => available >= needed,
        None => false,
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: u64 = 1024;

    if bytes < THRESHOLD {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    format!("{:.1} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_available_space_on_temp_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(available_space(tmp.path()).unwrap() > 0);
    }

    #[test]
    fn test_missing_path_uses_existing_ancestor() {
        let tmp = TempDir::new().unwrap();
        let deep = tmp.path().join("not/yet/created/file.bin");
        assert_eq!(nearest_existing(&deep), tmp.path());
        assert!(available_space(&deep).is_ok());
    }

    #[test]
    fn test_margin() {
        assert!(has_room(0, 0));
        assert!(has_room(110, 100));
        assert!(!has_room(109, 100));
        // ceil(15 / 10) = 2
        assert!(has_room(17, 15));
        assert!(!has_room(16, 15));
        assert!(!has_room(1, 1));
        assert!(has_room(2, 1));
    }

    #[test]
    fn test_margin_overflow_never_fits() {
        assert!(!has_room(u64::MAX, u64::MAX));
        assert!(!has_room(u64::MAX, u64::MAX - 10));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_fixed_probe() {
        assert_eq!(FixedSpace(42).available_space(Path::new("/nowhere")).unwrap(), 42);
    }
}
