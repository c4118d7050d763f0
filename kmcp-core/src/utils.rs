//! Small ambient helpers shared across the build, search and profile
//! engines: file descriptor limits, a prefix/suffix file walker, and a
//! human-readable byte formatter.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[cfg(unix)]
use libc::{getrlimit, rlimit, setrlimit, RLIMIT_NOFILE};

/// Current soft limit on open file descriptors for this process.
#[cfg(unix)]
pub fn get_file_limit() -> usize {
    let mut limits = rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let result = unsafe { getrlimit(RLIMIT_NOFILE, &mut limits) };
    if result == 0 {
        limits.rlim_cur as usize
    } else {
        0
    }
}

#[cfg(windows)]
pub fn get_file_limit() -> usize {
    8192
}

/// Raises the soft file descriptor limit, used when a build would otherwise
/// open more concurrent artifact readers than the process's default
/// `ulimit -n` allows.
#[cfg(unix)]
pub fn set_fd_limit(new_limit: u64) -> std::io::Result<()> {
    let rlim = rlimit {
        rlim_cur: new_limit,
        rlim_max: new_limit,
    };
    let ret = unsafe { setrlimit(RLIMIT_NOFILE, &rlim) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(windows)]
pub fn set_fd_limit(_new_limit: u64) -> std::io::Result<()> {
    Ok(())
}

/// Walks `path` recursively and returns every file whose name starts with
/// `prefix` and ends with `suffix`, sorted for deterministic block-file
/// discovery.
pub fn find_files<P: AsRef<Path>>(path: P, prefix: &str, suffix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(prefix) && name.ends_with(suffix))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort_unstable();
    files
}

/// Formats a byte count for progress logging, e.g. `format_bytes(1536.0) ==
/// "1.50KB"`.
pub fn format_bytes(size: f64) -> String {
    let suffixes = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];
    let mut size = size;
    let mut current_suffix = &suffixes[0];

    for suffix in &suffixes[1..] {
        if size >= 1024.0 {
            current_suffix = suffix;
            size /= 1024.0;
        } else {
            break;
        }
    }

    format!("{:.2}{}", size, current_suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_bytes_across_units() {
        assert_eq!(format_bytes(512.0), "512.00B");
        assert_eq!(format_bytes(1536.0), "1.50KB");
        assert_eq!(format_bytes(1024.0 * 1024.0 * 3.0), "3.00MB");
    }

    #[test]
    fn finds_files_by_prefix_and_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("block_0.kmcb"), b"").unwrap();
        std::fs::write(dir.path().join("block_1.kmcb"), b"").unwrap();
        std::fs::write(dir.path().join("other.txt"), b"").unwrap();
        let found = find_files(dir.path(), "block_", ".kmcb");
        assert_eq!(found.len(), 2);
    }
}
