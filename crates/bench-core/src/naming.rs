//! Collision-avoiding file naming.
//!
//! The check is existence based, not a reservation: two processes asking for
//! the same name at the same moment can both receive the same candidate.
//! Use it for convenience outputs only, never for the deterministic artifact
//! tree.

use crate::error::Result;
use crate::fsutil::ensure_dir;
use std::path::{Path, PathBuf};

pub const DEFAULT_SEPARATOR: &str = "__";

/// Returns `path` if nothing exists there, otherwise the first free sibling
/// `stem<sep>N.ext` for N = 1, 2, ...
pub fn unique_sibling(path: &Path, sep: &str) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut n: u64 = 1;
    loop {
        let candidate = path.with_file_name(format!("{}{}{}{}", stem, sep, n, extension));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Creates `directory` (and parents) and returns a path inside it that did
/// not exist at the moment of the call. `extension` may be given with or
/// without its leading dot; an empty extension names a bare entry.
pub fn create_unique_path(
    directory: &Path,
    stem: &str,
    extension: &str,
    sep: &str,
) -> Result<PathBuf> {
    ensure_dir(directory)?;
    let extension = match extension {
        "" => String::new(),
        e if e.starts_with('.') => e.to_string(),
        e => format!(".{}", e),
    };
    Ok(unique_sibling(
        &directory.join(format!("{}{}", stem, extension)),
        sep,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;

    fn temp_root(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "bench_naming_{}_{}_{}",
            label,
            std::process::id(),
            Utc::now().timestamp_micros()
        ))
    }

    #[test]
    fn returns_requested_name_when_free_and_creates_directory() {
        let root = temp_root("free").join("a").join("b");
        let path = create_unique_path(&root, "results", ".csv", DEFAULT_SEPARATOR)
            .expect("unique path");
        assert!(root.is_dir());
        assert_eq!(path, root.join("results.csv"));
        assert!(!path.exists(), "namer must not create the file");
        let _ = fs::remove_dir_all(temp_root("free"));
    }

    #[test]
    fn appends_increasing_suffix_on_collision() {
        let root = temp_root("collide");
        let first = create_unique_path(&root, "name", "csv", DEFAULT_SEPARATOR).expect("first");
        fs::write(&first, "x").expect("touch first");
        let second = create_unique_path(&root, "name", "csv", DEFAULT_SEPARATOR).expect("second");
        assert_eq!(first.file_name().unwrap(), "name.csv");
        assert_eq!(second.file_name().unwrap(), "name__1.csv");
        fs::write(&second, "x").expect("touch second");
        let third = create_unique_path(&root, "name", "csv", DEFAULT_SEPARATOR).expect("third");
        assert_eq!(third.file_name().unwrap(), "name__2.csv");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn sibling_of_directory_has_no_extension() {
        let root = temp_root("dir");
        let obs = root.join("obs_0");
        ensure_dir(&obs).expect("obs dir");
        assert_eq!(unique_sibling(&obs, DEFAULT_SEPARATOR), root.join("obs_0__1"));
        let _ = fs::remove_dir_all(root);
    }
}
