//! Network namespace resolution from a mechanism-supplied inode.
//!
//! A kernel mechanism identifies the peer's network namespace by the inode
//! of its `/proc/<pid>/ns/net` entry. Resolution scans the proc filesystem
//! for a matching entry; absence is fatal for the connection attempt, since
//! only a fresh mechanism (with a live inode) can make a later attempt
//! succeed.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nsm_chain::ChainError;

const PROC_ROOT: &str = "/proc";

/// Resolves `inode` to a namespace file path under `/proc`.
pub fn find_namespace(inode: u64) -> Result<PathBuf, ChainError> {
    find_namespace_under(Path::new(PROC_ROOT), inode)
}

/// Resolves `inode` against an explicit proc root.
pub fn find_namespace_under(root: &Path, inode: u64) -> Result<PathBuf, ChainError> {
    let entries = std::fs::read_dir(root)
        .map_err(|_| ChainError::namespace_not_found(inode))?;

    for entry in entries.flatten() {
        // Only numeric entries name processes.
        let numeric = entry
            .file_name()
            .to_str()
            .map(|name| name.parse::<u32>().is_ok())
            .unwrap_or(false);
        if !numeric {
            continue;
        }
        let candidate = entry.path().join("ns").join("net");
        match std::fs::metadata(&candidate) {
            Ok(meta) if meta.ino() == inode => return Ok(candidate),
            _ => continue,
        }
    }
    Err(ChainError::namespace_not_found(inode))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_proc_entry(root: &Path, pid: &str) -> PathBuf {
        let ns_dir = root.join(pid).join("ns");
        std::fs::create_dir_all(&ns_dir).unwrap();
        let net = ns_dir.join("net");
        std::fs::write(&net, b"").unwrap();
        net
    }

    #[test]
    fn test_finds_matching_inode() {
        let dir = tempfile::tempdir().unwrap();
        let net = fake_proc_entry(dir.path(), "4242");
        let inode = std::fs::metadata(&net).unwrap().ino();

        let found = find_namespace_under(dir.path(), inode).unwrap();
        assert_eq!(found, net);
    }

    #[test]
    fn test_skips_non_numeric_entries() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc_entry(dir.path(), "self");
        let net = fake_proc_entry(dir.path(), "1");
        let inode = std::fs::metadata(&net).unwrap().ino();

        let found = find_namespace_under(dir.path(), inode).unwrap();
        assert_eq!(found, net);
    }

    #[test]
    fn test_missing_inode_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc_entry(dir.path(), "4242");

        let err = find_namespace_under(dir.path(), u64::MAX).unwrap_err();
        assert_eq!(err, ChainError::namespace_not_found(u64::MAX));
        assert!(!err.is_retryable());
    }
}
