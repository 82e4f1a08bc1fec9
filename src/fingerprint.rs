//! Content fingerprints for watcher dedup and short-term "already seen"
//! suppression (component A). Grounded on `dodogabrie-space_media_optimizer`'s
//! `StateManager`, which hashes file content for the same purpose; we narrow
//! the hash input to the first 16 KiB for O(1) cost on large video files.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

const PREFIX_LEN: usize = 16 * 1024;

/// `(size_bytes, last_write_time_ticks, first_16_KiB_SHA256)`. Two files with
/// equal fingerprints are the same content with very high probability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub size_bytes: u64,
    pub last_write_time_ticks: i64,
    pub prefix_sha256: [u8; 32],
}

impl Fingerprint {
    /// Best-effort: any IO failure (file vanished mid-watch, permission
    /// denied) yields `None` rather than propagating an error, since
    /// fingerprinting is an optimisation, not a correctness requirement.
    pub fn try_create(path: &Path) -> Option<Fingerprint> {
        let mut file = File::open(path).ok()?;
        let metadata = file.metadata().ok()?;
        let size_bytes = metadata.len();
        let last_write_time_ticks = metadata
            .modified()
            .ok()?
            .duration_since(UNIX_EPOCH)
            .ok()?
            .as_nanos() as i64;

        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        let mut total_read = 0usize;
        while total_read < PREFIX_LEN {
            let n = file.read(&mut buf).ok()?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total_read += n;
        }

        Some(Fingerprint {
            size_bytes,
            last_write_time_ticks,
            prefix_sha256: hasher.finalize().into(),
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.prefix_sha256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn identical_content_yields_identical_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"hello world").unwrap();
        std::fs::write(&b, b"hello world").unwrap();
        let fa = Fingerprint::try_create(&a).unwrap();
        let fb = Fingerprint::try_create(&b).unwrap();
        assert_eq!(fa.prefix_sha256, fb.prefix_sha256);
        assert_eq!(fa.size_bytes, fb.size_bytes);
    }

    #[test]
    fn different_content_yields_different_hash() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"hello world").unwrap();
        std::fs::write(&b, b"goodbye world").unwrap();
        let fa = Fingerprint::try_create(&a).unwrap();
        let fb = Fingerprint::try_create(&b).unwrap();
        assert_ne!(fa.prefix_sha256, fb.prefix_sha256);
    }

    #[test]
    fn missing_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Fingerprint::try_create(&dir.path().join("nope.bin")).is_none());
    }

    #[test]
    fn large_file_only_hashes_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let mut fa_file = std::fs::File::create(&a).unwrap();
        let mut fb_file = std::fs::File::create(&b).unwrap();
        let prefix = vec![7u8; PREFIX_LEN];
        fa_file.write_all(&prefix).unwrap();
        fa_file.write_all(b"tail-a").unwrap();
        fb_file.write_all(&prefix).unwrap();
        fb_file.write_all(b"tail-b").unwrap();
        let fa = Fingerprint::try_create(&a).unwrap();
        let fb = Fingerprint::try_create(&b).unwrap();
        // same prefix hash, but sizes differ so fingerprints still differ
        assert_eq!(fa.prefix_sha256, fb.prefix_sha256);
        assert_eq!(fa.size_bytes, fb.size_bytes);
    }
}
