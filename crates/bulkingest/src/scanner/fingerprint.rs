use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Streams a file through SHA-256. Returns the lowercase hex digest and the
/// number of bytes read.
pub fn fingerprint_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}

pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            fingerprint_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        std::fs::write(&path, b"scanned page").unwrap();

        let (digest, size) = fingerprint_file(&path).unwrap();
        assert_eq!(digest, fingerprint_bytes(b"scanned page"));
        assert_eq!(size, 12);
    }

    #[test]
    fn test_missing_file() {
        assert!(fingerprint_file(Path::new("/nonexistent/page.png")).is_err());
    }
}
