//! Zip expansion into a staging directory.
//!
//! One call expands one archive level. Nested archives come back as ordinary
//! staged entries; the scanner decides whether to descend into them.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("cannot open archive: {0}")]
    Open(#[source] io::Error),

    #[error("not a readable zip archive: {0}")]
    Corrupt(#[from] zip::result::ZipError),

    #[error("cannot stage archive entries in '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A member extracted to disk.
#[derive(Debug, Clone)]
pub struct StagedEntry {
    /// Normalized name inside the archive, `/`-separated.
    pub name: String,
    pub path: PathBuf,
}

/// Result of expanding one archive. `failures` holds entries that could not
/// be read as `(entry name, reason)`; the rest were staged.
#[derive(Debug, Default)]
pub struct Expansion {
    pub entries: Vec<StagedEntry>,
    pub failures: Vec<(String, String)>,
}

pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Extracts every regular, non-hidden member of `archive_path` into
/// `stage_dir`, sorted by entry name.
///
/// Entry names that would escape the staging directory are reported as
/// failures and never written.
pub fn expand(archive_path: &Path, stage_dir: &Path) -> Result<Expansion, ArchiveError> {
    let file = File::open(archive_path).map_err(ArchiveError::Open)?;
    let mut archive = zip::ZipArchive::new(file)?;

    std::fs::create_dir_all(stage_dir).map_err(|e| ArchiveError::Staging {
        path: stage_dir.to_path_buf(),
        source: e,
    })?;

    let mut expansion = Expansion::default();
    for index in 0..archive.len() {
        let mut member = match archive.by_index(index) {
            Ok(member) => member,
            Err(e) => {
                expansion
                    .failures
                    .push((format!("#{}", index), e.to_string()));
                continue;
            }
        };
        if member.is_dir() {
            continue;
        }

        let raw_name = member.name().to_string();
        let Some(enclosed) = member.enclosed_name() else {
            expansion
                .failures
                .push((raw_name, "unsafe entry path".to_string()));
            continue;
        };
        if is_hidden_member(&enclosed) {
            continue;
        }
        let name = enclosed
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let file_name = enclosed
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entry".to_string());

        let staged = stage_dir.join(format!("{:05}-{}", index, file_name));
        let mut out = File::create(&staged).map_err(|e| ArchiveError::Staging {
            path: staged.clone(),
            source: e,
        })?;
        if let Err(e) = io::copy(&mut member, &mut out) {
            drop(out);
            let _ = std::fs::remove_file(&staged);
            expansion.failures.push((name, e.to_string()));
            continue;
        }

        expansion.entries.push(StagedEntry { name, path: staged });
    }

    expansion.entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(expansion)
}

fn is_hidden_member(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(part) => {
            let part = part.to_string_lossy();
            part.starts_with('.') || part == "__MACOSX"
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, content) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_is_archive() {
        assert!(is_archive(Path::new("/in/batch.zip")));
        assert!(is_archive(Path::new("/in/BATCH.ZIP")));
        assert!(!is_archive(Path::new("/in/scan.pdf")));
        assert!(!is_archive(Path::new("/in/zip")));
    }

    #[test]
    fn test_expand_sorted_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("batch.zip");
        write_zip(
            &zip_path,
            &[
                ("b.pdf", b"bbb"),
                ("sub/a.png", b"aaa"),
                (".DS_Store", b"junk"),
                ("__MACOSX/sub/._a.png", b"junk"),
            ],
        );

        let expansion = expand(&zip_path, &dir.path().join("stage")).unwrap();
        let names: Vec<&str> = expansion.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b.pdf", "sub/a.png"]);
        assert!(expansion.failures.is_empty());
        assert_eq!(std::fs::read(&expansion.entries[1].path).unwrap(), b"aaa");
        assert_eq!(
            expansion.entries[1].path.extension().and_then(|e| e.to_str()),
            Some("png")
        );
    }

    #[test]
    fn test_corrupt_archive() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("broken.zip");
        std::fs::write(&zip_path, b"this is not a zip file").unwrap();

        let result = expand(&zip_path, &dir.path().join("stage"));
        assert!(matches!(result, Err(ArchiveError::Corrupt(_))));
    }
}
