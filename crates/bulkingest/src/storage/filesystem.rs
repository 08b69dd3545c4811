use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::LayoutError;

/// Creates `path` and its parents if missing.
pub fn ensure_directory(path: &Path) -> Result<(), LayoutError> {
    std::fs::create_dir_all(path).map_err(|e| LayoutError::CreateDirectory {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Copies `src` to `dst` unless `dst` already exists.
///
/// The bytes are staged in a temporary file next to `dst` and moved into
/// place with an exclusive rename, so a reader never sees a partial file and
/// a concurrent writer of the same destination loses cleanly. Returns false
/// when the destination was already present.
///
/// Failures reading `src` are `ReadSource`; everything else concerns the
/// destination and is `CopyFile`.
pub fn copy_no_clobber(src: &Path, dst: &Path) -> Result<bool, LayoutError> {
    if std::fs::symlink_metadata(dst).is_ok() {
        return Ok(false);
    }
    let read_err = |e: io::Error| LayoutError::ReadSource {
        path: src.to_path_buf(),
        source: e,
    };
    let copy_err = |e: io::Error| LayoutError::CopyFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    };

    let mut input = File::open(src).map_err(read_err)?;
    let mut staged = NamedTempFile::new_in(parent_of(dst)?).map_err(copy_err)?;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_err(e)),
        };
        staged.write_all(&buf[..n]).map_err(copy_err)?;
    }
    staged.as_file().sync_all().map_err(copy_err)?;
    persist(staged, dst)
}

/// Writes `content` to `path` unless `path` already exists. Returns false
/// when it was already present.
pub fn write_no_clobber(path: &Path, content: &[u8]) -> Result<bool, LayoutError> {
    if std::fs::symlink_metadata(path).is_ok() {
        return Ok(false);
    }
    let write_err = |e: io::Error| LayoutError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    };

    let mut staged = NamedTempFile::new_in(parent_of(path)?).map_err(write_err)?;
    staged.write_all(content).map_err(write_err)?;
    staged.as_file().sync_all().map_err(write_err)?;
    persist(staged, path)
}

fn persist(staged: NamedTempFile, dst: &Path) -> Result<bool, LayoutError> {
    match staged.persist_noclobber(dst) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(LayoutError::WriteFile {
            path: dst.to_path_buf(),
            source: e.error,
        }),
    }
}

fn parent_of(path: &Path) -> Result<&Path, LayoutError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_directory(parent)?;
    Ok(parent)
}

/// Stores content under `filename` in `dir_path`, appending `_2`, `_3`, ...
/// to the stem when the name is taken. Creation is exclusive (O_EXCL), so two
/// writers never share a file.
pub fn store_with_atomic_creation(
    dir_path: &Path,
    filename: &str,
    content: &[u8],
) -> Result<PathBuf, LayoutError> {
    ensure_directory(dir_path)?;

    let (base, ext) = match filename.rfind('.') {
        Some(dot_pos) => (&filename[..dot_pos], Some(&filename[dot_pos..])),
        None => (filename, None),
    };

    for counter in 1..=1000 {
        let try_filename = if counter == 1 {
            filename.to_string()
        } else {
            match ext {
                Some(ext) => format!("{}_{}{}", base, counter, ext),
                None => format!("{}_{}", base, counter),
            }
        };
        let try_path = dir_path.join(&try_filename);

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&try_path)
        {
            Ok(mut file) => {
                file.write_all(content)
                    .map_err(|e| LayoutError::WriteFile {
                        path: try_path.clone(),
                        source: e,
                    })?;
                return Ok(try_path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(LayoutError::WriteFile {
                    path: try_path,
                    source: e,
                });
            }
        }
    }

    Err(LayoutError::FileExists(dir_path.join(filename)))
}

/// Appends one line to a log file, creating it if needed.
pub fn append_line(path: &Path, line: &str) -> Result<(), LayoutError> {
    parent_of(path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LayoutError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })?;
    writeln!(file, "{}", line).map_err(|e| LayoutError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}
