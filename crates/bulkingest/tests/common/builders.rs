//! Builders for fixture archives and a scripted OCR transform.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bulkingest::{OcrOutput, OcrTransform, ProcessError};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Builds a zip archive in memory. Entries may themselves be archives.
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<(String, Vec<u8>)>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, content: &[u8]) -> Self {
        self.entries.push((name.to_string(), content.to_vec()));
        self
    }

    pub fn zip(mut self, name: &str, nested: ZipBuilder) -> Self {
        self.entries.push((name.to_string(), nested.build()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buffer = Vec::new();
        {
            let mut zip = ZipWriter::new(Cursor::new(&mut buffer));
            for (name, content) in &self.entries {
                zip.start_file(name.as_str(), SimpleFileOptions::default())
                    .expect("Failed to start zip entry");
                zip.write_all(content).expect("Failed to write zip entry");
            }
            zip.finish().expect("Failed to finish zip");
        }
        buffer
    }

    pub fn write_to(self, path: &Path) -> PathBuf {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(path, self.build()).expect("Failed to write zip");
        path.to_path_buf()
    }
}

/// Fake OCR: echoes the file's bytes as text. Files whose bytes contain
/// `FAIL` always fail; files containing `FLAKY` fail on their first call.
#[derive(Default)]
pub struct ScriptedOcr {
    calls: AtomicUsize,
    seen: Mutex<HashMap<PathBuf, u32>>,
}

impl ScriptedOcr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrTransform for ScriptedOcr {
    fn process(&self, path: &Path) -> Result<OcrOutput, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = std::fs::read(path).map_err(|e| ProcessError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let attempt = {
            let mut seen = self.seen.lock().unwrap();
            let count = seen.entry(path.to_path_buf()).or_insert(0);
            *count += 1;
            *count
        };

        if text.contains("FAIL") || (text.contains("FLAKY") && attempt == 1) {
            return Err(ProcessError::OcrFailed(format!(
                "scripted failure on attempt {}",
                attempt
            )));
        }

        Ok(OcrOutput {
            structured: serde_json::json!({ "pages": [{ "page": 1, "text": text }] }),
            text,
        })
    }
}
