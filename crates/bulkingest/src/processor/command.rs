use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use serde_json::json;

use super::{OcrOutput, OcrTransform};
use crate::config::OcrConfig;
use crate::error::ProcessError;

/// OCR through the `tesseract` and `pdftoppm` command-line tools.
///
/// Images are recognized directly. PDFs are rasterized page by page at the
/// configured DPI and each page is recognized in order.
#[derive(Clone)]
pub struct CommandOcr {
    inner: Arc<CommandOcrInner>,
}

struct CommandOcrInner {
    tesseract: String,
    pdftoppm: String,
    languages: String,
    dpi: u32,
}

enum InputKind {
    Image,
    Pdf,
}

impl CommandOcr {
    pub fn new(config: &OcrConfig) -> Self {
        let languages = if config.languages.is_empty() {
            "eng".to_string()
        } else {
            config.languages.join("+")
        };

        Self {
            inner: Arc::new(CommandOcrInner {
                tesseract: config.tesseract_command.clone(),
                pdftoppm: config.pdftoppm_command.clone(),
                languages,
                dpi: config.dpi,
            }),
        }
    }

    pub fn dpi(&self) -> u32 {
        self.inner.dpi
    }

    fn classify(path: &Path) -> Result<InputKind, ProcessError> {
        let mime = mime_guess::from_path(path).first();
        match mime {
            Some(m) if m.type_() == mime_guess::mime::IMAGE => Ok(InputKind::Image),
            Some(m) if m.essence_str() == "application/pdf" => Ok(InputKind::Pdf),
            Some(m) => Err(ProcessError::UnsupportedFormat(m.essence_str().to_string())),
            None => Err(ProcessError::UnsupportedFormat(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_string(),
            )),
        }
    }

    fn recognize_image(&self, image: &Path) -> Result<String, ProcessError> {
        let _span = tracing::debug_span!("processor.tesseract", image = %image.display()).entered();

        let mut command = Command::new(&self.inner.tesseract);
        command
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.inner.languages)
            .arg("--dpi")
            .arg(self.inner.dpi.to_string());
        let stdout = run(&self.inner.tesseract, &mut command)?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    /// Renders every page of `pdf` as PNG into `out_dir`, in page order.
    fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ProcessError> {
        let prefix = out_dir.join("page");
        let mut command = Command::new(&self.inner.pdftoppm);
        command
            .arg("-r")
            .arg(self.inner.dpi.to_string())
            .arg("-png")
            .arg(pdf)
            .arg(&prefix);
        run(&self.inner.pdftoppm, &mut command)?;

        let read_err = |e| ProcessError::ReadDocument {
            path: out_dir.to_path_buf(),
            source: e,
        };
        let mut pages = Vec::new();
        for entry in std::fs::read_dir(out_dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("png") {
                pages.push(path);
            }
        }
        // pdftoppm zero-pads page numbers, so name order is page order.
        pages.sort();
        if pages.is_empty() {
            return Err(ProcessError::OcrFailed(format!(
                "'{}' rendered no pages",
                pdf.display()
            )));
        }
        Ok(pages)
    }

    fn structured(&self, pages: &[String]) -> serde_json::Value {
        json!({
            "engine": "tesseract",
            "languages": self.inner.languages,
            "dpi": self.inner.dpi,
            "pages": pages
                .iter()
                .enumerate()
                .map(|(i, text)| json!({ "page": i + 1, "text": text }))
                .collect::<Vec<_>>(),
        })
    }
}

impl OcrTransform for CommandOcr {
    fn process(&self, path: &Path) -> Result<OcrOutput, ProcessError> {
        if !path.is_file() {
            return Err(ProcessError::ReadDocument {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a regular file"),
            });
        }

        let pages = match Self::classify(path)? {
            InputKind::Image => vec![self.recognize_image(path)?],
            InputKind::Pdf => {
                let scratch = tempfile::tempdir().map_err(|e| ProcessError::ReadDocument {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                self.rasterize(path, scratch.path())?
                    .iter()
                    .map(|page| self.recognize_image(page))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        let structured = self.structured(&pages);
        Ok(OcrOutput {
            text: pages.join("\n\x0c\n"),
            structured,
        })
    }
}

/// Runs `command`, returning stdout. A non-zero exit is an OCR failure
/// carrying the tool's stderr.
fn run(name: &str, command: &mut Command) -> Result<Vec<u8>, ProcessError> {
    let output = command.output().map_err(|e| ProcessError::CommandFailed {
        command: name.to_string(),
        source: e,
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProcessError::OcrFailed(format!(
            "{} exited with {}: {}",
            name,
            output.status,
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tesseract: &str) -> OcrConfig {
        OcrConfig {
            languages: vec!["eng".to_string(), "deu".to_string()],
            dpi: 200,
            tesseract_command: tesseract.to_string(),
            pdftoppm_command: "bulkingest-missing-pdftoppm".to_string(),
        }
    }

    #[test]
    fn test_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"text").unwrap();

        let ocr = CommandOcr::new(&config("tesseract"));
        assert!(matches!(
            ocr.process(&path),
            Err(ProcessError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_input() {
        let ocr = CommandOcr::new(&config("tesseract"));
        assert!(matches!(
            ocr.process(Path::new("/nonexistent/scan.png")),
            Err(ProcessError::ReadDocument { .. })
        ));
    }

    #[test]
    fn test_missing_binary_is_command_failure() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("scan.png");
        std::fs::write(&image, b"png").unwrap();
        let pdf = dir.path().join("scan.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();

        let ocr = CommandOcr::new(&config("bulkingest-missing-tesseract"));
        assert!(matches!(
            ocr.process(&image),
            Err(ProcessError::CommandFailed { .. })
        ));
        assert!(matches!(
            ocr.process(&pdf),
            Err(ProcessError::CommandFailed { .. })
        ));
    }

    #[test]
    fn test_structured_lists_pages() {
        let ocr = CommandOcr::new(&config("tesseract"));
        let value = ocr.structured(&["one".to_string(), "two".to_string()]);

        assert_eq!(value["languages"], "eng+deu");
        assert_eq!(value["dpi"], 200);
        assert_eq!(value["pages"][1]["page"], 2);
        assert_eq!(value["pages"][1]["text"], "two");
    }
}
