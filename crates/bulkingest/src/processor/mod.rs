pub mod command;

use std::path::Path;

use serde::Serialize;

use crate::error::ProcessError;

pub use command::CommandOcr;

/// What an OCR transform produces for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrOutput {
    pub text: String,
    pub structured: serde_json::Value,
}

/// Turns one input file into text plus a structured JSON description.
///
/// Implementations are treated as black boxes: they may be slow, they have
/// no timeout, and any failure is reported as a `ProcessError`.
pub trait OcrTransform: Send + Sync {
    fn process(&self, path: &Path) -> Result<OcrOutput, ProcessError>;
}

impl<T: OcrTransform + ?Sized> OcrTransform for &T {
    fn process(&self, path: &Path) -> Result<OcrOutput, ProcessError> {
        (**self).process(path)
    }
}

impl<T: OcrTransform + ?Sized> OcrTransform for Box<T> {
    fn process(&self, path: &Path) -> Result<OcrOutput, ProcessError> {
        (**self).process(path)
    }
}

impl<T: OcrTransform + ?Sized> OcrTransform for std::sync::Arc<T> {
    fn process(&self, path: &Path) -> Result<OcrOutput, ProcessError> {
        (**self).process(path)
    }
}
