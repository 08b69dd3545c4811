//! Shared test utilities for bulkingest integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs with temp input/data directories
//! - `ZipBuilder` for (nested) fixture archives
//! - `ScriptedOcr`, a fake OCR transform with programmable failures

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
