//! Crate-wide error type. Decoder failures, I/O failures, and demo-selection
//! safety violations (§3 invariants) all funnel through here so callers in
//! `broadcast-server` can match on one enum at the orchestration boundary.

use std::path::PathBuf;

use dem_proto::DecoderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Decoder(#[from] DecoderError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("demo path escapes the configured demo directory: {0}")]
    PathEscapesDemoDirectory(PathBuf),

    #[error("file does not start with the HL2DEMO magic bytes: {0}")]
    InvalidMagicBytes(PathBuf),

    #[error("demo not found: {0}")]
    DemoNotFound(PathBuf),
}

pub type EngineResult<T> = Result<T, EngineError>;
