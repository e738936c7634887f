//! Error taxonomy.
//!
//! One crate-wide enum; every public operation returns `Result<_, AviError>`
//! and internal helpers propagate with `?`.  The numeric codes long
//! established for AVI tooling survive as [`AviError::code`] for callers
//! that log or compare codes, but there is no process-global last-error —
//! the error value travels in the `Result`.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AviError {
    /// The per-stream standard-index table is full (32 sub-RIFFs).
    #[error("AVI file size limit reached")]
    SizeLimit,
    #[error("error opening AVI file")]
    Open(#[source] io::Error),
    #[error("error reading from AVI file")]
    Read(#[source] io::Error),
    #[error("error writing to AVI file")]
    Write(#[source] io::Error),
    /// The idx1 append at close failed; the file may still be usable.
    #[error("error writing index (file may still be usable)")]
    WriteIndex(#[source] io::Error),
    #[error("error closing AVI file")]
    Close(#[source] io::Error),
    #[error("operation not permitted in the current open mode")]
    NotPermitted,
    #[error("not an AVI file")]
    NotAvi,
    #[error("AVI file has no header list (corrupted?)")]
    NoHeaderList,
    #[error("AVI file has no movi list (corrupted?)")]
    NoMoviList,
    #[error("AVI file has no video data")]
    NoVideo,
    #[error("operation needs an index")]
    NoIndex,
    #[error("destination buffer is too small")]
    BufferTooSmall,
    #[error("only {max} audio tracks are supported", max = crate::MAX_TRACKS)]
    TooManyTracks,
    #[error("DV Type-1 interleaved AVI files are not supported")]
    DvTypeOne,
    #[error("invalid sidecar index file: {0}")]
    BadSidecar(String),
}

impl AviError {
    /// Numeric code compatible with the long-established AVI error table.
    /// Variants with no classic equivalent map to 15 ("unknown").
    pub fn code(&self) -> i32 {
        match self {
            AviError::SizeLimit => 1,
            AviError::Open(_) => 2,
            AviError::Read(_) => 3,
            AviError::Write(_) => 4,
            AviError::WriteIndex(_) => 5,
            AviError::Close(_) => 6,
            AviError::NotPermitted => 7,
            AviError::NotAvi => 9,
            AviError::NoHeaderList => 10,
            AviError::NoMoviList => 11,
            AviError::NoVideo => 12,
            AviError::NoIndex => 13,
            AviError::BufferTooSmall => 14,
            AviError::TooManyTracks
            | AviError::DvTypeOne
            | AviError::BadSidecar(_) => 15,
        }
    }
}

pub type Result<T> = std::result::Result<T, AviError>;
