//! # avimux — AVI/OpenDML container reader and writer
//!
//! Format guarantees (frozen):
//! - All numeric fields are little-endian; chunks pad to even length
//! - Container tags (`RIFF`, `LIST`, `hdrl`, `movi`, …) are matched
//!   case-insensitively on read to accept broken producers; data tags the
//!   writer emits (`00db`, `0Nwb`) are lowercase and matched exactly
//! - The first 2048 bytes are reserved for the header, which is rebuilt and
//!   committed when the writer closes; a provisional header is kept current
//!   so a partially written file stays parseable
//! - Files larger than one RIFF chunk can hold are rotated into `AVIX`
//!   sub-RIFFs at the 1900 MiB threshold; per-stream OpenDML `indx`
//!   super-indices reference one `ix##` standard index per sub-RIFF
//! - The legacy `idx1` index, when present, covers only the first sub-RIFF
//! - A reader reconstructs the frame/chunk index from any of: an external
//!   `AVIIDX1` sidecar, OpenDML super-indices, the legacy `idx1`, or a raw
//!   scan of the `movi` area

pub mod fourcc;
pub mod platform;
pub mod chunk;
pub mod index;
pub mod header;
pub mod sidecar;
pub mod reader;
pub mod writer;
pub mod avi;
pub mod error;

// Flat re-exports for the most common types.
pub use avi::AviFile;
pub use error::AviError;
pub use fourcc::Fourcc;
pub use index::{AudioIndexEntry, VideoIndexEntry};
pub use platform::Storage;
pub use reader::AviReader;
pub use writer::AviWriter;

/// Bytes reserved at the start of the file for the header.
pub const HEADER_BYTES: u64 = 2048;

/// A new sub-RIFF begins once the current one would exceed this many bytes.
pub const NEW_RIFF_THRES: u64 = 1900 * 1024 * 1024;

/// Standard indices per stream; bounds the file at roughly 60 GiB.
pub const MAX_SUPER_ENTRIES: usize = 32;

/// Audio tracks per file.
pub const MAX_TRACKS: usize = 8;

/// `strh` scale for video streams; rate = fps * scale.
pub const FRAME_RATE_SCALE: u32 = 1_000_000;

/// Single-RIFF files stay a bit below the 2 GiB limit.
pub const AVI_MAX_LEN: u64 = u32::MAX as u64 - (1 << 20) * 16 - HEADER_BYTES;

/// Round a chunk length up to the next even byte.
#[inline]
pub const fn pad_even(n: u64) -> u64 {
    (n + 1) & !1
}
