//! FourCC identity + little-endian field codec.
//!
//! # Identity rules
//! A FourCC is four raw ASCII bytes.  Two comparison regimes exist and the
//! asymmetry is deliberate:
//!   - Container structure tags (`RIFF`, `LIST`, `hdrl`, `movi`, `idx1`,
//!     `indx`, …) are matched **case-insensitively** when reading, to accept
//!     files from broken producers.
//!   - Stream data tags this library writes itself (`00db`, `0Nwb`) are
//!     lowercase on disk and matched **exactly**.
//!
//! # Endianness
//! All numeric fields in the container are little-endian.  The two
//! specialized decoders handle the OpenDML standard-index size word, where
//! bit 31 is a (negated) keyframe marker rather than part of the length.

use std::fmt;

// ── Frozen container tags ────────────────────────────────────────────────────

pub const RIFF: Fourcc = Fourcc(*b"RIFF");
pub const LIST: Fourcc = Fourcc(*b"LIST");
pub const AVI: Fourcc = Fourcc(*b"AVI ");
pub const AVIX: Fourcc = Fourcc(*b"AVIX");
pub const HDRL: Fourcc = Fourcc(*b"hdrl");
pub const MOVI: Fourcc = Fourcc(*b"movi");
pub const IDX1: Fourcc = Fourcc(*b"idx1");
pub const INDX: Fourcc = Fourcc(*b"indx");
pub const JUNK: Fourcc = Fourcc(*b"JUNK");
pub const AVIH: Fourcc = Fourcc(*b"avih");
pub const STRL: Fourcc = Fourcc(*b"strl");
pub const STRH: Fourcc = Fourcc(*b"strh");
pub const STRF: Fourcc = Fourcc(*b"strf");
pub const STRN: Fourcc = Fourcc(*b"strn");
pub const VPRP: Fourcc = Fourcc(*b"vprp");
pub const DMLH: Fourcc = Fourcc(*b"dmlh");
pub const ODML: Fourcc = Fourcc(*b"odml");
pub const VIDS: Fourcc = Fourcc(*b"vids");
pub const AUDS: Fourcc = Fourcc(*b"auds");
pub const IAVS: Fourcc = Fourcc(*b"iavs");
pub const INFO: Fourcc = Fourcc(*b"INFO");
pub const ISFT: Fourcc = Fourcc(*b"ISFT");

/// Video data chunks are always stream 0 for files this library writes.
pub const VIDEO_CHUNK: Fourcc = Fourcc(*b"00db");

// ── Fourcc ───────────────────────────────────────────────────────────────────

/// Four-byte chunk/codec tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fourcc(pub [u8; 4]);

impl Fourcc {
    #[inline]
    pub const fn new(bytes: [u8; 4]) -> Self {
        Fourcc(bytes)
    }

    /// Parse from the start of a byte slice.  Panics if shorter than 4.
    #[inline]
    pub fn from_slice(b: &[u8]) -> Self {
        Fourcc([b[0], b[1], b[2], b[3]])
    }

    /// Audio data tag for 1-based track `n`: `01wb` … `08wb`.
    pub fn audio_chunk(track: usize) -> Self {
        debug_assert!(track < 99);
        Fourcc([b'0', b'0' + track as u8 + 1, b'w', b'b'])
    }

    /// Standard-index tag for a stream: `ix00` for video, `ix01`… for audio.
    pub fn std_index(stream: usize) -> Self {
        debug_assert!(stream < 99);
        Fourcc([b'i', b'x', b'0' + (stream / 10) as u8, b'0' + (stream % 10) as u8])
    }

    /// Container-tag comparison: case-insensitive, for structure tags only.
    #[inline]
    pub fn matches(self, other: Fourcc) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    /// Case-insensitive prefix match on the first 3 bytes; the idx1 video
    /// tag test deliberately ignores the trailing `b`/`c` variant byte.
    #[inline]
    pub fn matches3(self, other: Fourcc) -> bool {
        self.0[..3].eq_ignore_ascii_case(&other.0[..3])
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fourcc({self})")
    }
}

// ── LE field decoders ────────────────────────────────────────────────────────

#[inline]
pub fn u16_le(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

#[inline]
pub fn u32_le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[inline]
pub fn u64_le(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Standard-index size word: bit 31 is the keyframe marker, not length.
#[inline]
pub fn chunk_len(b: &[u8]) -> u32 {
    u32_le(b) & 0x7fff_ffff
}

/// Keyframe flag from a standard-index size word: bit 31 **clear** means
/// keyframe (foreign data defaults to keyframe).
#[inline]
pub fn key_flag(b: &[u8]) -> bool {
    u32_le(b) & 0x8000_0000 == 0
}
