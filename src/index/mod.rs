//! Index model — legacy `idx1`, OpenDML super/standard indices, and the
//! per-track audio position bookkeeping.
//!
//! The super-index ↔ standard-index relationship is a one-way containment
//! tree: entry `k` of a stream's super-index describes the `ix##` chunk that
//! lists the stream's data chunks inside sub-RIFF `k`.  There are no back
//! pointers.
//!
//! Index arrays grow in fixed 4096-entry blocks.  The increment is part of
//! the write-path contract; amortized growth would be observably identical.

use crate::error::{AviError, Result};
use crate::fourcc::Fourcc;
use crate::{MAX_SUPER_ENTRIES, NEW_RIFF_THRES};

/// Growth increment for every index array.
pub const INDEX_BLOCK: usize = 4096;

/// `idx1` entry flag: the chunk is a keyframe.
pub const AVIIF_KEYFRAME: u32 = 0x10;

/// OpenDML `bIndexType` values.
pub const INDEX_OF_INDEXES: u8 = 0x00;
pub const INDEX_OF_CHUNKS: u8 = 0x01;

// ── Legacy idx1 ──────────────────────────────────────────────────────────────

/// One 16-byte `idx1` record.
#[derive(Debug, Clone, Copy)]
pub struct LegacyEntry {
    pub tag: Fourcc,
    pub flags: u32,
    pub pos: u32,
    pub len: u32,
}

/// The flat legacy index, appended in chunk-write order.
#[derive(Debug, Default)]
pub struct LegacyIndex {
    entries: Vec<LegacyEntry>,
}

impl LegacyIndex {
    pub fn push(&mut self, tag: Fourcc, flags: u32, pos: u64, len: u32) {
        if self.entries.len() == self.entries.capacity() {
            self.entries.reserve_exact(INDEX_BLOCK);
        }
        self.entries.push(LegacyEntry { tag, flags, pos: pos as u32, len });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to the `idx1` chunk payload (16 bytes per entry).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 16);
        for e in &self.entries {
            out.extend_from_slice(e.tag.as_bytes());
            out.extend_from_slice(&e.flags.to_le_bytes());
            out.extend_from_slice(&e.pos.to_le_bytes());
            out.extend_from_slice(&e.len.to_le_bytes());
        }
        out
    }
}

// ── Reconstructed read-side indices ──────────────────────────────────────────

/// One video frame as seen by the reader.  `pos` is the absolute file offset
/// of the payload (the chunk header is already skipped).
#[derive(Debug, Clone, Copy)]
pub struct VideoIndexEntry {
    pub pos: u64,
    pub len: u32,
    pub key: bool,
}

/// One audio chunk.  `tot` is the running byte total of all chunks before
/// this one — the key for byte-accurate positioning.
#[derive(Debug, Clone, Copy)]
pub struct AudioIndexEntry {
    pub pos: u64,
    pub len: u32,
    pub tot: u64,
}

/// Locate the chunk holding stream byte `byte`: the greatest `n` with
/// `tot[n] <= byte`.  The index must be non-empty.
pub fn audio_chunk_at(index: &[AudioIndexEntry], byte: u64) -> usize {
    let mut lo = 0usize;
    let mut hi = index.len();
    while lo + 1 < hi {
        let mid = (lo + hi) / 2;
        if index[mid].tot > byte {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    lo
}

// ── OpenDML standard index ───────────────────────────────────────────────────

/// One `ix##` entry: data offset relative to `base_offset + 8`, and the size
/// word whose bit 31 is set for non-keyframes.
#[derive(Debug, Clone, Copy)]
pub struct StdEntry {
    pub offset: u32,
    pub size: u32,
}

/// An in-memory `ix##` standard index for one {stream × sub-RIFF}.
#[derive(Debug)]
pub struct StdIndex {
    /// Chunk tag on disk: `ix00` for video, `ix01`… per audio track.
    pub fcc: Fourcc,
    /// Tag of the chunks being indexed (`00db`, `01wb`, …).
    pub chunk_id: Fourcc,
    /// Absolute file offset the entry offsets are relative to.  Starts as a
    /// `k · NEW_RIFF_THRES` placeholder and is overwritten when sub-RIFF `k`
    /// actually begins.
    pub base_offset: u64,
    entries: Vec<StdEntry>,
}

impl StdIndex {
    fn new(fcc: Fourcc, chunk_id: Fourcc, base_offset: u64) -> Self {
        let mut entries = Vec::new();
        entries.reserve_exact(INDEX_BLOCK);
        StdIndex { fcc, chunk_id, base_offset, entries }
    }

    /// Append a chunk record.  `pos` is the absolute offset of the chunk
    /// header; the stored offset points at its payload.
    pub fn push(&mut self, keyframe: bool, pos: u64, len: u32) {
        if self.entries.len() == self.entries.capacity() {
            self.entries.reserve_exact(INDEX_BLOCK);
        }
        let size = if keyframe { len } else { len | 0x8000_0000 };
        self.entries.push(StdEntry {
            offset: (pos - self.base_offset + 8) as u32,
            size,
        });
    }

    pub fn entries(&self) -> &[StdEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// On-disk payload size of the `ix##` chunk (header fields + entries,
    /// excluding the 8-byte chunk envelope).
    pub fn chunk_payload_size(&self) -> u32 {
        (self.entries.len() * 8 + 24) as u32
    }

    /// Serialize the `ix##` chunk payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.chunk_payload_size() as usize);
        out.extend_from_slice(&2u16.to_le_bytes()); // wLongsPerEntry
        out.push(0); // bIndexSubType
        out.push(INDEX_OF_CHUNKS); // bIndexType
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        out.extend_from_slice(self.chunk_id.as_bytes());
        out.extend_from_slice(&self.base_offset.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // reserved
        for e in &self.entries {
            out.extend_from_slice(&e.offset.to_le_bytes());
            out.extend_from_slice(&e.size.to_le_bytes());
        }
        out
    }
}

// ── OpenDML super index ──────────────────────────────────────────────────────

/// One `indx` entry pointing at a written `ix##` chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuperEntry {
    /// Absolute file offset of the `ix##` chunk header.
    pub offset: u64,
    /// Payload size of that chunk.
    pub size: u32,
    /// Stream ticks covered; informational only, never used for seeking.
    pub duration: u32,
}

/// Per-stream `indx` super-index owning one standard index per sub-RIFF.
#[derive(Debug)]
pub struct SuperIndex {
    /// Tag of the chunks being indexed (`00db`, `01wb`, …).
    pub chunk_id: Fourcc,
    /// `ix##` tag used for every standard index of this stream.
    pub std_fcc: Fourcc,
    pub entries: Vec<SuperEntry>,
    std: Vec<StdIndex>,
}

impl SuperIndex {
    /// Allocate a super-index with its first (sub-RIFF 0) standard index.
    pub fn new(std_fcc: Fourcc, chunk_id: Fourcc) -> Self {
        let mut si = SuperIndex {
            chunk_id,
            std_fcc,
            entries: Vec::with_capacity(MAX_SUPER_ENTRIES),
            std: Vec::with_capacity(MAX_SUPER_ENTRIES),
        };
        si.std.push(StdIndex::new(std_fcc, chunk_id, 0));
        si.entries.push(SuperEntry::default());
        si
    }

    /// Sub-RIFFs (standard indices) in use.
    pub fn entries_in_use(&self) -> usize {
        self.std.len()
    }

    /// Begin the standard index for the next sub-RIFF.  The base offset is a
    /// placeholder until the sub-RIFF header is actually written.
    pub fn rotate(&mut self) -> Result<()> {
        if self.std.len() >= MAX_SUPER_ENTRIES {
            return Err(AviError::SizeLimit);
        }
        let k = self.std.len() as u64;
        self.std.push(StdIndex::new(self.std_fcc, self.chunk_id, k * NEW_RIFF_THRES));
        self.entries.push(SuperEntry::default());
        Ok(())
    }

    pub fn current(&self) -> &StdIndex {
        self.std.last().expect("super-index always holds one standard index")
    }

    pub fn current_mut(&mut self) -> &mut StdIndex {
        self.std.last_mut().expect("super-index always holds one standard index")
    }

    pub fn std_index(&self, k: usize) -> &StdIndex {
        &self.std[k]
    }

    pub fn std_index_mut(&mut self, k: usize) -> &mut StdIndex {
        &mut self.std[k]
    }

    /// On-disk payload size of the `indx` chunk in the header.
    pub fn chunk_payload_size(&self) -> u32 {
        (24 + self.entries.len() * 16) as u32
    }
}
