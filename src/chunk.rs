//! Chunk I/O — the 8-byte FourCC + length envelope.
//!
//! # On-disk layout
//!
//! ```text
//! Offset  Size  Field
//!    0      4   tag       four raw ASCII bytes
//!    4      4   length    payload bytes, excluding the pad byte (LE u32)
//!    8      n   payload
//!   8+n    0|1  zero pad byte iff n is odd
//! ```
//!
//! Writers always advance their tracked position by `8 + PAD_EVEN(n)`.  On a
//! short write the file position is restored to its value before the call so
//! the caller can treat the chunk as never attempted.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{AviError, Result};
use crate::fourcc::Fourcc;
use crate::pad_even;

/// Write `tag | length | payload | pad`, restoring `pos` on failure.
///
/// Returns the new write position (`pos + 8 + PAD_EVEN(len)`).
pub fn append_chunk<S>(file: &mut S, pos: u64, tag: Fourcc, payload: &[u8]) -> Result<u64>
where
    S: Write + Seek,
{
    let mut head = [0u8; 8];
    head[..4].copy_from_slice(tag.as_bytes());
    head[4..].copy_from_slice(&(payload.len() as u32).to_le_bytes());

    let res = write_chunk_bytes(file, &head, payload);
    if let Err(e) = res {
        // Best effort: a failed restore leaves the file position undefined
        // but the original error is still the one reported.
        let _ = file.seek(SeekFrom::Start(pos));
        return Err(AviError::Write(e));
    }
    Ok(pos + 8 + pad_even(payload.len() as u64))
}

fn write_chunk_bytes<W: Write>(w: &mut W, head: &[u8; 8], payload: &[u8]) -> std::io::Result<()> {
    w.write_all(head)?;
    w.write_all(payload)?;
    if payload.len() & 1 == 1 {
        w.write_all(&[0u8])?;
    }
    Ok(())
}

/// Read an 8-byte chunk header.  Returns the tag and the **padded** length;
/// callers skip the payload with `seek(Current(len))`.
///
/// `Ok(None)` signals a clean EOF at a chunk boundary.
pub fn read_chunk_header<R: Read>(r: &mut R) -> Result<Option<(Fourcc, u64)>> {
    let mut tag = [0u8; 4];
    match r.read_exact(&mut tag) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(AviError::Read(e)),
    }
    let len = r.read_u32::<LittleEndian>().map_err(AviError::Read)?;
    Ok(Some((Fourcc(tag), pad_even(len as u64))))
}
