//! External `AVIIDX1` sidecar index files.
//!
//! Line-oriented text format produced by index-generating tools:
//!
//! ```text
//! AVIIDX1                               header, mandatory
//! <free-form comment line>
//! <tag> <type> <chan> <chtype> <pos> <len> <key> <ms>
//! ...
//! ```
//!
//! `type` is the producer's 1-based stream ordinal: 1 = video, 2..9 = audio
//! tracks 1..8.  `pos` is the file offset of the chunk header; stored
//! positions point at the payload (`pos + 8`).  The trailing `ms` field is
//! parsed and discarded.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{AviError, Result};
use crate::index::{AudioIndexEntry, VideoIndexEntry};
use crate::MAX_TRACKS;

/// Indices reconstructed from a sidecar file.
#[derive(Debug, Default)]
pub struct SidecarIndex {
    pub video: Vec<VideoIndexEntry>,
    pub audio: [Vec<AudioIndexEntry>; MAX_TRACKS],
}

/// Parse a sidecar file into per-stream index arrays.
///
/// Unparseable lines and unknown stream ordinals are skipped, matching the
/// tolerant behavior of the tools that write these files.
pub fn parse_index_file(path: &Path) -> Result<SidecarIndex> {
    let file = File::open(path).map_err(AviError::Open)?;
    let mut lines = BufReader::new(file).lines();

    let header = lines
        .next()
        .ok_or_else(|| AviError::BadSidecar("empty file".into()))?
        .map_err(AviError::Read)?;
    if !header.get(..7).is_some_and(|h| h.eq_ignore_ascii_case("AVIIDX1")) {
        return Err(AviError::BadSidecar("missing AVIIDX1 header".into()));
    }

    // Comment line; contents are free-form.
    if lines.next().transpose().map_err(AviError::Read)?.is_none() {
        return Ok(SidecarIndex::default());
    }

    let mut idx = SidecarIndex::default();
    let mut tot = [0u64; MAX_TRACKS];

    for line in lines {
        let line = line.map_err(AviError::Read)?;
        let mut f = line.split_whitespace();
        let parsed = (|| {
            let _tag = f.next()?;
            let ty: u32 = f.next()?.parse().ok()?;
            let _chan = f.next()?;
            let _chtype = f.next()?;
            let pos: u64 = f.next()?.parse().ok()?;
            let len: u32 = f.next()?.parse().ok()?;
            let key: u32 = f.next()?.parse().ok()?;
            Some((ty, pos, len, key))
        })();
        let Some((ty, pos, len, key)) = parsed else { continue };

        match ty {
            1 => idx.video.push(VideoIndexEntry { pos: pos + 8, len, key: key != 0 }),
            2..=9 => {
                let t = (ty - 2) as usize;
                idx.audio[t].push(AudioIndexEntry { pos: pos + 8, len, tot: tot[t] });
                tot[t] += len as u64;
            }
            _ => continue,
        }
    }

    Ok(idx)
}
