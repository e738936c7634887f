//! Reader engine.
//!
//! # Opening
//! The top-level scan walks the RIFF chunk sequence, buffering the `hdrl`
//! list, recording the `movi` data start, and slurping a legacy `idx1` if
//! one is present.  A broken stream whose position stops advancing aborts
//! the scan.  The buffered `hdrl` block is then interpreted with a small
//! state machine (`lasttag` tracks the most recent `strh` type so the
//! following `strf`/`indx` attach to the right stream).
//!
//! # Index reconstruction
//! Four sources, tried in order:
//!   1. an external `AVIIDX1` sidecar file (only when the caller did not
//!      ask for auto-indexing),
//!   2. OpenDML super-indices → `ix##` standard indices,
//!   3. a raw scan of the movi area (multi-RIFF files without a usable
//!      index, and files with neither `idx1` nor `dmlh`),
//!   4. the legacy `idx1`, auto-detecting whether its offsets are
//!      file-absolute or movi-relative by probing one video entry.
//!
//! All paths produce the same artifacts: a flat video index and one audio
//! index per track whose entries carry the running byte total (`tot`) that
//! the byte-accurate audio positioning binary-searches.

use std::io::SeekFrom;
use std::path::Path;
use tracing::{info, warn};

use crate::chunk::read_chunk_header;
use crate::error::{AviError, Result};
use crate::fourcc::{self, u32_le, Fourcc};
use crate::index::{audio_chunk_at, AudioIndexEntry, LegacyEntry, SuperEntry, VideoIndexEntry};
use crate::pad_even;
use crate::platform::Storage;
use crate::sidecar;
use crate::MAX_TRACKS;

// ── Buffer field helpers (tolerant of truncated header data) ─────────────────

fn u16_at(b: &[u8], i: usize) -> u16 {
    b.get(i..i + 2).map(fourcc::u16_le).unwrap_or(0)
}

fn u32_at(b: &[u8], i: usize) -> u32 {
    b.get(i..i + 4).map(u32_le).unwrap_or(0)
}

fn u64_at(b: &[u8], i: usize) -> u64 {
    b.get(i..i + 8).map(fourcc::u64_le).unwrap_or(0)
}

fn fcc_at(b: &[u8], i: usize) -> Fourcc {
    b.get(i..i + 4).map(Fourcc::from_slice).unwrap_or(Fourcc([0; 4]))
}

// ── Track state ──────────────────────────────────────────────────────────────

/// Read-side state of one audio track.
#[derive(Debug, Default)]
pub struct AudioTrack {
    pub a_fmt: u16,
    pub a_chans: u16,
    pub a_rate: u32,
    pub a_bits: u16,
    /// Average bitrate in kbit/s, from `strf` avg-bytes-per-sec.
    pub mp3rate: u32,
    /// `strh` rate field; nonzero for padded CBR streams.
    pub padrate: u32,
    /// Declared sample size of 0 in `strh` signals VBR.
    pub a_vbr: bool,
    /// Stream ordinal within the file.
    pub audio_strn: usize,
    pub audio_tag: Fourcc,
    pub audio_bytes: u64,
    pub index: Vec<AudioIndexEntry>,
    /// Reading cursor: chunk index + byte offset within that chunk.
    pub posc: usize,
    pub posb: u64,
    superindex: Option<Vec<SuperEntry>>,
    /// Raw WAVEFORMATEX bytes incl. the `cb_size` extension, if any.
    pub wave_format: Option<Vec<u8>>,
    /// File offsets of the codec fields, for callers that patch them.
    pub codech_off: u64,
    pub codecf_off: u64,
}

impl AudioTrack {
    pub fn audio_chunks(&self) -> usize {
        self.index.len()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum LastTag {
    None,
    Vids,
    Auds,
}

// ── Reader ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct AviReader<S: Storage> {
    file: S,
    movi_start: u64,

    width: u32,
    height: u32,
    fps: f64,
    /// Compressor from `strh` and the `strf` copy; `video_compressor()`
    /// exposes the latter.
    compressor: [u8; 4],
    compressor2: [u8; 4],
    /// Raw BITMAPINFOHEADER bytes.
    pub bitmap_info: Option<Vec<u8>>,
    video_strn: usize,
    video_tag: Fourcc,
    pub v_codech_off: u64,
    pub v_codecf_off: u64,

    video_index: Vec<VideoIndexEntry>,
    video_pos: usize,
    has_index: bool,
    video_super: Option<Vec<SuperEntry>>,
    /// Frame count declared by the video `strh`; reported when the caller
    /// opened without an index.
    declared_frames: u32,
    /// Frame count declared by `dmlh`, used when no index is available.
    total_frames: u32,
    is_opendml: bool,
    max_len: u32,

    tracks: Vec<AudioTrack>,
    cur_track: usize,
    /// Raw legacy idx1 records, kept until an index path consumes them.
    idx: Vec<LegacyEntry>,
}

impl<S: Storage> AviReader<S> {
    /// Open and, when `build_index` is set, reconstruct the full index.
    pub fn open(file: S, build_index: bool) -> Result<Self> {
        Self::open_inner(file, build_index, None)
    }

    /// Open using an external `AVIIDX1` sidecar instead of the indices in
    /// the file itself.
    pub fn open_with_sidecar(file: S, sidecar_path: &Path) -> Result<Self> {
        Self::open_inner(file, false, Some(sidecar_path))
    }

    fn open_inner(file: S, build_index: bool, sidecar_path: Option<&Path>) -> Result<Self> {
        let mut r = AviReader {
            file,
            movi_start: 0,
            width: 0,
            height: 0,
            fps: 0.0,
            compressor: [0; 4],
            compressor2: [0; 4],
            bitmap_info: None,
            video_strn: 0,
            video_tag: fourcc::VIDEO_CHUNK,
            v_codech_off: 0,
            v_codecf_off: 0,
            video_index: Vec::new(),
            video_pos: 0,
            has_index: false,
            video_super: None,
            declared_frames: 0,
            total_frames: 0,
            is_opendml: false,
            max_len: 0,
            tracks: Vec::new(),
            cur_track: 0,
            idx: Vec::new(),
        };

        let (header_offset, hdrl) = r.scan_toplevel()?;
        r.interpret_header(header_offset, &hdrl)?;

        r.seek(r.movi_start)?;

        if let Some(path) = sidecar_path {
            r.apply_sidecar(path)?;
        } else if build_index {
            r.reconstruct_index()?;
        }

        r.seek(r.movi_start)?;
        r.video_pos = 0;
        r.cur_track = 0;
        Ok(r)
    }

    fn seek(&mut self, pos: u64) -> Result<u64> {
        self.file.seek(SeekFrom::Start(pos)).map_err(AviError::Read)
    }

    // ── Top-level scan ───────────────────────────────────────────────────────

    /// Walk the RIFF chunk sequence; returns the `hdrl` block and its file
    /// offset.
    fn scan_toplevel(&mut self) -> Result<(u64, Vec<u8>)> {
        let mut head = [0u8; 12];
        self.file.read_exact(&mut head).map_err(AviError::Read)?;
        if !fcc_at(&head, 0).matches(fourcc::RIFF) || !fcc_at(&head, 8).matches(fourcc::AVI) {
            return Err(AviError::NotAvi);
        }

        let mut hdrl: Option<(u64, Vec<u8>)> = None;
        let mut oldpos = u64::MAX;

        loop {
            // Any short read here is EOF or trailing garbage.
            let Ok(Some((tag, n))) = read_chunk_header(&mut self.file) else {
                break;
            };
            let newpos = self.file.stream_position().map_err(AviError::Read)?;
            if newpos == oldpos {
                // Broken stream: the position stopped advancing.
                return Err(AviError::Read(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "file position did not advance during the top-level scan",
                )));
            }
            oldpos = newpos;

            if tag.matches(fourcc::LIST) {
                if n < 4 {
                    // Malformed LIST; its body will be re-parsed as chunks.
                    continue;
                }
                let mut ty = [0u8; 4];
                self.file.read_exact(&mut ty).map_err(AviError::Read)?;
                let n = n - 4;
                let ty = Fourcc(ty);
                if ty.matches(fourcc::HDRL) {
                    let off = self.file.stream_position().map_err(AviError::Read)?;
                    let mut buf = vec![0u8; n as usize];
                    self.file.read_exact(&mut buf).map_err(AviError::Read)?;
                    hdrl = Some((off, buf));
                } else if ty.matches(fourcc::MOVI) {
                    self.movi_start = self.file.stream_position().map_err(AviError::Read)?;
                    if self.file.seek(SeekFrom::Current(n as i64)).is_err() {
                        break;
                    }
                } else if self.file.seek(SeekFrom::Current(n as i64)).is_err() {
                    break;
                }
            } else if tag.matches(fourcc::IDX1) {
                let mut buf = vec![0u8; n as usize];
                if self.file.read_exact(&mut buf).is_err() {
                    // Truncated index; pretend it is absent.
                    self.idx.clear();
                    break;
                }
                self.idx = buf
                    .chunks_exact(16)
                    .map(|c| LegacyEntry {
                        tag: fcc_at(c, 0),
                        flags: u32_le(&c[4..]),
                        pos: u32_le(&c[8..]),
                        len: u32_le(&c[12..]),
                    })
                    .collect();
            } else if self.file.seek(SeekFrom::Current(n as i64)).is_err() {
                break;
            }
        }

        let (off, buf) = hdrl.ok_or(AviError::NoHeaderList)?;
        if self.movi_start == 0 {
            return Err(AviError::NoMoviList);
        }
        Ok((off, buf))
    }

    // ── Header interpretation ────────────────────────────────────────────────

    fn interpret_header(&mut self, header_offset: u64, h: &[u8]) -> Result<()> {
        let mut lasttag = LastTag::None;
        let mut num_stream = 0usize;
        let mut vids_strh_seen = false;
        let mut vids_strf_seen = false;

        let mut i = 0usize;
        while i + 8 <= h.len() {
            let tag = fcc_at(h, i);
            if tag.matches(fourcc::LIST) {
                i += 12;
                continue;
            }
            let n = pad_even(u32_at(h, i + 4) as u64) as usize;

            if tag.matches(fourcc::STRH) {
                i += 8;
                let sub = fcc_at(h, i);
                if sub.matches(fourcc::VIDS) && !vids_strh_seen {
                    self.compressor = *fcc_at(h, i + 4).as_bytes();
                    self.v_codech_off = header_offset + i as u64 + 4;
                    let scale = u32_at(h, i + 20);
                    let rate = u32_at(h, i + 24);
                    if scale != 0 {
                        self.fps = rate as f64 / scale as f64;
                    }
                    self.declared_frames = u32_at(h, i + 32);
                    self.video_strn = num_stream;
                    self.max_len = 0;
                    vids_strh_seen = true;
                    lasttag = LastTag::Vids;
                } else if sub.matches(fourcc::AUDS) {
                    if self.tracks.len() >= MAX_TRACKS {
                        return Err(AviError::TooManyTracks);
                    }
                    // Sample size is unknown until the strf arrives; this
                    // provisional byte count is overwritten by every index
                    // path and only survives index-less opens.
                    let sampsize = 4u64;
                    let mut t = AudioTrack {
                        audio_bytes: u32_at(h, i + 32) as u64 * sampsize,
                        audio_strn: num_stream,
                        a_vbr: u32_at(h, i + 44) == 0,
                        padrate: u32_at(h, i + 24),
                        codech_off: header_offset + i as u64,
                        ..AudioTrack::default()
                    };
                    t.audio_tag = Fourcc::audio_chunk(self.tracks.len());
                    self.tracks.push(t);
                    self.cur_track = self.tracks.len() - 1;
                    lasttag = LastTag::Auds;
                } else if sub.matches(fourcc::IAVS) {
                    return Err(AviError::DvTypeOne);
                } else {
                    lasttag = LastTag::None;
                }
                num_stream += 1;
            } else if tag.matches(fourcc::DMLH) {
                self.total_frames = u32_at(h, i + 8);
                i += 8;
            } else if tag.matches(fourcc::STRF) {
                i += 8;
                match lasttag {
                    LastTag::Vids => {
                        let bi_size = (u32_at(h, i) as usize).min(h.len().saturating_sub(i));
                        self.bitmap_info = Some(h[i..i + bi_size].to_vec());
                        self.width = u32_at(h, i + 4);
                        self.height = u32_at(h, i + 8);
                        self.v_codecf_off = header_offset + i as u64 + 16;
                        self.compressor2 = *fcc_at(h, i + 16).as_bytes();
                        vids_strf_seen = true;
                    }
                    LastTag::Auds => {
                        self.read_audio_strf(header_offset, h, i)?;
                    }
                    LastTag::None => {}
                }
            } else if tag.matches(fourcc::INDX) {
                self.read_super_index(h, i, lasttag);
                i += 8;
            } else if tag.matches(fourcc::JUNK)
                || tag.matches(fourcc::STRN)
                || tag.matches(fourcc::VPRP)
            {
                // Annotation chunks between strh and strf; lasttag survives.
                i += 8;
            } else {
                i += 8;
                lasttag = LastTag::None;
            }

            i += n;
        }

        if !vids_strh_seen || !vids_strf_seen {
            return Err(AviError::NoVideo);
        }

        self.video_tag = Fourcc([
            b'0' + (self.video_strn / 10) as u8,
            b'0' + (self.video_strn % 10) as u8,
            b'd',
            b'b',
        ]);

        // Data tags follow stream order with the video stream skipped.
        let mut t = 0usize;
        for strn in 0..=self.tracks.len() {
            if strn == self.video_strn {
                continue;
            }
            if let Some(track) = self.tracks.get_mut(t) {
                track.audio_tag = Fourcc([
                    b'0' + (strn / 10) as u8,
                    b'0' + (strn % 10) as u8,
                    b'w',
                    b'b',
                ]);
            }
            t += 1;
        }

        Ok(())
    }

    /// WAVEFORMATEX with an optional `cb_size` extension that is re-read
    /// from the file (the buffered hdrl copy may not cover it).
    fn read_audio_strf(&mut self, header_offset: u64, h: &[u8], i: usize) -> Result<()> {
        const WFX_SIZE: usize = 18;
        let avail = h.len().saturating_sub(i).min(WFX_SIZE);
        let mut wf = vec![0u8; WFX_SIZE];
        wf[..avail].copy_from_slice(&h[i..i + avail]);

        let cb_size = u16_at(h, i + 16) as usize;
        if cb_size != 0 {
            let lpos = self.file.stream_position().map_err(AviError::Read)?;
            let mut ext = vec![0u8; cb_size];
            let read = self
                .seek(header_offset + i as u64 + WFX_SIZE as u64)
                .and_then(|_| self.file.read_exact(&mut ext).map_err(AviError::Read));
            if read.is_ok() {
                wf.extend_from_slice(&ext);
            }
            self.seek(lpos)?;
        }

        let t = &mut self.tracks[self.cur_track];
        t.a_fmt = u16_at(h, i);
        t.codecf_off = header_offset + i as u64;
        t.a_chans = u16_at(h, i + 2);
        t.a_rate = u32_at(h, i + 4);
        t.mp3rate = 8 * u32_at(h, i + 8) / 1000;
        t.a_bits = u16_at(h, i + 14);
        t.wave_format = Some(wf);
        Ok(())
    }

    /// `indx` super-index chunk inside the hdrl block.
    fn read_super_index(&mut self, h: &[u8], i: usize, lasttag: LastTag) {
        if u8_at(h, i + 10) != 0 {
            warn!("invalid header, bIndexSubType != 0");
        }
        let declared = u32_at(h, i + 12) as usize;
        let avail = h.len().saturating_sub(i + 32) / 16;
        let count = declared.min(avail);
        let entries: Vec<SuperEntry> = (0..count)
            .map(|k| {
                let at = i + 32 + 16 * k;
                SuperEntry {
                    offset: u64_at(h, at),
                    size: u32_at(h, at + 8),
                    duration: u32_at(h, at + 12),
                }
            })
            .collect();

        match lasttag {
            LastTag::Vids => {
                self.video_super = Some(entries);
                self.is_opendml = true;
            }
            LastTag::Auds => {
                if let Some(t) = self.tracks.get_mut(self.cur_track) {
                    t.superindex = Some(entries);
                }
            }
            LastTag::None => {}
        }
    }

    // ── Index reconstruction ─────────────────────────────────────────────────

    fn apply_sidecar(&mut self, path: &Path) -> Result<()> {
        let idx = sidecar::parse_index_file(path)?;
        if idx.video.is_empty() {
            return Err(AviError::NoVideo);
        }
        self.video_index = idx.video;
        let mut audio = idx.audio;
        for (j, track) in self.tracks.iter_mut().enumerate() {
            track.index = std::mem::take(&mut audio[j]);
            track.audio_bytes = track
                .index
                .last()
                .map(|e| e.tot + e.len as u64)
                .unwrap_or(0);
            track.posc = 0;
            track.posb = 0;
        }
        self.has_index = true;
        Ok(())
    }

    fn reconstruct_index(&mut self) -> Result<()> {
        // Decide whether idx1 offsets are file-absolute or movi-relative by
        // probing the first video entry.
        let mut idx_type = 0u8;
        if !self.idx.is_empty() {
            let video_tag = self.video_tag;
            let first = self
                .idx
                .iter()
                .find(|e| e.tag.matches3(video_tag))
                .copied()
                .ok_or(AviError::NoVideo)?;

            if self.probe_idx_entry(first.pos as u64, first)? {
                idx_type = 1; // offsets from start of file
            } else if self.probe_idx_entry(first.pos as u64 + self.movi_start - 4, first)? {
                idx_type = 2; // offsets from start of the movi list
            }
        }

        if idx_type == 0 && !self.is_opendml && self.total_frames == 0 {
            // Neither index nor OpenDML structure: build a synthetic idx1
            // by scanning the movi area.
            self.scan_movi_to_idx()?;
            idx_type = 1;
        }

        let mut fall_through_to_scan = false;
        if self.is_opendml {
            self.build_from_super_index()?;
            if self.video_index.is_empty() {
                // Broken 'rec '-style OpenDML file; rescan linearly.
                self.is_opendml = false;
                fall_through_to_scan = true;
            }
        }

        if fall_through_to_scan
            || (self.total_frames > 0 && !self.is_opendml && idx_type == 0)
        {
            self.build_from_movi_scan()?;
        } else if !self.is_opendml {
            self.build_from_idx1(idx_type)?;
        }

        self.has_index = true;
        Ok(())
    }

    /// True when an 8-byte probe at `at` matches the idx1 entry's tag+len.
    fn probe_idx_entry(&mut self, at: u64, e: LegacyEntry) -> Result<bool> {
        self.seek(at)?;
        let mut buf = [0u8; 8];
        if self.file.read_exact(&mut buf).is_err() {
            return Ok(false);
        }
        Ok(fcc_at(&buf, 0).matches(e.tag) && u32_le(&buf[4..]) == e.len)
    }

    /// Path 3a: linear scan recording every recognisable data chunk into a
    /// synthetic legacy index.
    fn scan_movi_to_idx(&mut self) -> Result<()> {
        self.seek(self.movi_start)?;
        self.idx.clear();

        loop {
            let mut ch = [0u8; 8];
            if self.file.read_exact(&mut ch).is_err() {
                break;
            }
            let tag = fcc_at(&ch, 0);
            let n = u32_le(&ch[4..]);

            if tag.matches(fourcc::LIST) {
                // The movi list may contain rec sub-lists; step inside.
                if self.file.seek(SeekFrom::Current(4)).is_err() {
                    break;
                }
                continue;
            }

            let b = tag.as_bytes();
            let video = matches!(b[2], b'd' | b'D') && matches!(b[3], b'b' | b'B' | b'c' | b'C');
            let audio = matches!(b[2], b'w' | b'W') && matches!(b[3], b'b' | b'B');
            if video || audio {
                let pos = self.file.stream_position().map_err(AviError::Read)? - 8;
                self.idx.push(LegacyEntry { tag, flags: 0, pos: pos as u32, len: n });
            }
            if self.file.seek(SeekFrom::Current(pad_even(n as u64) as i64)).is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Path 2: OpenDML — read each stream's `ix##` chunks via its
    /// super-index.
    fn build_from_super_index(&mut self) -> Result<()> {
        self.video_index = Vec::new();

        let entries = self.video_super.clone().unwrap_or_default();
        for e in &entries {
            if let Some(chunks) = self.read_std_index(e)? {
                for (pos, len, key) in chunks {
                    self.video_index.push(VideoIndexEntry { pos, len, key });
                }
            }
        }

        if self.video_index.is_empty() {
            return Ok(());
        }

        for ti in 0..self.tracks.len() {
            let Some(entries) = self.tracks[ti].superindex.clone() else {
                warn!(track = ti, "cannot read audio index for track");
                continue;
            };
            let mut tot = 0u64;
            let mut index = Vec::new();
            for e in &entries {
                if let Some(chunks) = self.read_std_index(e)? {
                    for (pos, len, _key) in chunks {
                        index.push(AudioIndexEntry { pos, len, tot });
                        tot += len as u64;
                    }
                }
            }
            let t = &mut self.tracks[ti];
            t.index = index;
            t.audio_bytes = tot;
        }
        Ok(())
    }

    /// Read one `ix##` chunk.  Completely empty entries (offset == base and
    /// zero length) are padding and dropped.  Unreachable chunks are logged
    /// and skipped, matching the tolerance for truncated files.
    fn read_std_index(&mut self, e: &SuperEntry) -> Result<Option<Vec<(u64, u32, bool)>>> {
        if self.seek(e.offset).is_err() {
            warn!(offset = e.offset, "cannot seek to standard index");
            return Ok(None);
        }
        let mut head = [0u8; 32];
        if self.file.read_exact(&mut head).is_err() {
            warn!(offset = e.offset, "cannot read standard index; broken (incomplete) file?");
            return Ok(None);
        }
        let count = u32_at(&head, 12) as usize;
        let base = u64_at(&head, 20);

        let mut body = vec![0u8; count * 8];
        if self.file.read_exact(&mut body).is_err() {
            warn!(offset = e.offset, "cannot read standard index body");
            return Ok(None);
        }

        let mut out = Vec::with_capacity(count);
        for c in body.chunks_exact(8) {
            let pos = base + u32_le(c) as u64;
            let len = fourcc::chunk_len(&c[4..]);
            let key = fourcc::key_flag(&c[4..]);
            if pos - base == 0 && len == 0 {
                continue;
            }
            out.push((pos, len, key));
        }
        Ok(Some(out))
    }

    /// Path 3: multi-RIFF file without a super-index — rebuild by walking
    /// the data chunks, bounded by the `dmlh` frame count.  Only a single
    /// audio track can be recovered this way.
    fn build_from_movi_scan(&mut self) -> Result<()> {
        self.seek(self.movi_start)?;
        info!("reconstructing index from the movi area");

        self.video_index = Vec::new();
        for t in &mut self.tracks {
            t.index = Vec::new();
        }
        let mut tot = 0u64;

        loop {
            if self.video_index.len() >= self.total_frames as usize {
                break;
            }
            let mut ch = [0u8; 8];
            if self.file.read_exact(&mut ch).is_err() {
                break;
            }
            let n = u32_le(&ch[4..]);
            let t = *fcc_at(&ch, 0).as_bytes();

            let video = (t[0] == b'0' || t[1] == b'0')
                && matches!(t[2], b'd' | b'D')
                && matches!(t[3], b'b' | b'B' | b'c' | b'C');
            let audio = (t[0] == b'0' || t[1] == b'1')
                && matches!(t[2], b'w' | b'W')
                && matches!(t[3], b'b' | b'B');

            if video {
                let pos = self.file.stream_position().map_err(AviError::Read)?;
                self.video_index.push(VideoIndexEntry { pos, len: n, key: false });
                if self.file.seek(SeekFrom::Current(pad_even(n as u64) as i64)).is_err() {
                    break;
                }
            } else if audio {
                let pos = self.file.stream_position().map_err(AviError::Read)?;
                if let Some(track) = self.tracks.first_mut() {
                    track.index.push(AudioIndexEntry { pos, len: n, tot });
                    tot += n as u64;
                }
                if self.file.seek(SeekFrom::Current(pad_even(n as u64) as i64)).is_err() {
                    break;
                }
            } else if self.file.seek(SeekFrom::Current(-4)).is_err() {
                break;
            }
        }

        if self.video_index.len() < self.total_frames as usize {
            warn!(
                found = self.video_index.len(),
                declared = self.total_frames,
                "some frames seem to be missing"
            );
        }

        if let Some(track) = self.tracks.first_mut() {
            track.audio_bytes = tot;
        }
        Ok(())
    }

    /// Path 4: legacy idx1 with the detected offset base.
    fn build_from_idx1(&mut self, idx_type: u8) -> Result<()> {
        let ioff = if idx_type == 1 { 8 } else { self.movi_start + 4 };

        self.video_index = Vec::new();
        for t in &mut self.tracks {
            t.index = Vec::new();
        }
        let mut tot = [0u64; MAX_TRACKS];

        for e in &self.idx {
            if e.tag.matches3(self.video_tag) {
                self.video_index.push(VideoIndexEntry {
                    pos: e.pos as u64 + ioff,
                    len: e.len,
                    key: e.flags & 0x10 != 0,
                });
            }
            for (j, t) in self.tracks.iter_mut().enumerate() {
                if e.tag.matches(t.audio_tag) {
                    t.index.push(AudioIndexEntry {
                        pos: e.pos as u64 + ioff,
                        len: e.len,
                        tot: tot[j],
                    });
                    tot[j] += e.len as u64;
                }
            }
        }

        for (j, t) in self.tracks.iter_mut().enumerate() {
            t.audio_bytes = tot[j];
        }
        if self.video_index.is_empty() {
            return Err(AviError::NoVideo);
        }
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn video_frames(&self) -> usize {
        if self.has_index {
            self.video_index.len()
        } else {
            self.declared_frames as usize
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_rate(&self) -> f64 {
        self.fps
    }

    /// Compressor FourCC as recorded in the video `strf`.
    pub fn video_compressor(&self) -> Fourcc {
        Fourcc(self.compressor2)
    }

    /// Compressor FourCC as declared in the `strh` handler field; may
    /// differ from the `strf` copy in files from sloppy producers.
    pub fn strh_compressor(&self) -> Fourcc {
        Fourcc(self.compressor)
    }

    /// Largest data chunk observed while indexing.
    pub fn max_video_chunk(&self) -> u32 {
        self.video_index.iter().map(|e| e.len).max().unwrap_or(self.max_len)
    }

    pub fn is_opendml(&self) -> bool {
        self.is_opendml
    }

    pub fn movi_start(&self) -> u64 {
        self.movi_start
    }

    pub fn audio_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, i: usize) -> Option<&AudioTrack> {
        self.tracks.get(i)
    }

    pub fn current_track(&self) -> Option<&AudioTrack> {
        self.tracks.get(self.cur_track)
    }

    pub fn set_audio_track(&mut self, track: usize) -> Result<()> {
        if track >= self.tracks.len() {
            return Err(AviError::NotPermitted);
        }
        self.cur_track = track;
        Ok(())
    }

    pub fn audio_track(&self) -> usize {
        self.cur_track
    }

    pub fn video_index(&self) -> &[VideoIndexEntry] {
        &self.video_index
    }

    /// Payload length of `frame`, or None without an index / out of range.
    pub fn frame_size(&self, frame: usize) -> Option<u32> {
        if !self.has_index {
            return None;
        }
        self.video_index.get(frame).map(|e| e.len)
    }

    /// Absolute file offset of `frame`'s payload.
    pub fn video_position(&self, frame: usize) -> Option<u64> {
        if !self.has_index {
            return None;
        }
        self.video_index.get(frame).map(|e| e.pos)
    }

    pub fn audio_size(&self, chunk: usize) -> Option<u32> {
        self.current_track()?.index.get(chunk).map(|e| e.len)
    }

    // ── Random access ────────────────────────────────────────────────────────

    pub fn seek_start(&mut self) -> Result<()> {
        let movi = self.movi_start;
        self.seek(movi)?;
        self.video_pos = 0;
        Ok(())
    }

    /// Negative frames clamp to 0; positions past the end are accepted but
    /// subsequent reads report end of stream.
    pub fn set_video_position(&mut self, frame: i64) -> Result<()> {
        if !self.has_index {
            return Err(AviError::NoIndex);
        }
        self.video_pos = frame.max(0) as usize;
        Ok(())
    }

    pub fn video_pos(&self) -> usize {
        self.video_pos
    }

    /// Read the frame at the current position into `buf` and advance.
    /// `Ok(None)` past the last frame; the position does not move then.
    pub fn read_frame(&mut self, buf: &mut [u8]) -> Result<Option<(usize, bool)>> {
        if !self.has_index {
            return Err(AviError::NoIndex);
        }
        let Some(&e) = self.video_index.get(self.video_pos) else {
            return Ok(None);
        };
        if buf.len() < e.len as usize {
            return Err(AviError::BufferTooSmall);
        }
        self.seek(e.pos)?;
        self.file
            .read_exact(&mut buf[..e.len as usize])
            .map_err(AviError::Read)?;
        self.video_pos += 1;
        Ok(Some((e.len as usize, e.key)))
    }

    /// Byte-accurate audio positioning: binary search over the running
    /// totals, clamping past-end positions so the next read returns 0.
    pub fn set_audio_position(&mut self, byte: u64) -> Result<()> {
        let t = self
            .tracks
            .get_mut(self.cur_track)
            .filter(|t| !t.index.is_empty())
            .ok_or(AviError::NoIndex)?;
        let n = audio_chunk_at(&t.index, byte);
        t.posc = n;
        t.posb = (byte - t.index[n].tot).min(t.index[n].len as u64);
        Ok(())
    }

    pub fn set_audio_position_index(&mut self, chunk: usize) -> Result<()> {
        let t = self
            .tracks
            .get_mut(self.cur_track)
            .filter(|t| !t.index.is_empty())
            .ok_or(AviError::NoIndex)?;
        if chunk > t.index.len() {
            return Err(AviError::NoIndex);
        }
        t.posc = chunk;
        t.posb = 0;
        Ok(())
    }

    pub fn audio_position_index(&self) -> Result<usize> {
        let t = self
            .tracks
            .get(self.cur_track)
            .filter(|t| !t.index.is_empty())
            .ok_or(AviError::NoIndex)?;
        Ok(t.posc)
    }

    /// Fill `buf` from the current audio cursor, crossing chunk boundaries
    /// as needed.  Returns the bytes read; 0 at end of stream.
    pub fn read_audio(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self
            .tracks
            .get(self.cur_track)
            .map_or(true, |t| t.index.is_empty())
        {
            return Err(AviError::NoIndex);
        }

        let mut nr = 0usize;
        while nr < buf.len() {
            let t = &self.tracks[self.cur_track];
            let Some(e) = t.index.get(t.posc).copied() else { break };
            let left = e.len as u64 - t.posb;
            if left == 0 {
                if t.posc >= t.index.len() - 1 {
                    break;
                }
                let t = &mut self.tracks[self.cur_track];
                t.posc += 1;
                t.posb = 0;
                continue;
            }
            let todo = ((buf.len() - nr) as u64).min(left) as usize;
            let pos = e.pos + t.posb;
            self.seek(pos)?;
            self.file
                .read_exact(&mut buf[nr..nr + todo])
                .map_err(AviError::Read)?;
            nr += todo;
            self.tracks[self.cur_track].posb += todo as u64;
        }
        Ok(nr)
    }

    /// Read the remainder of the current chunk in one I/O and advance to
    /// the next chunk.  `None` buffer returns the byte count without side
    /// effects; `Ok(None)` signals end of stream.
    pub fn read_audio_chunk(&mut self, buf: Option<&mut [u8]>) -> Result<Option<usize>> {
        let cur = self.cur_track;
        let (pos, left) = {
            let t = self
                .tracks
                .get(cur)
                .filter(|t| !t.index.is_empty())
                .ok_or(AviError::NoIndex)?;
            if t.posc >= t.index.len() {
                return Ok(None);
            }
            let e = t.index[t.posc];
            (e.pos + t.posb, e.len as u64 - t.posb)
        };

        let Some(buf) = buf else {
            return Ok(Some(left as usize));
        };

        if left == 0 {
            let t = &mut self.tracks[cur];
            t.posc += 1;
            t.posb = 0;
            return Ok(Some(0));
        }
        if buf.len() < left as usize {
            return Err(AviError::BufferTooSmall);
        }

        self.seek(pos)?;
        self.file
            .read_exact(&mut buf[..left as usize])
            .map_err(AviError::Read)?;
        let t = &mut self.tracks[cur];
        t.posc += 1;
        t.posb = 0;
        Ok(Some(left as usize))
    }

    /// Interleaving oracle: true when the next audio chunk lies before the
    /// next video frame in the file.  Offsets across sub-RIFFs are not
    /// comparable, so this is meaningful for single-RIFF reads only.
    pub fn can_read_audio(&self) -> Result<bool> {
        if !self.has_index {
            return Err(AviError::NoIndex);
        }
        let t = self
            .tracks
            .get(self.cur_track)
            .filter(|t| !t.index.is_empty())
            .ok_or(AviError::NoIndex)?;
        if t.posc >= t.index.len() {
            return Ok(false);
        }
        if self.video_pos >= self.video_index.len() {
            return Ok(true);
        }
        Ok(t.index[t.posc].pos < self.video_index[self.video_pos].pos)
    }
}

fn u8_at(b: &[u8], i: usize) -> u8 {
    b.get(i).copied().unwrap_or(0)
}
