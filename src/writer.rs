//! Writer engine.
//!
//! # Lifecycle
//! [`AviWriter::new`] reserves 2048 zero bytes for the header and starts
//! writing data at that offset.  Every stream declaration rewrites a
//! provisional header in place (zero frames, maximum movi length) so a file
//! whose producer dies mid-write still parses.  [`AviWriter::finish`]
//! performs the deferred layout pass: flush outstanding indices, rebuild the
//! real header in the 2048-byte buffer, commit it at offset 0, truncate, and
//! patch the sub-RIFF lengths of an OpenDML file.
//!
//! # Ordering
//! The index entry for a chunk is appended before the chunk bytes reach the
//! descriptor; the write position only advances after a successful write.  A
//! payload-write failure therefore leaves the in-memory index ahead of the
//! file — the handle is poisoned and every later operation fails.
//!
//! # Rotation
//! Before each chunk the writer estimates the bytes needed to close out the
//! current sub-RIFF (all open standard indices, plus idx1 and the header for
//! sub-RIFF 0).  If position + estimate crosses `NEW_RIFF_THRES` times the
//! sub-RIFF count, the previous standard indices are dumped as `ix##`
//! chunks, `idx1` is emitted on the first rotation only, and a 16-byte
//! `RIFF…AVIX LIST…movi` stub opens the next sub-RIFF (its lengths are fixed
//! up at close).

use std::fs::{File, OpenOptions};
use std::io::{Read, SeekFrom};
use std::path::Path;
use tracing::{info, warn};

use crate::chunk::append_chunk;
use crate::error::{AviError, Result};
use crate::fourcc::{self, Fourcc};
use crate::header::HeaderBuf;
use crate::index::{LegacyIndex, SuperEntry, SuperIndex, AVIIF_KEYFRAME, INDEX_OF_INDEXES};
use crate::platform::Storage;
use crate::{pad_even, AVI_MAX_LEN, FRAME_RATE_SCALE, HEADER_BYTES, MAX_TRACKS, NEW_RIFF_THRES};

/// avih flags.
const AVIF_HASINDEX: u32 = 0x0000_0010;
const AVIF_ISINTERLEAVED: u32 = 0x0000_0100;

/// WAVE format tags with dedicated header paths.
const WAVE_FMT_PCM: u16 = 0x0001;
const WAVE_FMT_MP3: u16 = 0x0055;

// ── Track state ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct TrackState {
    pub a_fmt: u16,
    pub a_chans: u16,
    pub a_rate: u32,
    pub a_bits: u16,
    /// Average bitrate in kbit/s; `avg_bytes_per_sec = 1000 * mp3rate / 8`.
    pub mp3rate: u32,
    pub a_vbr: bool,
    pub audio_bytes: u64,
    pub audio_chunks: u32,
    superindex: Option<SuperIndex>,
}

impl TrackState {
    /// Bytes per sample group; clamped to 4 to avoid zero divisions.
    fn sampsize(&self) -> u32 {
        let s = ((self.a_bits as u32 + 7) / 8) * self.a_chans as u32;
        s.max(4)
    }

    /// PCM super-index durations are scaled by this factor.  Informational
    /// metadata only; never used for seeking.
    fn pcm_duration_scale(&self) -> Option<u32> {
        (self.a_fmt == WAVE_FMT_PCM).then(|| {
            (self.a_bits as u32)
                .wrapping_mul(self.a_rate)
                .wrapping_mul(self.a_chans as u32)
                / 800
        })
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct AviWriter<S: Storage> {
    file: S,
    /// Tracked write position; strictly increasing within a session.
    pos: u64,
    /// Set on a payload-write failure after the index was bumped; the file
    /// is unrecoverable and every later operation fails.
    poisoned: bool,

    width: u32,
    height: u32,
    fps: f64,
    compressor: [u8; 4],
    extradata: Vec<u8>,
    video_frames: u32,
    total_frames: u32,
    max_len: u32,

    legacy: LegacyIndex,
    video_super: Option<SuperIndex>,
    tracks: Vec<TrackState>,
    cur_track: usize,
    is_opendml: bool,

    comment_file: Option<File>,
}

impl AviWriter<File> {
    /// Create (or truncate) `path` and reserve the header region.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(AviError::Open)?;
        Self::new(file)
    }
}

impl<S: Storage> AviWriter<S> {
    pub fn new(mut file: S) -> Result<Self> {
        file.write_all(&[0u8; HEADER_BYTES as usize])
            .map_err(AviError::Write)?;
        Ok(AviWriter {
            file,
            pos: HEADER_BYTES,
            poisoned: false,
            width: 0,
            height: 0,
            fps: 0.0,
            compressor: [0; 4],
            extradata: Vec::new(),
            video_frames: 0,
            total_frames: 0,
            max_len: 0,
            legacy: LegacyIndex::default(),
            video_super: None,
            tracks: Vec::new(),
            cur_track: 0,
            is_opendml: false,
            comment_file: None,
        })
    }

    // ── Stream declaration ───────────────────────────────────────────────────

    /// Declare the video stream.  An `"RGB…"` compressor means uncompressed
    /// DIB and maps to a zeroed FourCC.  May be called again before the
    /// first write to amend the parameters.
    pub fn set_video(&mut self, width: u32, height: u32, fps: f64, compressor: &str) -> Result<()> {
        self.width = width;
        self.height = height;
        self.fps = fps;
        self.compressor = if compressor.starts_with("RGB") {
            [0; 4]
        } else {
            let mut c = [b' '; 4];
            for (d, s) in c.iter_mut().zip(compressor.bytes()) {
                *d = s;
            }
            c
        };
        self.update_header()
    }

    /// Codec-private bytes appended (even-padded) to the video `strf`.
    pub fn set_video_extradata(&mut self, extradata: Vec<u8>) {
        self.extradata = extradata;
    }

    /// Declare an additional audio track and select it.
    pub fn set_audio(
        &mut self,
        channels: u16,
        rate: u32,
        bits: u16,
        format: u16,
        mp3rate: u32,
    ) -> Result<()> {
        if self.tracks.len() >= MAX_TRACKS {
            return Err(AviError::TooManyTracks);
        }
        self.tracks.push(TrackState {
            a_chans: channels,
            a_rate: rate,
            a_bits: bits,
            a_fmt: format,
            mp3rate,
            ..TrackState::default()
        });
        self.cur_track = self.tracks.len() - 1;
        self.update_header()
    }

    pub fn set_audio_vbr(&mut self, vbr: bool) {
        if let Some(t) = self.tracks.get_mut(self.cur_track) {
            t.a_vbr = vbr;
        }
    }

    pub fn set_audio_bitrate(&mut self, kbps: u32) {
        if let Some(t) = self.tracks.get_mut(self.cur_track) {
            t.mp3rate = kbps;
        }
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

    pub fn audio_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Text file whose `TAG value` lines become the `LIST INFO` block at
    /// close.
    pub fn set_comment_file(&mut self, file: File) {
        self.comment_file = Some(file);
    }

    // ── Byte accounting ──────────────────────────────────────────────────────

    /// Bytes the file will occupy if closed now (data + pending idx1).
    pub fn bytes_written(&self) -> u64 {
        self.pos + 8 + 16 * self.legacy.len() as u64
    }

    /// Headroom before the single-RIFF ceiling.
    pub fn bytes_remaining(&self) -> u64 {
        AVI_MAX_LEN.saturating_sub(self.bytes_written())
    }

    pub fn video_frames(&self) -> u32 {
        self.video_frames
    }

    pub fn is_opendml(&self) -> bool {
        self.is_opendml
    }

    // ── Frame / chunk append ─────────────────────────────────────────────────

    pub fn write_frame(&mut self, data: &[u8], keyframe: bool) -> Result<()> {
        self.check_poisoned()?;
        let flags = if keyframe { AVIIF_KEYFRAME } else { 0 };
        if !self.is_opendml {
            self.legacy
                .push(fourcc::VIDEO_CHUNK, flags, self.pos, data.len() as u32);
        }
        self.add_odml_entry(None, keyframe, data.len() as u32)?;
        self.emit_chunk(fourcc::VIDEO_CHUNK, data)?;
        self.video_frames += 1;
        Ok(())
    }

    pub fn write_audio(&mut self, data: &[u8]) -> Result<()> {
        self.check_poisoned()?;
        if self.tracks.is_empty() {
            return Err(AviError::NotPermitted);
        }
        let tag = Fourcc::audio_chunk(self.cur_track);
        if !self.is_opendml {
            self.legacy
                .push(tag, AVIIF_KEYFRAME, self.pos, data.len() as u32);
        }
        self.add_odml_entry(Some(self.cur_track), true, data.len() as u32)?;
        self.emit_chunk(tag, data)?;
        let t = &mut self.tracks[self.cur_track];
        t.audio_bytes += data.len() as u64;
        t.audio_chunks += 1;
        Ok(())
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(AviError::Write(std::io::Error::new(
                std::io::ErrorKind::Other,
                "writer poisoned by an earlier payload-write failure",
            )));
        }
        Ok(())
    }

    fn emit_chunk(&mut self, tag: Fourcc, data: &[u8]) -> Result<()> {
        match append_chunk(&mut self.file, self.pos, tag, data) {
            Ok(new_pos) => {
                self.pos = new_pos;
                Ok(())
            }
            Err(e) => {
                // The extended index already holds this chunk.
                self.poisoned = true;
                Err(e)
            }
        }
    }

    // ── Extended index + rotation ────────────────────────────────────────────

    fn add_odml_entry(&mut self, track: Option<usize>, keyframe: bool, len: u32) -> Result<()> {
        let pos = self.pos;

        // First sample of a stream: allocate its super-index with standard
        // index 0.
        match track {
            None => {
                if self.video_super.is_none() {
                    self.video_super =
                        Some(SuperIndex::new(Fourcc::std_index(0), fourcc::VIDEO_CHUNK));
                }
            }
            Some(t) => {
                if self.tracks[t].superindex.is_none() {
                    self.tracks[t].superindex = Some(SuperIndex::new(
                        Fourcc::std_index(t + 1),
                        Fourcc::audio_chunk(t),
                    ));
                }
            }
        }

        // Bytes needed to close out the current sub-RIFF right now.
        let mut towrite: u64 = 0;
        if let Some(vs) = &self.video_super {
            towrite += vs.current().len() as u64 * 8 + 32;
            if vs.entries_in_use() == 1 {
                // Sub-RIFF 0 also owes the idx1 and the header.
                towrite += self.legacy.len() as u64 * 16 + 8 + HEADER_BYTES;
            }
        }
        for t in &self.tracks {
            if let Some(si) = &t.superindex {
                towrite += si.current().len() as u64 * 8 + 32;
            }
        }
        towrite += len as u64 + (len as u64 & 1) + 8;

        let rotate = self
            .video_super
            .as_ref()
            .is_some_and(|vs| pos + towrite > NEW_RIFF_THRES * vs.entries_in_use() as u64);
        if rotate {
            self.rotate()?;
        }

        match track {
            None => {
                self.video_super
                    .as_mut()
                    .expect("allocated above")
                    .current_mut()
                    .push(keyframe, self.pos, len);
                self.total_frames += 1;
            }
            Some(t) => {
                self.tracks[t]
                    .superindex
                    .as_mut()
                    .expect("allocated above")
                    .current_mut()
                    .push(keyframe, self.pos, len);
            }
        }
        if len > self.max_len {
            self.max_len = len;
        }
        Ok(())
    }

    /// Open the next sub-RIFF: rotate every stream's standard index, dump
    /// the completed ones as `ix##` chunks, emit `idx1` on the first
    /// rotation, and write the 16-byte sub-RIFF stub.
    fn rotate(&mut self) -> Result<()> {
        {
            let vs = self.video_super.as_mut().expect("rotation requires video");
            info!(sub_riff = vs.entries_in_use(), "starting a new RIFF chunk");
            vs.rotate()?;
        }
        for t in &mut self.tracks {
            if let Some(si) = &mut t.superindex {
                si.rotate()?;
            }
        }

        let cur = self.video_super.as_ref().unwrap().entries_in_use() - 1;

        // Dump the just-completed previous standard index of every stream.
        // Streams that joined late own fewer indices than video, so each is
        // flushed at its own count.
        let k = self.video_super.as_ref().unwrap().entries_in_use() - 2;
        flush_std_index(
            &mut self.file,
            &mut self.pos,
            self.video_super.as_mut().unwrap(),
            k,
            None,
        )?;
        for i in 0..self.tracks.len() {
            let scale = self.tracks[i].pcm_duration_scale();
            let Some(si) = self.tracks[i].superindex.as_mut() else {
                continue;
            };
            let k = si.entries_in_use() - 2;
            flush_std_index(&mut self.file, &mut self.pos, si, k, scale)?;
        }

        // Promotion from single-RIFF: the legacy index covers sub-RIFF 0.
        if cur == 1 {
            let payload = self.legacy.to_bytes();
            self.pos = append_chunk(&mut self.file, self.pos, fourcc::IDX1, &payload)?;
        }

        // Stub for the new sub-RIFF; both lengths are fixed up at close.
        self.pos = append_chunk(&mut self.file, self.pos, fourcc::RIFF, b"AVIXLIST\0\0\0\0movi")?;

        let base = self.pos - 16 - 8;
        self.video_super.as_mut().unwrap().current_mut().base_offset = base;
        for t in &mut self.tracks {
            if let Some(si) = &mut t.superindex {
                si.current_mut().base_offset = base;
            }
        }
        self.is_opendml = true;
        Ok(())
    }

    // ── Provisional header ───────────────────────────────────────────────────

    /// Rewrite the header with zero frame counts but maximum movi length, so
    /// an interrupted write still yields a parseable file.
    fn update_header(&mut self) -> Result<()> {
        let movi_len = (AVI_MAX_LEN - HEADER_BYTES + 4) as u32;
        let (frate, ms_per_frame) = self.frame_rate_fields();

        let mut h = HeaderBuf::new();
        h.put_fcc(fourcc::RIFF);
        h.put_u32(movi_len);
        h.put_fcc(fourcc::AVI);

        h.put_fcc(fourcc::LIST);
        h.put_u32(0);
        let hdrl_start = h.pos();
        h.put_fcc(fourcc::HDRL);

        h.put_fcc(fourcc::AVIH);
        h.put_u32(56);
        h.put_u32(ms_per_frame);
        h.put_u32(0); // max bytes/sec
        h.put_u32(0); // padding granularity
        h.put_u32(AVIF_ISINTERLEAVED | AVIF_HASINDEX);
        h.put_u32(0); // no frames yet
        h.put_u32(0); // initial frames
        h.put_u32(self.tracks.len() as u32 + 1);
        h.put_u32(0); // suggested buffer size
        h.put_u32(self.width);
        h.put_u32(self.height);
        h.put_u32(0);
        h.put_u32(0);
        h.put_u32(0);
        h.put_u32(0);

        // Video stream list.
        h.put_fcc(fourcc::LIST);
        h.put_u32(0);
        let strl_start = h.pos();
        h.put_fcc(fourcc::STRL);
        h.put_fcc(fourcc::STRH);
        h.put_u32(56);
        h.put_fcc(fourcc::VIDS);
        h.put_bytes(&self.compressor);
        h.put_u32(0); // flags
        h.put_u32(0); // priority/language
        h.put_u32(0); // initial frames
        h.put_u32(FRAME_RATE_SCALE);
        h.put_u32(frate);
        h.put_u32(0); // start
        h.put_u32(0); // no frames yet
        h.put_u32(0); // suggested buffer size
        h.put_u32(0xffff_ffff); // quality
        h.put_u32(0); // sample size
        h.put_u32(0);
        h.put_u32(0);
        self.put_video_strf(&mut h);
        h.patch_u32(strl_start - 4, (h.pos() - strl_start) as u32);

        // Audio stream lists, minimal form.
        for t in &self.tracks {
            let sampsize = t.sampsize();
            let byte_rate = 1000 * t.mp3rate / 8;

            h.put_fcc(fourcc::LIST);
            h.put_u32(0);
            let strl_start = h.pos();
            h.put_fcc(fourcc::STRL);
            h.put_fcc(fourcc::STRH);
            h.put_u32(56);
            h.put_fcc(fourcc::AUDS);
            h.put_u32(0); // handler
            h.put_u32(0); // flags
            h.put_u32(0); // priority/language
            h.put_u32(0); // initial frames
            h.put_u32(sampsize / 4);
            h.put_u32(byte_rate);
            h.put_u32(0); // start
            h.put_u32((4 * t.audio_bytes / sampsize as u64) as u32);
            h.put_u32(0); // suggested buffer size
            h.put_u32(0xffff_ffff); // quality
            h.put_u32(sampsize / 4);
            h.put_u32(0);
            h.put_u32(0);

            h.put_fcc(fourcc::STRF);
            h.put_u32(16);
            h.put_u16(t.a_fmt);
            h.put_u16(t.a_chans);
            h.put_u32(t.a_rate);
            h.put_u32(byte_rate);
            h.put_u16((sampsize / 4) as u16);
            h.put_u16(t.a_bits);
            h.patch_u32(strl_start - 4, (h.pos() - strl_start) as u32);
        }

        h.patch_u32(hdrl_start - 4, (h.pos() - hdrl_start) as u32);

        self.finish_header(&mut h, movi_len)?;
        self.commit_header(&h, false)
    }

    fn frame_rate_fields(&self) -> (u32, u32) {
        if self.fps < 0.001 {
            (0, 0)
        } else {
            (
                (FRAME_RATE_SCALE as f64 * self.fps + 0.5) as u32,
                (1_000_000.0 / self.fps + 0.5) as u32,
            )
        }
    }

    /// BITMAPINFOHEADER `strf` with optional even-padded extradata.
    fn put_video_strf(&self, h: &mut HeaderBuf) {
        let xd = self.extradata.len() as u32;
        let xd_align = pad_even(xd as u64) as u32;
        h.put_fcc(fourcc::STRF);
        h.put_u32(40 + xd_align);
        h.put_u32(40 + xd);
        h.put_u32(self.width);
        h.put_u32(self.height);
        h.put_u16(1); // planes
        h.put_u16(24); // bit count
        h.put_bytes(&self.compressor);
        h.put_u32(self.width * self.height * 3);
        h.put_u32(0); // x pels/meter
        h.put_u32(0); // y pels/meter
        h.put_u32(0); // colors used
        h.put_u32(0); // colors important
        if xd > 0 {
            h.put_bytes(&self.extradata);
            if xd != xd_align {
                h.put_u8(0);
            }
        }
    }

    /// JUNK pad + `LIST … movi` trailer.  Fails if the header outgrew its
    /// fixed budget.
    fn finish_header(&self, h: &mut HeaderBuf, movi_len: u32) -> Result<()> {
        let njunk = h.junk_budget();
        if njunk <= 0 {
            return Err(AviError::Close(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "header does not fit its reserved 2048 bytes",
            )));
        }
        h.put_fcc(fourcc::JUNK);
        h.put_u32(njunk as u32);
        h.put_zeros(njunk as usize);
        h.put_fcc(fourcc::LIST);
        h.put_u32(movi_len);
        h.put_fcc(fourcc::MOVI);
        Ok(())
    }

    fn commit_header(&mut self, h: &HeaderBuf, truncate: bool) -> Result<()> {
        self.file.seek(SeekFrom::Start(0)).map_err(AviError::Close)?;
        self.file.write_all(h.as_bytes()).map_err(AviError::Close)?;
        if truncate {
            self.file.truncate(self.pos).map_err(AviError::Close)?;
        } else {
            self.file
                .seek(SeekFrom::Start(self.pos))
                .map_err(AviError::Close)?;
        }
        Ok(())
    }

    // ── Close — the deferred header layout pass ──────────────────────────────

    /// Flush indices, rebuild and commit the final header, truncate, and
    /// patch sub-RIFF lengths.  An idx1/ix## write failure is recorded and
    /// surfaced only after the header commit; the file may still be usable.
    pub fn finish(&mut self) -> Result<()> {
        self.check_poisoned()?;

        let mut index_error: Option<AviError> = None;
        let mut has_index = true;
        let movi_len;
        let mut end_base = 0u64;

        if self.is_opendml {
            let k = self.video_super.as_ref().unwrap().entries_in_use() - 1;
            if let Err(e) = flush_std_index(
                &mut self.file,
                &mut self.pos,
                self.video_super.as_mut().unwrap(),
                k,
                None,
            ) {
                warn!(error = %e, "failed to flush the final video standard index");
                index_error.get_or_insert(e);
            }
            for i in 0..self.tracks.len() {
                let scale = self.tracks[i].pcm_duration_scale();
                let Some(si) = self.tracks[i].superindex.as_mut() else {
                    continue;
                };
                let k = si.entries_in_use() - 1;
                if let Err(e) = flush_std_index(&mut self.file, &mut self.pos, si, k, scale) {
                    warn!(error = %e, "failed to flush an audio standard index");
                    index_error.get_or_insert(e);
                }
            }
            // Where the next sub-RIFF would have begun; closes the fix-up
            // arithmetic for the last real one.
            end_base = self.pos;

            let base1 = self.video_super.as_ref().unwrap().std_index(1).base_offset;
            movi_len = (base1 - HEADER_BYTES + 4 - self.legacy.len() as u64 * 16 - 8) as u32;
        } else {
            // The movi list ends where the data ends; idx1 sits after it.
            movi_len = (self.pos - HEADER_BYTES + 4) as u32;
            let payload = self.legacy.to_bytes();
            match append_chunk(&mut self.file, self.pos, fourcc::IDX1, &payload) {
                Ok(new_pos) => self.pos = new_pos,
                Err(e) => {
                    warn!(error = %e, "idx1 write failed; file may still be usable");
                    has_index = false;
                    index_error = Some(match e {
                        AviError::Write(io) => AviError::WriteIndex(io),
                        other => other,
                    });
                }
            }
        }

        let h = self.build_final_header(movi_len, has_index)?;
        self.commit_header(&h, true)?;

        if self.is_opendml {
            self.fixup_sub_riffs(end_base)?;
        }

        self.comment_file = None;

        match index_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn build_final_header(&mut self, movi_len: u32, has_index: bool) -> Result<HeaderBuf> {
        let (frate, ms_per_frame) = self.frame_rate_fields();

        let mut h = HeaderBuf::new();
        h.put_fcc(fourcc::RIFF);
        if self.is_opendml {
            // Size of the first sub-RIFF, not the whole file.
            let base1 = self.video_super.as_ref().unwrap().std_index(1).base_offset;
            h.put_u32((base1 - 8) as u32);
        } else {
            h.put_u32((self.pos - 8) as u32);
        }
        h.put_fcc(fourcc::AVI);

        h.put_fcc(fourcc::LIST);
        h.put_u32(0);
        let hdrl_start = h.pos();
        h.put_fcc(fourcc::HDRL);

        let mut flags = AVIF_ISINTERLEAVED;
        if has_index {
            flags |= AVIF_HASINDEX;
        }
        h.put_fcc(fourcc::AVIH);
        h.put_u32(56);
        h.put_u32(ms_per_frame);
        h.put_u32(0); // max bytes/sec
        h.put_u32(0); // padding granularity
        h.put_u32(flags);
        h.put_u32(self.video_frames);
        h.put_u32(0); // initial frames
        h.put_u32(self.tracks.len() as u32 + 1);
        h.put_u32(0); // suggested buffer size
        h.put_u32(self.width);
        h.put_u32(self.height);
        h.put_u32(0);
        h.put_u32(0);
        h.put_u32(0);
        h.put_u32(0);

        // Video stream list.
        h.put_fcc(fourcc::LIST);
        h.put_u32(0);
        let strl_start = h.pos();
        h.put_fcc(fourcc::STRL);
        h.put_fcc(fourcc::STRH);
        h.put_u32(56);
        h.put_fcc(fourcc::VIDS);
        h.put_bytes(&self.compressor);
        h.put_u32(0); // flags
        h.put_u32(0); // priority/language
        h.put_u32(0); // initial frames
        h.put_u32(FRAME_RATE_SCALE);
        h.put_u32(frate);
        h.put_u32(0); // start
        h.put_u32(self.video_frames);
        h.put_u32(self.max_len); // suggested buffer size
        h.put_u32(0); // quality
        h.put_u32(0); // sample size
        h.put_u32(0);
        h.put_u32(0);
        self.put_video_strf(&mut h);
        if self.is_opendml {
            put_super_index(&mut h, self.video_super.as_ref().unwrap());
        }
        h.patch_u32(strl_start - 4, (h.pos() - strl_start) as u32);

        // Audio stream lists.
        for t in &self.tracks {
            let mut sampsize = t.sampsize();
            if t.a_fmt == WAVE_FMT_PCM {
                sampsize *= 4;
                if t.a_chans < 2 {
                    sampsize /= 2;
                }
            }
            let block_align: u32 = if t.a_rate < 32000 { 576 } else { 1152 };
            let byte_rate = if t.a_fmt == WAVE_FMT_PCM {
                t.a_rate * sampsize / 4
            } else {
                1000 * t.mp3rate / 8
            };

            h.put_fcc(fourcc::LIST);
            h.put_u32(0);
            let strl_start = h.pos();
            h.put_fcc(fourcc::STRL);
            h.put_fcc(fourcc::STRH);
            h.put_u32(56);
            h.put_fcc(fourcc::AUDS);
            h.put_u32(0); // handler
            h.put_u32(0); // flags
            h.put_u32(0); // priority/language
            h.put_u32(0); // initial frames
            if t.a_fmt == WAVE_FMT_MP3 && t.a_vbr {
                h.put_u32(block_align); // scale
                h.put_u32(t.a_rate); // rate
                h.put_u32(0); // start
                h.put_u32(t.audio_chunks); // length in chunks
                h.put_u32(0); // suggested buffer size
                h.put_u32(0); // quality
                h.put_u32(0); // sample size: 0 signals VBR
                h.put_u32(0);
                h.put_u32(0);
            } else {
                h.put_u32(sampsize / 4);
                h.put_u32(byte_rate);
                h.put_u32(0); // start
                h.put_u32((4 * t.audio_bytes / sampsize as u64) as u32);
                h.put_u32(0); // suggested buffer size
                h.put_u32(0xffff_ffff); // quality
                h.put_u32(sampsize / 4);
                h.put_u32(0);
                h.put_u32(0);
            }

            h.put_fcc(fourcc::STRF);
            if t.a_fmt == WAVE_FMT_MP3 {
                // WAVEFORMATEX + MPEGLAYER3WAVEFORMAT trailer.
                h.put_u32(30);
                h.put_u16(t.a_fmt);
                h.put_u16(t.a_chans);
                h.put_u32(t.a_rate);
                h.put_u32(1000 * t.mp3rate / 8);
                let align = if t.a_vbr { block_align } else { sampsize / 4 };
                h.put_u16(align as u16);
                h.put_u16(t.a_bits);
                h.put_u16(12); // cbSize
                h.put_u16(1); // wID
                h.put_u32(2); // fdwFlags
                h.put_u16(block_align as u16); // nBlockSize
                h.put_u16(1); // nFramesPerBlock
                h.put_u16(0); // nCodecDelay
            } else {
                h.put_u32(18);
                h.put_u16(t.a_fmt);
                h.put_u16(t.a_chans);
                h.put_u32(t.a_rate);
                h.put_u32(byte_rate);
                h.put_u16((sampsize / 4) as u16);
                h.put_u16(t.a_bits);
                h.put_u16(0); // cbSize
            }

            if self.is_opendml {
                if let Some(si) = &t.superindex {
                    put_super_index(&mut h, si);
                }
            }
            h.patch_u32(strl_start - 4, (h.pos() - strl_start) as u32);
        }

        if self.is_opendml {
            h.put_fcc(fourcc::LIST);
            h.put_u32(16);
            h.put_fcc(fourcc::ODML);
            h.put_fcc(fourcc::DMLH);
            h.put_u32(4);
            h.put_u32(self.total_frames);
        }

        h.patch_u32(hdrl_start - 4, (h.pos() - hdrl_start) as u32);

        self.put_info_list(&mut h)?;
        self.finish_header(&mut h, movi_len)?;
        Ok(h)
    }

    /// `LIST INFO` with a leading `ISFT` software tag, then the recognised
    /// lines of the comment file.  Truncated silently if space runs out.
    fn put_info_list(&mut self, h: &mut HeaderBuf) -> Result<()> {
        h.put_fcc(fourcc::LIST);
        let info_start = h.pos();
        h.put_u32(0); // patched below
        h.put_fcc(fourcc::INFO);

        let id = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));
        let real_id_len = id.len() as u32 + 1;
        let id_len = pad_even(real_id_len as u64) as usize;
        h.put_fcc(fourcc::ISFT);
        h.put_u32(real_id_len);
        h.put_bytes(id.as_bytes());
        h.put_zeros(id_len - id.len());

        let mut info_len = 0usize;
        if let Some(file) = self.comment_file.as_mut() {
            let space_left = h.junk_budget().max(0) as usize;
            info_len = put_comments(file, h, space_left);
        }

        h.patch_u32(info_start, (info_len + id_len + 4 + 4 + 4) as u32);
        Ok(())
    }

    /// Patch every later sub-RIFF's chunk length and inner `LIST movi`
    /// length now that the boundaries are known.
    fn fixup_sub_riffs(&mut self, end_base: u64) -> Result<()> {
        let vs = self.video_super.as_ref().unwrap();
        let n = vs.entries_in_use();
        for k in 1..n {
            let base = vs.std_index(k).base_offset;
            let next = if k + 1 < n {
                vs.std_index(k + 1).base_offset
            } else {
                end_base
            };
            let len = (next - base - 8) as u32;
            let patch = |file: &mut S| -> std::io::Result<()> {
                file.seek(SeekFrom::Start(base + 4))?;
                file.write_all(&len.to_le_bytes())?;
                file.seek(SeekFrom::Start(base + 16))?;
                file.write_all(&(len - 12).to_le_bytes())?;
                Ok(())
            };
            patch(&mut self.file).map_err(AviError::Close)?;
        }
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Write standard index `k` of a stream as its `ix##` chunk and fill the
/// matching super-index entry.
fn flush_std_index<S: Storage>(
    file: &mut S,
    pos: &mut u64,
    si: &mut SuperIndex,
    k: usize,
    pcm_scale: Option<u32>,
) -> Result<()> {
    let std = si.std_index(k);
    let fcc = std.fcc;
    let payload = std.to_bytes();
    let mut duration = std.len().saturating_sub(1) as u32;
    if let Some(f) = pcm_scale {
        duration = duration.wrapping_mul(f);
    }
    let at = *pos;
    *pos = append_chunk(file, *pos, fcc, &payload)?;
    si.entries[k] = SuperEntry { offset: at, size: payload.len() as u32, duration };
    Ok(())
}

/// Serialize an `indx` super-index chunk into the header buffer.
fn put_super_index(h: &mut HeaderBuf, si: &SuperIndex) {
    h.put_fcc(fourcc::INDX);
    h.put_u32(si.chunk_payload_size());
    h.put_u16(4); // wLongsPerEntry
    h.put_u8(0); // bIndexSubType
    h.put_u8(INDEX_OF_INDEXES);
    h.put_u32(si.entries.len() as u32);
    h.put_fcc(si.chunk_id);
    h.put_u32(0);
    h.put_u32(0);
    h.put_u32(0);
    for e in &si.entries {
        h.put_u32(e.offset as u32);
        h.put_u32((e.offset >> 32) as u32);
        h.put_u32(e.size);
        h.put_u32(e.duration);
    }
}

/// The closed set of INFO tags accepted from the comment file.
fn valid_info_tag(tag: &[u8]) -> bool {
    matches!(
        tag,
        b"IARL" | b"IART" | b"ICMS" | b"ICMT" | b"ICOP" | b"ICRD" | b"ICRP" | b"IDIM" | b"IDPI"
            | b"IENG" | b"IGNR" | b"IKEY" | b"ILGT" | b"IMED" | b"INAM" | b"IPLT" | b"IPRD"
            | b"ISBJ" | b"ISHP" | b"ISRC" | b"ISRF" | b"ITCH"
    )
}

/// Parse `TAG value` lines from the comment file into INFO sub-chunks.
/// Lines starting with `#`, blank lines, and unknown tags are skipped.
/// Returns the number of header bytes consumed.
fn put_comments(file: &mut File, h: &mut HeaderBuf, space_left: usize) -> usize {
    let mut data = Vec::new();
    if file.read_to_end(&mut data).is_err() {
        return 0;
    }

    let mut written = 0usize;
    for line in data.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() || line[0] == b'#' || line.len() < 4 {
            continue;
        }
        let (tag, rest) = line.split_at(4);
        if !valid_info_tag(tag) {
            continue;
        }
        let value: &[u8] = rest
            .iter()
            .position(|&b| b != b' ' && b != b'\t')
            .map(|i| &rest[i..])
            .unwrap_or(&[]);
        if value.is_empty() {
            continue;
        }

        let real = value.len() + 1; // trailing NUL
        let padded = pad_even(real as u64) as usize;
        if written + 8 + padded > space_left {
            break;
        }
        h.put_bytes(tag);
        h.put_u32(real as u32);
        h.put_bytes(value);
        h.put_zeros(padded - value.len());
        written += 8 + padded;
    }
    written
}
