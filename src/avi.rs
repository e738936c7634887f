//! High-level [`AviFile`] API — the primary embedding surface.
//!
//! ```no_run
//! use avimux::AviFile;
//!
//! // Write
//! let mut avi = AviFile::create("out.avi")?;
//! avi.set_video(320, 240, 25.0, "XVID")?;
//! avi.write_frame(&[0u8; 4096], true)?;
//! avi.close()?;
//!
//! // Read
//! let mut avi = AviFile::open("out.avi", true)?;
//! let mut frame = vec![0u8; avi.max_video_chunk() as usize];
//! while let Some((len, keyframe)) = avi.read_frame(&mut frame)? {
//!     let _ = (&frame[..len], keyframe);
//! }
//! # Ok::<(), avimux::AviError>(())
//! ```
//!
//! A handle is exclusively owned and single-threaded: one reader **or** one
//! writer, never both.  Calls that do not fit the open mode fail with
//! [`AviError::NotPermitted`].

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{AviError, Result};
use crate::fourcc::Fourcc;
use crate::reader::{AudioTrack, AviReader};
use crate::writer::AviWriter;

#[derive(Debug)]
enum AviMode {
    Read(AviReader<File>),
    Write(AviWriter<File>),
}

#[derive(Debug)]
pub struct AviFile {
    path: PathBuf,
    mode: AviMode,
}

impl AviFile {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Open for writing, truncating any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let writer = AviWriter::create(&path)?;
        Ok(AviFile { path, mode: AviMode::Write(writer) })
    }

    /// Open for reading.  With `build_index` the frame/chunk index is
    /// reconstructed; without it only the headers are parsed.
    pub fn open<P: AsRef<Path>>(path: P, build_index: bool) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path).map_err(AviError::Open)?;
        let reader = AviReader::open(file, build_index)?;
        Ok(AviFile { path, mode: AviMode::Read(reader) })
    }

    /// Open for reading with the index taken from an external `AVIIDX1`
    /// sidecar file.
    pub fn open_with_sidecar<P: AsRef<Path>, Q: AsRef<Path>>(path: P, sidecar: Q) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path).map_err(AviError::Open)?;
        let reader = AviReader::open_with_sidecar(file, sidecar.as_ref())?;
        Ok(AviFile { path, mode: AviMode::Read(reader) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> Result<&AviReader<File>> {
        match &self.mode {
            AviMode::Read(r) => Ok(r),
            AviMode::Write(_) => Err(AviError::NotPermitted),
        }
    }

    fn reader_mut(&mut self) -> Result<&mut AviReader<File>> {
        match &mut self.mode {
            AviMode::Read(r) => Ok(r),
            AviMode::Write(_) => Err(AviError::NotPermitted),
        }
    }

    fn writer_mut(&mut self) -> Result<&mut AviWriter<File>> {
        match &mut self.mode {
            AviMode::Write(w) => Ok(w),
            AviMode::Read(_) => Err(AviError::NotPermitted),
        }
    }

    // ── Write surface ────────────────────────────────────────────────────────

    pub fn set_video(&mut self, width: u32, height: u32, fps: f64, compressor: &str) -> Result<()> {
        self.writer_mut()?.set_video(width, height, fps, compressor)
    }

    pub fn set_video_extradata(&mut self, extradata: Vec<u8>) -> Result<()> {
        self.writer_mut()?.set_video_extradata(extradata);
        Ok(())
    }

    pub fn set_audio(
        &mut self,
        channels: u16,
        rate: u32,
        bits: u16,
        format: u16,
        mp3rate: u32,
    ) -> Result<()> {
        self.writer_mut()?.set_audio(channels, rate, bits, format, mp3rate)
    }

    pub fn set_audio_vbr(&mut self, vbr: bool) -> Result<()> {
        self.writer_mut()?.set_audio_vbr(vbr);
        Ok(())
    }

    pub fn set_audio_bitrate(&mut self, kbps: u32) -> Result<()> {
        self.writer_mut()?.set_audio_bitrate(kbps);
        Ok(())
    }

    pub fn set_comment_file(&mut self, file: File) -> Result<()> {
        self.writer_mut()?.set_comment_file(file);
        Ok(())
    }

    pub fn write_frame(&mut self, data: &[u8], keyframe: bool) -> Result<()> {
        self.writer_mut()?.write_frame(data, keyframe)
    }

    /// Write an audio chunk to the currently selected track.
    pub fn write_audio(&mut self, data: &[u8]) -> Result<()> {
        self.writer_mut()?.write_audio(data)
    }

    pub fn bytes_written(&self) -> u64 {
        match &self.mode {
            AviMode::Write(w) => w.bytes_written(),
            AviMode::Read(_) => 0,
        }
    }

    pub fn bytes_remaining(&self) -> u64 {
        match &self.mode {
            AviMode::Write(w) => w.bytes_remaining(),
            AviMode::Read(_) => 0,
        }
    }

    /// Close the handle.  For a writer this runs the deferred header layout
    /// pass; a recorded index-write failure surfaces here even though the
    /// header itself was committed.
    pub fn close(mut self) -> Result<()> {
        match &mut self.mode {
            AviMode::Write(w) => w.finish(),
            AviMode::Read(_) => Ok(()),
        }
    }

    // ── Shared accessors ─────────────────────────────────────────────────────

    pub fn audio_tracks(&self) -> usize {
        match &self.mode {
            AviMode::Read(r) => r.audio_tracks(),
            AviMode::Write(w) => w.audio_tracks(),
        }
    }

    pub fn set_audio_track(&mut self, track: usize) -> Result<()> {
        match &mut self.mode {
            AviMode::Read(r) => r.set_audio_track(track),
            AviMode::Write(w) => w.set_audio_track(track),
        }
    }

    pub fn audio_track(&self) -> usize {
        match &self.mode {
            AviMode::Read(r) => r.audio_track(),
            AviMode::Write(w) => w.audio_track(),
        }
    }

    // ── Read surface ─────────────────────────────────────────────────────────

    pub fn video_frames(&self) -> usize {
        self.reader().map(|r| r.video_frames()).unwrap_or(0)
    }

    pub fn width(&self) -> u32 {
        self.reader().map(|r| r.width()).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.reader().map(|r| r.height()).unwrap_or(0)
    }

    pub fn frame_rate(&self) -> f64 {
        self.reader().map(|r| r.frame_rate()).unwrap_or(0.0)
    }

    pub fn video_compressor(&self) -> Fourcc {
        self.reader()
            .map(|r| r.video_compressor())
            .unwrap_or(Fourcc([0; 4]))
    }

    pub fn max_video_chunk(&self) -> u32 {
        self.reader().map(|r| r.max_video_chunk()).unwrap_or(0)
    }

    pub fn is_opendml(&self) -> bool {
        match &self.mode {
            AviMode::Read(r) => r.is_opendml(),
            AviMode::Write(w) => w.is_opendml(),
        }
    }

    /// Metadata of the selected audio track.
    pub fn audio(&self) -> Result<&AudioTrack> {
        self.reader()?.current_track().ok_or(AviError::NoIndex)
    }

    /// Metadata of an arbitrary audio track.
    pub fn audio_at(&self, track: usize) -> Result<&AudioTrack> {
        self.reader()?.track(track).ok_or(AviError::NoIndex)
    }

    /// The reconstructed video index; empty when opened without one.
    pub fn video_index(&self) -> &[crate::index::VideoIndexEntry] {
        self.reader().map(|r| r.video_index()).unwrap_or(&[])
    }

    pub fn frame_size(&self, frame: usize) -> Option<u32> {
        self.reader().ok().and_then(|r| r.frame_size(frame))
    }

    pub fn audio_size(&self, chunk: usize) -> Option<u32> {
        self.reader().ok().and_then(|r| r.audio_size(chunk))
    }

    /// Absolute file offset of a frame's payload.
    pub fn video_position(&self, frame: usize) -> Option<u64> {
        self.reader().ok().and_then(|r| r.video_position(frame))
    }

    // ── Random access ────────────────────────────────────────────────────────

    pub fn seek_start(&mut self) -> Result<()> {
        self.reader_mut()?.seek_start()
    }

    pub fn set_video_position(&mut self, frame: i64) -> Result<()> {
        self.reader_mut()?.set_video_position(frame)
    }

    pub fn read_frame(&mut self, buf: &mut [u8]) -> Result<Option<(usize, bool)>> {
        self.reader_mut()?.read_frame(buf)
    }

    pub fn set_audio_position(&mut self, byte: u64) -> Result<()> {
        self.reader_mut()?.set_audio_position(byte)
    }

    pub fn set_audio_position_index(&mut self, chunk: usize) -> Result<()> {
        self.reader_mut()?.set_audio_position_index(chunk)
    }

    pub fn audio_position_index(&self) -> Result<usize> {
        self.reader()?.audio_position_index()
    }

    pub fn read_audio(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reader_mut()?.read_audio(buf)
    }

    pub fn read_audio_chunk(&mut self, buf: Option<&mut [u8]>) -> Result<Option<usize>> {
        self.reader_mut()?.read_audio_chunk(buf)
    }

    pub fn can_read_audio(&self) -> Result<bool> {
        self.reader()?.can_read_audio()
    }
}
