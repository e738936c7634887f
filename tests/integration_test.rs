use avimux::{pad_even, AviError, AviFile, HEADER_BYTES, NEW_RIFF_THRES};
use proptest::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// Write a plain video-only file: 100 zero frames of 4096 bytes, a keyframe
/// every 10th frame.
fn write_basic_video(path: &std::path::Path) {
    let mut avi = AviFile::create(path).unwrap();
    avi.set_video(320, 240, 25.0, "XVID").unwrap();
    for i in 0..100 {
        avi.write_frame(&[0u8; 4096], i % 10 == 0).unwrap();
    }
    avi.close().unwrap();
}

fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    (0..haystack.len().saturating_sub(needle.len()))
        .filter(|&i| &haystack[i..i + needle.len()] == needle)
        .collect()
}

#[test]
fn s1_video_round_trip() {
    let tmp = NamedTempFile::new().unwrap();
    write_basic_video(tmp.path());

    let mut avi = AviFile::open(tmp.path(), true).unwrap();
    assert_eq!(avi.video_frames(), 100);
    assert_eq!(avi.width(), 320);
    assert_eq!(avi.height(), 240);
    assert!((avi.frame_rate() - 25.0).abs() < 1e-6);
    assert_eq!(avi.video_compressor().as_bytes(), b"XVID");
    assert_eq!(avi.max_video_chunk(), 4096);
    assert!(!avi.is_opendml());

    let mut buf = vec![0u8; 4096];
    for i in 0..100 {
        let (len, key) = avi.read_frame(&mut buf).unwrap().expect("frame present");
        assert_eq!(len, 4096);
        assert_eq!(key, i % 10 == 0, "keyframe flag of frame {i}");
    }
    assert_eq!(avi.read_frame(&mut buf).unwrap(), None);

    // The file is truncated to the final write position: header + 100
    // chunks + idx1.
    let expected = HEADER_BYTES + 100 * (8 + 4096) + 8 + 100 * 16;
    assert_eq!(std::fs::metadata(tmp.path()).unwrap().len(), expected);
}

#[test]
fn s2_stream_lists_and_strf_sizes() {
    let tmp = NamedTempFile::new().unwrap();
    let mut avi = AviFile::create(tmp.path()).unwrap();
    avi.set_video(640, 480, 30.0, "DIVX").unwrap();
    avi.set_audio(2, 44100, 16, 0x55, 128).unwrap(); // MP3
    avi.set_audio_vbr(true).unwrap();
    avi.set_audio(2, 48000, 16, 0x01, 0).unwrap(); // PCM

    avi.write_frame(&[1u8; 512], true).unwrap();
    avi.set_audio_track(0).unwrap();
    avi.write_audio(&[2u8; 384]).unwrap();
    avi.set_audio_track(1).unwrap();
    avi.write_audio(&[3u8; 192]).unwrap();
    avi.close().unwrap();

    let header = &std::fs::read(tmp.path()).unwrap()[..HEADER_BYTES as usize];

    // One strl per stream.
    assert_eq!(find_all(header, b"strl").len(), 3);

    // strf payload sizes: 40 for video, 30 for the MP3 path, 18 for PCM.
    let sizes: Vec<u32> = find_all(header, b"strf")
        .iter()
        .map(|&at| u32::from_le_bytes(header[at + 4..at + 8].try_into().unwrap()))
        .collect();
    assert_eq!(sizes, vec![40, 30, 18]);

    // Single-RIFF file: no OpenDML structures in the header.
    assert!(find_all(header, b"indx").is_empty());

    // Sample size 0 in the strh signals VBR on read-back.
    let avi = AviFile::open(tmp.path(), true).unwrap();
    assert_eq!(avi.audio_tracks(), 2);
    assert!(avi.audio_at(0).unwrap().a_vbr);
    assert!(!avi.audio_at(1).unwrap().a_vbr);
    assert_eq!(avi.audio_at(0).unwrap().a_rate, 44100);
    assert_eq!(avi.audio_at(1).unwrap().a_rate, 48000);
}

#[test]
fn s5_sidecar_index() {
    let tmp = NamedTempFile::new().unwrap();
    let mut avi = AviFile::create(tmp.path()).unwrap();
    avi.set_video(160, 120, 15.0, "MJPG").unwrap();
    avi.set_audio(1, 8000, 8, 0x01, 0).unwrap();
    for i in 0..10 {
        avi.write_frame(&[i as u8; 100], i == 0).unwrap();
    }
    for _ in 0..20 {
        avi.write_audio(&[7u8; 50]).unwrap();
    }
    avi.close().unwrap();

    // Harvest the real layout, then express it as a sidecar.
    let probe = AviFile::open(tmp.path(), true).unwrap();
    let mut sidecar = NamedTempFile::new().unwrap();
    writeln!(sidecar, "AVIIDX1 generated for test").unwrap();
    writeln!(sidecar, "comment line").unwrap();
    for e in probe.video_index() {
        writeln!(
            sidecar,
            "00db 1 0 0 {} {} {} 0.0",
            e.pos - 8,
            e.len,
            u8::from(e.key)
        )
        .unwrap();
    }
    for e in &probe.audio_at(0).unwrap().index {
        writeln!(sidecar, "01wb 2 0 0 {} {} 1 0.0", e.pos - 8, e.len).unwrap();
    }
    drop(probe);
    sidecar.flush().unwrap();

    let mut avi = AviFile::open_with_sidecar(tmp.path(), sidecar.path()).unwrap();
    assert_eq!(avi.video_frames(), 10);
    assert_eq!(avi.audio_at(0).unwrap().audio_chunks(), 20);
    assert_eq!(avi.audio_at(0).unwrap().audio_bytes, 20 * 50);

    let mut buf = vec![0u8; 100];
    let (len, key) = avi.read_frame(&mut buf).unwrap().unwrap();
    assert_eq!((len, key), (100, true));
    assert_eq!(&buf[..4], &[0, 0, 0, 0]);
}

#[test]
fn audio_positioning_is_byte_accurate() {
    let lens = [13usize, 1, 200, 77, 31];
    let mut stream = Vec::new();
    let tmp = NamedTempFile::new().unwrap();
    {
        let mut avi = AviFile::create(tmp.path()).unwrap();
        avi.set_video(32, 32, 10.0, "MJPG").unwrap();
        avi.set_audio(1, 8000, 8, 0x01, 0).unwrap();
        avi.write_frame(&[0u8; 16], true).unwrap();
        for len in lens {
            // Each byte gets its own value so positions are distinguishable.
            let chunk: Vec<u8> = (0..len)
                .map(|i| ((stream.len() + i) % 251) as u8)
                .collect();
            stream.extend_from_slice(&chunk);
            avi.write_audio(&chunk).unwrap();
        }
        avi.close().unwrap();
    }

    let mut avi = AviFile::open(tmp.path(), true).unwrap();
    let total = stream.len() as u64;
    assert_eq!(avi.audio_at(0).unwrap().audio_bytes, total);

    // tot invariant: each entry's running total equals the sum of the
    // preceding lengths.
    let mut sum = 0u64;
    for e in &avi.audio_at(0).unwrap().index {
        assert_eq!(e.tot, sum);
        sum += e.len as u64;
    }

    for b in [0u64, 1, 12, 13, 14, 213, 214, 291, 321, total - 1] {
        avi.set_audio_position(b).unwrap();
        let mut byte = [0u8; 1];
        assert_eq!(avi.read_audio(&mut byte).unwrap(), 1, "read at {b}");
        assert_eq!(byte[0], stream[b as usize], "byte at {b}");
    }
}

#[test]
fn boundary_positions() {
    let tmp = NamedTempFile::new().unwrap();
    let mut avi = AviFile::create(tmp.path()).unwrap();
    avi.set_video(32, 32, 10.0, "MJPG").unwrap();
    avi.set_audio(1, 8000, 8, 0x01, 0).unwrap();
    for _ in 0..5 {
        avi.write_frame(&[0u8; 64], true).unwrap();
        avi.write_audio(&[1u8; 32]).unwrap();
    }
    avi.close().unwrap();

    let mut avi = AviFile::open(tmp.path(), true).unwrap();
    let mut buf = vec![0u8; 64];

    // Reading past the last frame reports end of stream, repeatedly.
    avi.set_video_position(5).unwrap();
    assert_eq!(avi.read_frame(&mut buf).unwrap(), None);
    assert_eq!(avi.read_frame(&mut buf).unwrap(), None);

    // Negative positions clamp to frame 0.
    avi.set_video_position(-3).unwrap();
    assert!(avi.read_frame(&mut buf).unwrap().is_some());

    // Audio positions past the end clamp; the next read returns 0 bytes.
    avi.set_audio_position(5 * 32 + 100).unwrap();
    assert_eq!(avi.read_audio(&mut buf).unwrap(), 0);

    // A too-small frame buffer is rejected without advancing.
    avi.set_video_position(0).unwrap();
    let mut small = [0u8; 8];
    assert!(matches!(
        avi.read_frame(&mut small),
        Err(AviError::BufferTooSmall)
    ));
    assert!(avi.read_frame(&mut buf).unwrap().is_some());
}

#[test]
fn no_audio_stream() {
    let tmp = NamedTempFile::new().unwrap();
    write_basic_video(tmp.path());

    let mut avi = AviFile::open(tmp.path(), true).unwrap();
    assert_eq!(avi.audio_tracks(), 0);
    let mut buf = [0u8; 16];
    match avi.read_audio(&mut buf) {
        Err(AviError::NoIndex) => {}
        other => panic!("expected NoIndex, got {other:?}"),
    }
}

#[test]
fn s4_corrupt_hdrl_list() {
    let tmp = NamedTempFile::new().unwrap();
    write_basic_video(tmp.path());

    // Zero the hdrl LIST size (bytes 16..20: RIFF,len,"AVI ","LIST",len).
    let mut bytes = std::fs::read(tmp.path()).unwrap();
    bytes[16..20].copy_from_slice(&[0, 0, 0, 0]);
    std::fs::write(tmp.path(), &bytes).unwrap();

    match AviFile::open(tmp.path(), true) {
        Err(AviError::NoHeaderList) => {}
        other => panic!("expected NoHeaderList, got {other:?}"),
    }
}

#[test]
fn s6_audio_chunk_adjacency() {
    let tmp = NamedTempFile::new().unwrap();
    let mut avi = AviFile::create(tmp.path()).unwrap();
    avi.set_video(32, 32, 10.0, "MJPG").unwrap();
    avi.set_audio(1, 8000, 8, 0x01, 0).unwrap();
    avi.write_frame(&[0u8; 16], true).unwrap();
    for _ in 0..8 {
        avi.write_audio(&[9u8; 33]).unwrap(); // odd length exercises padding
    }
    avi.close().unwrap();

    let avi = AviFile::open(tmp.path(), true).unwrap();
    let index = &avi.audio_at(0).unwrap().index;
    for w in index.windows(2) {
        assert!(w[0].pos + w[0].len as u64 <= w[1].pos);
        // Consecutive chunks: header plus even padding apart.
        assert_eq!(w[1].pos, w[0].pos + pad_even(w[0].len as u64) + 8);
    }
}

#[test]
fn legacy_index_movi_relative_offsets() {
    let tmp = NamedTempFile::new().unwrap();
    write_basic_video(tmp.path());

    // Rewrite idx1 offsets from file-absolute to movi-relative, as some
    // producers do; the reader must auto-detect the layout.
    let mut bytes = std::fs::read(tmp.path()).unwrap();
    let idx1_at = HEADER_BYTES as usize + 100 * (8 + 4096);
    assert_eq!(&bytes[idx1_at..idx1_at + 4], b"idx1");
    let movi_start = HEADER_BYTES; // movi data begins right after the header
    for i in 0..100 {
        let at = idx1_at + 8 + i * 16 + 8;
        let abs = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        let rel = abs - (movi_start as u32 - 4);
        bytes[at..at + 4].copy_from_slice(&rel.to_le_bytes());
    }
    std::fs::write(tmp.path(), &bytes).unwrap();

    let mut avi = AviFile::open(tmp.path(), true).unwrap();
    assert_eq!(avi.video_frames(), 100);
    let mut buf = vec![0u8; 4096];
    let (len, key) = avi.read_frame(&mut buf).unwrap().unwrap();
    assert_eq!((len, key), (4096, true));
}

#[test]
fn raw_scan_when_index_is_missing() {
    let tmp = NamedTempFile::new().unwrap();
    write_basic_video(tmp.path());

    // Disguise the idx1 as JUNK; the reader must fall back to scanning the
    // movi area.  Scanned frames carry no keyframe information.
    let mut bytes = std::fs::read(tmp.path()).unwrap();
    let idx1_at = HEADER_BYTES as usize + 100 * (8 + 4096);
    bytes[idx1_at..idx1_at + 4].copy_from_slice(b"JUNK");
    std::fs::write(tmp.path(), &bytes).unwrap();

    let mut avi = AviFile::open(tmp.path(), true).unwrap();
    assert_eq!(avi.video_frames(), 100);
    let mut buf = vec![0u8; 4096];
    let (_, key) = avi.read_frame(&mut buf).unwrap().unwrap();
    assert!(!key);
}

#[test]
fn interrupted_writer_leaves_parseable_file() {
    let tmp = NamedTempFile::new().unwrap();
    {
        let mut avi = AviFile::create(tmp.path()).unwrap();
        avi.set_video(320, 240, 25.0, "XVID").unwrap();
        for _ in 0..3 {
            avi.write_frame(&[0u8; 256], true).unwrap();
        }
        // Dropped without close: only the provisional header is on disk.
    }

    // Headers parse without an index...
    let avi = AviFile::open(tmp.path(), false).unwrap();
    assert_eq!(avi.width(), 320);
    assert_eq!(avi.video_frames(), 0);

    // ...and the movi scan recovers the frames that made it to disk.
    let avi = AviFile::open(tmp.path(), true).unwrap();
    assert_eq!(avi.video_frames(), 3);
}

#[test]
fn info_list_from_comment_file() {
    let tmp = NamedTempFile::new().unwrap();
    let mut comments = NamedTempFile::new().unwrap();
    writeln!(comments, "# this line is a comment").unwrap();
    writeln!(comments, "ICMT encoded for the adjacency test").unwrap();
    writeln!(comments).unwrap();
    writeln!(comments, "INAM roundtrip sample").unwrap();
    writeln!(comments, "IXXX must be skipped").unwrap();
    comments.flush().unwrap();

    let mut avi = AviFile::create(tmp.path()).unwrap();
    avi.set_video(32, 32, 10.0, "MJPG").unwrap();
    avi.set_comment_file(comments.reopen().unwrap()).unwrap();
    avi.write_frame(&[0u8; 64], true).unwrap();
    avi.close().unwrap();

    let header = &std::fs::read(tmp.path()).unwrap()[..HEADER_BYTES as usize];
    assert!(!find_all(header, b"LIST").is_empty());
    assert_eq!(find_all(header, b"ISFT").len(), 1);
    assert!(!find_all(header, b"avimux-").is_empty());
    assert!(!find_all(header, b"encoded for the adjacency test").is_empty());
    assert!(!find_all(header, b"roundtrip sample").is_empty());
    assert!(find_all(header, b"IXXX").is_empty());
}

#[test]
fn can_read_audio_tracks_interleaving() {
    let tmp = NamedTempFile::new().unwrap();
    let mut avi = AviFile::create(tmp.path()).unwrap();
    avi.set_video(32, 32, 10.0, "MJPG").unwrap();
    avi.set_audio(1, 8000, 8, 0x01, 0).unwrap();
    avi.write_frame(&[0u8; 10], true).unwrap();
    avi.write_audio(&[1u8; 6]).unwrap();
    avi.write_frame(&[0u8; 10], false).unwrap();
    avi.write_audio(&[1u8; 6]).unwrap();
    avi.close().unwrap();

    let mut avi = AviFile::open(tmp.path(), true).unwrap();
    // The first audio chunk sits after the first video frame.
    assert!(!avi.can_read_audio().unwrap());
    let mut buf = vec![0u8; 16];
    avi.read_frame(&mut buf).unwrap().unwrap();
    assert!(avi.can_read_audio().unwrap());
}

#[test]
fn read_audio_chunk_remainder() {
    let tmp = NamedTempFile::new().unwrap();
    let mut avi = AviFile::create(tmp.path()).unwrap();
    avi.set_video(32, 32, 10.0, "MJPG").unwrap();
    avi.set_audio(1, 8000, 8, 0x01, 0).unwrap();
    avi.write_frame(&[0u8; 16], true).unwrap();
    avi.write_audio(&[5u8; 40]).unwrap();
    avi.write_audio(&[6u8; 24]).unwrap();
    avi.close().unwrap();

    let mut avi = AviFile::open(tmp.path(), true).unwrap();

    // Probe without a buffer: remainder of the current chunk, no movement.
    avi.set_audio_position(10).unwrap();
    assert_eq!(avi.read_audio_chunk(None).unwrap(), Some(30));
    assert_eq!(avi.read_audio_chunk(None).unwrap(), Some(30));

    let mut buf = vec![0u8; 64];
    assert_eq!(avi.read_audio_chunk(Some(&mut buf)).unwrap(), Some(30));
    assert!(buf[..30].iter().all(|&b| b == 5));
    assert_eq!(avi.read_audio_chunk(Some(&mut buf)).unwrap(), Some(24));
    assert!(buf[..24].iter().all(|&b| b == 6));
    assert_eq!(avi.read_audio_chunk(Some(&mut buf)).unwrap(), None);
}

#[test]
fn multiple_audio_tracks() {
    let tmp = NamedTempFile::new().unwrap();
    let mut avi = AviFile::create(tmp.path()).unwrap();
    avi.set_video(32, 32, 10.0, "MJPG").unwrap();
    avi.set_audio(2, 44100, 16, 0x01, 0).unwrap();
    avi.set_audio(1, 22050, 16, 0x01, 0).unwrap();
    assert_eq!(avi.audio_track(), 1);

    avi.write_frame(&[0u8; 32], true).unwrap();
    avi.set_audio_track(0).unwrap();
    avi.write_audio(&[1u8; 100]).unwrap();
    avi.write_audio(&[1u8; 100]).unwrap();
    avi.set_audio_track(1).unwrap();
    avi.write_audio(&[2u8; 60]).unwrap();
    avi.close().unwrap();

    let bytes = std::fs::read(tmp.path()).unwrap();
    assert!(find_all(&bytes, b"01wb").len() >= 2);
    assert!(!find_all(&bytes, b"02wb").is_empty());

    let mut avi = AviFile::open(tmp.path(), true).unwrap();
    assert_eq!(avi.audio_tracks(), 2);
    assert_eq!(avi.audio_at(0).unwrap().audio_bytes, 200);
    assert_eq!(avi.audio_at(0).unwrap().audio_chunks(), 2);
    assert_eq!(avi.audio_at(1).unwrap().audio_bytes, 60);
    assert_eq!(avi.audio_at(1).unwrap().audio_chunks(), 1);

    avi.set_audio_track(1).unwrap();
    let mut buf = vec![0u8; 60];
    assert_eq!(avi.read_audio(&mut buf).unwrap(), 60);
    assert!(buf.iter().all(|&b| b == 2));
}

#[test]
fn error_codes_follow_the_classic_table() {
    assert_eq!(AviError::NotAvi.code(), 9);
    assert_eq!(AviError::NoHeaderList.code(), 10);
    assert_eq!(AviError::NoIndex.code(), 13);
    assert_eq!(AviError::BufferTooSmall.code(), 14);
}

#[test]
fn write_position_stays_past_the_header() {
    let tmp = NamedTempFile::new().unwrap();
    let mut avi = AviFile::create(tmp.path()).unwrap();
    avi.set_video(32, 32, 10.0, "MJPG").unwrap();
    assert!(avi.bytes_written() >= HEADER_BYTES);
    let mut last = avi.bytes_written();
    for _ in 0..4 {
        avi.write_frame(&[0u8; 128], true).unwrap();
        let now = avi.bytes_written();
        assert!(now > last);
        last = now;
    }
    avi.close().unwrap();
}

// Writes ~2.05 GiB; run with `cargo test -- --ignored` and a fast disk.
#[test]
#[ignore = "writes more than 2 GiB of data"]
fn s3_single_rotation_produces_an_avix_sub_riff() {
    const FRAME: usize = 4 * 1024 * 1024;
    const FRAMES: usize = 525; // 2100 MiB total

    let tmp = NamedTempFile::new().unwrap();
    {
        let mut avi = AviFile::create(tmp.path()).unwrap();
        avi.set_video(1920, 1080, 24.0, "XVID").unwrap();
        let frame = vec![0u8; FRAME];
        for i in 0..FRAMES {
            avi.write_frame(&frame, i % 12 == 0).unwrap();
        }
        avi.close().unwrap();
    }

    let mut file = std::fs::File::open(tmp.path()).unwrap();
    let mut head = [0u8; 12];
    std::io::Read::read_exact(&mut file, &mut head).unwrap();
    assert_eq!(&head[..4], b"RIFF");
    assert_eq!(&head[8..12], b"AVI ");

    // The top-level RIFF length is the first sub-RIFF boundary minus 8.
    let riff0_len = u32::from_le_bytes(head[4..8].try_into().unwrap()) as u64;
    let base1 = riff0_len + 8;
    assert!(base1 < NEW_RIFF_THRES + FRAME as u64);

    use std::io::{Read, Seek, SeekFrom};
    let mut sub = [0u8; 12];
    file.seek(SeekFrom::Start(base1)).unwrap();
    file.read_exact(&mut sub).unwrap();
    assert_eq!(&sub[..4], b"RIFF");
    assert_eq!(&sub[8..12], b"AVIX");

    // Exactly one rotation: nothing after the second sub-RIFF.
    let file_len = file.metadata().unwrap().len();
    let riff1_len = u32::from_le_bytes(sub[4..8].try_into().unwrap()) as u64;
    assert_eq!(base1 + 8 + riff1_len, file_len);

    // idx1 covers sub-RIFF 0.
    let mut avi = AviFile::open(tmp.path(), true).unwrap();
    assert!(avi.is_opendml());
    assert_eq!(avi.video_frames(), FRAMES);
    let mut buf = vec![0u8; FRAME];
    for i in 0..FRAMES {
        let (len, key) = avi.read_frame(&mut buf).unwrap().expect("frame");
        assert_eq!(len, FRAME);
        assert_eq!(key, i % 12 == 0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// §8.3: after set_audio_position(b), the next 1-byte read returns the
    /// b-th byte of the concatenated audio stream.
    #[test]
    fn audio_positioning_over_random_chunks(
        lens in prop::collection::vec(1u32..64, 1..20),
        probes in prop::collection::vec(0u64..4096, 1..8),
    ) {
        let tmp = NamedTempFile::new().unwrap();
        let mut stream = Vec::new();
        {
            let mut avi = AviFile::create(tmp.path()).unwrap();
            avi.set_video(32, 32, 10.0, "MJPG").unwrap();
            avi.set_audio(1, 8000, 8, 0x01, 0).unwrap();
            avi.write_frame(&[0u8; 8], true).unwrap();
            for len in &lens {
                let chunk: Vec<u8> = (0..*len)
                    .map(|i| ((stream.len() as u32 + i) % 251) as u8)
                    .collect();
                stream.extend_from_slice(&chunk);
                avi.write_audio(&chunk).unwrap();
            }
            avi.close().unwrap();
        }

        let mut avi = AviFile::open(tmp.path(), true).unwrap();
        let total = stream.len() as u64;
        prop_assert_eq!(avi.audio_at(0).unwrap().audio_bytes, total);

        for &p in &probes {
            avi.set_audio_position(p).unwrap();
            let mut byte = [0u8; 1];
            let n = avi.read_audio(&mut byte).unwrap();
            if p < total {
                prop_assert_eq!(n, 1);
                prop_assert_eq!(byte[0], stream[p as usize]);
            } else {
                prop_assert_eq!(n, 0);
            }
        }
    }
}
