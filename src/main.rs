use clap::{Parser, Subcommand};
use std::path::PathBuf;

use avimux::AviFile;

#[derive(Parser)]
#[command(name = "avimux", version, about = "AVI/OpenDML container inspection and extraction")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show container metadata
    Info {
        input: PathBuf,
    },
    /// List the reconstructed video and audio indices
    Index {
        input: PathBuf,
        /// Audio track to list alongside the video index
        #[arg(short, long, default_value = "0")]
        track: usize,
        /// Print at most this many entries per stream
        #[arg(short, long, default_value = "32")]
        limit: usize,
    },
    /// Extract raw video frames into a directory
    Extract {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        /// First frame to extract
        #[arg(long, default_value = "0")]
        start: usize,
        /// Number of frames (default: all remaining)
        #[arg(short, long)]
        count: Option<usize>,
    },
    /// Dump one audio track as a raw stream
    Audio {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value = "0")]
        track: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let avi = AviFile::open(&input, true)?;
            let file_size = std::fs::metadata(&input)?.len();

            println!("── AVI container ────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  File size      {} B ({:.2} MiB)", file_size, file_size as f64 / 1048576.0);
            println!("  OpenDML        {}", avi.is_opendml());
            println!("  Video          {}x{} @ {:.3} fps, compressor '{}'",
                     avi.width(), avi.height(), avi.frame_rate(), avi.video_compressor());
            println!("  Frames         {}", avi.video_frames());
            println!("  Max chunk      {} B", avi.max_video_chunk());
            println!("  Audio tracks   {}", avi.audio_tracks());
            for t in 0..avi.audio_tracks() {
                let a = avi.audio_at(t)?;
                println!(
                    "    [{t}] fmt=0x{:04x} {} ch, {} Hz, {} bit, {} kbit/s{}  {} chunks, {} B",
                    a.a_fmt, a.a_chans, a.a_rate, a.a_bits, a.mp3rate,
                    if a.a_vbr { " (VBR)" } else { "" },
                    a.audio_chunks(), a.audio_bytes,
                );
            }
        }

        // ── Index ────────────────────────────────────────────────────────────
        Commands::Index { input, track, limit } => {
            let avi = AviFile::open(&input, true)?;
            println!("Video index ({} frames):", avi.video_frames());
            println!("{:>8} {:>12} {:>10}  Key", "Frame", "Offset", "Length");
            for (frame, e) in avi.video_index().iter().take(limit).enumerate() {
                println!("{frame:>8} {:>12} {:>10}  {}", e.pos, e.len,
                         if e.key { "✓" } else { "" });
            }
            if avi.audio_tracks() > track {
                let a = avi.audio_at(track)?;
                println!("Audio track {track} ({} chunks, {} B):", a.audio_chunks(), a.audio_bytes);
                println!("{:>8} {:>12} {:>10} {:>12}", "Chunk", "Offset", "Length", "Total");
                for (i, e) in a.index.iter().take(limit).enumerate() {
                    println!("{i:>8} {:>12} {:>10} {:>12}", e.pos, e.len, e.tot);
                }
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output_dir, start, count } => {
            let mut avi = AviFile::open(&input, true)?;
            if !output_dir.exists() {
                std::fs::create_dir_all(&output_dir)?;
            }

            let total = avi.video_frames();
            let end = count.map(|c| (start + c).min(total)).unwrap_or(total);
            let mut buf = vec![0u8; avi.max_video_chunk() as usize];

            avi.set_video_position(start as i64)?;
            let mut written = 0usize;
            for frame in start..end {
                let Some((len, keyframe)) = avi.read_frame(&mut buf)? else { break };
                let name = output_dir.join(format!("frame_{frame:06}.raw"));
                std::fs::write(&name, &buf[..len])?;
                written += 1;
                if keyframe {
                    println!("  frame {frame:>6}  {len:>8} B  (keyframe)");
                }
            }
            println!("Extracted {written} frame(s) → {}", output_dir.display());
        }

        // ── Audio ────────────────────────────────────────────────────────────
        Commands::Audio { input, output, track } => {
            let mut avi = AviFile::open(&input, true)?;
            avi.set_audio_track(track)?;
            avi.set_audio_position(0)?;

            let total = avi.audio_at(track)?.audio_bytes;
            let mut out = std::fs::File::create(&output)?;
            let mut buf = vec![0u8; 64 * 1024];
            let mut copied = 0u64;
            loop {
                let n = avi.read_audio(&mut buf)?;
                if n == 0 {
                    break;
                }
                std::io::Write::write_all(&mut out, &buf[..n])?;
                copied += n as u64;
            }
            println!("Dumped {copied}/{total} B of track {track} → {}", output.display());
        }
    }

    Ok(())
}
