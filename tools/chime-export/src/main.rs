//! Render a tracker module (.xm / .s3m / .mod) to a 16-bit stereo WAV file
//! through the public replay API.
//!
//! ```text
//! chime-export song.xm
//! chime-export song.mod -o out.wav --rate 44100 --no-interpolation
//! RUST_LOG=chime_tracker=debug chime-export song.s3m
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chime_replay::{Replay, calculate_mix_buf_len};
use chime_tracker::Module;

#[derive(Parser)]
#[command(name = "chime-export", about = "Render tracker modules to WAV")]
struct Cli {
    /// Input module file (.xm, .s3m, .mod)
    input: PathBuf,

    /// Output WAV path (defaults to the input with a .wav extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output sample rate in Hz
    #[arg(long, default_value_t = 48000)]
    rate: u32,

    /// Use nearest-sample resampling instead of linear interpolation
    #[arg(long)]
    no_interpolation: bool,

    /// Sequence position to start rendering from
    #[arg(long, default_value_t = 0)]
    pos: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    let bytes = fs::read(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;
    let module = Module::load(&bytes)
        .with_context(|| format!("loading {}", cli.input.display()))?;
    println!(
        "{}: {} channels, {} patterns, {} instruments, {} positions",
        module.name,
        module.num_channels,
        module.num_patterns,
        module.num_instruments,
        module.sequence.len()
    );

    let mut replay = Replay::new(&module, cli.rate, !cli.no_interpolation)?;
    let duration = replay.calculate_duration();
    println!(
        "duration: {} samples ({:.1}s at {} Hz)",
        duration,
        duration as f64 / cli.rate as f64,
        cli.rate
    );

    let output = cli
        .output
        .unwrap_or_else(|| cli.input.with_extension("wav"));
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: cli.rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&output, spec)
        .with_context(|| format!("creating {}", output.display()))?;

    replay.set_sequence_pos(cli.pos);
    let mut mix_buf = vec![0i32; calculate_mix_buf_len(cli.rate)];
    let mut written = 0;
    while written < duration {
        let frames = replay.get_audio(&mut mix_buf);
        for value in &mix_buf[..frames * 2] {
            writer.write_sample((*value).clamp(-32768, 32767) as i16)?;
        }
        written += frames;
    }
    writer.finalize()?;
    println!("wrote {} frames to {}", written, output.display());
    Ok(())
}
