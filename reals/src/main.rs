use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

use libals_audio::{encode_with_options, BlockSwitchMode, EncoderOptions};

mod audio;

#[derive(Parser)]
#[command(name = "reals")]
#[command(version = "0.1.0")]
#[command(about = "MPEG-4 ALS converter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a WAV file to ALS
    Encode {
        /// Input audio file (integer PCM)
        input: PathBuf,
        /// Output ALS file
        output: PathBuf,
        /// Compression level (0-2, default 1)
        #[arg(short, long, default_value = "1")]
        level: u8,
        /// Frame length in samples (default chosen from the sample rate)
        #[arg(long)]
        frame_length: Option<u32>,
        /// Random-access distance in frames (0 disables)
        #[arg(long, default_value = "0")]
        ra: u8,
        /// Force BGMC entropy coding on or off
        #[arg(long)]
        bgmc: Option<bool>,
        /// Maximum short-term prediction order
        #[arg(long)]
        max_order: Option<u16>,
        /// Exhaustive partition search instead of the greedy merge
        #[arg(long)]
        full_search: bool,
    },
    /// Decode an ALS file to WAV
    Decode {
        /// Input ALS file
        input: PathBuf,
        /// Output WAV file
        output: PathBuf,
    },
    /// Show information about an ALS file
    Info {
        /// Input ALS file
        input: PathBuf,
    },
    /// Validate an ALS file (full decode + CRC)
    Validate {
        /// Input ALS file
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Encode {
            input,
            output,
            level,
            frame_length,
            ra,
            bgmc,
            max_order,
            full_search,
        } => encode(
            &input,
            &output,
            level,
            frame_length,
            ra,
            bgmc,
            max_order,
            full_search,
        ),
        Commands::Decode { input, output } => decode(&input, &output),
        Commands::Info { input } => info(&input),
        Commands::Validate { input } => validate(&input),
    }
}

#[allow(clippy::too_many_arguments)]
fn encode(
    input: &PathBuf,
    output: &PathBuf,
    level: u8,
    frame_length: Option<u32>,
    ra: u8,
    bgmc: Option<bool>,
    max_order: Option<u16>,
    full_search: bool,
) -> Result<()> {
    let data = audio::read_audio_file(input)?;

    let mut options = EncoderOptions::new(data.sample_rate, data.channels, data.format)
        .with_level(level)
        .with_ra_distance(ra);
    if data.bits_per_sample != data.format.container_bits() {
        options = options.with_bits_per_sample(data.bits_per_sample);
    }
    if let Some(n) = frame_length {
        options = options.with_frame_length(n);
    }
    if let Some(on) = bgmc {
        options = options.with_bgmc(on);
    }
    if let Some(order) = max_order {
        options = options.with_max_order(order);
    }
    if full_search {
        options.block_switch_mode = BlockSwitchMode::FullSearch;
    }

    let als = encode_with_options(&data.pcm, options).context("Encoding failed")?;
    let in_size = data.pcm.len();
    let out_size = als.len();
    fs::write(output, als).context("Failed to write output")?;

    println!(
        "Encoded {} -> {} ({:.1}% of {} PCM bytes)",
        input.display(),
        output.display(),
        100.0 * out_size as f64 / in_size.max(1) as f64,
        in_size
    );
    Ok(())
}

fn decode(input: &PathBuf, output: &PathBuf) -> Result<()> {
    let data = fs::read(input).context("Failed to read input")?;
    let stream = libals_audio::info(&data).context("Not an ALS file")?;
    let pcm = libals_audio::decode(&data).context("Decoding failed")?;

    audio::write_wav(
        output,
        &pcm,
        stream.sample_rate,
        stream.channels,
        stream.bits_per_sample,
    )?;
    println!(
        "Decoded {} -> {} ({} Hz, {} ch, {}-bit)",
        input.display(),
        output.display(),
        stream.sample_rate,
        stream.channels,
        stream.bits_per_sample
    );
    Ok(())
}

fn info(input: &PathBuf) -> Result<()> {
    let data = fs::read(input).context("Failed to read input")?;
    let stream = libals_audio::info(&data).context("Not an ALS file")?;

    println!("Sample rate:  {} Hz", stream.sample_rate);
    println!("Channels:     {}", stream.channels);
    println!("Bit depth:    {}", stream.bits_per_sample);
    match stream.total_samples {
        Some(n) => println!("Samples:      {} ({:.2} s)", n, stream.duration_secs),
        None => println!("Samples:      unknown (stream not finalized)"),
    }
    println!("File size:    {} bytes", stream.file_size);
    if stream.compression_ratio > 0.0 {
        println!("Compression:  {:.2}x", stream.compression_ratio);
    }
    println!("CRC:          {}", if stream.crc_enabled { "present" } else { "absent" });
    Ok(())
}

fn validate(input: &PathBuf) -> Result<()> {
    let data = fs::read(input).context("Failed to read input")?;
    if libals_audio::validate(&data) {
        println!("{}: OK", input.display());
        Ok(())
    } else {
        bail!("{}: FAILED", input.display());
    }
}
