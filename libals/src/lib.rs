//! MPEG-4 Audio Lossless Coding (ALS) for Rust.
//!
//! The encoder turns interleaved integer PCM into a conformant ALS packet
//! stream whose decoding reproduces the input bit-exactly; the bundled
//! decoder is its verification mirror. Frames are coded independently with
//! optional block switching, joint-stereo difference coding, short- and
//! long-term prediction, and a choice of Rice or BGMC entropy coding.

pub mod core;
pub mod lossless;

mod error;
mod reader;
mod writer;

pub use crate::core::{
    compute_crc32, BlockSwitchMode, EncoderOptions, LtpGainMode, RandomAccessFlag, Resolution,
    SampleFormat, SpecificConfig, MAGIC,
};
pub use error::{Error, Result};
pub use lossless::{BlockInfo, Decoder, Encoder};
pub use reader::{RaUnit, Reader};
pub use writer::Writer;

use crate::core::bitio::BitReader;

/// info about an als stream
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u8,
    /// Per-channel sample count, if the stream was finalized.
    pub total_samples: Option<u64>,
    pub duration_secs: f64,
    pub file_size: usize,
    pub compression_ratio: f64,
    pub crc_enabled: bool,
}

/// Encode interleaved PCM into a complete raw ALS file.
pub fn encode(
    pcm: &[u8],
    sample_rate: u32,
    channels: u16,
    format: SampleFormat,
    level: u8,
) -> Result<Vec<u8>> {
    encode_with_options(
        pcm,
        EncoderOptions::new(sample_rate, channels, format).with_level(level),
    )
}

/// Encode with full control over the options.
pub fn encode_with_options(pcm: &[u8], options: EncoderOptions) -> Result<Vec<u8>> {
    let mut encoder = Encoder::with_options(options)?;
    let mut writer = Writer::new(&encoder.extradata())?;

    let stride = {
        let c = encoder.config();
        c.channels as usize
            * match c.resolution {
                Resolution::Bits8 => 1,
                Resolution::Bits16 => 2,
                _ => 4,
            }
    };
    let frame_bytes = encoder.config().frame_length as usize * stride;
    if pcm.len() % stride != 0 {
        return Err(Error::BadInputLength(format!(
            "{} bytes is not a whole number of {}-byte sample groups",
            pcm.len(),
            stride
        )));
    }

    for frame in pcm.chunks(frame_bytes) {
        let packet = encoder.encode_frame(frame)?;
        writer.write_packet(&packet);
    }
    writer.finish(&encoder.finalize()?)
}

/// Decode a raw ALS file back to interleaved PCM.
pub fn decode(data: &[u8]) -> Result<Vec<u8>> {
    let (config, payload) = Reader::new().read(data)?;
    let mut decoder = Decoder::new(config)?;
    let mut br = BitReader::new(payload);
    let mut pcm = Vec::new();

    loop {
        match decoder.remaining_samples() {
            Some(0) => break,
            Some(_) => {}
            // never finalized: stop at the payload's end
            None if payload.len() * 8 - br.bits_read() < 8 => break,
            None => {}
        }
        pcm.extend_from_slice(&decoder.decode_frame(&mut br)?);
    }

    if decoder.verify_crc() == Some(false) {
        log::warn!("stream CRC mismatch after decoding");
    }
    Ok(pcm)
}

/// Read stream facts without decoding the payload.
pub fn info(data: &[u8]) -> Result<StreamInfo> {
    let (config, _) = Reader::new().read(data)?;
    let total = if config.samples == crate::core::SAMPLES_UNKNOWN {
        None
    } else {
        Some(config.samples as u64)
    };
    let duration_secs = total
        .map(|s| s as f64 / config.sample_rate as f64)
        .unwrap_or(0.0);
    let raw_size = total.unwrap_or(0) as f64
        * config.channels as f64
        * (config.bits_per_raw_sample() as f64 / 8.0);
    let compression_ratio = if data.is_empty() { 0.0 } else { raw_size / data.len() as f64 };

    Ok(StreamInfo {
        sample_rate: config.sample_rate,
        channels: config.channels,
        bits_per_sample: config.bits_per_raw_sample(),
        total_samples: total,
        duration_secs,
        file_size: data.len(),
        compression_ratio,
        crc_enabled: config.crc_enabled,
    })
}

/// Full-decode integrity check: parses, decodes, and verifies the CRC.
pub fn validate(data: &[u8]) -> bool {
    let (config, payload) = match Reader::new().read(data) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let crc_enabled = config.crc_enabled;
    let mut decoder = match Decoder::new(config) {
        Ok(d) => d,
        Err(_) => return false,
    };
    let mut br = BitReader::new(payload);
    while decoder.remaining_samples().map_or(false, |r| r > 0) {
        if decoder.decode_frame(&mut br).is_err() {
            return false;
        }
    }
    if crc_enabled {
        decoder.verify_crc() == Some(true)
    } else {
        decoder.is_finished()
    }
}
