//! WAV input through symphonia, WAV output written directly.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use libals_audio::SampleFormat;

/// Decoded PCM ready for the encoder.
pub struct AudioData {
    /// Interleaved little-endian samples in `format` containers.
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub bits_per_sample: u8,
}

/// Read an integer-PCM audio file, keeping its native width.
pub fn read_audio_file(path: &Path) -> Result<AudioData> {
    let file = std::fs::File::open(path).context("Failed to open audio file")?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Unsupported audio format")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found")?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported codec")?;

    let mut out: Option<AudioData> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(e) => return Err(e).context("Failed to read packet"),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = decoder.decode(&packet).context("Failed to decode packet")?;
        append_buffer(&decoded, &mut out)?;
    }

    out.context("Input file holds no audio")
}

fn append_buffer(decoded: &AudioBufferRef<'_>, out: &mut Option<AudioData>) -> Result<()> {
    let spec = *decoded.spec();
    let channels = spec.channels.count();
    let frames = decoded.frames();

    let (format, bits) = match decoded {
        AudioBufferRef::U8(_) => (SampleFormat::U8, 8),
        AudioBufferRef::S16(_) => (SampleFormat::S16, 16),
        AudioBufferRef::S24(_) => (SampleFormat::S32, 24),
        AudioBufferRef::S32(_) => (SampleFormat::S32, 32),
        _ => bail!("Only integer PCM input is supported (8/16/24/32-bit)"),
    };

    let data = out.get_or_insert_with(|| AudioData {
        pcm: Vec::new(),
        sample_rate: spec.rate,
        channels: channels as u16,
        format,
        bits_per_sample: bits,
    });
    if data.channels as usize != channels || data.bits_per_sample != bits {
        bail!("Input changes geometry mid-stream");
    }

    match decoded {
        AudioBufferRef::U8(buf) => {
            for f in 0..frames {
                for c in 0..channels {
                    data.pcm.push(buf.chan(c)[f]);
                }
            }
        }
        AudioBufferRef::S16(buf) => {
            for f in 0..frames {
                for c in 0..channels {
                    data.pcm.extend_from_slice(&buf.chan(c)[f].to_le_bytes());
                }
            }
        }
        AudioBufferRef::S24(buf) => {
            for f in 0..frames {
                for c in 0..channels {
                    // left-justified 24-in-32 containers
                    let v = buf.chan(c)[f].inner() << 8;
                    data.pcm.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        AudioBufferRef::S32(buf) => {
            for f in 0..frames {
                for c in 0..channels {
                    data.pcm.extend_from_slice(&buf.chan(c)[f].to_le_bytes());
                }
            }
        }
        _ => unreachable!(),
    }
    Ok(())
}

/// Write interleaved PCM (in ALS container layout) as a WAV file.
pub fn write_wav(
    path: &Path,
    pcm: &[u8],
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u8,
) -> Result<()> {
    let wav_bytes_per_sample = (bits_per_sample as usize + 7) / 8;

    // 24-bit streams travel in 4-byte containers; WAV wants packed bytes
    let body: Vec<u8> = if bits_per_sample == 24 {
        pcm.chunks_exact(4).flat_map(|g| g[1..4].to_vec()).collect()
    } else {
        pcm.to_vec()
    };

    let byte_rate = sample_rate * channels as u32 * wav_bytes_per_sample as u32;
    let block_align = channels * wav_bytes_per_sample as u16;

    let mut file = std::fs::File::create(path).context("Failed to create WAV file")?;
    file.write_all(b"RIFF")?;
    file.write_all(&(36 + body.len() as u32).to_le_bytes())?;
    file.write_all(b"WAVE")?;
    file.write_all(b"fmt ")?;
    file.write_all(&16u32.to_le_bytes())?;
    file.write_all(&1u16.to_le_bytes())?; // PCM
    file.write_all(&channels.to_le_bytes())?;
    file.write_all(&sample_rate.to_le_bytes())?;
    file.write_all(&byte_rate.to_le_bytes())?;
    file.write_all(&block_align.to_le_bytes())?;
    file.write_all(&(bits_per_sample as u16).to_le_bytes())?;
    file.write_all(b"data")?;
    file.write_all(&(body.len() as u32).to_le_bytes())?;
    file.write_all(&body)?;
    Ok(())
}
