//! common types and stream configuration for the als codec

use crate::core::bitio::{BitReader, BitWriter};
use crate::error::{Error, Result};

// constants

/// Magic number "ALS\0" opening the ALSSpecificConfig.
pub const MAGIC: [u8; 4] = *b"ALS\0";

/// Deepest supported block-switching tree (32 leaves).
pub const MAX_BLOCK_SWITCH_DEPTH: u8 = 5;

/// Largest short-term prediction order the config can carry.
pub const MAX_PRED_ORDER: usize = 1023;

/// Long-term predictor lag ceiling.
pub const LTP_MAX_LAG: usize = 2048;

/// `samples` value meaning "not finalized yet".
pub const SAMPLES_UNKNOWN: u32 = 0xFFFF_FFFF;

// types

/// Interleaved PCM input layout accepted by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Unsigned 8-bit, re-centered by subtracting 128.
    U8,
    /// Signed 16-bit little-endian.
    S16,
    /// Signed 32-bit little-endian containers (24-in-32 via `bits_per_sample`).
    S32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 => 4,
        }
    }

    pub fn container_bits(self) -> u8 {
        (self.bytes_per_sample() * 8) as u8
    }
}

/// PCM resolution field of the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Resolution {
    Bits8 = 0,
    Bits16 = 1,
    Bits24 = 2,
    Bits32 = 3,
}

impl Resolution {
    pub fn bits(self) -> u8 {
        match self {
            Resolution::Bits8 => 8,
            Resolution::Bits16 => 16,
            Resolution::Bits24 => 24,
            Resolution::Bits32 => 32,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Resolution::Bits8),
            1 => Ok(Resolution::Bits16),
            2 => Ok(Resolution::Bits24),
            3 => Ok(Resolution::Bits32),
            _ => Err(Error::InvalidData(format!("bad resolution code {}", code))),
        }
    }
}

/// Where random-access unit sizes are stored, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RandomAccessFlag {
    None = 0,
    /// Each RA frame carries its own 32-bit unit size.
    Frames = 1,
    Header = 2,
}

impl RandomAccessFlag {
    fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(RandomAccessFlag::None),
            1 => Ok(RandomAccessFlag::Frames),
            2 => Ok(RandomAccessFlag::Header),
            _ => Err(Error::InvalidData(format!("bad ra_flag code {}", code))),
        }
    }
}

/// Partition-tree merge strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSwitchMode {
    /// Greedy pairwise pruning from the finest level up.
    BottomUp,
    /// Recursive search allowing a parent to collapse an already-pruned subtree.
    FullSearch,
}

/// How the five LTP gains are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LtpGainMode {
    Fixed,
    Cholesky,
}

// stream configuration

/// Immutable per-stream configuration, serialized as
/// AudioSpecificConfig + ALSSpecificConfig.
#[derive(Debug, Clone)]
pub struct SpecificConfig {
    pub sample_rate: u32,
    /// Total per-channel sample count; `SAMPLES_UNKNOWN` until finalized.
    pub samples: u32,
    pub channels: u16,
    pub resolution: Resolution,
    /// Frame length N in samples per channel.
    pub frame_length: u32,
    /// Random-access distance in frames; 0 disables.
    pub ra_distance: u8,
    pub ra_flag: RandomAccessFlag,
    pub adapt_order: bool,
    pub coef_table: u8,
    pub long_term_prediction: bool,
    pub max_order: u16,
    /// Block-switching depth D; 0 disables.
    pub block_switch_depth: u8,
    pub bgmc: bool,
    pub sb_part: bool,
    pub joint_stereo: bool,
    pub mc_coding: bool,
    pub chan_sort: bool,
    pub rlslms: bool,
    pub floating: bool,
    pub msb_first: bool,
    pub crc_enabled: bool,
    pub crc: u32,
}

impl SpecificConfig {
    pub fn bits_per_raw_sample(&self) -> u8 {
        self.resolution.bits()
    }

    /// 31 above 16-bit material, 15 otherwise.
    pub fn max_rice_param(&self) -> u8 {
        if self.resolution > Resolution::Bits16 {
            31
        } else {
            15
        }
    }

    /// Width of the first Rice parameter field of a block.
    pub fn rice_s0_bits(&self) -> u8 {
        if self.resolution > Resolution::Bits16 {
            5
        } else {
            4
        }
    }

    /// Width of the first BGMC parameter field of a block.
    pub fn bgmc_p0_bits(&self) -> u8 {
        if self.resolution > Resolution::Bits16 {
            9
        } else {
            8
        }
    }

    /// Ceiling of the combined BGMC parameter `(s << 4) | sx`.
    pub fn bgmc_max_param(&self) -> u16 {
        (1u16 << self.bgmc_p0_bits()) - 1
    }

    /// Size of the emitted bs_info field in bytes (0 when switching is off).
    pub fn bs_info_bytes(&self) -> usize {
        match self.block_switch_depth {
            0 => 0,
            1..=3 => 1,
            4 => 2,
            _ => 4,
        }
    }

    pub fn is_ra_frame(&self, frame_index: u64) -> bool {
        self.ra_distance != 0 && frame_index % self.ra_distance as u64 == 0
    }

    /// Byte offset of "ALS\0" inside the extradata.
    pub fn config_offset() -> usize {
        // AudioSpecificConfig: 5 + 6 + 4 + 24 + 4 = 43 bits, byte aligned
        6
    }

    /// AudioSpecificConfig followed by the byte-aligned ALSSpecificConfig.
    pub fn extradata(&self) -> Vec<u8> {
        let mut bw = BitWriter::new();

        // AudioSpecificConfig, object type ALS (36) via the escape form
        bw.write_bits(31, 5);
        bw.write_bits(36 - 32, 6);
        bw.write_bits(0x0F, 4);
        bw.write_bits(self.sample_rate & 0x00FF_FFFF, 24);
        bw.write_bits(0, 4); // channelConfiguration
        bw.align_to_byte();

        self.write_config(&mut bw);
        bw.into_bytes()
    }

    /// ALSSpecificConfig alone (what the raw file layer stores).
    pub fn write_config(&self, bw: &mut BitWriter) {
        for &b in &MAGIC {
            bw.write_bits(b as u32, 8);
        }
        bw.write_bits(self.sample_rate, 32);
        bw.write_bits(self.samples, 32);
        bw.write_bits(self.channels as u32 - 1, 16);
        bw.write_bits(0, 3); // file_type
        bw.write_bits(self.resolution as u32, 3);
        bw.write_bit(self.floating as u32);
        bw.write_bit(self.msb_first as u32);
        bw.write_bits(self.frame_length - 1, 16);
        bw.write_bits(self.ra_distance as u32, 8);
        bw.write_bits(self.ra_flag as u32, 2);
        bw.write_bit(self.adapt_order as u32);
        bw.write_bits(self.coef_table as u32, 2);
        bw.write_bit(self.long_term_prediction as u32);
        bw.write_bits(self.max_order as u32, 10);
        let bs_code = if self.block_switch_depth == 0 {
            0
        } else {
            (self.block_switch_depth as u32).saturating_sub(2).max(1)
        };
        bw.write_bits(bs_code, 2);
        bw.write_bit(self.bgmc as u32);
        bw.write_bit(self.sb_part as u32);
        bw.write_bit(self.joint_stereo as u32);
        bw.write_bit(self.mc_coding as u32);
        bw.write_bit(0); // chan_config
        bw.write_bit(self.chan_sort as u32);
        bw.write_bit(self.crc_enabled as u32);
        bw.write_bit(self.rlslms as u32);
        bw.write_bits(0, 5); // reserved
        bw.write_bit(0); // aux_data_enabled
        bw.align_to_byte();
        bw.write_bits(0, 32); // header_size
        bw.write_bits(0, 32); // trailer_size
        if self.crc_enabled {
            // CRC stored little-endian
            for &b in self.crc.to_le_bytes().iter() {
                bw.write_bits(b as u32, 8);
            }
        }
    }

    /// Serialized ALSSpecificConfig size in bytes: 14 bytes of fixed-width
    /// fields, 8 bytes of flags, two size words, and the optional CRC.
    pub fn config_size(&self) -> usize {
        30 + if self.crc_enabled { 4 } else { 0 }
    }

    /// Parse an ALSSpecificConfig. Accepts either the bare config or full
    /// extradata (magic at the AudioSpecificConfig offset).
    pub fn parse(data: &[u8]) -> Result<(SpecificConfig, usize)> {
        let offset = if data.len() >= 4 && data[..4] == MAGIC {
            0
        } else if data.len() >= Self::config_offset() + 4
            && data[Self::config_offset()..Self::config_offset() + 4] == MAGIC
        {
            Self::config_offset()
        } else {
            return Err(Error::InvalidData("ALS magic not found".into()));
        };

        let mut br = BitReader::new(&data[offset..]);
        for &b in &MAGIC {
            if br.read_bits(8) != b as u32 {
                return Err(Error::InvalidData("ALS magic not found".into()));
            }
        }
        let sample_rate = br.read_bits(32);
        let samples = br.read_bits(32);
        let channels = br.read_bits(16) as u16 + 1;
        let _file_type = br.read_bits(3);
        let resolution = Resolution::from_code(br.read_bits(3) as u8)?;
        let floating = br.read_bit() != 0;
        let msb_first = br.read_bit() != 0;
        let frame_length = br.read_bits(16) + 1;
        let ra_distance = br.read_bits(8) as u8;
        let ra_flag = RandomAccessFlag::from_code(br.read_bits(2) as u8)?;
        let adapt_order = br.read_bit() != 0;
        let coef_table = br.read_bits(2) as u8;
        let long_term_prediction = br.read_bit() != 0;
        let max_order = br.read_bits(10) as u16;
        let bs_code = br.read_bits(2) as u8;
        let block_switch_depth = match bs_code {
            0 => 0,
            1 => 3,
            2 => 4,
            _ => 5,
        };
        let bgmc = br.read_bit() != 0;
        let sb_part = br.read_bit() != 0;
        let joint_stereo = br.read_bit() != 0;
        let mc_coding = br.read_bit() != 0;
        let _chan_config = br.read_bit();
        let chan_sort = br.read_bit() != 0;
        let crc_enabled = br.read_bit() != 0;
        let rlslms = br.read_bit() != 0;
        let _reserved = br.read_bits(5);
        let _aux = br.read_bit();
        br.align_to_byte();
        let _header_size = br.read_bits(32);
        let _trailer_size = br.read_bits(32);
        let crc = if crc_enabled {
            u32::from_le_bytes([
                br.read_bits(8) as u8,
                br.read_bits(8) as u8,
                br.read_bits(8) as u8,
                br.read_bits(8) as u8,
            ])
        } else {
            0
        };

        if br.overran() {
            return Err(Error::InvalidData("config truncated".into()));
        }
        if frame_length < 2 {
            return Err(Error::InvalidData("frame length below 2".into()));
        }
        if mc_coding || chan_sort || rlslms || floating {
            return Err(Error::InvalidData(
                "stream uses tools outside this implementation (mcc/sort/rlslms/float)".into(),
            ));
        }

        let config = SpecificConfig {
            sample_rate,
            samples,
            channels,
            resolution,
            frame_length,
            ra_distance,
            ra_flag,
            adapt_order,
            coef_table,
            long_term_prediction,
            max_order,
            block_switch_depth,
            bgmc,
            sb_part,
            joint_stereo,
            mc_coding,
            chan_sort,
            rlslms,
            floating,
            msb_first,
            crc_enabled,
            crc,
        };
        let consumed = offset + config.config_size();
        Ok((config, consumed))
    }
}

// encoder options

/// Frame length picked from the sample rate when the caller does not care.
pub fn default_frame_length(sample_rate: u32) -> u32 {
    if sample_rate <= 24_000 {
        1024
    } else if sample_rate <= 48_000 {
        2048
    } else if sample_rate <= 96_000 {
        4096
    } else {
        8192
    }
}

/// Everything the caller can set at init.
///
/// The compression level presets the per-stage choices; the explicit
/// fields override individual tools.
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    /// Significant bits per sample; only meaningful for S32 (24-in-32).
    pub bits_per_sample: Option<u8>,
    pub frame_length: Option<u32>,
    /// Compression level 0..=2.
    pub level: u8,
    pub max_order: Option<u16>,
    /// Force BGMC on or off regardless of level.
    pub use_bgmc: Option<bool>,
    /// Random-access distance in frames (gop size); 0 disables.
    pub ra_distance: u8,
    pub coef_table: Option<u8>,
    pub block_switch_mode: BlockSwitchMode,
    pub ltp_gains: LtpGainMode,
    /// Exhaustive order enumeration instead of the valley heuristic.
    pub full_order_search: bool,
}

impl EncoderOptions {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        EncoderOptions {
            sample_rate,
            channels,
            sample_format,
            bits_per_sample: None,
            frame_length: None,
            level: 1,
            max_order: None,
            use_bgmc: None,
            ra_distance: 0,
            coef_table: None,
            block_switch_mode: BlockSwitchMode::BottomUp,
            ltp_gains: LtpGainMode::Cholesky,
            full_order_search: false,
        }
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level.min(2);
        self
    }

    pub fn with_frame_length(mut self, frame_length: u32) -> Self {
        self.frame_length = Some(frame_length);
        self
    }

    pub fn with_ra_distance(mut self, frames: u8) -> Self {
        self.ra_distance = frames;
        self
    }

    pub fn with_bits_per_sample(mut self, bits: u8) -> Self {
        self.bits_per_sample = Some(bits);
        self
    }

    pub fn with_max_order(mut self, order: u16) -> Self {
        self.max_order = Some(order);
        self
    }

    pub fn with_bgmc(mut self, on: bool) -> Self {
        self.use_bgmc = Some(on);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> SpecificConfig {
        SpecificConfig {
            sample_rate: 48_000,
            samples: SAMPLES_UNKNOWN,
            channels: 2,
            resolution: Resolution::Bits16,
            frame_length: 2048,
            ra_distance: 3,
            ra_flag: RandomAccessFlag::Frames,
            adapt_order: true,
            coef_table: 0,
            long_term_prediction: true,
            max_order: 32,
            block_switch_depth: 3,
            bgmc: true,
            sb_part: true,
            joint_stereo: true,
            mc_coding: false,
            chan_sort: false,
            rlslms: false,
            floating: false,
            msb_first: false,
            crc_enabled: true,
            crc: 0xDEAD_BEEF,
        }
    }

    #[test]
    fn extradata_magic_offset() {
        let config = sample_config();
        let extra = config.extradata();
        let off = SpecificConfig::config_offset();
        assert_eq!(&extra[off..off + 4], b"ALS\0");
        assert_eq!(extra.len(), off + config.config_size());
    }

    #[test]
    fn config_roundtrip() {
        let config = sample_config();
        let extra = config.extradata();
        let (parsed, consumed) = SpecificConfig::parse(&extra).unwrap();
        assert_eq!(consumed, extra.len());
        assert_eq!(parsed.sample_rate, config.sample_rate);
        assert_eq!(parsed.channels, config.channels);
        assert_eq!(parsed.resolution, config.resolution);
        assert_eq!(parsed.frame_length, config.frame_length);
        assert_eq!(parsed.ra_distance, config.ra_distance);
        assert_eq!(parsed.ra_flag, config.ra_flag);
        assert_eq!(parsed.max_order, config.max_order);
        assert_eq!(parsed.block_switch_depth, config.block_switch_depth);
        assert_eq!(parsed.bgmc, config.bgmc);
        assert_eq!(parsed.crc, config.crc);
    }
}
