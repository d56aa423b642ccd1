//! The ALS encoder core and its verification decoder.
//!
//! Per frame the encoder stages samples into per-channel lanes, searches
//! block partitioning, prediction, and entropy parameters, and writes the
//! frame bitstream; the decoder is its exact mirror.

pub mod block;
pub mod decoder;
pub mod encoder;
pub mod lpc;
pub mod ltp;

pub use decoder::Decoder;
pub use encoder::Encoder;

use crate::core::bitio::{BitReader, BitWriter};
use crate::core::types::SpecificConfig;

/// Per-block facts surfaced for inspection after each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub channel: usize,
    pub offset: usize,
    pub len: usize,
    pub constant: bool,
    /// 0 independent, 1 this channel carries the difference, 2 the partner does.
    pub js_block: u8,
    pub shift_lsbs: u8,
    pub opt_order: usize,
    pub use_ltp: bool,
    pub sub_blocks: usize,
    pub ra_block: bool,
}

/// Config-derived coding constants shared by encoder and decoder.
#[derive(Debug, Clone)]
pub(crate) struct CodingParams {
    pub bits_per_raw_sample: u8,
    pub max_rice_param: u8,
    pub rice_s0_bits: u8,
    pub bgmc_p0_bits: u8,
    pub bgmc_max_param: u16,
    pub adapt_order: bool,
    pub coef_table: u8,
    pub max_order: u16,
    pub long_term_prediction: bool,
    pub lag_bits: u8,
    pub bgmc: bool,
    pub sb_part: bool,
    pub block_switch_depth: u8,
    pub bs_info_bytes: usize,
    pub frame_length: usize,
}

impl From<&SpecificConfig> for CodingParams {
    fn from(c: &SpecificConfig) -> Self {
        CodingParams {
            bits_per_raw_sample: c.bits_per_raw_sample(),
            max_rice_param: c.max_rice_param(),
            rice_s0_bits: c.rice_s0_bits(),
            bgmc_p0_bits: c.bgmc_p0_bits(),
            bgmc_max_param: c.bgmc_max_param(),
            adapt_order: c.adapt_order,
            coef_table: c.coef_table,
            max_order: c.max_order,
            long_term_prediction: c.long_term_prediction,
            lag_bits: ltp::lag_bits(c.sample_rate),
            bgmc: c.bgmc,
            sb_part: c.sb_part,
            block_switch_depth: c.block_switch_depth,
            bs_info_bytes: c.bs_info_bytes(),
            frame_length: c.frame_length as usize,
        }
    }
}

impl CodingParams {
    /// Subblock counts the block header can express.
    pub fn allowed_sub_blocks(&self) -> &'static [usize] {
        if self.sb_part && self.bgmc {
            &[1, 2, 4, 8]
        } else if self.sb_part || self.bgmc {
            &[1, 4]
        } else {
            &[1]
        }
    }

    pub(crate) fn write_sub_blocks(&self, bw: &mut BitWriter, sub: usize) {
        if self.sb_part && self.bgmc {
            bw.write_bits(sub.trailing_zeros(), 2);
        } else if self.sb_part || self.bgmc {
            bw.write_bit((sub == 4) as u32);
        }
    }

    pub(crate) fn read_sub_blocks(&self, br: &mut BitReader<'_>) -> usize {
        if self.sb_part && self.bgmc {
            1 << br.read_bits(2)
        } else if self.sb_part || self.bgmc {
            if br.read_bit() != 0 {
                4
            } else {
                1
            }
        } else {
            1
        }
    }

    /// Rice parameter of the i-th residual of a random-access block.
    pub(crate) fn ra_rice_param(&self, i: usize, s: u8) -> u8 {
        let p = match i {
            0 => self.bits_per_raw_sample.saturating_sub(4),
            1 => s.saturating_add(3),
            _ => s.saturating_add(1),
        };
        p.min(self.max_rice_param)
    }
}

/// First lane index the long-term predictor of the current frame may reach
/// back to. Without random access the whole retained history is usable;
/// otherwise history is confined to the current random-access unit so a
/// decoder entering at the unit boundary reconstructs the same samples.
pub(crate) fn ltp_history_start(
    hist_len: usize,
    frame_length: usize,
    ra_distance: u8,
    frame_index: u64,
) -> usize {
    if ra_distance == 0 {
        return 0;
    }
    let since_ra = (frame_index % ra_distance as u64) as usize;
    hist_len - hist_len.min(since_ra * frame_length)
}
