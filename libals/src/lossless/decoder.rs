//! Verification decoder: the exact mirror of the encoder core, used for
//! round-trip checking and file conversion back to PCM.

use crate::core::bgmc;
use crate::core::bitio::BitReader;
use crate::core::crc32::Crc32;
use crate::core::rice;
use crate::core::types::{
    RandomAccessFlag, Resolution, SpecificConfig, LTP_MAX_LAG, SAMPLES_UNKNOWN,
};
use crate::error::{Error, Result};

use super::block;
use super::{lpc, ltp, BlockInfo, CodingParams};

/// Streaming ALS decoder fed one frame bitstream at a time.
pub struct Decoder {
    config: SpecificConfig,
    params: CodingParams,
    hist_len: usize,
    lanes: Vec<Vec<i32>>,
    diff_lanes: Vec<Vec<i32>>,
    frame_index: u64,
    samples_done: u64,
    crc: Crc32,
    /// Decoding started at frame 0, so the CRC covers the whole stream.
    crc_from_start: bool,
    last_frame_blocks: Vec<BlockInfo>,
}

struct BlockDesc {
    js: u8,
    constant: bool,
    shift_lsbs: u8,
    opt_order: usize,
    use_ltp: bool,
    sub_blocks: usize,
}

impl BlockDesc {
    fn info(&self, channel: usize, offset: usize, len: usize, ra: bool) -> BlockInfo {
        BlockInfo {
            channel,
            offset,
            len,
            constant: self.constant,
            js_block: self.js,
            shift_lsbs: self.shift_lsbs,
            opt_order: self.opt_order,
            use_ltp: self.use_ltp,
            sub_blocks: self.sub_blocks,
            ra_block: ra,
        }
    }
}

impl Decoder {
    pub fn new(config: SpecificConfig) -> Result<Self> {
        if config.channels == 0 {
            return Err(Error::InvalidData("channel count must be at least 1".into()));
        }
        let params = CodingParams::from(&config);
        let hist_len = (config.max_order as usize).max(LTP_MAX_LAG);
        let lane_len = hist_len + config.frame_length as usize;
        let lanes = vec![vec![0i32; lane_len]; config.channels as usize];
        let diff_lanes = if config.joint_stereo {
            vec![vec![0i32; lane_len]; config.channels as usize / 2]
        } else {
            Vec::new()
        };
        Ok(Decoder {
            config,
            params,
            hist_len,
            lanes,
            diff_lanes,
            frame_index: 0,
            samples_done: 0,
            crc: Crc32::new(),
            crc_from_start: true,
            last_frame_blocks: Vec::new(),
        })
    }

    /// Build a decoder from extradata or a bare ALSSpecificConfig.
    pub fn from_extradata(data: &[u8]) -> Result<Self> {
        let (config, _) = SpecificConfig::parse(data)?;
        Self::new(config)
    }

    pub fn config(&self) -> &SpecificConfig {
        &self.config
    }

    pub fn last_frame_blocks(&self) -> &[BlockInfo] {
        &self.last_frame_blocks
    }

    /// Per-channel samples still expected, when the stream was finalized.
    pub fn remaining_samples(&self) -> Option<u64> {
        if self.config.samples == SAMPLES_UNKNOWN {
            None
        } else {
            Some(self.config.samples as u64 - self.samples_done.min(self.config.samples as u64))
        }
    }

    pub fn is_finished(&self) -> bool {
        self.remaining_samples() == Some(0)
    }

    /// CRC verdict once the whole stream has been decoded from its start.
    pub fn verify_crc(&self) -> Option<bool> {
        if !self.config.crc_enabled || !self.crc_from_start || !self.is_finished() {
            None
        } else {
            Some(self.crc.finish() == self.config.crc)
        }
    }

    /// Jump to a random-access frame. All history is cleared, so the target
    /// must be frame 0 or a frame on the random-access schedule; decoding
    /// then proceeds with no prior context, exactly as the encoder coded it.
    pub fn seek_to_frame(&mut self, frame_index: u64) -> Result<()> {
        if frame_index != 0 && !self.config.is_ra_frame(frame_index) {
            return Err(Error::InvalidData(format!(
                "frame {} is not a random-access point",
                frame_index
            )));
        }
        for lane in self.lanes.iter_mut().chain(self.diff_lanes.iter_mut()) {
            lane.fill(0);
        }
        self.frame_index = frame_index;
        let done = frame_index * self.config.frame_length as u64;
        self.samples_done = if self.config.samples == SAMPLES_UNKNOWN {
            done
        } else {
            done.min(self.config.samples as u64)
        };
        self.crc = Crc32::new();
        self.crc_from_start = frame_index == 0;
        self.last_frame_blocks.clear();
        Ok(())
    }

    /// Decode one frame from a standalone packet.
    pub fn decode_packet(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        let mut br = BitReader::new(packet);
        self.decode_frame(&mut br)
    }

    /// Decode one frame from a running bitstream reader.
    pub fn decode_frame(&mut self, br: &mut BitReader<'_>) -> Result<Vec<u8>> {
        let frame_size = match self.remaining_samples() {
            Some(0) => return Err(Error::InvalidData("stream already fully decoded".into())),
            Some(rem) => (self.config.frame_length as u64).min(rem) as usize,
            None => self.config.frame_length as usize,
        };

        let ra_frame = self.config.is_ra_frame(self.frame_index);
        if ra_frame && self.config.ra_flag == RandomAccessFlag::Frames {
            let _ra_unit_size = br.read_bits(32);
        }

        let mut infos = Vec::new();
        let mut c = 0;
        while c < self.config.channels as usize {
            if self.config.joint_stereo && c + 1 < self.config.channels as usize {
                self.decode_pair(br, c, frame_size, ra_frame, &mut infos)?;
                c += 2;
            } else {
                self.decode_single(br, c, frame_size, ra_frame, &mut infos)?;
                c += 1;
            }
        }

        br.align_to_byte();
        if br.overran() {
            return Err(Error::InvalidData("frame truncated".into()));
        }

        let pcm = self.emit_pcm(frame_size);
        if self.config.crc_enabled {
            if self.config.resolution == Resolution::Bits24 {
                for group in pcm.chunks_exact(4) {
                    self.crc.update(&group[1..4]);
                }
            } else {
                self.crc.update(&pcm);
            }
        }

        for lane in self.lanes.iter_mut().chain(self.diff_lanes.iter_mut()) {
            lane.copy_within(frame_size..frame_size + self.hist_len, 0);
        }
        self.frame_index += 1;
        self.samples_done += frame_size as u64;
        self.last_frame_blocks = infos;

        Ok(pcm)
    }

    // channel groups

    fn decode_single(
        &mut self,
        br: &mut BitReader<'_>,
        c: usize,
        frame_size: usize,
        ra_frame: bool,
        infos: &mut Vec<BlockInfo>,
    ) -> Result<()> {
        let d = self.params.block_switch_depth;
        let bs_info = if d > 0 {
            block::read_bs_info(br, self.params.bs_info_bytes)
        } else {
            0
        };
        let hist = self.hist_len;
        let ltp_start = self.ltp_history_start();
        for leaf in block::leaves(bs_info, d, self.params.frame_length, frame_size) {
            let ra = ra_frame && leaf.offset == 0;
            let desc = decode_block(
                &self.params,
                br,
                &mut self.lanes[c],
                None,
                hist + leaf.offset,
                leaf.len,
                ra,
                ltp_start,
            )?;
            infos.push(desc.info(c, leaf.offset, leaf.len, ra));
        }
        Ok(())
    }

    fn ltp_history_start(&self) -> usize {
        super::ltp_history_start(
            self.hist_len,
            self.params.frame_length,
            self.config.ra_distance,
            self.frame_index,
        )
    }

    fn decode_pair(
        &mut self,
        br: &mut BitReader<'_>,
        c: usize,
        frame_size: usize,
        ra_frame: bool,
        infos: &mut Vec<BlockInfo>,
    ) -> Result<()> {
        let d = self.params.block_switch_depth;
        let pair = c / 2;
        let hist = self.hist_len;
        let ltp_start = self.ltp_history_start();

        let mut independent = false;
        let (bs0, bs1);
        if d > 0 {
            independent = br.read_bit() != 0;
            if independent {
                bs0 = block::read_bs_info(br, self.params.bs_info_bytes);
                bs1 = block::read_bs_info(br, self.params.bs_info_bytes);
            } else {
                bs0 = block::read_bs_info(br, self.params.bs_info_bytes);
                bs1 = bs0;
            }
        } else {
            bs0 = 0;
            bs1 = 0;
        }

        let (head, tail) = self.lanes.split_at_mut(c + 1);
        let lane0 = &mut head[c];
        let lane1 = &mut tail[0];
        let diff = &mut self.diff_lanes[pair];

        if independent {
            // difference coding is off; the lanes decode like singles
            for leaf in block::leaves(bs0, d, self.params.frame_length, frame_size) {
                let ra = ra_frame && leaf.offset == 0;
                let desc = decode_block(
                    &self.params,
                    br,
                    lane0,
                    None,
                    hist + leaf.offset,
                    leaf.len,
                    ra,
                    ltp_start,
                )?;
                infos.push(desc.info(c, leaf.offset, leaf.len, ra));
            }
            for leaf in block::leaves(bs1, d, self.params.frame_length, frame_size) {
                let ra = ra_frame && leaf.offset == 0;
                let desc = decode_block(
                    &self.params,
                    br,
                    lane1,
                    None,
                    hist + leaf.offset,
                    leaf.len,
                    ra,
                    ltp_start,
                )?;
                infos.push(desc.info(c + 1, leaf.offset, leaf.len, ra));
            }
            for n in 0..frame_size {
                diff[hist + n] = lane1[hist + n].wrapping_sub(lane0[hist + n]);
            }
            return Ok(());
        }

        for leaf in block::leaves(bs0, d, self.params.frame_length, frame_size) {
            let ra = ra_frame && leaf.offset == 0;
            let off = hist + leaf.offset;

            // a set flag routes the block into the difference lane, whose
            // own history drives its predictor
            let desc0 = decode_block(
                &self.params,
                br,
                lane0,
                Some(diff.as_mut_slice()),
                off,
                leaf.len,
                ra,
                ltp_start,
            )?;
            let desc1 = decode_block(
                &self.params,
                br,
                lane1,
                Some(diff.as_mut_slice()),
                off,
                leaf.len,
                ra,
                ltp_start,
            )?;
            let js = match (desc0.js, desc1.js) {
                (0, 0) => 0,
                (1, 0) => 1,
                (0, 1) => 2,
                _ => {
                    return Err(Error::InvalidData(
                        "both channels of a pair carry the difference".into(),
                    ))
                }
            };

            match js {
                1 => {
                    for i in off..off + leaf.len {
                        lane0[i] = lane1[i].wrapping_sub(diff[i]);
                    }
                }
                2 => {
                    for i in off..off + leaf.len {
                        lane1[i] = lane0[i].wrapping_add(diff[i]);
                    }
                }
                _ => {}
            }
            // keep the difference lane warm for later blocks and frames
            for i in off..off + leaf.len {
                diff[i] = lane1[i].wrapping_sub(lane0[i]);
            }

            let mut info0 = desc0.info(c, leaf.offset, leaf.len, ra);
            info0.js_block = if js == 1 { 1 } else { 0 };
            let mut info1 = desc1.info(c + 1, leaf.offset, leaf.len, ra);
            info1.js_block = if js == 2 { 2 } else { 0 };
            infos.push(info0);
            infos.push(info1);
        }
        Ok(())
    }

    // output

    fn emit_pcm(&self, frame_size: usize) -> Vec<u8> {
        let ch = self.config.channels as usize;
        let h = self.hist_len;
        let mut out;
        match self.config.resolution {
            Resolution::Bits8 => {
                out = Vec::with_capacity(frame_size * ch);
                for n in 0..frame_size {
                    for c in 0..ch {
                        out.push((self.lanes[c][h + n] + 128) as u8);
                    }
                }
            }
            Resolution::Bits16 => {
                out = Vec::with_capacity(frame_size * ch * 2);
                for n in 0..frame_size {
                    for c in 0..ch {
                        out.extend_from_slice(&(self.lanes[c][h + n] as i16).to_le_bytes());
                    }
                }
            }
            Resolution::Bits24 => {
                out = Vec::with_capacity(frame_size * ch * 4);
                for n in 0..frame_size {
                    for c in 0..ch {
                        out.extend_from_slice(&(self.lanes[c][h + n] << 8).to_le_bytes());
                    }
                }
            }
            Resolution::Bits32 => {
                out = Vec::with_capacity(frame_size * ch * 4);
                for n in 0..frame_size {
                    for c in 0..ch {
                        out.extend_from_slice(&self.lanes[c][h + n].to_le_bytes());
                    }
                }
            }
        }
        out
    }
}

// block decoding

enum EntParams {
    Rice([u8; 8]),
    Bgmc([u16; 8]),
}

#[allow(clippy::too_many_arguments)]
fn decode_block(
    params: &CodingParams,
    br: &mut BitReader<'_>,
    lane: &mut [i32],
    diff_lane: Option<&mut [i32]>,
    offset: usize,
    len: usize,
    ra: bool,
    ltp_start: usize,
) -> Result<BlockDesc> {
    if br.read_bit() == 0 {
        // constant block
        let nonzero = br.read_bit() != 0;
        let js = br.read_bit() as u8;
        let _reserved = br.read_bits(5);
        let value = if nonzero {
            let bits = (params.bits_per_raw_sample + js).min(32);
            br.read_signed_bits(bits)
        } else {
            0
        };
        let target = route(lane, diff_lane, js)?;
        target[offset..offset + len].fill(value);
        return Ok(BlockDesc {
            js,
            constant: true,
            shift_lsbs: 0,
            opt_order: 0,
            use_ltp: false,
            sub_blocks: 1,
        });
    }

    let js = br.read_bit() as u8;
    let target = route(lane, diff_lane, js)?;

    let sub_blocks = params.read_sub_blocks(br);
    if sub_blocks > 1 && (len % sub_blocks != 0 || len < 16) {
        return Err(Error::InvalidData(format!(
            "block of {} samples cannot hold {} subblocks",
            len, sub_blocks
        )));
    }

    let ent = if params.bgmc {
        let mut p = [0u16; 8];
        p[0] = br.read_bits(params.bgmc_p0_bits) as u16;
        for j in 1..sub_blocks {
            let v = p[j - 1] as i32 + rice::decode_signed(br, 2);
            if v < 0 || v > params.bgmc_max_param as i32 {
                return Err(Error::InvalidData("entropy parameter out of range".into()));
            }
            p[j] = v as u16;
        }
        EntParams::Bgmc(p)
    } else {
        let mut s = [0u8; 8];
        s[0] = br.read_bits(params.rice_s0_bits) as u8;
        for j in 1..sub_blocks {
            let v = s[j - 1] as i32 + rice::decode_signed(br, 0);
            if v < 0 || v > params.max_rice_param as i32 {
                return Err(Error::InvalidData("entropy parameter out of range".into()));
            }
            s[j] = v as u8;
        }
        EntParams::Rice(s)
    };

    let shift_lsbs = if br.read_bit() != 0 {
        br.read_bits(4) as u8 + 1
    } else {
        0
    };

    let opt_order = if params.adapt_order {
        br.read_bits(lpc::order_field_bits(len, params.max_order)) as usize
    } else {
        lpc::fixed_order(len, params.max_order)
    };
    if opt_order > params.max_order as usize {
        return Err(Error::InvalidData("prediction order beyond stream maximum".into()));
    }

    let mut quant = Vec::with_capacity(opt_order);
    for i in 0..opt_order {
        let q = if params.coef_table == 3 {
            br.read_bits(7) as i32 - 64
        } else {
            let (coff, cparam) = lpc::coef_rice_code(params.coef_table, i);
            rice::decode_signed(br, cparam) + coff
        };
        if !(-64..=63).contains(&q) {
            return Err(Error::InvalidData("coefficient index out of range".into()));
        }
        quant.push(q as i8);
    }
    let q20: Vec<i32> = quant
        .iter()
        .enumerate()
        .map(|(i, &q)| lpc::dequantize_parcor(q, i))
        .collect();
    let stages = lpc::parcor_to_lpc_stages(&q20)
        .ok_or_else(|| Error::InvalidData("coefficient conversion overflow".into()))?;

    let ltp_info = if params.long_term_prediction {
        if br.read_bit() != 0 {
            Some(ltp::read(br, params.lag_bits, opt_order))
        } else {
            None
        }
    } else {
        None
    };

    // residuals
    let mut res = vec![0i32; len];
    match &ent {
        EntParams::Rice(s) => {
            let sb_len = len / sub_blocks;
            for i in 0..len {
                let j = (i / sb_len).min(sub_blocks - 1);
                let k = if ra && j == 0 && i < 3 {
                    params.ra_rice_param(i, s[0])
                } else {
                    s[j]
                };
                res[i] = rice::decode_signed(br, k);
            }
        }
        EntParams::Bgmc(p) => {
            let start = if ra { opt_order.min(len) } else { 0 };
            let s0 = ((p[0] >> 4) as u8).min(params.max_rice_param);
            for (i, slot) in res[..start].iter_mut().enumerate() {
                let k = if i < 3 { params.ra_rice_param(i, s0) } else { s0 };
                *slot = rice::decode_signed(br, k);
            }
            bgmc::decode_residuals(br, &mut res, start, &p[..sub_blocks]);
        }
    }

    if let Some(info) = &ltp_info {
        ltp::synthesize(&target[ltp_start..offset], &mut res, info);
    }

    // reconstruct in the shifted domain, then restore the stripped bits
    let hist = params.max_order as usize;
    let mut work: Vec<i32> = target[offset - hist..offset + len]
        .iter()
        .map(|&v| v >> shift_lsbs)
        .collect();
    lpc::reconstruct(&mut work, hist, len, &stages, opt_order, ra, &res);
    for n in 0..len {
        target[offset + n] = work[hist + n] << shift_lsbs;
    }

    Ok(BlockDesc {
        js,
        constant: false,
        shift_lsbs,
        opt_order,
        use_ltp: ltp_info.is_some(),
        sub_blocks,
    })
}

fn route<'a>(
    lane: &'a mut [i32],
    diff_lane: Option<&'a mut [i32]>,
    js: u8,
) -> Result<&'a mut [i32]> {
    if js == 0 {
        Ok(lane)
    } else {
        diff_lane.ok_or_else(|| {
            Error::InvalidData("difference block outside a joint-stereo pair".into())
        })
    }
}
