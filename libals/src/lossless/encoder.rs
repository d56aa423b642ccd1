//! The encoder core: sample staging, per-block parameter search,
//! joint-stereo selection, partition merging, and the frame bitstream
//! writer.

use crate::core::bgmc;
use crate::core::bitio::BitWriter;
use crate::core::crc32::Crc32;
use crate::core::rice;
use crate::core::types::{
    default_frame_length, BlockSwitchMode, EncoderOptions, LtpGainMode, RandomAccessFlag,
    Resolution, SampleFormat, SpecificConfig, LTP_MAX_LAG, MAX_PRED_ORDER, SAMPLES_UNKNOWN,
};
use crate::error::{Error, Result};

use super::block::{self, Leaf};
use super::{lpc, ltp, BlockInfo, CodingParams};

// search configuration

/// Per-level algorithm switches resolved at init.
#[derive(Debug, Clone, Copy)]
struct SearchKnobs {
    rice_exact: bool,
    bgmc_exact: bool,
    bs_mode: BlockSwitchMode,
    ltp_gains: LtpGainMode,
    full_order_search: bool,
}

// block plans

#[derive(Debug, Clone)]
enum EntropyPlan {
    Rice { sub_blocks: usize, params: [u8; 8] },
    Bgmc { sub_blocks: usize, params: [u16; 8] },
}

impl EntropyPlan {
    fn sub_blocks(&self) -> usize {
        match self {
            EntropyPlan::Rice { sub_blocks, .. } => *sub_blocks,
            EntropyPlan::Bgmc { sub_blocks, .. } => *sub_blocks,
        }
    }
}

#[derive(Debug, Clone)]
enum PlanKind {
    Constant {
        value: i32,
    },
    Normal {
        shift_lsbs: u8,
        opt_order: usize,
        quant: Vec<i8>,
        ltp: Option<ltp::LtpInfo>,
        entropy: EntropyPlan,
        residual: Vec<i32>,
    },
}

#[derive(Debug, Clone)]
struct BlockPlan {
    len: usize,
    ra: bool,
    kind: PlanKind,
}

// the encoder

/// Streaming ALS encoder: one packet out per frame of PCM in.
pub struct Encoder {
    config: SpecificConfig,
    params: CodingParams,
    knobs: SearchKnobs,
    sample_format: SampleFormat,
    /// Right shift normalizing container samples to the raw range.
    shift_in: u8,
    hist_len: usize,
    lanes: Vec<Vec<i32>>,
    diff_lanes: Vec<Vec<i32>>,
    frame_index: u64,
    samples_done: u64,
    crc: Crc32,
    finished: bool,
    last_frame_blocks: Vec<BlockInfo>,
    sample_rate: u32,
}

impl Encoder {
    /// Level-1 encoder with default geometry.
    pub fn new(sample_rate: u32, channels: u16, format: SampleFormat) -> Result<Self> {
        Self::with_options(EncoderOptions::new(sample_rate, channels, format))
    }

    pub fn with_options(options: EncoderOptions) -> Result<Self> {
        if options.channels == 0 {
            return Err(Error::InvalidConfig("channel count must be at least 1".into()));
        }
        if options.sample_rate == 0 || options.sample_rate > 0x00FF_FFFF {
            return Err(Error::InvalidConfig(format!(
                "sample rate {} out of range",
                options.sample_rate
            )));
        }

        let container_bits = options.sample_format.container_bits();
        let bits = options.bits_per_sample.unwrap_or(container_bits);
        let resolution = match (options.sample_format, bits) {
            (SampleFormat::U8, 8) => Resolution::Bits8,
            (SampleFormat::S16, 16) => Resolution::Bits16,
            (SampleFormat::S32, 24) => Resolution::Bits24,
            (SampleFormat::S32, 32) => Resolution::Bits32,
            _ => {
                return Err(Error::UnsupportedFormat(format!(
                    "{:?} with {} significant bits",
                    options.sample_format, bits
                )))
            }
        };

        let frame_length = options
            .frame_length
            .unwrap_or_else(|| default_frame_length(options.sample_rate));
        if !(2..=65536).contains(&frame_length) {
            return Err(Error::InvalidConfig(format!(
                "frame length {} out of range",
                frame_length
            )));
        }

        let level = options.level.min(2);
        let default_order: u16 = [4, 10, 32][level as usize];
        let max_order = options
            .max_order
            .unwrap_or(default_order)
            .min(MAX_PRED_ORDER as u16)
            .min((frame_length - 1).min(u16::MAX as u32) as u16);
        let bgmc_on = options.use_bgmc.unwrap_or(level >= 2);
        let coef_table = match options.coef_table {
            Some(t) if t <= 3 => t,
            Some(t) => {
                return Err(Error::InvalidConfig(format!("coef_table {} out of range", t)))
            }
            None => {
                if options.sample_rate <= 48_000 {
                    0
                } else if options.sample_rate <= 96_000 {
                    1
                } else {
                    2
                }
            }
        };

        let config = SpecificConfig {
            sample_rate: options.sample_rate,
            samples: SAMPLES_UNKNOWN,
            channels: options.channels,
            resolution,
            frame_length,
            ra_distance: options.ra_distance,
            ra_flag: if options.ra_distance > 0 {
                RandomAccessFlag::Frames
            } else {
                RandomAccessFlag::None
            },
            adapt_order: level >= 2,
            coef_table,
            long_term_prediction: level >= 2,
            max_order,
            block_switch_depth: if level >= 2 { 3 } else { 0 },
            bgmc: bgmc_on,
            sb_part: level >= 1,
            joint_stereo: level >= 1 && options.channels >= 2,
            mc_coding: false,
            chan_sort: false,
            rlslms: false,
            floating: false,
            msb_first: false,
            crc_enabled: level >= 1,
            crc: 0,
        };

        let knobs = SearchKnobs {
            rice_exact: level >= 1,
            bgmc_exact: level >= 2,
            bs_mode: options.block_switch_mode,
            ltp_gains: options.ltp_gains,
            full_order_search: options.full_order_search,
        };

        let params = CodingParams::from(&config);
        let hist_len = (max_order as usize).max(LTP_MAX_LAG);
        let lane_len = hist_len + frame_length as usize;
        let lanes = vec![vec![0i32; lane_len]; options.channels as usize];
        let diff_lanes = if config.joint_stereo {
            vec![vec![0i32; lane_len]; options.channels as usize / 2]
        } else {
            Vec::new()
        };

        Ok(Encoder {
            sample_rate: options.sample_rate,
            config,
            params,
            knobs,
            sample_format: options.sample_format,
            shift_in: container_bits - bits,
            hist_len,
            lanes,
            diff_lanes,
            frame_index: 0,
            samples_done: 0,
            crc: Crc32::new(),
            finished: false,
            last_frame_blocks: Vec::new(),
        })
    }

    pub fn config(&self) -> &SpecificConfig {
        &self.config
    }

    /// AudioSpecificConfig + ALSSpecificConfig for the muxer.
    pub fn extradata(&self) -> Vec<u8> {
        self.config.extradata()
    }

    /// Block layout of the most recent frame.
    pub fn last_frame_blocks(&self) -> &[BlockInfo] {
        &self.last_frame_blocks
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frame_index
    }

    /// Encode one frame of interleaved PCM and return its packet.
    ///
    /// Every frame must carry `frame_length` samples per channel except the
    /// last one, which may be shorter.
    pub fn encode_frame(&mut self, pcm: &[u8]) -> Result<Vec<u8>> {
        if self.finished {
            return Err(Error::InvalidConfig("encoder already finalized".into()));
        }
        let stride = self.sample_format.bytes_per_sample() * self.config.channels as usize;
        if pcm.is_empty() || pcm.len() % stride != 0 {
            return Err(Error::BadInputLength(format!(
                "{} bytes is not a whole number of {}-byte sample groups",
                pcm.len(),
                stride
            )));
        }
        let frame_size = pcm.len() / stride;
        if frame_size > self.config.frame_length as usize {
            return Err(Error::BadInputLength(format!(
                "{} samples exceeds the frame length {}",
                frame_size, self.config.frame_length
            )));
        }

        self.stage(pcm, frame_size);

        let ra_frame = self.config.is_ra_frame(self.frame_index);
        let limit = (self.config.frame_length as usize * self.config.channels as usize * 32).max(8192);
        let mut bw = BitWriter::with_limit(limit);
        let ra_slot = ra_frame && self.config.ra_flag == RandomAccessFlag::Frames;
        if ra_slot {
            bw.write_bits(0, 32); // back-patched with the packet size
        }

        let mut infos = Vec::new();
        let mut c = 0;
        while c < self.config.channels as usize {
            if self.config.joint_stereo && c + 1 < self.config.channels as usize {
                self.encode_pair(&mut bw, c, frame_size, ra_frame, &mut infos);
                c += 2;
            } else {
                self.encode_single(&mut bw, c, frame_size, ra_frame, &mut infos);
                c += 1;
            }
        }

        bw.align_to_byte();
        if bw.overflowed() {
            return Err(Error::BitstreamOverflow);
        }
        if ra_slot {
            let total = (bw.bit_len() / 8) as u32;
            bw.patch_u32(0, total);
        }

        // frame committed; fold CRC and advance history
        if self.config.crc_enabled {
            self.update_crc(pcm);
        }
        for lane in self.lanes.iter_mut().chain(self.diff_lanes.iter_mut()) {
            lane.copy_within(frame_size..frame_size + self.hist_len, 0);
        }
        self.frame_index += 1;
        self.samples_done += frame_size as u64;
        self.last_frame_blocks = infos;

        Ok(bw.into_bytes())
    }

    /// End the stream: returns the finalized extradata with the total
    /// sample count and CRC patched in.
    pub fn finalize(&mut self) -> Result<Vec<u8>> {
        if self.finished {
            return Err(Error::InvalidConfig("encoder already finalized".into()));
        }
        self.finished = true;
        self.config.samples = self.samples_done.min(u32::MAX as u64 - 1) as u32;
        if self.config.crc_enabled {
            self.config.crc = self.crc.finish();
        }
        Ok(self.config.extradata())
    }

    // staging

    fn stage(&mut self, pcm: &[u8], frame_size: usize) {
        let ch = self.config.channels as usize;
        let h = self.hist_len;
        match self.sample_format {
            SampleFormat::U8 => {
                for n in 0..frame_size {
                    for c in 0..ch {
                        self.lanes[c][h + n] = pcm[n * ch + c] as i32 - 128;
                    }
                }
            }
            SampleFormat::S16 => {
                for n in 0..frame_size {
                    for c in 0..ch {
                        let i = (n * ch + c) * 2;
                        self.lanes[c][h + n] =
                            i16::from_le_bytes([pcm[i], pcm[i + 1]]) as i32;
                    }
                }
            }
            SampleFormat::S32 => {
                let shift = self.shift_in;
                for n in 0..frame_size {
                    for c in 0..ch {
                        let i = (n * ch + c) * 4;
                        let v = i32::from_le_bytes([pcm[i], pcm[i + 1], pcm[i + 2], pcm[i + 3]]);
                        self.lanes[c][h + n] = v >> shift;
                    }
                }
            }
        }

        if self.config.joint_stereo {
            for pair in 0..ch / 2 {
                for n in 0..frame_size {
                    self.diff_lanes[pair][h + n] = self.lanes[2 * pair + 1][h + n]
                        .wrapping_sub(self.lanes[2 * pair][h + n]);
                }
            }
        }
    }

    fn update_crc(&mut self, pcm: &[u8]) {
        if self.config.resolution == Resolution::Bits24 {
            // 24-in-32: the padding byte is not part of the stream
            for group in pcm.chunks_exact(4) {
                self.crc.update(&group[1..4]);
            }
        } else {
            self.crc.update(pcm);
        }
    }

    // channel encoding

    fn merge(&self, costs: &[u64], d: u8) -> (u32, u64) {
        match self.knobs.bs_mode {
            BlockSwitchMode::BottomUp => block::merge_bottom_up(costs, d),
            BlockSwitchMode::FullSearch => block::merge_full_search(costs, d),
        }
    }

    fn plan_lane(
        &self,
        lane: &[i32],
        frame_size: usize,
        ra_frame: bool,
        scratch: &mut BitWriter,
    ) -> (Vec<Option<BlockPlan>>, Vec<u64>) {
        let d = self.params.block_switch_depth;
        let nodes = block::node_count(d);
        let ltp_start = super::ltp_history_start(
            self.hist_len,
            self.params.frame_length,
            self.config.ra_distance,
            self.frame_index,
        );
        let mut plans = vec![None; nodes];
        let mut costs = vec![0u64; nodes];
        for n in 0..nodes {
            let (off, len) = block::node_bounds(n, self.params.frame_length, frame_size);
            if len == 0 {
                continue;
            }
            let ra = ra_frame && off == 0;
            let plan = search_block(
                &self.params,
                &self.knobs,
                self.sample_rate,
                lane,
                self.hist_len + off,
                len,
                ra,
                ltp_start,
                scratch,
            );
            scratch.clear();
            write_block(&self.params, scratch, &plan, 0);
            costs[n] = scratch.bit_len() as u64;
            plans[n] = Some(plan);
        }
        (plans, costs)
    }

    fn emit_leaf(
        &self,
        bw: &mut BitWriter,
        plan: &BlockPlan,
        js: u8,
        channel: usize,
        leaf: Leaf,
        infos: &mut Vec<BlockInfo>,
    ) {
        write_block(&self.params, bw, plan, js);
        infos.push(block_info(plan, js, channel, leaf));
    }

    fn encode_single(
        &self,
        bw: &mut BitWriter,
        c: usize,
        frame_size: usize,
        ra_frame: bool,
        infos: &mut Vec<BlockInfo>,
    ) {
        let d = self.params.block_switch_depth;
        let mut scratch = BitWriter::new();
        let (plans, costs) = self.plan_lane(&self.lanes[c], frame_size, ra_frame, &mut scratch);
        let (bs_info, _) = self.merge(&costs, d);
        if d > 0 {
            block::write_bs_info(bw, bs_info, self.params.bs_info_bytes);
        }
        for leaf in block::leaves(bs_info, d, self.params.frame_length, frame_size) {
            let plan = plans[leaf.node].as_ref().expect("planned leaf");
            self.emit_leaf(bw, plan, 0, c, leaf, infos);
        }
    }

    fn encode_pair(
        &self,
        bw: &mut BitWriter,
        c: usize,
        frame_size: usize,
        ra_frame: bool,
        infos: &mut Vec<BlockInfo>,
    ) {
        let d = self.params.block_switch_depth;
        let nodes = block::node_count(d);
        let pair = c / 2;
        let mut scratch = BitWriter::new();

        let (plans0, costs0) = self.plan_lane(&self.lanes[c], frame_size, ra_frame, &mut scratch);
        let (plans1, costs1) =
            self.plan_lane(&self.lanes[c + 1], frame_size, ra_frame, &mut scratch);
        let (plans_d, costs_d) =
            self.plan_lane(&self.diff_lanes[pair], frame_size, ra_frame, &mut scratch);

        // best difference-coding choice per node
        let mut js_choice = vec![0u8; nodes];
        let mut pair_costs = vec![0u64; nodes];
        for n in 0..nodes {
            let indep = costs0[n] + costs1[n];
            let diff_first = costs_d[n] + costs1[n];
            let diff_second = costs0[n] + costs_d[n];
            let (choice, cost) = if indep <= diff_first && indep <= diff_second {
                (0, indep)
            } else if diff_first <= diff_second {
                (1, diff_first)
            } else {
                (2, diff_second)
            };
            js_choice[n] = choice;
            pair_costs[n] = cost;
        }

        let (bs_joint, joint_cost) = self.merge(&pair_costs, d);
        let (bs0, cost0) = self.merge(&costs0, d);
        let (bs1, cost1) = self.merge(&costs1, d);
        let overhead = (self.params.bs_info_bytes * 8) as u64;
        let independent = d > 0 && cost0 + cost1 + overhead < joint_cost;

        if d > 0 {
            bw.write_bit(independent as u32);
            if independent {
                block::write_bs_info(bw, bs0, self.params.bs_info_bytes);
                block::write_bs_info(bw, bs1, self.params.bs_info_bytes);
            } else {
                block::write_bs_info(bw, bs_joint, self.params.bs_info_bytes);
            }
        }

        if independent {
            for leaf in block::leaves(bs0, d, self.params.frame_length, frame_size) {
                let plan = plans0[leaf.node].as_ref().expect("planned leaf");
                self.emit_leaf(bw, plan, 0, c, leaf, infos);
            }
            for leaf in block::leaves(bs1, d, self.params.frame_length, frame_size) {
                let plan = plans1[leaf.node].as_ref().expect("planned leaf");
                self.emit_leaf(bw, plan, 0, c + 1, leaf, infos);
            }
        } else {
            for leaf in block::leaves(bs_joint, d, self.params.frame_length, frame_size) {
                let choice = js_choice[leaf.node];
                let (first, first_js) = match choice {
                    1 => (plans_d[leaf.node].as_ref(), 1),
                    _ => (plans0[leaf.node].as_ref(), 0),
                };
                let (second, second_js) = match choice {
                    2 => (plans_d[leaf.node].as_ref(), 2),
                    _ => (plans1[leaf.node].as_ref(), 0),
                };
                self.emit_leaf(bw, first.expect("planned leaf"), first_js, c, leaf, infos);
                self.emit_leaf(bw, second.expect("planned leaf"), second_js, c + 1, leaf, infos);
            }
        }
    }
}

fn block_info(plan: &BlockPlan, js: u8, channel: usize, leaf: Leaf) -> BlockInfo {
    match &plan.kind {
        PlanKind::Constant { .. } => BlockInfo {
            channel,
            offset: leaf.offset,
            len: plan.len,
            constant: true,
            js_block: js,
            shift_lsbs: 0,
            opt_order: 0,
            use_ltp: false,
            sub_blocks: 1,
            ra_block: plan.ra,
        },
        PlanKind::Normal {
            shift_lsbs,
            opt_order,
            ltp,
            entropy,
            ..
        } => BlockInfo {
            channel,
            offset: leaf.offset,
            len: plan.len,
            constant: false,
            js_block: js,
            shift_lsbs: *shift_lsbs,
            opt_order: *opt_order,
            use_ltp: ltp.is_some(),
            sub_blocks: entropy.sub_blocks(),
            ra_block: plan.ra,
        },
    }
}

// per-block parameter search

#[allow(clippy::too_many_arguments)]
fn search_block(
    params: &CodingParams,
    knobs: &SearchKnobs,
    sample_rate: u32,
    lane: &[i32],
    offset: usize,
    len: usize,
    ra: bool,
    ltp_start: usize,
    scratch: &mut BitWriter,
) -> BlockPlan {
    let blockv = &lane[offset..offset + len];

    // constant test
    let first = blockv[0];
    if blockv.iter().all(|&v| v == first) {
        return BlockPlan {
            len,
            ra,
            kind: PlanKind::Constant { value: first },
        };
    }

    // common LSB shift test
    let or_all = blockv.iter().fold(0i32, |acc, &v| acc | v);
    let shift_lsbs = (or_all.trailing_zeros().min(15)) as u8;

    // working signal with its history, in the shifted domain
    let hist = params.max_order as usize;
    let work: Vec<i32> = lane[offset - hist..offset + len]
        .iter()
        .map(|&v| v >> shift_lsbs)
        .collect();

    let ord_cap = if params.adapt_order {
        lpc::max_encodable_order(len, params.max_order)
    } else {
        lpc::fixed_order(len, params.max_order)
    };

    // PARCOR analysis of the windowed block
    let windowed = lpc::window(&work[hist..], sample_rate);
    let autoc = lpc::autocorrelation(&windowed, ord_cap);
    let analysis = lpc::levinson_durbin(&autoc, ord_cap);

    let quant_full: Vec<i8> = (0..ord_cap)
        .map(|i| lpc::quantize_parcor(analysis.parcor.get(i).copied().unwrap_or(0.0), i))
        .collect();
    let q20_full: Vec<i32> = quant_full
        .iter()
        .enumerate()
        .map(|(i, &q)| lpc::dequantize_parcor(q, i))
        .collect();

    // order selection
    let opt_order = if !params.adapt_order {
        ord_cap
    } else if knobs.full_order_search {
        select_order_full(params, knobs, &work, hist, len, ra, &quant_full, &q20_full, scratch)
    } else {
        select_order_valley(params, &analysis, &quant_full, len)
    };

    // coefficient conversion, falling back to the order-1 preset on overflow
    let (opt_order, quant, stages) = match lpc::parcor_to_lpc_stages(&q20_full[..opt_order]) {
        Some(stages) => (opt_order, quant_full[..opt_order].to_vec(), stages),
        None => fallback_predictor(params, ord_cap),
    };

    let mut residual = Vec::with_capacity(len);
    lpc::residuals(&work, hist, len, &stages, opt_order, ra, &mut residual);

    // long-term prediction over the residual plus the lane's retained past
    let mut ltp_info = None;
    let (mut entropy, res_bits) =
        entropy_search(params, knobs, &residual, ra, opt_order, scratch);
    if params.long_term_prediction {
        let ltp_hist = &lane[ltp_start..offset];
        if let Some(info) =
            ltp::search(ltp_hist, &residual, opt_order, params.lag_bits, knobs.ltp_gains)
        {
            let mut filtered = Vec::with_capacity(len);
            ltp::filter(ltp_hist, &residual, &info, &mut filtered);
            let (ent2, bits2) = entropy_search(params, knobs, &filtered, ra, opt_order, scratch);
            if bits2 + ltp::header_bits(&info, params.lag_bits) < res_bits {
                ltp_info = Some(info);
                residual = filtered;
                entropy = ent2;
            }
        }
    }

    BlockPlan {
        len,
        ra,
        kind: PlanKind::Normal {
            shift_lsbs,
            opt_order,
            quant,
            ltp: ltp_info,
            entropy,
            residual,
        },
    }
}

/// The order-1 preset predictor, padded out when the order is fixed by
/// the stream config. A fixed order of zero never reaches this path since
/// an empty conversion cannot overflow.
fn fallback_predictor(params: &CodingParams, fixed_order: usize) -> (usize, Vec<i8>, Vec<Vec<i32>>) {
    let order = if params.adapt_order { 1 } else { fixed_order };
    let mut quant = Vec::with_capacity(order);
    quant.push(lpc::FALLBACK_PARCOR_Q);
    for i in 1..order {
        // padding values whose reconstructions hover around zero
        quant.push(match i {
            1 => 26,
            _ if i % 2 == 0 => 0,
            _ => -1,
        });
    }
    let q20: Vec<i32> = quant
        .iter()
        .enumerate()
        .map(|(i, &q)| lpc::dequantize_parcor(q, i))
        .collect();
    let stages = lpc::parcor_to_lpc_stages(&q20).expect("preset predictor is stable");
    (order, quant, stages)
}

/// Valley-detect order selection on the Levinson error series.
fn select_order_valley(
    params: &CodingParams,
    analysis: &lpc::ParcorAnalysis,
    quant: &[i8],
    len: usize,
) -> usize {
    let cap = quant.len().min(analysis.parcor.len());
    let max_rise = 2usize.max(params.max_order as usize / 6);

    let bits_for = |k: usize, coef_bits: f64| -> f64 {
        let e = analysis.error[k];
        let tail = if e >= 1.0 { 0.5 * e.log2() * len as f64 } else { 0.0 };
        coef_bits + tail
    };

    let mut coef_bits = 0.0;
    let mut best = (bits_for(0, 0.0), 0usize);
    let mut rises = 0;
    for k in 1..=cap {
        coef_bits += lpc::coef_bits(params.coef_table, k - 1, quant[k - 1]) as f64;
        let b = bits_for(k, coef_bits);
        if b < best.0 {
            best = (b, k);
            rises = 0;
        } else {
            rises += 1;
            if rises > max_rise {
                break;
            }
        }
    }
    best.1
}

/// Exhaustive order enumeration with exact residual costs.
#[allow(clippy::too_many_arguments)]
fn select_order_full(
    params: &CodingParams,
    knobs: &SearchKnobs,
    work: &[i32],
    hist: usize,
    len: usize,
    ra: bool,
    quant: &[i8],
    q20: &[i32],
    scratch: &mut BitWriter,
) -> usize {
    let stages = match lpc::parcor_to_lpc_stages(q20) {
        Some(s) => s,
        None => return quant.len(), // conversion handled by the fallback later
    };
    let mut residual = Vec::with_capacity(len);
    let mut coef_bits = 0u64;
    let mut best = (u64::MAX, 0usize);
    for k in 0..=quant.len() {
        if k > 0 {
            coef_bits += lpc::coef_bits(params.coef_table, k - 1, quant[k - 1]);
        }
        lpc::residuals(work, hist, len, &stages, k, ra, &mut residual);
        let (_, bits) = entropy_search(params, knobs, &residual, ra, k, scratch);
        let total = coef_bits + bits;
        if total < best.0 {
            best = (total, k);
        }
    }
    best.1
}

/// Entropy parameter search on a finished residual.
fn entropy_search(
    params: &CodingParams,
    knobs: &SearchKnobs,
    residual: &[i32],
    ra: bool,
    opt_order: usize,
    scratch: &mut BitWriter,
) -> (EntropyPlan, u64) {
    let len = residual.len();
    if params.bgmc {
        let start = if ra { opt_order.min(len) } else { 0 };
        let choice = bgmc::search_partition(
            residual,
            start,
            params.bgmc_max_param,
            params.bgmc_p0_bits,
            knobs.bgmc_exact,
            params.allowed_sub_blocks(),
            scratch,
        );
        scratch.clear();
        // progressive warmup cost
        let s0 = ((choice.params[0] >> 4) as u8).min(params.max_rice_param);
        let mut bits = choice.bits;
        for (i, &v) in residual[..start].iter().enumerate() {
            let k = if i < 3 { params.ra_rice_param(i, s0) } else { s0 };
            bits += rice::bits_signed(v, k);
        }
        (
            EntropyPlan::Bgmc {
                sub_blocks: choice.sub_blocks,
                params: choice.params,
            },
            bits,
        )
    } else {
        let choice = rice::search_partition(
            residual,
            params.max_rice_param,
            params.rice_s0_bits,
            knobs.rice_exact,
            params.sb_part,
        );
        (
            EntropyPlan::Rice {
                sub_blocks: choice.sub_blocks,
                params: choice.params,
            },
            choice.bits,
        )
    }
}

// block bitstream writer

fn write_block(params: &CodingParams, bw: &mut BitWriter, plan: &BlockPlan, js: u8) {
    match &plan.kind {
        PlanKind::Constant { value } => {
            bw.write_bit(0);
            bw.write_bit((*value != 0) as u32);
            bw.write_bit((js != 0) as u32);
            bw.write_bits(0, 5);
            if *value != 0 {
                // difference blocks carry one extra bit of headroom
                let bits = (params.bits_per_raw_sample + (js != 0) as u8).min(32);
                bw.write_signed_bits(*value, bits);
            }
        }
        PlanKind::Normal {
            shift_lsbs,
            opt_order,
            quant,
            ltp,
            entropy,
            residual,
        } => {
            bw.write_bit(1);
            bw.write_bit((js != 0) as u32);
            params.write_sub_blocks(bw, entropy.sub_blocks());

            match entropy {
                EntropyPlan::Rice { sub_blocks, params: s } => {
                    bw.write_bits(s[0] as u32, params.rice_s0_bits);
                    for j in 1..*sub_blocks {
                        rice::encode_signed(bw, s[j] as i32 - s[j - 1] as i32, 0);
                    }
                }
                EntropyPlan::Bgmc { sub_blocks, params: p } => {
                    bw.write_bits(p[0] as u32, params.bgmc_p0_bits);
                    for j in 1..*sub_blocks {
                        rice::encode_signed(bw, p[j] as i32 - p[j - 1] as i32, 2);
                    }
                }
            }

            bw.write_bit((*shift_lsbs > 0) as u32);
            if *shift_lsbs > 0 {
                bw.write_bits(*shift_lsbs as u32 - 1, 4);
            }

            if params.adapt_order {
                bw.write_bits(
                    *opt_order as u32,
                    lpc::order_field_bits(plan.len, params.max_order),
                );
            }

            for (i, &q) in quant.iter().enumerate() {
                if params.coef_table == 3 {
                    bw.write_bits((q as i32 + 64) as u32, 7);
                } else {
                    let (offset, param) = lpc::coef_rice_code(params.coef_table, i);
                    rice::encode_signed(bw, q as i32 - offset, param);
                }
            }

            if params.long_term_prediction {
                bw.write_bit(ltp.is_some() as u32);
                if let Some(info) = ltp {
                    ltp::write(bw, info, params.lag_bits, *opt_order);
                }
            }

            write_residuals(params, bw, plan, *opt_order, entropy, residual);
        }
    }
}

fn write_residuals(
    params: &CodingParams,
    bw: &mut BitWriter,
    plan: &BlockPlan,
    opt_order: usize,
    entropy: &EntropyPlan,
    residual: &[i32],
) {
    let len = residual.len();
    match entropy {
        EntropyPlan::Rice { sub_blocks, params: s } => {
            let sb_len = len / sub_blocks;
            for (i, &v) in residual.iter().enumerate() {
                let j = (i / sb_len).min(sub_blocks - 1);
                let k = if plan.ra && j == 0 && i < 3 {
                    params.ra_rice_param(i, s[0])
                } else {
                    s[j]
                };
                rice::encode_signed(bw, v, k);
            }
        }
        EntropyPlan::Bgmc { sub_blocks, params: p } => {
            let start = if plan.ra { opt_order.min(len) } else { 0 };
            let s0 = ((p[0] >> 4) as u8).min(params.max_rice_param);
            for (i, &v) in residual[..start].iter().enumerate() {
                let k = if i < 3 { params.ra_rice_param(i, s0) } else { s0 };
                rice::encode_signed(bw, v, k);
            }
            bgmc::encode_residuals(bw, residual, start, &p[..*sub_blocks]);
        }
    }
}
