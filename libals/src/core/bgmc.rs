//! Block Gilbert-Moore Coding of residuals.
//!
//! Residuals are split at bit position `k` into an MSB part driven through a
//! range coder and a bit-packed LSB part. MSBs outside the model alphabet
//! escape to Rice-coded deltas. The per-subblock parameter is a combined
//! `(s << 4) | sx` byte: `s` scales the split, `sx` selects one of sixteen
//! probability models.

use once_cell::sync::Lazy;

use super::bitio::{BitReader, BitWriter};
use super::rice;

/// Model magnitude ceiling per `sx`; the effective alphabet is this value
/// shifted down by the block geometry.
pub const BGMC_MAX: [u16; 16] = [
    256, 256, 224, 224, 192, 192, 160, 160, 128, 128, 112, 112, 96, 96, 80, 80,
];

const TOTAL_BITS: u32 = 14;
const TOTAL: u32 = 1 << TOTAL_BITS;
const TOP: u32 = 1 << 24;
const BOT: u32 = 1 << 16;

// derived probability models

struct Model {
    /// Cumulative frequencies, `cf[0] = 0`, `cf[len - 1] = TOTAL`.
    cf: Vec<u16>,
}

/// Effective in-range MSB span for a subblock: always even, at least 2.
fn alphabet_max(sx: u8, s: u8, b: u8) -> u32 {
    let shift = 5 - s.min(b).min(5) as u32;
    ((BGMC_MAX[sx as usize] as u32 >> shift).max(2)) & !1
}

fn build_model(sx: u8, shift: u8) -> Model {
    let max = ((BGMC_MAX[sx as usize] as u32 >> shift).max(2)) & !1;
    let alphabet = max as usize + 1; // in-range symbols plus escape
    let center = (max / 2) as f64;

    // Two-sided geometric around the center, small escape mass.
    let decay = 8.0 / (max as f64 + sx as f64 + 2.0);
    let mut weights = Vec::with_capacity(alphabet);
    let mut sum = 0.0;
    for i in 0..max {
        let w = (-decay * (i as f64 - center + 0.5).abs()).exp();
        weights.push(w);
        sum += w;
    }
    weights.push(0.015 * sum); // escape
    sum += weights[alphabet - 1];

    // Quantize to TOTAL with a floor of one per symbol.
    let scale = (TOTAL as usize - alphabet) as f64 / sum;
    let mut freqs: Vec<u32> = weights.iter().map(|&w| 1 + (w * scale) as u32).collect();
    let spent: u32 = freqs.iter().sum();
    let mut remainder = TOTAL - spent;
    let mut i = center as usize;
    while remainder > 0 {
        freqs[i] += 1;
        remainder -= 1;
        i = (i + 1) % (alphabet - 1).max(1);
    }

    let mut cf = Vec::with_capacity(alphabet + 1);
    let mut acc = 0u32;
    cf.push(0u16);
    for &f in &freqs {
        acc += f;
        cf.push(acc as u16);
    }
    debug_assert_eq!(acc, TOTAL);
    Model { cf }
}

/// Sixteen models times the six possible geometry shifts.
static MODELS: Lazy<Vec<Model>> = Lazy::new(|| {
    let mut models = Vec::with_capacity(16 * 6);
    for sx in 0..16u8 {
        for shift in 0..6u8 {
            models.push(build_model(sx, shift));
        }
    }
    models
});

fn model(sx: u8, s: u8, b: u8) -> &'static Model {
    let shift = 5 - s.min(b).min(5);
    &MODELS[sx as usize * 6 + shift as usize]
}

// range coder (carryless, 32-bit low/range, byte renormalization)

struct RangeEncoder {
    low: u32,
    range: u32,
}

impl RangeEncoder {
    fn new() -> Self {
        RangeEncoder { low: 0, range: u32::MAX }
    }

    fn encode(&mut self, bw: &mut BitWriter, cum: u32, freq: u32) {
        let r = self.range / TOTAL;
        self.low = self.low.wrapping_add(r.wrapping_mul(cum));
        self.range = r * freq;
        loop {
            if (self.low ^ self.low.wrapping_add(self.range)) < TOP {
                // top byte settled, flush it
            } else if self.range < BOT {
                self.range = self.low.wrapping_neg() & (BOT - 1);
            } else {
                break;
            }
            bw.write_bits(self.low >> 24, 8);
            self.low = self.low.wrapping_shl(8);
            self.range = self.range.wrapping_shl(8);
        }
    }

    fn finish(mut self, bw: &mut BitWriter) {
        for _ in 0..4 {
            bw.write_bits(self.low >> 24, 8);
            self.low = self.low.wrapping_shl(8);
        }
    }
}

struct RangeDecoder {
    low: u32,
    range: u32,
    code: u32,
}

impl RangeDecoder {
    fn new(br: &mut BitReader<'_>) -> Self {
        let mut code = 0u32;
        for _ in 0..4 {
            code = (code << 8) | br.read_bits(8);
        }
        RangeDecoder { low: 0, range: u32::MAX, code }
    }

    fn decode(&mut self, br: &mut BitReader<'_>, model: &Model) -> usize {
        let r = self.range / TOTAL;
        let f = (self.code.wrapping_sub(self.low) / r).min(TOTAL - 1);
        let sym = model.cf.partition_point(|&c| c as u32 <= f) - 1;
        let cum = model.cf[sym] as u32;
        let freq = model.cf[sym + 1] as u32 - cum;
        self.low = self.low.wrapping_add(r.wrapping_mul(cum));
        self.range = r * freq;
        loop {
            if (self.low ^ self.low.wrapping_add(self.range)) < TOP {
                // byte settled
            } else if self.range < BOT {
                self.range = self.low.wrapping_neg() & (BOT - 1);
            } else {
                break;
            }
            self.code = (self.code << 8) | br.read_bits(8);
            self.low = self.low.wrapping_shl(8);
            self.range = self.range.wrapping_shl(8);
        }
        sym
    }
}

// block geometry

fn ceil_log2(x: usize) -> u32 {
    if x <= 1 {
        0
    } else {
        usize::BITS - (x - 1).leading_zeros()
    }
}

/// Geometry parameter `b = clip((ceil_log2(len) - 3) / 2, 0, 5)`.
pub fn geometry(block_len: usize) -> u8 {
    (((ceil_log2(block_len) as i32 - 3).max(0)) / 2).min(5) as u8
}

/// LSB split position for a subblock parameter.
pub fn split_k(s: u8, b: u8) -> u8 {
    s.saturating_sub(b)
}

#[derive(Clone, Copy)]
struct SubParams {
    s: u8,
    sx: u8,
    k: u8,
    max: u32,
}

fn sub_params(p: u16, b: u8) -> SubParams {
    let s = (p >> 4) as u8;
    let sx = (p & 0xF) as u8;
    let k = split_k(s, b);
    SubParams { s, sx, k, max: alphabet_max(sx, s, b) }
}

fn lsb_mask(k: u8) -> i32 {
    if k == 0 {
        0
    } else {
        ((1u32 << k) - 1) as i32
    }
}

// residual coding

/// Encode `residuals[start..]` of one block. `params[i]` is the combined
/// parameter of subblock `i`; subblocks are `len / params.len()` samples.
/// The caller has already emitted `residuals[..start]` (random-access warmup)
/// through the Rice path.
pub fn encode_residuals(bw: &mut BitWriter, residuals: &[i32], start: usize, params: &[u16]) {
    let len = residuals.len();
    if start >= len {
        return;
    }
    let b = geometry(len);
    let sb_len = len / params.len();
    let subs: Vec<SubParams> = params.iter().map(|&p| sub_params(p, b)).collect();

    // MSB pass through the range coder; out-of-range symbols escape.
    let mut escapes: Vec<(usize, i32)> = Vec::new();
    let mut rc = RangeEncoder::new();
    for i in start..len {
        let sp = subs[(i / sb_len).min(subs.len() - 1)];
        let m = model(sp.sx, sp.s, b);
        let msb = residuals[i] >> sp.k;
        let half = (sp.max / 2) as i32;
        let sym = if msb >= -half && msb < half {
            (msb + half) as usize
        } else {
            let delta = if msb >= half { msb - half } else { msb + half };
            escapes.push((i, delta));
            sp.max as usize // escape symbol
        };
        let cum = m.cf[sym] as u32;
        let freq = m.cf[sym + 1] as u32 - cum;
        rc.encode(bw, cum, freq);
    }
    rc.finish(bw);

    // Escaped MSB deltas, signed Rice with the subblock's s.
    for &(i, delta) in &escapes {
        let sp = subs[(i / sb_len).min(subs.len() - 1)];
        rice::encode_signed(bw, delta, sp.s);
    }

    // LSB pass, bit packed.
    for i in start..len {
        let sp = subs[(i / sb_len).min(subs.len() - 1)];
        if sp.k > 0 {
            bw.write_bits((residuals[i] & lsb_mask(sp.k)) as u32, sp.k);
        }
    }
}

/// Mirror of [`encode_residuals`]; fills `residuals[start..]`.
pub fn decode_residuals(br: &mut BitReader<'_>, residuals: &mut [i32], start: usize, params: &[u16]) {
    let len = residuals.len();
    if start >= len {
        return;
    }
    let b = geometry(len);
    let sb_len = len / params.len();
    let subs: Vec<SubParams> = params.iter().map(|&p| sub_params(p, b)).collect();

    let mut msbs = vec![0i32; len - start];
    let mut escaped: Vec<usize> = Vec::new();
    let mut rd = RangeDecoder::new(br);
    for i in start..len {
        let sp = subs[(i / sb_len).min(subs.len() - 1)];
        let m = model(sp.sx, sp.s, b);
        let sym = rd.decode(br, m);
        let half = (sp.max / 2) as i32;
        if sym == sp.max as usize {
            escaped.push(i);
        } else {
            msbs[i - start] = sym as i32 - half;
        }
    }

    for &i in &escaped {
        let sp = subs[(i / sb_len).min(subs.len() - 1)];
        let delta = rice::decode_signed(br, sp.s);
        let half = (sp.max / 2) as i32;
        msbs[i - start] = if delta >= 0 { delta + half } else { delta - half };
    }

    for i in start..len {
        let sp = subs[(i / sb_len).min(subs.len() - 1)];
        let lsb = if sp.k > 0 { br.read_bits(sp.k) as i32 } else { 0 };
        residuals[i] = (msbs[i - start] << sp.k) | lsb;
    }
}

// parameter search

/// Chosen BGMC layout for one block.
#[derive(Debug, Clone)]
pub struct BgmcChoice {
    pub sub_blocks: usize,
    pub params: [u16; 8],
    pub bits: u64,
}

/// Closed-form parameter estimate for one subblock.
pub fn estimate_param(residuals: &[i32], max_param: u16) -> u16 {
    let n = residuals.len();
    if n == 0 {
        return 0;
    }
    let sum: u64 = residuals.iter().map(|&v| v.unsigned_abs() as u64).sum();
    if sum == 0 {
        return 0;
    }
    let tmp = 16.0 * ((sum as f64).log2() - (n as f64).log2() + 0.970_927_257_475_126_648_25);
    if tmp <= 0.0 {
        0
    } else {
        (tmp as u16).min(max_param)
    }
}

fn measure(residuals: &[i32], start: usize, params: &[u16], scratch: &mut BitWriter) -> u64 {
    scratch.clear();
    encode_residuals(scratch, residuals, start, params);
    scratch.bit_len() as u64
}

fn side_bits(params: &[u16], p0_bits: u8) -> u64 {
    let mut bits = p0_bits as u64;
    for i in 1..params.len() {
        bits += rice::bits_signed(params[i] as i32 - params[i - 1] as i32, 2);
    }
    bits
}

/// Cost of one subblock coded alone with parameter `p`, used to steer the
/// exact search. The block geometry of the enclosing block is kept.
fn probe(residuals: &[i32], b: u8, p: u16, scratch: &mut BitWriter) -> u64 {
    scratch.clear();
    let sp = sub_params(p, b);
    let m = model(sp.sx, sp.s, b);
    let mut rc = RangeEncoder::new();
    let half = (sp.max / 2) as i32;
    let mut escape_bits = 0u64;
    for &v in residuals {
        let msb = v >> sp.k;
        let sym = if msb >= -half && msb < half {
            (msb + half) as usize
        } else {
            let delta = if msb >= half { msb - half } else { msb + half };
            escape_bits += rice::bits_signed(delta, sp.s);
            sp.max as usize
        };
        let cum = m.cf[sym] as u32;
        rc.encode(scratch, cum, m.cf[sym + 1] as u32 - cum);
    }
    drop(rc);
    scratch.bit_len() as u64 + escape_bits + residuals.len() as u64 * sp.k as u64
}

/// Exact local search around a seed in the combined parameter space.
fn exact_param(residuals: &[i32], b: u8, seed: u16, max_param: u16, scratch: &mut BitWriter) -> u16 {
    let cost = |p: u16, scratch: &mut BitWriter| probe(residuals, b, p, scratch);

    let seed = seed.min(max_param);
    let c0 = cost(seed, scratch);
    let c_up = if seed < max_param { cost(seed + 1, scratch) } else { u64::MAX };
    let c_down = if seed > 0 { cost(seed - 1, scratch) } else { u64::MAX };

    if c_up >= c0 && c_down >= c0 {
        // flat neighborhood, sweep a few steps either side
        let lo = seed.saturating_sub(4);
        let hi = (seed + 4).min(max_param);
        let mut best = (c0, seed);
        for p in lo..=hi {
            let c = cost(p, scratch);
            if c < best.0 {
                best = (c, p);
            }
        }
        return best.1;
    }

    let step: i32 = if c_up < c_down { 1 } else { -1 };
    let mut best = (c0.min(c_up).min(c_down), if c_up < c_down { seed + 1 } else { seed - 1 });
    let mut p = best.1 as i32;
    let mut misses = 0;
    while misses < 5 {
        p += step;
        if p < 0 || p > max_param as i32 {
            break;
        }
        let c = cost(p as u16, scratch);
        if c < best.0 {
            best = (c, p as u16);
            misses = 0;
        } else {
            misses += 1;
        }
    }
    best.1
}

/// Pick the subblock count and per-subblock parameters minimizing the
/// encoded size. `allowed_subs` already reflects what the block header can
/// express; ties go to the coarser layout.
pub fn search_partition(
    residuals: &[i32],
    start: usize,
    max_param: u16,
    p0_bits: u8,
    exact: bool,
    allowed_subs: &[usize],
    scratch: &mut BitWriter,
) -> BgmcChoice {
    let len = residuals.len();
    let mut best: Option<BgmcChoice> = None;
    let b = geometry(len);

    for &sub in allowed_subs {
        if sub > 1 && (len % sub != 0 || len < 16) {
            continue;
        }
        let sb_len = len / sub;
        let mut params = [0u16; 8];
        let mut prev: Option<u16> = None;
        for i in 0..sub {
            let sb = &residuals[i * sb_len..(i + 1) * sb_len];
            let est = estimate_param(sb, max_param);
            let p = if exact {
                exact_param(sb, b, prev.unwrap_or(est), max_param, scratch)
            } else {
                est
            };
            params[i] = p;
            prev = Some(p);
        }
        let bits = side_bits(&params[..sub], p0_bits) + measure(residuals, start, &params[..sub], scratch);
        let better = match &best {
            Some(b) => bits < b.bits,
            None => true,
        };
        if better {
            best = Some(BgmcChoice { sub_blocks: sub, params, bits });
        }
    }

    best.expect("at least one subblock layout")
}
