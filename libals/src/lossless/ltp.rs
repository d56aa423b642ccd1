//! Long-term prediction: a five-tap filter at a searched lag, removing
//! pitch-period correlation left in the short-term residual.
//!
//! The filter reaches back through `hist`, the retained lane samples
//! preceding the block, so lags may span block and frame boundaries up to
//! [`LTP_MAX_LAG`]. Callers confine `hist` to the current random-access
//! unit; taps beyond the retained window contribute zero.

use crate::core::bitio::{BitReader, BitWriter};
use crate::core::rice;
use crate::core::types::{LtpGainMode, LTP_MAX_LAG};

/// Center-tap gain table (Q7), coarse at the top end.
pub const LTP_GAIN_VALUES: [i32; 16] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 70, 76, 82, 88, 92, 96, 100,
];

/// Preset gains used when the normal equations are skipped or singular.
pub const FIXED_GAINS: [i32; 5] = [8, 8, 16, 8, 8];

/// Rice parameters of the five tap codes.
const TAP_RICE_PARAMS: [u8; 5] = [1, 2, 2, 2, 1];

/// Chosen long-term predictor for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LtpInfo {
    pub lag: usize,
    /// Q7 gains; the outer four are multiples of 8, the center tap is a
    /// `LTP_GAIN_VALUES` entry.
    pub gains: [i32; 5],
}

/// Smallest usable lag for a given short-term order.
pub fn min_lag(order: usize) -> usize {
    4.max(order + 1)
}

/// Width of the lag field for a sample rate.
pub fn lag_bits(sample_rate: u32) -> u8 {
    8 + (sample_rate >= 96_000) as u8 + (sample_rate >= 192_000) as u8
}

#[inline]
fn prediction(hist: &[i32], x: &[i32], n: usize, lag: usize, gains: &[i32; 5]) -> i32 {
    let mut acc = 64i64;
    for (t, &g) in gains.iter().enumerate() {
        let idx = n as i64 - lag as i64 + 2 - t as i64;
        let sample = if idx >= 0 {
            x[idx as usize]
        } else {
            let h = hist.len() as i64 + idx;
            if h >= 0 {
                hist[h as usize]
            } else {
                0
            }
        };
        acc += g as i64 * sample as i64;
    }
    (acc >> 7) as i32
}

/// Forward filter: `out[n] = x[n] - pred(n)`, with taps before the block
/// start served from `hist`.
pub fn filter(hist: &[i32], x: &[i32], info: &LtpInfo, out: &mut Vec<i32>) {
    out.clear();
    for n in 0..x.len() {
        out.push(x[n].wrapping_sub(prediction(hist, x, n, info.lag, &info.gains)));
    }
}

/// In-place inverse of [`filter`].
pub fn synthesize(hist: &[i32], x: &mut [i32], info: &LtpInfo) {
    for n in 0..x.len() {
        let p = prediction(hist, x, n, info.lag, &info.gains);
        x[n] = x[n].wrapping_add(p);
    }
}

// search

/// Lag and gain search over the short-term residual and its retained
/// history. Returns `None` when the signal carries no usable periodicity.
pub fn search(
    hist: &[i32],
    res: &[i32],
    order: usize,
    lag_field_bits: u8,
    mode: LtpGainMode,
) -> Option<LtpInfo> {
    let len = res.len();
    if len < 8 {
        return None;
    }
    let lo = min_lag(order);
    let hi = LTP_MAX_LAG
        .min(lo + (1 << lag_field_bits) - 1)
        .min(hist.len() + len);
    if lo >= hi {
        return None;
    }

    // One window covering everything a candidate lag can touch.
    let tail_len = hist.len().min(hi + 2);
    let mut vals: Vec<f64> = Vec::with_capacity(tail_len + len);
    vals.extend(hist[hist.len() - tail_len..].iter().map(|&v| v as f64));
    vals.extend(res.iter().map(|&v| v as f64));
    let base = tail_len;

    let mu = vals.iter().map(|v| v.abs()).sum::<f64>() / vals.len() as f64;
    if mu <= 0.0 {
        return None;
    }

    // Amplitude-compressed copy so isolated transients do not dominate.
    let denom_scale = 5.0 * mu.sqrt();
    let w: Vec<f64> = vals
        .iter()
        .map(|&v| v / (v.abs().sqrt() / denom_scale + 1.0))
        .collect();

    let mut best: Option<(f64, usize)> = None;
    for lag in lo..hi {
        let mut num = 0.0;
        let mut den = 0.0;
        for n in 0..len {
            let j = base + n;
            if j < lag {
                continue; // before the retained window
            }
            let k = j - lag;
            num += w[j] * w[k];
            den += w[k] * w[k];
        }
        if num <= 0.0 || den <= 0.0 {
            continue;
        }
        let score = num / den.sqrt();
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, lag));
        }
    }
    let (_, lag) = best?;

    let gains = match mode {
        LtpGainMode::Fixed => FIXED_GAINS,
        LtpGainMode::Cholesky => cholesky_gains(&vals, base, lag)
            .map(quantize_gains)
            .unwrap_or(FIXED_GAINS),
    };

    Some(LtpInfo { lag, gains })
}

/// Solve the 5x5 normal equations of the tap covariance over the combined
/// history-plus-block window.
fn cholesky_gains(vals: &[f64], base: usize, lag: usize) -> Option<[f64; 5]> {
    let len = vals.len() - base;
    let tap = |n: usize, t: usize| -> f64 {
        let idx = base as i64 + n as i64 - lag as i64 + 2 - t as i64;
        if idx >= 0 {
            vals[idx as usize]
        } else {
            0.0
        }
    };

    let mut c = [[0.0f64; 5]; 5];
    let mut b = [0.0f64; 5];
    for n in 0..len {
        for t in 0..5 {
            b[t] += vals[base + n] * tap(n, t);
            for u in t..5 {
                c[t][u] += tap(n, t) * tap(n, u);
            }
        }
    }
    for t in 0..5 {
        for u in 0..t {
            c[t][u] = c[u][t];
        }
    }

    // LL^T decomposition; bail out if the matrix is not positive definite.
    let mut l = [[0.0f64; 5]; 5];
    for i in 0..5 {
        for j in 0..=i {
            let mut sum = c[i][j];
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= 1e-6 {
                    return None;
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    let mut y = [0.0f64; 5];
    for i in 0..5 {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[i][k] * y[k];
        }
        y[i] = sum / l[i][i];
    }
    let mut g = [0.0f64; 5];
    for i in (0..5).rev() {
        let mut sum = y[i];
        for k in i + 1..5 {
            sum -= l[k][i] * g[k];
        }
        g[i] = sum / l[i][i];
    }
    Some(g)
}

/// Outer taps snap to the 8-step grid, the center tap to the gain table.
fn quantize_gains(g: [f64; 5]) -> [i32; 5] {
    let mut q = [0i32; 5];
    for t in [0usize, 1, 3, 4] {
        let code = (g[t] * 128.0 / 8.0).round().clamp(-8.0, 7.0) as i32;
        q[t] = code * 8;
    }
    let target = g[2] * 128.0;
    let idx = LTP_GAIN_VALUES
        .iter()
        .enumerate()
        .min_by(|a, b| {
            let da = (*a.1 as f64 - target).abs();
            let db = (*b.1 as f64 - target).abs();
            da.partial_cmp(&db).unwrap()
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
    q[2] = LTP_GAIN_VALUES[idx];
    q
}

// bitstream

fn center_index(gain: i32) -> u32 {
    LTP_GAIN_VALUES.iter().position(|&v| v == gain).unwrap_or(0) as u32
}

/// Header cost of an active predictor, excluding the `use_ltp` bit.
pub fn header_bits(info: &LtpInfo, lag_field_bits: u8) -> u64 {
    let mut bits = lag_field_bits as u64;
    for (t, &param) in TAP_RICE_PARAMS.iter().enumerate() {
        bits += if t == 2 {
            (center_index(info.gains[2]) >> param) as u64 + 1 + param as u64
        } else {
            rice::bits_signed(info.gains[t] / 8, param)
        };
    }
    bits
}

pub fn write(bw: &mut BitWriter, info: &LtpInfo, lag_field_bits: u8, order: usize) {
    for (t, &param) in TAP_RICE_PARAMS.iter().enumerate() {
        if t == 2 {
            rice::encode_unsigned(bw, center_index(info.gains[2]), param);
        } else {
            rice::encode_signed(bw, info.gains[t] / 8, param);
        }
    }
    bw.write_bits((info.lag - min_lag(order)) as u32, lag_field_bits);
}

pub fn read(br: &mut BitReader<'_>, lag_field_bits: u8, order: usize) -> LtpInfo {
    let mut gains = [0i32; 5];
    for (t, &param) in TAP_RICE_PARAMS.iter().enumerate() {
        if t == 2 {
            let idx = rice::decode_unsigned(br, param) as usize;
            gains[2] = LTP_GAIN_VALUES[idx.min(15)];
        } else {
            gains[t] = rice::decode_signed(br, param) * 8;
        }
    }
    let lag = br.read_bits(lag_field_bits) as usize + min_lag(order);
    LtpInfo { lag, gains }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_and_synthesize_are_inverse_within_a_block() {
        let x: Vec<i32> = (0..512)
            .map(|i| (((i % 37) * 13) as i32 - 220) + if i >= 100 { ((i - 100) % 7) as i32 } else { 0 })
            .collect();
        let info = LtpInfo { lag: 100, gains: [8, -8, 76, 16, 0] };
        let mut y = Vec::new();
        filter(&[], &x, &info, &mut y);
        synthesize(&[], &mut y, &info);
        assert_eq!(y, x);
    }

    #[test]
    fn filter_and_synthesize_are_inverse_across_history() {
        // the lag exceeds the block length, so every tap lands in history
        let hist: Vec<i32> = (0..400).map(|i| ((i * 31) % 997) - 498).collect();
        let x: Vec<i32> = (0..128).map(|i| ((i * 17) % 601) - 300).collect();
        let info = LtpInfo { lag: 300, gains: [-8, 8, 82, 8, -8] };
        let mut y = Vec::new();
        filter(&hist, &x, &info, &mut y);
        synthesize(&hist, &mut y, &info);
        assert_eq!(y, x);
    }

    #[test]
    fn header_roundtrip() {
        let info = LtpInfo { lag: 137, gains: [8, -16, 82, 0, -8] };
        let order = 10;
        let mut bw = BitWriter::new();
        write(&mut bw, &info, 8, order);
        let bytes = bw.into_bytes();
        let mut br = BitReader::new(&bytes);
        let back = read(&mut br, 8, order);
        assert_eq!(back, info);
    }

    #[test]
    fn search_finds_a_strong_period() {
        // 64-sample period with mild noise on top
        let x: Vec<i32> = (0..1024)
            .map(|i| {
                let base = (((i % 64) as f64 / 64.0) * std::f64::consts::TAU).sin() * 800.0;
                base as i32 + ((i * 7) % 5) as i32 - 2
            })
            .collect();
        let info = search(&[], &x, 8, 8, LtpGainMode::Cholesky).expect("periodic signal");
        assert_eq!(info.lag % 64, 0, "lag {} not a multiple of the period", info.lag);
    }

    #[test]
    fn search_reaches_back_past_the_block() {
        // period 100 is longer than the 64-sample block; only the retained
        // history makes the lag discoverable
        let wave = |n: usize| ((n % 100) as i32 * 7) - 350;
        let hist: Vec<i32> = (0..256).map(wave).collect();
        let res: Vec<i32> = (256..320).map(wave).collect();
        let info = search(&hist, &res, 4, 8, LtpGainMode::Cholesky).expect("periodic signal");
        assert_eq!(info.lag, 100);
    }
}
