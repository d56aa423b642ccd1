//! Short-term prediction: windowing, autocorrelation, PARCOR analysis,
//! quantization, and the integer prediction filter shared by encoder and
//! decoder.
//!
//! Reconstructed coefficients live in Q20. The filter convention is
//! `e[n] = x[n] + ((sum_j a[j] * x[n-1-j] + 2^19) >> 20)` with the
//! reflection coefficients stored negated, so correlated material drives
//! the first coefficient toward -1.

use crate::core::rice;

/// Q20 scale of reconstructed coefficients.
pub const COEF_SHIFT: u8 = 20;

/// Quantized first coefficient of the overflow fallback predictor (-0.9).
pub const FALLBACK_PARCOR_Q: i8 = -36;

// coefficient rice codes

/// (offset, Rice parameter) per coefficient index, one table per
/// sample-rate band. Tuned to the coefficient distribution this encoder
/// produces: the two companded leads cluster low, the tail sits near zero.
const COEF_RICE_TABLES: [[(i8, u8); 20]; 3] = [
    [
        (-44, 5), (-40, 5), (-12, 5), (-6, 4), (-3, 4), (-2, 4), (-1, 4), (0, 4), (0, 4), (0, 3),
        (0, 3), (0, 3), (0, 3), (0, 3), (0, 2), (0, 2), (0, 2), (0, 2), (0, 2), (0, 2),
    ],
    [
        (-48, 5), (-44, 5), (-14, 5), (-7, 4), (-4, 4), (-2, 4), (-1, 4), (-1, 4), (0, 4), (0, 4),
        (0, 3), (0, 3), (0, 3), (0, 3), (0, 3), (0, 2), (0, 2), (0, 2), (0, 2), (0, 2),
    ],
    [
        (-52, 5), (-46, 5), (-16, 5), (-8, 4), (-4, 4), (-3, 4), (-2, 4), (-1, 4), (-1, 4), (0, 4),
        (0, 4), (0, 3), (0, 3), (0, 3), (0, 3), (0, 3), (0, 2), (0, 2), (0, 2), (0, 2),
    ],
];

/// Rice code (offset, parameter) for coefficient `index` under
/// `coef_table` 0..=2.
pub fn coef_rice_code(coef_table: u8, index: usize) -> (i32, u8) {
    if index < 20 {
        let (offset, param) = COEF_RICE_TABLES[coef_table as usize][index];
        (offset as i32, param)
    } else if index < 127 {
        ((index & 1) as i32, 2)
    } else {
        (0, 1)
    }
}

/// Bits taken by one quantized coefficient.
pub fn coef_bits(coef_table: u8, index: usize, q: i8) -> u64 {
    if coef_table == 3 {
        7
    } else {
        let (offset, param) = coef_rice_code(coef_table, index);
        rice::bits_signed(q as i32 - offset, param)
    }
}

// analysis

/// Apply the analysis window: sine tapers up to 48 kHz, Hann above, with a
/// quarter-length ramp at each end and a flat middle.
pub fn window(block: &[i32], sample_rate: u32) -> Vec<f64> {
    let n = block.len();
    let taper = (n / 4).max(1);
    let sine = sample_rate <= 48_000;

    let ramp = |i: usize| -> f64 {
        let t = (i as f64 + 0.5) / taper as f64;
        if sine {
            (std::f64::consts::FRAC_PI_2 * t).sin()
        } else {
            0.5 - 0.5 * (std::f64::consts::PI * t).cos()
        }
    };

    block
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let w = if i < taper {
                ramp(i)
            } else if i >= n - taper.min(n) {
                ramp(n - 1 - i)
            } else {
                1.0
            };
            x as f64 * w
        })
        .collect()
}

/// Autocorrelation of the windowed block for lags `0..=max_lag`.
pub fn autocorrelation(data: &[f64], max_lag: usize) -> Vec<f64> {
    let n = data.len();
    let mut autoc = vec![0.0; max_lag + 1];
    for (lag, r) in autoc.iter_mut().enumerate() {
        if lag >= n {
            break;
        }
        let mut sum = 0.0;
        for i in lag..n {
            sum += data[i] * data[i - lag];
        }
        *r = sum;
    }
    autoc
}

/// PARCOR coefficients and the per-order prediction error series.
pub struct ParcorAnalysis {
    /// Negated reflection coefficients, one per achieved order.
    pub parcor: Vec<f64>,
    /// `error[k]` is the residual energy of the order-k predictor;
    /// `error[0]` is the windowed signal energy.
    pub error: Vec<f64>,
}

/// Levinson-Durbin recursion up to `max_order`, stopping early when the
/// error collapses or a reflection coefficient leaves the unit circle.
pub fn levinson_durbin(autoc: &[f64], max_order: usize) -> ParcorAnalysis {
    let mut parcor = Vec::with_capacity(max_order);
    let mut error = Vec::with_capacity(max_order + 1);

    let r0 = autoc[0];
    error.push(r0.max(0.0));
    if r0 <= 0.0 {
        return ParcorAnalysis { parcor, error };
    }

    let mut coeffs = vec![0.0f64; max_order];
    let mut prev = vec![0.0f64; max_order];
    let mut err = r0;

    for i in 0..max_order {
        let mut lambda = autoc.get(i + 1).copied().unwrap_or(0.0);
        for j in 0..i {
            lambda -= coeffs[j] * autoc[i - j];
        }
        lambda /= err;

        if !lambda.is_finite() || lambda.abs() >= 1.0 {
            break;
        }

        prev[..i].copy_from_slice(&coeffs[..i]);
        coeffs[i] = lambda;
        for j in 0..i {
            coeffs[j] = prev[j] - lambda * prev[i - 1 - j];
        }

        err *= 1.0 - lambda * lambda;
        parcor.push(-lambda);
        error.push(err.max(0.0));

        if err < 1e-9 {
            break;
        }
    }

    ParcorAnalysis { parcor, error }
}

// quantization

/// 7-bit quantizer: companded for the first two coefficients, linear after.
pub fn quantize_parcor(parcor: f64, index: usize) -> i8 {
    let q = match index {
        0 => (64.0 * ((2.0 * (parcor + 1.0)).max(0.0).sqrt() - 1.0)).floor(),
        1 => (64.0 * ((2.0 * (1.0 - parcor)).max(0.0).sqrt() - 1.0)).floor(),
        _ => (64.0 * parcor).floor(),
    };
    q.clamp(-64.0, 63.0) as i8
}

/// Reconstruction of a quantized coefficient to Q20.
pub fn dequantize_parcor(q: i8, index: usize) -> i32 {
    match index {
        0 => companded(q),
        1 => -companded(q),
        _ => ((q as i32) << 14) + (1 << 13),
    }
}

fn companded(q: i8) -> i32 {
    // midpoint reconstruction of q = floor(64 * (sqrt(2 (g + 1)) - 1))
    let x = q as i32 + 64;
    128 * x * x + 128 * x + 32 - (1 << COEF_SHIFT)
}

// coefficient conversion

/// Convert reconstructed PARCOR values (Q20) to direct-form coefficients,
/// keeping every intermediate order for progressive prediction.
///
/// `stages[m]` holds the `m` coefficients of the order-m predictor. Returns
/// `None` when an intermediate leaves the 32-bit range; the caller falls
/// back to the order-1 preset predictor.
pub fn parcor_to_lpc_stages(q20: &[i32]) -> Option<Vec<Vec<i32>>> {
    let order = q20.len();
    let mut stages: Vec<Vec<i32>> = Vec::with_capacity(order + 1);
    stages.push(Vec::new());

    let mut coeffs: Vec<i64> = Vec::with_capacity(order);
    for m in 1..=order {
        let g = q20[m - 1] as i64;
        let prev = coeffs.clone();
        for j in 0..m - 1 {
            let update = (g * prev[m - 2 - j] + (1 << (COEF_SHIFT - 1))) >> COEF_SHIFT;
            coeffs[j] = prev[j] + update;
            if coeffs[j].unsigned_abs() > i32::MAX as u64 {
                return None;
            }
        }
        coeffs.push(g);

        stages.push(coeffs.iter().map(|&c| c as i32).collect());
    }
    Some(stages)
}

/// The order-1 preset used when conversion overflows.
pub fn fallback_stages() -> Vec<Vec<i32>> {
    let q20 = dequantize_parcor(FALLBACK_PARCOR_Q, 0);
    parcor_to_lpc_stages(&[q20]).expect("order-1 preset cannot overflow")
}

// prediction filter

#[inline]
fn predict(lane: &[i32], pos: usize, coeffs: &[i32]) -> i64 {
    let mut acc = 1i64 << (COEF_SHIFT - 1);
    for (j, &c) in coeffs.iter().enumerate() {
        acc += c as i64 * lane[pos - 1 - j] as i64;
    }
    acc >> COEF_SHIFT
}

/// Forward filter over `lane[offset..offset + len]`.
///
/// With `progressive` set (random-access blocks) the order ramps with the
/// sample index so nothing before the block is referenced; otherwise the
/// fixed-order predictor reaches into the preceding history.
pub fn residuals(
    lane: &[i32],
    offset: usize,
    len: usize,
    stages: &[Vec<i32>],
    order: usize,
    progressive: bool,
    out: &mut Vec<i32>,
) {
    out.clear();
    for n in 0..len {
        let ord = if progressive { n.min(order) } else { order };
        let p = predict(lane, offset + n, &stages[ord]);
        out.push((lane[offset + n] as i64 + p) as i32);
    }
}

/// Inverse filter, the exact mirror of [`residuals`].
pub fn reconstruct(
    lane: &mut [i32],
    offset: usize,
    len: usize,
    stages: &[Vec<i32>],
    order: usize,
    progressive: bool,
    res: &[i32],
) {
    for n in 0..len {
        let ord = if progressive { n.min(order) } else { order };
        let p = predict(lane, offset + n, &stages[ord]);
        lane[offset + n] = (res[n] as i64 - p) as i32;
    }
}

// block geometry

/// Width of the `opt_order` field for a block of `block_len` samples.
pub fn order_field_bits(block_len: usize, max_order: u16) -> u8 {
    let clipped = (block_len / 8)
        .saturating_sub(1)
        .clamp(2, max_order as usize + 1);
    (usize::BITS - (clipped - 1).leading_zeros()) as u8
}

/// Largest order the field (and the block itself) can carry.
pub fn max_encodable_order(block_len: usize, max_order: u16) -> usize {
    let bits = order_field_bits(block_len, max_order);
    let field_cap = (1usize << bits) - 1;
    (max_order as usize)
        .min(field_cap)
        .min(block_len.saturating_sub(1))
}

/// Order used by every block when the stream disables adaptive orders.
pub fn fixed_order(block_len: usize, max_order: u16) -> usize {
    (max_order as usize).min(block_len.saturating_sub(1))
}
