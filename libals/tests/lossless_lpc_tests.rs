//! Prediction-layer tests: quantizer, coefficient conversion, filters.

use libals_audio::lossless::lpc;

#[test]
fn quantizer_stays_in_seven_bits() {
    for step in 0..=200 {
        let g = -1.0 + step as f64 * 0.01;
        for index in 0..6 {
            let q = lpc::quantize_parcor(g, index);
            assert!((-64..=63).contains(&(q as i32)), "g={} index={}", g, index);
        }
    }
}

#[test]
fn dequantizer_is_bounded_and_antisymmetric() {
    for q in -64..=63i32 {
        let v0 = lpc::dequantize_parcor(q as i8, 0);
        let v1 = lpc::dequantize_parcor(q as i8, 1);
        assert_eq!(v0, -v1);
        assert!(v0.unsigned_abs() <= 1 << 20);
        let v2 = lpc::dequantize_parcor(q as i8, 2);
        assert_eq!(v2, (q << 14) + (1 << 13));
    }
}

#[test]
fn companding_tracks_strong_correlation() {
    // a heavily correlated signal pushes the first coefficient toward -1,
    // where the companded quantizer is fine-grained
    let q_strong = lpc::quantize_parcor(-0.95, 0);
    let q_weak = lpc::quantize_parcor(-0.5, 0);
    assert!(q_strong < q_weak);
    assert!(q_strong <= -40);
}

#[test]
fn levinson_finds_an_ar1_pole() {
    // x[n] = 0.9 x[n-1] + e[n]
    let mut x = vec![0.0f64; 512];
    let mut state = 1234u32;
    for i in 1..512 {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        let e = ((state >> 16) as f64 / 32768.0) - 1.0;
        x[i] = 0.9 * x[i - 1] + e;
    }
    let autoc = lpc::autocorrelation(&x, 4);
    let analysis = lpc::levinson_durbin(&autoc, 4);
    assert!(!analysis.parcor.is_empty());
    // negated reflection coefficient of an AR(1) pole at +0.9
    assert!(analysis.parcor[0] < -0.8, "parcor[0] = {}", analysis.parcor[0]);
    // error series is non-increasing
    for w in analysis.error.windows(2) {
        assert!(w[1] <= w[0] * 1.0000001);
    }
}

#[test]
fn filter_roundtrip_fixed_order() {
    let quant: [i8; 5] = [-40, -30, 10, 5, -3];
    let q20: Vec<i32> = quant
        .iter()
        .enumerate()
        .map(|(i, &q)| lpc::dequantize_parcor(q, i))
        .collect();
    let stages = lpc::parcor_to_lpc_stages(&q20).expect("small set converts");
    assert_eq!(stages.len(), 6);
    assert_eq!(stages[5].len(), 5);

    let hist = 8usize;
    let mut lane = vec![0i32; hist + 128];
    let mut state = 99u32;
    for v in lane.iter_mut() {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        *v = ((state >> 20) as i32) - 2048;
    }

    let mut res = Vec::new();
    lpc::residuals(&lane, hist, 128, &stages, 5, false, &mut res);

    let mut rebuilt = lane.clone();
    for v in rebuilt[hist..].iter_mut() {
        *v = 0;
    }
    lpc::reconstruct(&mut rebuilt, hist, 128, &stages, 5, false, &res);
    assert_eq!(rebuilt, lane);
}

#[test]
fn filter_roundtrip_progressive_ignores_history() {
    let quant: [i8; 3] = [-35, -20, 8];
    let q20: Vec<i32> = quant
        .iter()
        .enumerate()
        .map(|(i, &q)| lpc::dequantize_parcor(q, i))
        .collect();
    let stages = lpc::parcor_to_lpc_stages(&q20).unwrap();

    let hist = 4usize;
    let mut lane = vec![7777i32; hist + 64];
    for (i, v) in lane.iter_mut().enumerate().skip(hist) {
        *v = (i as i32 * 37) % 501 - 250;
    }

    let mut res = Vec::new();
    lpc::residuals(&lane, hist, 64, &stages, 3, true, &mut res);

    // different history must not matter for a random-access block
    let mut rebuilt = lane.clone();
    for v in rebuilt[..hist].iter_mut() {
        *v = -12345;
    }
    lpc::reconstruct(&mut rebuilt, hist, 64, &stages, 3, true, &res);
    assert_eq!(&rebuilt[hist..], &lane[hist..]);
}

#[test]
fn conversion_overflows_on_extreme_coefficients() {
    // thirty reconstructions near +1 blow past 32 bits mid-recursion
    let q20 = vec![lpc::dequantize_parcor(63, 2); 30];
    assert!(lpc::parcor_to_lpc_stages(&q20).is_none());
    // and the preset fallback stays representable
    let fallback = lpc::fallback_stages();
    assert_eq!(fallback.len(), 2);
    assert_eq!(fallback[1].len(), 1);
}

#[test]
fn order_field_geometry() {
    assert_eq!(lpc::order_field_bits(4096, 32), 6);
    assert_eq!(lpc::max_encodable_order(4096, 32), 32);
    // tiny blocks clamp to the {0, 1} range
    assert_eq!(lpc::order_field_bits(8, 1023), 1);
    assert!(lpc::max_encodable_order(8, 1023) <= 1);
    assert_eq!(lpc::fixed_order(4096, 10), 10);
    assert_eq!(lpc::fixed_order(4, 10), 3);
}
