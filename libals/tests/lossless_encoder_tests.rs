//! Encoder behavior tests: block classification, shift detection,
//! joint stereo, and the frame API contract.

use libals_audio::{Decoder, Encoder, EncoderOptions, SampleFormat};

fn pcm_s16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Deterministic pseudo-noise in [-amp, amp].
fn noise(len: usize, amp: i32, mut seed: u32) -> Vec<i16> {
    (0..len)
        .map(|_| {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            (((seed >> 8) as i32 % (2 * amp + 1)) - amp) as i16
        })
        .collect()
}

#[test]
fn silence_becomes_constant_blocks() {
    let mut enc = Encoder::with_options(
        EncoderOptions::new(48_000, 1, SampleFormat::S16).with_frame_length(256),
    )
    .unwrap();
    let pcm = pcm_s16(&vec![0i16; 256]);
    let packet = enc.encode_frame(&pcm).unwrap();

    assert!(enc.last_frame_blocks().iter().all(|b| b.constant));
    // a constant frame collapses to a handful of bytes
    assert!(packet.len() < 8, "constant frame took {} bytes", packet.len());

    let mut dec = Decoder::new(enc.config().clone()).unwrap();
    assert_eq!(dec.decode_packet(&packet).unwrap(), pcm);
}

#[test]
fn constant_value_survives() {
    let mut enc = Encoder::with_options(
        EncoderOptions::new(44_100, 1, SampleFormat::S16).with_frame_length(256),
    )
    .unwrap();
    let pcm = pcm_s16(&vec![1234i16; 256]);
    let packet = enc.encode_frame(&pcm).unwrap();
    assert!(enc.last_frame_blocks()[0].constant);

    let mut dec = Decoder::new(enc.config().clone()).unwrap();
    assert_eq!(dec.decode_packet(&packet).unwrap(), pcm);
}

#[test]
fn common_trailing_zeros_are_stripped() {
    let mut enc = Encoder::with_options(
        EncoderOptions::new(48_000, 1, SampleFormat::S16).with_frame_length(256),
    )
    .unwrap();
    // every sample is a multiple of 4, and at least one is exactly 4
    let mut samples = noise(256, 1000, 7);
    for s in samples.iter_mut() {
        *s = s.wrapping_mul(4);
    }
    samples[10] = 4;
    let pcm = pcm_s16(&samples);
    let packet = enc.encode_frame(&pcm).unwrap();

    for b in enc.last_frame_blocks() {
        assert!(b.constant || b.shift_lsbs == 2, "shift was {}", b.shift_lsbs);
    }

    let mut dec = Decoder::new(enc.config().clone()).unwrap();
    assert_eq!(dec.decode_packet(&packet).unwrap(), pcm);
}

#[test]
fn identical_channels_pick_difference_coding() {
    let mut enc = Encoder::with_options(
        EncoderOptions::new(44_100, 2, SampleFormat::S16)
            .with_level(1)
            .with_frame_length(256),
    )
    .unwrap();
    let mono = noise(256, 4000, 42);
    let mut interleaved = Vec::with_capacity(512);
    for &s in &mono {
        interleaved.push(s);
        interleaved.push(s);
    }
    let pcm = pcm_s16(&interleaved);
    let packet = enc.encode_frame(&pcm).unwrap();

    assert!(
        enc.last_frame_blocks().iter().any(|b| b.js_block != 0),
        "identical channels should trigger difference coding"
    );

    let mut dec = Decoder::new(enc.config().clone()).unwrap();
    assert_eq!(dec.decode_packet(&packet).unwrap(), pcm);
}

#[test]
fn input_length_is_policed() {
    let mut enc = Encoder::with_options(
        EncoderOptions::new(48_000, 2, SampleFormat::S16).with_frame_length(256),
    )
    .unwrap();
    // 3 bytes is not a whole stereo sample group
    assert!(enc.encode_frame(&[0, 1, 2]).is_err());
    // more than a frame's worth
    let too_long = vec![0u8; 257 * 4];
    assert!(enc.encode_frame(&too_long).is_err());
}

#[test]
fn finalize_is_terminal() {
    let mut enc = Encoder::new(48_000, 1, SampleFormat::S16).unwrap();
    let extradata = enc.finalize().unwrap();
    assert!(!extradata.is_empty());
    assert!(enc.finalize().is_err());
    assert!(enc.encode_frame(&[0, 0]).is_err());
}

#[test]
fn config_rejects_nonsense() {
    assert!(Encoder::new(0, 1, SampleFormat::S16).is_err());
    assert!(Encoder::new(48_000, 0, SampleFormat::S16).is_err());
    assert!(Encoder::with_options(
        EncoderOptions::new(48_000, 1, SampleFormat::S16).with_frame_length(1)
    )
    .is_err());
    assert!(Encoder::with_options(
        EncoderOptions::new(48_000, 1, SampleFormat::S16).with_bits_per_sample(24)
    )
    .is_err());
}

#[test]
fn twenty_four_bit_samples_roundtrip() {
    let mut enc = Encoder::with_options(
        EncoderOptions::new(96_000, 1, SampleFormat::S32)
            .with_bits_per_sample(24)
            .with_frame_length(256),
    )
    .unwrap();
    assert_eq!(enc.config().coef_table, 1);

    let mut seed = 5u32;
    let mut pcm = Vec::new();
    for _ in 0..256 {
        seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
        let raw = ((seed >> 10) as i32 % 100_000) - 50_000;
        pcm.extend_from_slice(&(raw << 8).to_le_bytes());
    }
    let packet = enc.encode_frame(&pcm).unwrap();

    let mut dec = Decoder::new(enc.config().clone()).unwrap();
    assert_eq!(dec.decode_packet(&packet).unwrap(), pcm);
}
