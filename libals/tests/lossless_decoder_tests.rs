//! Round-trip tests: every sample format and compression level, multi-frame
//! streams, ragged tails, and both entropy coders.

use libals_audio::{Decoder, Encoder, EncoderOptions, SampleFormat};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Encode a whole stream frame by frame, then decode it back.
fn roundtrip(options: EncoderOptions, pcm: &[u8]) {
    let mut enc = Encoder::with_options(options).unwrap();
    let stride = {
        let c = enc.config();
        c.channels as usize
            * match c.resolution {
                libals_audio::Resolution::Bits8 => 1,
                libals_audio::Resolution::Bits16 => 2,
                _ => 4,
            }
    };
    let frame_bytes = enc.config().frame_length as usize * stride;

    let mut packets = Vec::new();
    for frame in pcm.chunks(frame_bytes) {
        packets.push(enc.encode_frame(frame).unwrap());
    }
    let extradata = enc.finalize().unwrap();

    let mut dec = Decoder::from_extradata(&extradata).unwrap();
    let mut out = Vec::new();
    for packet in &packets {
        out.extend_from_slice(&dec.decode_packet(packet).unwrap());
    }

    assert_eq!(out.len(), pcm.len());
    assert_eq!(out, pcm, "round trip mismatch");
    assert!(dec.is_finished());
    if dec.config().crc_enabled {
        assert_eq!(dec.verify_crc(), Some(true));
    }
}

fn noise_s16(frames: usize, channels: usize, amp: i32, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pcm = Vec::with_capacity(frames * channels * 2);
    for _ in 0..frames * channels {
        let v = rng.gen_range(-amp..=amp) as i16;
        pcm.extend_from_slice(&v.to_le_bytes());
    }
    pcm
}

#[test]
fn all_levels_stereo_noise_with_ragged_tail() {
    for level in 0..=2u8 {
        // three full frames plus a 100-sample tail
        let pcm = noise_s16(256 * 3 + 100, 2, 6000, 0xA5A5 + level as u64);
        roundtrip(
            EncoderOptions::new(48_000, 2, SampleFormat::S16)
                .with_level(level)
                .with_frame_length(256),
            &pcm,
        );
    }
}

#[test]
fn unsigned_eight_bit_mono() {
    let mut rng = StdRng::seed_from_u64(17);
    let pcm: Vec<u8> = (0..256 * 2 + 31).map(|_| rng.gen_range(60u8..=196)).collect();
    for level in 0..=2u8 {
        roundtrip(
            EncoderOptions::new(8_000, 1, SampleFormat::U8)
                .with_level(level)
                .with_frame_length(256),
            &pcm,
        );
    }
}

#[test]
fn twenty_four_in_thirty_two() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut pcm = Vec::new();
    for _ in 0..(256 * 2 + 77) * 2 {
        let raw: i32 = rng.gen_range(-2_000_000..=2_000_000);
        pcm.extend_from_slice(&(raw << 8).to_le_bytes());
    }
    for level in [0u8, 2] {
        roundtrip(
            EncoderOptions::new(96_000, 2, SampleFormat::S32)
                .with_level(level)
                .with_bits_per_sample(24)
                .with_frame_length(256),
            &pcm,
        );
    }
}

#[test]
fn thirty_two_bit_stereo() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut pcm = Vec::new();
    for _ in 0..256 * 2 * 2 {
        let raw: i32 = rng.gen_range(-40_000_000..=40_000_000);
        pcm.extend_from_slice(&raw.to_le_bytes());
    }
    for level in 0..=2u8 {
        roundtrip(
            EncoderOptions::new(192_000, 2, SampleFormat::S32)
                .with_level(level)
                .with_frame_length(256),
            &pcm,
        );
    }
}

#[test]
fn sine_is_predicted_not_memorized() {
    // a clean tone: prediction should engage and the stream must still be exact
    let mut pcm = Vec::new();
    for n in 0..8192 {
        let v = (16000.0 * (std::f64::consts::TAU * 1000.0 * n as f64 / 48_000.0).sin()) as i16;
        pcm.extend_from_slice(&v.to_le_bytes());
    }
    let mut enc = Encoder::with_options(
        EncoderOptions::new(48_000, 1, SampleFormat::S16)
            .with_level(2)
            .with_frame_length(4096),
    )
    .unwrap();
    let p0 = enc.encode_frame(&pcm[..4096 * 2]).unwrap();
    assert!(enc
        .last_frame_blocks()
        .iter()
        .any(|b| !b.constant && b.opt_order > 0));
    let p1 = enc.encode_frame(&pcm[4096 * 2..]).unwrap();
    let extradata = enc.finalize().unwrap();

    let mut dec = Decoder::from_extradata(&extradata).unwrap();
    let mut out = dec.decode_packet(&p0).unwrap();
    out.extend_from_slice(&dec.decode_packet(&p1).unwrap());
    assert_eq!(out, pcm);

    // the tone compresses far below raw PCM
    assert!(p0.len() + p1.len() < pcm.len() / 2);
}

#[test]
fn bgmc_override_at_low_level() {
    let pcm = noise_s16(256 * 2 + 13, 2, 900, 777);
    roundtrip(
        EncoderOptions::new(44_100, 2, SampleFormat::S16)
            .with_level(1)
            .with_bgmc(true)
            .with_frame_length(256),
        &pcm,
    );
}

#[test]
fn random_access_stream_roundtrips() {
    let pcm = noise_s16(256 * 5, 1, 3000, 4242);
    roundtrip(
        EncoderOptions::new(48_000, 1, SampleFormat::S16)
            .with_level(2)
            .with_ra_distance(2)
            .with_frame_length(256),
        &pcm,
    );
}

#[test]
fn full_search_partitioning_roundtrips() {
    let mut options = EncoderOptions::new(48_000, 2, SampleFormat::S16)
        .with_level(2)
        .with_frame_length(256);
    options.block_switch_mode = libals_audio::BlockSwitchMode::FullSearch;
    let pcm = noise_s16(256 * 2, 2, 2500, 31337);
    roundtrip(options, &pcm);
}

#[test]
fn raw_coefficient_table_roundtrips() {
    let mut options = EncoderOptions::new(48_000, 1, SampleFormat::S16)
        .with_level(2)
        .with_frame_length(256);
    options.coef_table = Some(3);
    let pcm = noise_s16(256 * 2, 1, 2000, 606);
    roundtrip(options, &pcm);
}

#[test]
fn exhaustive_order_search_roundtrips() {
    let mut options = EncoderOptions::new(48_000, 1, SampleFormat::S16)
        .with_level(2)
        .with_frame_length(256);
    options.full_order_search = true;
    let pcm = noise_s16(256, 1, 1200, 2024);
    roundtrip(options, &pcm);
}
