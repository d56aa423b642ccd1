//! File-layer and whole-stream integration tests.

use libals_audio::core::bitio::BitReader;
use libals_audio::{
    decode, encode, encode_with_options, info, validate, Decoder, Encoder, EncoderOptions,
    Reader, SampleFormat, SpecificConfig, Writer, MAGIC,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn music_like(frames: usize, channels: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pcm = Vec::with_capacity(frames * channels * 2);
    for n in 0..frames {
        for c in 0..channels {
            let t = n as f64 / 48_000.0;
            let tone = 9000.0 * (std::f64::consts::TAU * 440.0 * t).sin()
                + 4000.0 * (std::f64::consts::TAU * (660.0 + 20.0 * c as f64) * t).sin();
            let v = (tone as i32 + rng.gen_range(-120..=120)) as i16;
            pcm.extend_from_slice(&v.to_le_bytes());
        }
    }
    pcm
}

#[test]
fn extradata_magic_sits_after_the_audio_specific_config() {
    let enc = Encoder::new(48_000, 1, SampleFormat::S16).unwrap();
    let extradata = enc.extradata();
    let offset = SpecificConfig::config_offset();
    assert_eq!(offset, 6);
    assert_eq!(&extradata[offset..offset + 4], &MAGIC);
}

#[test]
fn one_shot_file_roundtrip() {
    let pcm = music_like(2048 + 300, 1, 1);
    let file = encode(&pcm, 48_000, 1, SampleFormat::S16, 1).unwrap();

    assert_eq!(&file[..4], &MAGIC);
    let stream = info(&file).unwrap();
    assert_eq!(stream.sample_rate, 48_000);
    assert_eq!(stream.channels, 1);
    assert_eq!(stream.total_samples, Some(2048 + 300));
    assert!(stream.crc_enabled);

    assert!(validate(&file));
    assert_eq!(decode(&file).unwrap(), pcm);
}

#[test]
fn header_rewrite_fills_totals_and_crc() {
    let pcm = music_like(600, 2, 2);
    let mut enc = Encoder::with_options(
        EncoderOptions::new(48_000, 2, SampleFormat::S16)
            .with_level(1)
            .with_frame_length(256),
    )
    .unwrap();
    // the header goes out with totals unknown
    let (pre, _) = SpecificConfig::parse(&enc.extradata()).unwrap();
    assert_eq!(pre.samples, libals_audio::core::SAMPLES_UNKNOWN);

    let mut writer = Writer::new(&enc.extradata()).unwrap();
    for frame in pcm.chunks(256 * 4) {
        writer.write_packet(&enc.encode_frame(frame).unwrap());
    }
    let file = writer.finish(&enc.finalize().unwrap()).unwrap();

    let (config, _) = Reader::new().read(&file).unwrap();
    assert_eq!(config.samples, 600);
    assert!(config.crc_enabled);
    assert_eq!(decode(&file).unwrap(), pcm);
}

#[test]
fn random_access_frames_land_on_schedule() {
    let mut enc = Encoder::with_options(
        EncoderOptions::new(48_000, 1, SampleFormat::S16)
            .with_level(1)
            .with_ra_distance(3)
            .with_frame_length(256),
    )
    .unwrap();

    let mut rng = StdRng::seed_from_u64(55);
    for i in 0..10u32 {
        let pcm: Vec<u8> = (0..256)
            .flat_map(|_| (rng.gen_range(-2000i32..=2000) as i16).to_le_bytes())
            .collect();
        let packet = enc.encode_frame(&pcm).unwrap();
        let expect_ra = i % 3 == 0;
        assert!(enc.last_frame_blocks().iter().all(|b| {
            if b.offset == 0 {
                b.ra_block == expect_ra
            } else {
                !b.ra_block
            }
        }));
        if expect_ra {
            // the reserved slot is back-patched with the packet size
            let size = u32::from_be_bytes(packet[..4].try_into().unwrap());
            assert_eq!(size as usize, packet.len());
        }
    }
}

#[test]
fn random_access_units_are_indexed_and_decodable() {
    let frame = 256usize;
    let frames = 10usize;

    // periodic material whose pitch period spans frame boundaries, so the
    // long-term predictor gets exercised both within and across frames
    let mut rng = StdRng::seed_from_u64(808);
    let mut pcm = Vec::with_capacity(frame * frames * 2);
    for n in 0..frame * frames {
        let v = ((((n % 300) as i32 * 37) % 4001) - 2000 + rng.gen_range(-40..=40)) as i16;
        pcm.extend_from_slice(&v.to_le_bytes());
    }

    let mut enc = Encoder::with_options(
        EncoderOptions::new(48_000, 1, SampleFormat::S16)
            .with_level(2)
            .with_ra_distance(3)
            .with_frame_length(frame as u32),
    )
    .unwrap();
    let mut writer = Writer::new(&enc.extradata()).unwrap();
    for chunk in pcm.chunks(frame * 2) {
        writer.write_packet(&enc.encode_frame(chunk).unwrap());
    }
    let extradata = enc.finalize().unwrap();
    let file = writer.finish(&extradata).unwrap();

    // sequential decode is unaffected by the unit chain
    assert_eq!(decode(&file).unwrap(), pcm);

    // the chained unit sizes tile the payload and land on the RA schedule
    let units = Reader::new().ra_index(&file).unwrap();
    let schedule: Vec<u64> = units.iter().map(|u| u.frame_index).collect();
    assert_eq!(schedule, vec![0, 3, 6, 9]);
    let last = units.last().unwrap();
    assert_eq!(last.offset + last.size, file.len());

    // a fresh decoder enters mid-stream at frame 6 with no prior context
    let unit = units[2];
    let mut dec = Decoder::from_extradata(&extradata).unwrap();
    dec.seek_to_frame(unit.frame_index).unwrap();
    let mut br = BitReader::new(&file[unit.offset..]);
    let mut out = Vec::new();
    while !dec.is_finished() {
        out.extend_from_slice(&dec.decode_frame(&mut br).unwrap());
    }
    assert_eq!(out, &pcm[6 * frame * 2..]);

    // only scheduled frames are valid entry points
    assert!(dec.seek_to_frame(5).is_err());
}

#[test]
fn partition_lengths_cover_every_frame() {
    let mut enc = Encoder::with_options(
        EncoderOptions::new(48_000, 2, SampleFormat::S16)
            .with_level(2)
            .with_frame_length(256),
    )
    .unwrap();

    // noise then silence: the tail collapses to constant blocks, so the
    // merged single-block form cannot win
    let mut pcm = Vec::new();
    let mut rng = StdRng::seed_from_u64(9);
    for n in 0..256 {
        for _ in 0..2 {
            let v = if n < 128 { rng.gen_range(-12000..=12000) as i16 } else { 0 };
            pcm.extend_from_slice(&v.to_le_bytes());
        }
    }
    enc.encode_frame(&pcm).unwrap();

    for channel in 0..2 {
        let total: usize = enc
            .last_frame_blocks()
            .iter()
            .filter(|b| b.channel == channel)
            .map(|b| b.len)
            .sum();
        assert_eq!(total, 256, "channel {} leaves must tile the frame", channel);
    }
    assert!(
        enc.last_frame_blocks()
            .iter()
            .filter(|b| b.channel == 0)
            .count()
            > 1,
        "a loud/quiet frame should split"
    );

    // the ragged final frame still tiles
    let tail = &pcm[..100 * 4];
    enc.encode_frame(tail).unwrap();
    for channel in 0..2 {
        let total: usize = enc
            .last_frame_blocks()
            .iter()
            .filter(|b| b.channel == channel)
            .map(|b| b.len)
            .sum();
        assert_eq!(total, 100);
    }
}

#[test]
fn higher_levels_do_not_bloat() {
    let pcm = music_like(4096, 2, 77);
    let size = |level: u8| {
        encode_with_options(
            &pcm,
            EncoderOptions::new(48_000, 2, SampleFormat::S16)
                .with_level(level)
                .with_frame_length(2048),
        )
        .unwrap()
        .len()
    };
    let (s0, s1, s2) = (size(0), size(1), size(2));
    let slack = pcm.len() / 20;
    assert!(s1 <= s0 + slack, "level 1 ({}) worse than level 0 ({})", s1, s0);
    assert!(s2 <= s1 + slack, "level 2 ({}) worse than level 1 ({})", s2, s1);
    // and everything beats raw PCM on tonal material
    assert!(s2 < pcm.len());
}

#[test]
fn validate_rejects_corruption() {
    let pcm = music_like(512, 1, 123);
    let mut file = encode(&pcm, 44_100, 1, SampleFormat::S16, 1).unwrap();
    assert!(validate(&file));

    // flip a payload bit
    let n = file.len();
    file[n - 3] ^= 0x10;
    assert!(!validate(&file));
}
