pub mod bgmc;
pub mod bitio;
pub mod crc32;
pub mod rice;
pub mod types;

pub use bitio::{BitReader, BitWriter};
pub use crc32::{compute as compute_crc32, Crc32};
pub use types::{
    default_frame_length, BlockSwitchMode, EncoderOptions, LtpGainMode, RandomAccessFlag,
    Resolution, SampleFormat, SpecificConfig, LTP_MAX_LAG, MAGIC, MAX_BLOCK_SWITCH_DEPTH,
    MAX_PRED_ORDER, SAMPLES_UNKNOWN,
};
