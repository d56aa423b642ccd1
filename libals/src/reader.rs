//! Raw ALS file reader.

use crate::core::types::{RandomAccessFlag, SpecificConfig, SAMPLES_UNKNOWN};
use crate::error::{Error, Result};

/// One random-access unit: an RA frame plus the dependent frames that
/// follow it, decodable with no prior context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaUnit {
    /// Index of the unit's leading random-access frame.
    pub frame_index: u64,
    /// Byte offset of the unit within the file.
    pub offset: usize,
    /// Unit size in bytes, as stored in its leading slot.
    pub size: usize,
}

/// Parser for raw ALS files produced by [`crate::Writer`].
pub struct Reader;

impl Reader {
    pub fn new() -> Self {
        Reader
    }

    /// Split a file into its stream configuration and the packet payload.
    pub fn read<'a>(&self, data: &'a [u8]) -> Result<(SpecificConfig, &'a [u8])> {
        if data.len() < 4 {
            return Err(Error::InvalidData("file too small for an ALS header".into()));
        }
        let (config, consumed) = SpecificConfig::parse(data)?;
        Ok((config, &data[consumed..]))
    }

    /// Walk the random-access unit chain: each RA frame's leading 32-bit
    /// slot holds the byte size of its whole unit, so the next unit starts
    /// right after it. Only streams storing per-frame sizes carry a chain.
    pub fn ra_index(&self, data: &[u8]) -> Result<Vec<RaUnit>> {
        let (config, payload) = self.read(data)?;
        if config.ra_flag != RandomAccessFlag::Frames || config.ra_distance == 0 {
            return Err(Error::InvalidData(
                "stream does not store random-access unit sizes".into(),
            ));
        }
        let base = data.len() - payload.len();
        let total_frames = if config.samples == SAMPLES_UNKNOWN {
            u64::MAX
        } else {
            (config.samples as u64).div_ceil(config.frame_length as u64)
        };

        let mut units = Vec::new();
        let mut off = 0usize;
        let mut frame = 0u64;
        while off + 4 <= payload.len() && frame < total_frames {
            let size =
                u32::from_be_bytes(payload[off..off + 4].try_into().expect("4-byte slot")) as usize;
            if size < 4 || off + size > payload.len() {
                return Err(Error::InvalidData(format!(
                    "bad random-access unit size {} at offset {}",
                    size,
                    base + off
                )));
            }
            units.push(RaUnit {
                frame_index: frame,
                offset: base + off,
                size,
            });
            off += size;
            frame += config.ra_distance as u64;
        }
        Ok(units)
    }
}

impl Default for Reader {
    fn default() -> Self {
        Self::new()
    }
}
