//! Raw ALS file writer.
//!
//! A raw file is the ALSSpecificConfig followed by the packet stream. The
//! config is written up front with the sample count and CRC still open and
//! rewritten on close from the finalized extradata.
//!
//! When the stream stores random-access sizes, each RA frame opens a unit
//! whose leading 32-bit slot is completed once the following dependent
//! frames have been appended, chaining the units for [`crate::Reader`].

use log::warn;

use crate::core::types::{RandomAccessFlag, SpecificConfig};
use crate::error::Result;

/// In-memory file assembler fed by the encoder.
pub struct Writer {
    buffer: Vec<u8>,
    config_len: usize,
    ra_frames: bool,
    ra_distance: u8,
    frames_written: u64,
    /// Buffer offset of the unit whose size slot is still open.
    open_unit: Option<usize>,
}

impl Writer {
    /// Start a file from the encoder's extradata (the AudioSpecificConfig
    /// prefix is not part of the raw file).
    pub fn new(extradata: &[u8]) -> Result<Self> {
        let (config, _) = SpecificConfig::parse(extradata)?;
        let offset = if extradata[..4] == crate::core::types::MAGIC {
            0
        } else {
            SpecificConfig::config_offset()
        };
        let header = &extradata[offset..offset + config.config_size()];
        Ok(Writer {
            buffer: header.to_vec(),
            config_len: header.len(),
            ra_frames: config.ra_flag == RandomAccessFlag::Frames && config.ra_distance > 0,
            ra_distance: config.ra_distance,
            frames_written: 0,
            open_unit: None,
        })
    }

    pub fn write_packet(&mut self, packet: &[u8]) {
        if self.ra_frames && self.frames_written % self.ra_distance as u64 == 0 {
            self.close_unit();
            self.open_unit = Some(self.buffer.len());
        }
        self.frames_written += 1;
        self.buffer.extend_from_slice(packet);
    }

    pub fn bytes_written(&self) -> usize {
        self.buffer.len()
    }

    /// Patch the open unit's leading slot with the whole unit's byte size.
    fn close_unit(&mut self) {
        if let Some(start) = self.open_unit.take() {
            let size = (self.buffer.len() - start) as u32;
            self.buffer[start..start + 4].copy_from_slice(&size.to_be_bytes());
        }
    }

    /// Close the file, rewriting the header from the finalized extradata.
    /// A header whose size changed is left as first written.
    pub fn finish(mut self, final_extradata: &[u8]) -> Result<Vec<u8>> {
        self.close_unit();
        let (config, _) = SpecificConfig::parse(final_extradata)?;
        let offset = if final_extradata[..4] == crate::core::types::MAGIC {
            0
        } else {
            SpecificConfig::config_offset()
        };
        let header = &final_extradata[offset..offset + config.config_size()];
        if header.len() == self.config_len {
            self.buffer[..self.config_len].copy_from_slice(header);
        } else {
            warn!(
                "header rewrite skipped: size changed from {} to {} bytes",
                self.config_len,
                header.len()
            );
        }
        Ok(self.buffer)
    }
}
