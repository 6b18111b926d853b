//! Encoder/decoder configuration and stream limits.

use ulc_core::{CodecError, Error, Result};

/// Smallest supported transform block size.
pub const MIN_BLOCK_SIZE: usize = 256;
/// Largest supported transform block size.
pub const MAX_BLOCK_SIZE: usize = 8192;
/// Smallest supported sample rate.
pub const MIN_SAMPLE_RATE: u32 = 8000;
/// Largest supported sample rate.
pub const MAX_SAMPLE_RATE: u32 = 96000;
/// Largest supported channel count.
pub const MAX_CHANNELS: usize = 255;
/// Smallest window transition length in samples.
pub const MIN_OVERLAP: usize = 16;
/// Quantizer zone budget per channel.
pub const MAX_ZONES: usize = 48;

/// Encoder configuration.
#[derive(Debug, Clone)]
pub struct UlcEncoderConfig {
    /// Sample rate in Hz, `8000..=96000`.
    pub sample_rate: u32,
    /// Channel count, `1..=255`.
    pub channels: usize,
    /// Transform block size; a power of two in `256..=8192`.
    pub block_size: usize,
    /// Use the psychoacoustic masking model for coefficient importance.
    pub psychoacoustics: bool,
    /// Allow transient-driven window switching.
    pub window_switching: bool,
    /// Emit noise-fill and HF-extension side information.
    pub noise_coding: bool,
}

impl Default for UlcEncoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            block_size: 2048,
            psychoacoustics: true,
            window_switching: true,
            noise_coding: true,
        }
    }
}

impl UlcEncoderConfig {
    /// Validate the configuration against the stream limits.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(Error::Codec(CodecError::EncoderConfig(format!(
                "sample rate {} outside {}..={}",
                self.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            ))));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(Error::Codec(CodecError::EncoderConfig(format!(
                "channel count {} outside 1..={}",
                self.channels, MAX_CHANNELS
            ))));
        }
        if !self.block_size.is_power_of_two()
            || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size)
        {
            return Err(Error::Codec(CodecError::EncoderConfig(format!(
                "block size {} must be a power of two in {}..={}",
                self.block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            ))));
        }
        Ok(())
    }
}

/// Upper bound on one block's bitstream length in bits.
pub fn max_block_bits(block_size: usize, channels: usize) -> usize {
    8 + channels * (12 + 20 * (block_size - 1))
}

/// Upper bound on one block's bitstream length in bytes.
pub fn max_block_bytes(block_size: usize, channels: usize) -> usize {
    max_block_bits(block_size, channels).div_ceil(8)
}

/// Largest average coding rate the stream format can express, in kbps.
pub fn max_coding_kbps(block_size: usize, channels: usize, sample_rate: u32) -> f32 {
    max_block_bits(block_size, channels) as f32 * sample_rate as f32
        / (block_size as f32 * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(UlcEncoderConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let mut cfg = UlcEncoderConfig::default();
        cfg.block_size = 3000;
        assert!(cfg.validate().is_err());

        let mut cfg = UlcEncoderConfig::default();
        cfg.block_size = 128;
        assert!(cfg.validate().is_err());

        let mut cfg = UlcEncoderConfig::default();
        cfg.sample_rate = 4000;
        assert!(cfg.validate().is_err());

        let mut cfg = UlcEncoderConfig::default();
        cfg.channels = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_max_bits_formula() {
        assert_eq!(max_block_bits(2048, 1), 8 + 12 + 20 * 2047);
        assert_eq!(max_block_bytes(256, 2), (8 + 2 * (12 + 20 * 255) + 7) / 8);
    }
}
