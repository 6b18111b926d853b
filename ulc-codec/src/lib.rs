//! # ULC Codec
//!
//! An ultra-low-complexity perceptual audio codec built on a lapped MDCT
//! with adaptive window switching, psychoacoustic masking, geometric-mean
//! zone quantization, noise-fill side information and a self-synchronizing
//! nibble-oriented bitstream.
//!
//! ## Encoding
//!
//! ```
//! use ulc_codec::{UlcEncoder, UlcEncoderConfig};
//!
//! let mut encoder = UlcEncoder::new(UlcEncoderConfig {
//!     sample_rate: 44100,
//!     channels: 1,
//!     block_size: 1024,
//!     ..UlcEncoderConfig::default()
//! }).unwrap();
//!
//! let samples = vec![0.0f32; 1024];
//! let mut packet = vec![0u8; encoder.max_block_bytes()];
//! let bits = encoder.encode_block_cbr(&samples, &mut packet, 128.0).unwrap();
//! assert!(bits % 4 == 0);
//! ```
//!
//! Blocks must be submitted strictly in sample-time order; the encoder
//! carries the sample lap, the transient detector's smoothing taps and
//! the previous window control between calls.
//!
//! ## Decoding
//!
//! [`UlcDecoder`] reverses the pipeline with one block of latency. The
//! surrounding framing (block lengths, stream header) is the caller's
//! concern; the codec consumes one block's bytes at a time.

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod mdct;
pub mod noise;
pub mod psy;
pub mod quant;
pub mod window;

pub use config::{max_block_bits, max_block_bytes, UlcEncoderConfig};
pub use decoder::UlcDecoder;
pub use encoder::UlcEncoder;
pub use window::WindowCtrl;

pub use ulc_core::{Error, Result};
