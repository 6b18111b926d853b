//! # ULC Core
//!
//! Core types and utilities shared by the ULC codec crates.
//!
//! This crate provides the building blocks the encoder, decoder and tools
//! have in common:
//! - Error handling types
//! - Nibble-oriented bitstream reading/writing utilities

pub mod bitstream;
pub mod error;

pub use bitstream::{NibbleReader, NibbleWriter};
pub use error::{BitstreamError, CodecError, Error, Result};
