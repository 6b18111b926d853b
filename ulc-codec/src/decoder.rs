//! Block decoder: bitstream parsing, noise synthesis, IMDCT overlap-add.
//!
//! The decoder mirrors the encoder's transform alignment and carries the
//! previous block's window control so the shared transition between two
//! blocks uses the same overlap on both sides. Output lags the input by
//! exactly one block.

use tracing::trace;
use ulc_core::{BitstreamError, CodecError, Error, NibbleReader, Result};

use crate::config::{MAX_BLOCK_SIZE, MAX_CHANNELS, MIN_BLOCK_SIZE};
use crate::mdct::{apply_synthesis_window, Mdct};
use crate::quant::companded_dequantize;
use crate::window::WindowCtrl;

/// The ULC block decoder.
pub struct UlcDecoder {
    channels: usize,
    block_size: usize,
    prev_ctrl: WindowCtrl,
    mdcts: Vec<Mdct>,
    spectral: Vec<f32>,
    accum: Vec<f32>,
    time: Vec<f32>,
    block_index: u64,
}

impl UlcDecoder {
    /// Create a new decoder. Fails on invalid parameters.
    pub fn new(channels: usize, block_size: usize) -> Result<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(Error::Codec(CodecError::DecoderConfig(format!(
                "channel count {channels} outside 1..={MAX_CHANNELS}"
            ))));
        }
        if !block_size.is_power_of_two()
            || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
        {
            return Err(Error::Codec(CodecError::DecoderConfig(format!(
                "block size {block_size} must be a power of two in \
                 {MIN_BLOCK_SIZE}..={MAX_BLOCK_SIZE}"
            ))));
        }
        Ok(Self {
            channels,
            block_size,
            prev_ctrl: WindowCtrl::LONG,
            mdcts: (0..4).map(|sh| Mdct::new(block_size >> sh)).collect(),
            spectral: vec![0.0; channels * block_size],
            accum: vec![0.0; channels * 2 * block_size],
            time: vec![0.0; 2 * block_size],
            block_index: 0,
        })
    }

    /// Drop all carried state, as if freshly created.
    pub fn reset(&mut self) {
        self.prev_ctrl = WindowCtrl::LONG;
        self.accum.fill(0.0);
        self.block_index = 0;
    }

    /// Reconstructed spectrum of the most recently decoded block.
    pub fn spectrum(&self, chan: usize) -> &[f32] {
        let n = self.block_size;
        &self.spectral[chan * n..(chan + 1) * n]
    }

    /// Window control parsed from the most recently decoded block.
    pub fn last_window_ctrl(&self) -> WindowCtrl {
        self.prev_ctrl
    }

    /// Decode one block into channel-planar samples.
    ///
    /// The output lags the bitstream by one block: the samples written
    /// for block `k` are those fully resolved once block `k`'s
    /// coefficients are known.
    pub fn decode_block(&mut self, src: &[u8], dst: &mut [f32]) -> Result<()> {
        let n = self.block_size;
        let nch = self.channels;
        if dst.len() != nch * n {
            return Err(Error::invalid_param(format!(
                "destination length {} != channels * block_size {}",
                dst.len(),
                nch * n
            )));
        }

        let ctrl = self.parse(src)?;
        trace!(
            block = self.block_index,
            decimation = ctrl.decimation,
            overlap_scale = ctrl.overlap_scale,
            "decoded window control"
        );

        // Inverse transforms, overlap-added into the carried frame.
        let shifts = ctrl.sub_block_shifts();
        let carried = self.prev_ctrl.trailing_overlap(n);
        let widths = ctrl.transition_widths(n, carried);
        let trailing = ctrl.trailing_overlap(n);

        for ch in 0..nch {
            let accum = &mut self.accum[ch * 2 * n..(ch + 1) * 2 * n];
            let mut pos = n / 2;
            for (b, &sh) in shifts.iter().enumerate() {
                let s = n >> sh;
                let off = pos - n / 2;
                let rise = widths[b];
                let fall = if b + 1 < shifts.len() {
                    widths[b + 1]
                } else {
                    trailing
                };

                let coefs = &self.spectral[ch * n + off..ch * n + off + s];
                self.mdcts[sh as usize].inverse(coefs, &mut self.time[..2 * s]);
                apply_synthesis_window(&mut self.time[..2 * s], rise, fall);
                for i in 0..2 * s {
                    accum[pos - s / 2 + i] += self.time[i];
                }
                pos += s;
            }

            // The first half of the frame is fully resolved; emit it and
            // slide the window forward one block.
            dst[ch * n..(ch + 1) * n].copy_from_slice(&accum[..n]);
            accum.copy_within(n.., 0);
            accum[n..].fill(0.0);
        }

        self.prev_ctrl = ctrl;
        self.block_index += 1;
        Ok(())
    }

    /// Parse one block's bitstream into `self.spectral`.
    fn parse(&mut self, src: &[u8]) -> Result<WindowCtrl> {
        let n = self.block_size;
        let mut r = NibbleReader::new(src);
        self.spectral.fill(0.0);

        let overlap = r.next()?;
        let decimation = r.next()?;
        let ctrl = WindowCtrl::from_nibbles(overlap, decimation);

        for ch in 0..self.channels {
            let spectral = &mut self.spectral[ch * n..(ch + 1) * n];

            // Channel header: quantizer as E,X or the extended 8,0,E,X.
            let mut e = match r.next()? {
                0xE => r.next()?,
                0x8 => {
                    expect_nibble(&mut r, 0x0)?;
                    expect_nibble(&mut r, 0xE)?;
                    r.next()?
                }
                x => {
                    return Err(syntax("channel header", x));
                }
            };
            if e == 0 {
                return Err(syntax("quantizer exponent", 0));
            }
            e -= 1;
            let mut q = 2.0f32.powi(-(e as i32));
            let mut noise_amp: Option<u8> = None;

            let mut cursor = 0usize;
            let mut hf: Option<(u8, u8)> = None;
            while cursor < n {
                let x = r.next()?;
                match x {
                    0x0 => cursor += 1,
                    0x1..=0x7 => {
                        spectral[cursor] = companded_dequantize(x as i32, q);
                        cursor += 1;
                    }
                    0x9..=0xF => {
                        spectral[cursor] = companded_dequantize(x as i32 - 16, q);
                        cursor += 1;
                    }
                    0x8 => {
                        let y = r.next()?;
                        match y {
                            0x0 => break,
                            0x1..=0xB => {
                                let run = 2 * y as usize + 2;
                                self::fill_noise(spectral, cursor, run, noise_amp, q);
                                cursor += run;
                            }
                            0xC | 0xD => {
                                let z = r.next()?;
                                let run =
                                    26 + 2 * (16 * (y as usize - 0xC) + z as usize);
                                self::fill_noise(spectral, cursor, run, noise_amp, q);
                                cursor += run;
                            }
                            0xE => {
                                let x = r.next()?;
                                if x == 0 {
                                    return Err(syntax("quantizer exponent", 0));
                                }
                                e = x - 1;
                                q = 2.0f32.powi(-(e as i32));
                                noise_amp = None;
                            }
                            0xF => {
                                let z = r.next()?;
                                if z == 0 {
                                    let amp = r.next()?;
                                    let d1 = r.next()?;
                                    let d2 = r.next()?;
                                    hf = Some((amp, (d1 << 4) | d2));
                                } else if z <= 8 {
                                    noise_amp = Some(z);
                                } else {
                                    return Err(syntax("noise amplitude", z as i64));
                                }
                            }
                            _ => unreachable!(),
                        }
                        if cursor > n {
                            return Err(Error::Codec(CodecError::BitstreamCorruption {
                                offset: r.position(),
                            }));
                        }
                    }
                    _ => unreachable!(),
                }
            }

            // HF extension synthesizes the uncoded tail.
            if let Some((amp, decay)) = hf {
                if amp > 0 && cursor < n {
                    let floor = companded_dequantize(amp as i32, q) / 8.0;
                    let decay = (1.0 - (decay as i32 * decay as i32) as f32 / 524288.0)
                        .clamp(0.0, 1.0);
                    let mut level = floor;
                    for (i, slot) in spectral[cursor..].iter_mut().enumerate() {
                        let sign = if (cursor + i) % 2 == 0 { 1.0 } else { -1.0 };
                        *slot = sign * level;
                        level *= decay;
                    }
                }
            }
        }

        Ok(ctrl)
    }
}

/// Fill a zero run with low-level noise when a noise amplitude is active.
fn fill_noise(spectral: &mut [f32], start: usize, run: usize, amp: Option<u8>, q: f32) {
    let Some(a) = amp else { return };
    let end = (start + run).min(spectral.len());
    let level = companded_dequantize(a as i32, q) / 2.0;
    for (i, slot) in spectral[start..end].iter_mut().enumerate() {
        let sign = if (start + i) % 2 == 0 { 1.0 } else { -1.0 };
        *slot = sign * level;
    }
}

fn expect_nibble(r: &mut NibbleReader<'_>, want: u8) -> Result<()> {
    let got = r.next()?;
    if got != want {
        return Err(syntax("escape sequence", got as i64));
    }
    Ok(())
}

fn syntax(element: &'static str, value: impl Into<i64>) -> Error {
    Error::Bitstream(BitstreamError::InvalidSyntax {
        element,
        value: value.into(),
    })
}
