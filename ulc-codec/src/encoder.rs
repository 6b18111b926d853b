//! Block encoder: orchestration, rate control and serialization.

use tracing::{debug, trace};
use ulc_core::{Error, NibbleWriter, Result};

use crate::config::{
    max_block_bytes, max_coding_kbps, UlcEncoderConfig, MAX_ZONES,
};
use crate::mdct::{apply_analysis_window, Mdct};
use crate::noise::NoiseSpectrum;
use crate::psy::{BandMasking, PsyAnalyzer};
use crate::quant::{self, Zone, COEF_EPS};
use crate::window::{TransientDetector, WindowCtrl};

/// Zone split threshold in Nepers at nominal rate.
const QUANT_RANGE_NP: f32 = 4.608;

/// One codeable coefficient's selection record.
#[derive(Debug, Clone, Copy)]
struct AnalysisKey {
    score: f32,
    chan: u32,
    band: u32,
}

#[derive(Clone, Copy)]
enum RateMode {
    Cbr(f32),
    Vbr(f32),
}

/// The ULC block encoder.
///
/// Owns all carried state (previous block samples, smoothing taps, the
/// previous window control word) and the per-block scratch buffers; a
/// single instance encodes one stream, block by block, in sample order.
pub struct UlcEncoder {
    config: UlcEncoderConfig,

    // Carried across blocks.
    prev_samples: Vec<f32>,
    prev_ctrl: WindowCtrl,
    cur_ctrl: WindowCtrl,
    detector: TransientDetector,
    block_index: u64,

    // Transform kernels for sizes N >> 0..=3.
    mdcts: Vec<Mdct>,

    // Analysis state.
    psy: PsyAnalyzer,
    noise: Vec<NoiseSpectrum>,

    // Per-block scratch, reused every call.
    coef: Vec<f32>,
    nepers: Vec<f32>,
    time: Vec<f32>,
    windowed: Vec<f32>,
    mdst: Vec<f32>,
    amp2: Vec<f32>,
    power: Vec<f32>,
    masking: Vec<BandMasking>,
    keys: Vec<AnalysisKey>,
    zones: Vec<Vec<Zone>>,
    kept: Vec<bool>,
    scratch: NibbleWriter,
}

impl UlcEncoder {
    /// Create a new encoder. Fails on invalid configuration.
    pub fn new(config: UlcEncoderConfig) -> Result<Self> {
        config.validate()?;
        let n = config.block_size;
        let nch = config.channels;

        let mdcts = (0..4).map(|sh| Mdct::new(n >> sh)).collect();
        let noise = (0..nch).map(|_| NoiseSpectrum::new(n)).collect();

        Ok(Self {
            config,
            prev_samples: vec![0.0; nch * n],
            prev_ctrl: WindowCtrl::LONG,
            cur_ctrl: WindowCtrl::LONG,
            detector: TransientDetector::new(n),
            block_index: 0,
            mdcts,
            psy: PsyAnalyzer::new(n),
            noise,
            coef: vec![0.0; nch * n],
            nepers: vec![0.0; nch * n],
            time: vec![0.0; 2 * n],
            windowed: vec![0.0; 2 * n],
            mdst: vec![0.0; n],
            amp2: vec![0.0; n],
            power: vec![0.0; n / 2],
            masking: vec![
                BandMasking {
                    mask_np: 0.0,
                    flat_sq: 1.0
                };
                n
            ],
            keys: Vec::with_capacity(nch * n),
            zones: vec![Vec::new(); nch],
            kept: vec![false; nch * n],
            scratch: NibbleWriter::with_capacity(max_block_bytes(n, nch)),
        })
    }

    /// The encoder configuration.
    pub fn config(&self) -> &UlcEncoderConfig {
        &self.config
    }

    /// Destination size that can hold any block, in bytes.
    pub fn max_block_bytes(&self) -> usize {
        max_block_bytes(self.config.block_size, self.config.channels)
    }

    /// Window control selected for the most recently encoded block.
    pub fn last_window_ctrl(&self) -> WindowCtrl {
        self.cur_ctrl
    }

    /// MDCT spectrum of the most recently encoded block for one channel.
    pub fn spectrum(&self, chan: usize) -> &[f32] {
        let n = self.config.block_size;
        &self.coef[chan * n..(chan + 1) * n]
    }

    /// Drop all carried state, as if freshly created.
    pub fn reset(&mut self) {
        self.prev_samples.fill(0.0);
        self.prev_ctrl = WindowCtrl::LONG;
        self.cur_ctrl = WindowCtrl::LONG;
        self.detector.reset();
        self.block_index = 0;
    }

    /// Encode one block at an average target rate. Returns the block
    /// size in bits.
    ///
    /// `src` is channel-planar `channels * block_size` samples; `dst`
    /// must hold at least [`Self::max_block_bytes`] bytes.
    pub fn encode_block_cbr(&mut self, src: &[f32], dst: &mut [u8], kbps: f32) -> Result<usize> {
        if !(kbps > 0.0) {
            return Err(Error::invalid_param(format!("rate {kbps} kbps")));
        }
        self.encode_block(src, dst, RateMode::Cbr(kbps))
    }

    /// Encode one block at a quality target in `(0, 100]`; higher keeps
    /// more coefficients. Returns the block size in bits.
    pub fn encode_block_vbr(&mut self, src: &[f32], dst: &mut [u8], quality: f32) -> Result<usize> {
        if !(quality > 0.0 && quality <= 100.0) {
            return Err(Error::invalid_param(format!("quality {quality}")));
        }
        self.encode_block(src, dst, RateMode::Vbr(quality))
    }

    fn encode_block(&mut self, src: &[f32], dst: &mut [u8], mode: RateMode) -> Result<usize> {
        let n = self.config.block_size;
        let nch = self.config.channels;
        if src.len() != nch * n {
            return Err(Error::invalid_param(format!(
                "source length {} != channels * block_size {}",
                src.len(),
                nch * n
            )));
        }
        if dst.len() < self.max_block_bytes() {
            return Err(Error::BufferTooSmall {
                needed: self.max_block_bytes(),
                available: dst.len(),
            });
        }

        self.cur_ctrl = self.detector.detect(
            &self.prev_samples,
            src,
            nch,
            n,
            self.config.sample_rate,
            self.config.window_switching,
        );
        trace!(
            block = self.block_index,
            decimation = self.cur_ctrl.decimation,
            overlap_scale = self.cur_ctrl.overlap_scale,
            "window control"
        );

        let quant_range = match mode {
            RateMode::Cbr(kbps) => {
                let max_kbps =
                    max_coding_kbps(n, nch, self.config.sample_rate);
                QUANT_RANGE_NP * (2.0 - kbps / max_kbps).max(1.0)
            }
            RateMode::Vbr(_) => QUANT_RANGE_NP,
        };
        self.analyze(src, quant_range);

        let keep = match mode {
            RateMode::Cbr(kbps) => {
                let budget =
                    (kbps * 1000.0 * n as f32 / self.config.sample_rate as f32) as usize;
                self.search_keep_count(budget)
            }
            RateMode::Vbr(quality) => {
                let threshold = (-quality * std::f32::consts::LN_2).exp();
                self.keys.partition_point(|k| k.score > threshold)
            }
        };

        let bits = self.serialize_pass(keep);
        let bytes = bits.div_ceil(8);
        dst[..bytes].copy_from_slice(&self.scratch.data()[..bytes]);

        debug!(
            block = self.block_index,
            bits,
            kept = keep,
            keys = self.keys.len(),
            "encoded block"
        );

        self.prev_samples.copy_from_slice(src);
        self.prev_ctrl = self.cur_ctrl;
        self.block_index += 1;
        Ok(bits)
    }

    /// Run the transforms and analyses, filling coefficients, keys and
    /// zones for the current block.
    fn analyze(&mut self, src: &[f32], quant_range: f32) {
        let n = self.config.block_size;
        let nch = self.config.channels;
        let ctrl = self.cur_ctrl;
        let shifts = ctrl.sub_block_shifts();
        let carried = self.prev_ctrl.trailing_overlap(n);
        let widths = ctrl.transition_widths(n, carried);
        let trailing = ctrl.trailing_overlap(n);

        self.keys.clear();

        let mut sub_bounds = Vec::with_capacity(shifts.len());
        for ch in 0..nch {
            // Contiguous two-block view: previous block, then current.
            self.time[..n].copy_from_slice(&self.prev_samples[ch * n..(ch + 1) * n]);
            self.time[n..].copy_from_slice(&src[ch * n..(ch + 1) * n]);

            sub_bounds.clear();
            let mut pos = n / 2;
            for (b, &sh) in shifts.iter().enumerate() {
                let s = n >> sh;
                let off = pos - n / 2;
                sub_bounds.push(off);
                let rise = widths[b];
                let fall = if b + 1 < shifts.len() {
                    widths[b + 1]
                } else {
                    trailing
                };

                let win = &self.time[pos - s / 2..pos + 3 * s / 2];
                apply_analysis_window(win, rise, fall, &mut self.windowed[..2 * s]);

                let coef = &mut self.coef[ch * n + off..ch * n + off + s];
                self.mdcts[sh as usize].forward(&self.windowed[..2 * s], coef);

                if self.config.noise_coding {
                    self.mdcts[sh as usize]
                        .forward_mdst(&self.windowed[..2 * s], &mut self.mdst[..s]);
                    for i in 0..s / 2 {
                        self.power[i] = coef[2 * i] * coef[2 * i]
                            + coef[2 * i + 1] * coef[2 * i + 1]
                            + self.mdst[2 * i] * self.mdst[2 * i]
                            + self.mdst[2 * i + 1] * self.mdst[2 * i + 1];
                    }
                    self.noise[ch].analyze_sub(
                        off,
                        &self.power[..s / 2],
                        self.config.sample_rate,
                    );
                }

                if self.config.psychoacoustics {
                    for i in 0..s {
                        self.amp2[i] = coef[i] * coef[i];
                    }
                    self.psy.compute_masking(
                        &self.amp2[..s],
                        self.config.noise_coding,
                        &mut self.masking[off..off + s],
                    );
                }

                pos += s;
            }

            // Log-amplitudes, with the out-of-range sentinel at zero.
            for band in 0..n {
                let c = self.coef[ch * n + band];
                self.nepers[ch * n + band] = if c.abs() < 0.5 * COEF_EPS {
                    0.0
                } else {
                    c.abs().ln()
                };
            }

            // Quantizer zones for this channel.
            self.zones[ch] = quant::partition_zones(
                &self.coef[ch * n..(ch + 1) * n],
                &self.nepers[ch * n..(ch + 1) * n],
                &sub_bounds,
                quant_range,
                MAX_ZONES,
            );

            // Importance keys.
            for band in 0..n {
                let c = self.coef[ch * n + band];
                if c.abs() < 0.5 * COEF_EPS {
                    continue;
                }
                let score = if self.config.psychoacoustics {
                    let m = self.masking[band];
                    let flat2 = m.flat_sq;
                    let val = 3.455 * self.nepers[ch * n + band] - 2.533 * m.mask_np
                        + 4.0 * flat2 * (flat2 - 1.0);
                    (2.0 * val).exp()
                } else {
                    c * c
                };
                self.keys.push(AnalysisKey {
                    score,
                    chan: ch as u32,
                    band: band as u32,
                });
            }
        }

        // Most important first; ties resolve to the lowest band.
        self.keys.sort_unstable_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.band.cmp(&b.band))
                .then(a.chan.cmp(&b.chan))
        });
    }

    /// Largest keep-count whose serialized size fits the bit budget.
    fn search_keep_count(&mut self, budget_bits: usize) -> usize {
        let total = self.keys.len();
        if self.serialize_pass(total) <= budget_bits {
            return total;
        }
        let mut lo = 0usize;
        let mut hi = total;
        // Invariant: bits(lo) is the best known fit, bits(hi) > budget.
        if self.serialize_pass(0) > budget_bits {
            // Budget below the fixed overhead: the minimum legal block.
            return 0;
        }
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.serialize_pass(mid) <= budget_bits {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Serialize the block keeping the `keep` most important keys.
    /// Leaves the result in `self.scratch` and returns its bit length.
    fn serialize_pass(&mut self, keep: usize) -> usize {
        let n = self.config.block_size;
        let nch = self.config.channels;
        let noise_coding = self.config.noise_coding;

        let mut kept = std::mem::take(&mut self.kept);
        kept.fill(false);
        for key in &self.keys[..keep] {
            kept[key.chan as usize * n + key.band as usize] = true;
        }

        let mut w = std::mem::take(&mut self.scratch);
        w.clear();

        let (hi, lo) = self.cur_ctrl.to_nibbles();
        w.push(hi);
        w.push(lo);

        for ch in 0..nch {
            let coef = &self.coef[ch * n..(ch + 1) * n];
            let zones = &self.zones[ch];
            let ch_kept = &kept[ch * n..(ch + 1) * n];

            // Zone quantizers from the kept coefficients.
            let mut exps = vec![0u8; zones.len()];
            let mut used = vec![false; zones.len()];
            let mut kept_count = vec![0usize; zones.len()];
            for (zi, zone) in zones.iter().enumerate() {
                let mut max_abs = 0.0f32;
                for band in zone.start..zone.end {
                    if !ch_kept[band] {
                        continue;
                    }
                    let c = coef[band].abs();
                    if c > max_abs {
                        max_abs = c;
                    }
                    kept_count[zi] += 1;
                }
                if let Some(e) = quant::select_exponent(max_abs) {
                    exps[zi] = e;
                    used[zi] = true;
                }
            }

            if !used.iter().any(|&u| u) {
                // Minimum legal channel: quantizer header plus stop.
                w.push(0xE);
                w.push(0xF);
                w.push(0x8);
                w.push(0x0);
                continue;
            }

            let mut cursor = 0usize;
            let mut cur_e: Option<u8> = None;
            let mut zi = 0usize;
            let mut gap_zi = 0usize;

            for band in 0..n {
                if !ch_kept[band] {
                    continue;
                }
                while zones[zi].end <= band {
                    zi += 1;
                }
                let e = exps[zi];

                if cur_e.is_none() {
                    // Channel header: quantizer of the first coded zone.
                    w.push(0xE);
                    w.push(e + 1);
                    cur_e = Some(e);
                    if noise_coding {
                        Self::emit_zone_noise(
                            &mut w,
                            &self.noise[ch],
                            &zones[zi],
                            kept_count[zi],
                            e,
                        );
                    }
                }

                // Zero runs and in-gap coefficients up to this band.
                let cur = cur_e.unwrap_or(0);
                let mut at = cursor;
                let mut gap = band - at;
                while gap >= 4 {
                    let run = (gap & !1).min(88);
                    if run >= 26 {
                        let x = (run - 26) / 2;
                        w.push(0x8);
                        w.push(0xC + (x >> 4) as u8);
                        w.push((x & 0xF) as u8);
                    } else {
                        w.push(0x8);
                        w.push(((run - 2) / 2) as u8);
                    }
                    at += run;
                    gap -= run;
                }
                for b in at..band {
                    // A short gap costs the same as explicit nibbles, so
                    // code the dropped coefficients where the quantizer
                    // already matches.
                    while zones[gap_zi].end <= b {
                        gap_zi += 1;
                    }
                    if used[gap_zi] && exps[gap_zi] == cur {
                        let q_recip = (1u32 << cur) as f32;
                        let vq = quant::companded_quantize_coef(coef[b] * q_recip, 7);
                        w.push((vq as i8 as u8) & 0xF);
                    } else {
                        w.push(0);
                    }
                }

                if cur_e != Some(e) {
                    w.push(0x8);
                    w.push(0xE);
                    w.push(e + 1);
                    cur_e = Some(e);
                    if noise_coding {
                        Self::emit_zone_noise(
                            &mut w,
                            &self.noise[ch],
                            &zones[zi],
                            kept_count[zi],
                            e,
                        );
                    }
                }

                let q_recip = (1u32 << e) as f32;
                let vq = quant::companded_quantize_coef(coef[band] * q_recip, 7);
                w.push((vq as i8 as u8) & 0xF);
                cursor = band + 1;
            }

            let tail = n - cursor;
            if let Some(e) = cur_e {
                if noise_coding && tail >= 16 {
                    let (amp, dec) =
                        self.noise[ch].hf_ext(cursor, tail, (1u32 << e) as f32);
                    if amp > 0 {
                        w.push(0x8);
                        w.push(0xF);
                        w.push(0x0);
                        w.push(amp);
                        w.push(dec >> 4);
                        w.push(dec & 0xF);
                    }
                }
            }
            if tail == 1 {
                w.push(0);
            } else if tail >= 2 {
                w.push(0x8);
                w.push(0x0);
            }
        }

        let bits = w.bit_len();
        self.scratch = w;
        self.kept = kept;
        bits
    }

    fn emit_zone_noise(
        w: &mut NibbleWriter,
        noise: &NoiseSpectrum,
        zone: &Zone,
        kept_in_zone: usize,
        e: u8,
    ) {
        if zone.width() < kept_in_zone + 8 {
            return;
        }
        let nq = noise.noise_quant(zone.start, zone.width(), (1u32 << e) as f32);
        if nq > 0 {
            w.push(0x8);
            w.push(0xF);
            w.push(nq);
        }
    }
}
