//! Psychoacoustic masking analysis.
//!
//! Produces a per-coefficient masking level in Neper units from the
//! squared MDCT amplitudes of each sub-block. Two windows slide over the
//! band index: the main critical band `[29n/32, 45n/32)` accumulating
//! energy-weighted log-energy, and (with noise coding enabled) a noise
//! band `[15n/16, 20n/16)` accumulating plain log-energy. The windows
//! advance in fixed point so each band costs O(1) amortized.

/// Masking output for one sub-block band.
#[derive(Debug, Clone, Copy)]
pub struct BandMasking {
    /// Masking level in Nepers.
    pub mask_np: f32,
    /// Squared tonality proxy in `[0, 1]`: 1 for noise-like bands,
    /// near 0 for isolated tones.
    pub flat_sq: f32,
}

/// Scratch buffers for the masking analysis, reused across sub-blocks.
pub struct PsyAnalyzer {
    energy: Vec<u32>,
    energy_np: Vec<u32>,
}

impl PsyAnalyzer {
    pub fn new(block_size: usize) -> Self {
        Self {
            energy: vec![0; block_size],
            energy_np: vec![0; block_size],
        }
    }

    /// Compute the masking curve of one sub-block.
    ///
    /// `amp2` holds the squared MDCT amplitudes; `out` receives one
    /// entry per band. Zero-energy sub-blocks produce a flat zero curve.
    pub fn compute_masking(&mut self, amp2: &[f32], noise_coding: bool, out: &mut [BandMasking]) {
        let n = amp2.len();
        debug_assert!(out.len() >= n);

        for m in out[..n].iter_mut() {
            *m = BandMasking {
                mask_np: 0.0,
                flat_sq: 1.0,
            };
        }

        // Normalize so the peak sits at 2^32, then convert to fixed point.
        let mut norm = 0.0f32;
        for &v in amp2 {
            if v > norm {
                norm = v;
            }
        }
        if norm == 0.0 {
            return;
        }
        norm = 2.0f32.powi(32) / norm;

        // (2^32 / ln(2^32)) / (1 - 29/45), divided by the sub-block size:
        // scale for the fixed-point log so the widest window cannot
        // overflow the 64-bit sums.
        let base_scale =
            (4294967296.0f32 / (32.0 * std::f32::consts::LN_2)) / (1.0 - 29.0 / 45.0);
        let log_norm_scale = base_scale / n as f32;
        for i in 0..n {
            let v = amp2[i] * norm;
            self.energy_np[i] = if v <= 1.0 {
                0
            } else {
                (v.ln() * log_norm_scale) as u32
            };
            let e = v.sqrt() * 65536.0;
            self.energy[i] = if e <= 1.0 {
                1
            } else if e >= 4294967295.0 {
                u32::MAX
            } else {
                e as u32
            };
        }
        let norm_log = (1.0 / 3.0) * norm.ln();
        // Inverse of the log scale, folded with the -1/3 masking weight.
        let inv_log_norm = -(n as f32) / (3.0 * base_scale);
        let np_per_fx = 1.0 / log_norm_scale;
        let log2_n = n.trailing_zeros();

        let mut band_beg = 0usize;
        let mut band_end = 0usize;
        let mut sum: u64 = 0;
        let mut sum_w: u64 = 0;
        let mut sum_np: u64 = 0;
        let mut bw = 0usize;

        let mut noise_beg = 0usize;
        let mut noise_end = 0usize;
        let mut noise_sum: u32 = 0;

        for band in 0..n {
            // Re-focus the main analysis window.
            {
                const RANGE_FXP: usize = 5;
                const LO_SCALE: usize = 29; // beg = 0.90625 * band
                const HI_SCALE: usize = 45; // end = 1.40625 * band

                let old = band_beg >> RANGE_FXP;
                band_beg += LO_SCALE;
                let new = band_beg >> RANGE_FXP;
                if old < new {
                    sum_w -= self.energy[old] as u64;
                    sum -= self.energy[old] as u64 * self.energy_np[old] as u64;
                    sum_np -= self.energy_np[old] as u64;
                    bw -= 1;
                }

                let mut old = band_end >> RANGE_FXP;
                band_end += HI_SCALE;
                let new = (band_end >> RANGE_FXP).min(n);
                while old < new {
                    sum_w += self.energy[old] as u64;
                    sum += self.energy[old] as u64 * self.energy_np[old] as u64;
                    sum_np += self.energy_np[old] as u64;
                    bw += 1;
                    old += 1;
                }
            }

            // Re-focus the noise analysis window.
            if noise_coding {
                const RANGE_FXP: usize = 4;
                const LO_SCALE: usize = 15; // beg = 0.9375 * band
                const HI_SCALE: usize = 20; // end = 1.25 * band

                let old = noise_beg >> RANGE_FXP;
                noise_beg += LO_SCALE;
                let new = noise_beg >> RANGE_FXP;
                if old < new {
                    noise_sum -= self.energy_np[old];
                }

                let mut old = noise_end >> RANGE_FXP;
                noise_end += HI_SCALE;
                let new = (noise_end >> RANGE_FXP).min(n);
                while old < new {
                    noise_sum += self.energy_np[old];
                    old += 1;
                }
            }

            // Contraharmonic mean in the log domain.
            let mut x = (sum / sum_w.max(1)) as u32;
            if noise_coding {
                x = x.saturating_add(noise_sum >> log2_n);
            }
            let mask_np = x as f32 * inv_log_norm + norm_log;

            // Tonality proxy: weighted vs unweighted mean log-energy.
            let wmean = (sum / sum_w.max(1)) as f32;
            let amean = (sum_np / bw.max(1) as u64) as f32;
            let flat_sq = (-(wmean - amean).max(0.0) * np_per_fx).exp().min(1.0);

            out[band] = BandMasking { mask_np, flat_sq };
        }
    }
}
