//! Lapped transform kernel: MDCT/IMDCT with boundary-flat sine windows.
//!
//! Each sub-block of `S` samples is transformed by an MDCT of size `S`
//! (window length `2S`). Windows are flat at 0 or 1 outside their
//! transition regions; transitions are sine-shaped, centered on the
//! window quarter points, and may be narrower than the half-window so
//! that adjacent sub-blocks of different sizes can share a transition.
//!
//! The MDST of the same windowed buffer is obtained by transforming the
//! time-reversed input; it is only used for noise-spectrum power, where
//! its sign convention is irrelevant.

use std::f32::consts::{FRAC_PI_2, PI};

/// MDCT processor for one transform size.
pub struct Mdct {
    /// Transform size (number of coefficients). Window length is `2 * size`.
    size: usize,
    /// FFT twiddles `e^{-2πi m/H}` for the internal `H = size/2` point FFT.
    fft_tw: Vec<(f32, f32)>,
    /// Pre-twiddles `e^{-iπ k/S}`.
    pre_tw: Vec<(f32, f32)>,
    /// Post-twiddles `e^{-iπ (j + 1/4)/S}`.
    post_tw: Vec<(f32, f32)>,
    /// Interleaved complex scratch, `2 * H` floats.
    temp: Vec<f32>,
    /// Fold scratch, `size` floats.
    fold: Vec<f32>,
    /// Unfold scratch, `size` floats.
    unfold: Vec<f32>,
}

impl Mdct {
    /// Create a new MDCT processor.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a power of two or is smaller than 4.
    pub fn new(size: usize) -> Self {
        assert!(size >= 4, "MDCT size must be at least 4");
        assert!(size.is_power_of_two(), "MDCT size must be a power of two");

        let h = size / 2;
        let mut fft_tw = Vec::with_capacity(h / 2);
        for m in 0..h / 2 {
            let angle = -2.0 * PI * m as f32 / h as f32;
            fft_tw.push((angle.cos(), angle.sin()));
        }
        let mut pre_tw = Vec::with_capacity(h);
        let mut post_tw = Vec::with_capacity(h);
        for k in 0..h {
            let a = -PI * k as f32 / size as f32;
            pre_tw.push((a.cos(), a.sin()));
            let b = -PI * (k as f32 + 0.25) / size as f32;
            post_tw.push((b.cos(), b.sin()));
        }

        Self {
            size,
            fft_tw,
            pre_tw,
            post_tw,
            temp: vec![0.0; 2 * h],
            fold: vec![0.0; size],
            unfold: vec![0.0; size],
        }
    }

    /// Transform size (number of coefficients).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Forward MDCT: `2S` windowed samples -> `S` coefficients.
    ///
    /// Coefficients are scaled by `2/S` so that a full-scale input yields
    /// coefficients on the order of the signal amplitude.
    pub fn forward(&mut self, windowed: &[f32], output: &mut [f32]) {
        let s = self.size;
        assert!(windowed.len() >= 2 * s);
        assert!(output.len() >= s);

        // Time-domain aliasing fold into a DCT-IV input.
        let half = s / 2;
        for n in 0..half {
            self.fold[n] = -windowed[3 * s / 2 - 1 - n] - windowed[3 * s / 2 + n];
            self.fold[half + n] = windowed[n] - windowed[s - 1 - n];
        }

        self.dct4(output);

        let scale = 2.0 / s as f32;
        for v in output[..s].iter_mut() {
            *v *= scale;
        }
    }

    /// Forward MDST of the same windowed buffer.
    ///
    /// Computed as the MDCT of the time-reversed input with alternating
    /// signs; used only for pseudo-DFT power.
    pub fn forward_mdst(&mut self, windowed: &[f32], output: &mut [f32]) {
        let s = self.size;
        assert!(windowed.len() >= 2 * s);
        assert!(output.len() >= s);

        // Fold of the reversed buffer, written out directly.
        let half = s / 2;
        for n in 0..half {
            self.fold[n] = -windowed[half + n] - windowed[half - 1 - n];
            self.fold[half + n] = windowed[2 * s - 1 - n] - windowed[s + n];
        }

        self.dct4(output);

        let scale = 2.0 / s as f32;
        for (k, v) in output[..s].iter_mut().enumerate() {
            // MDST(z)[k] = (-1)^(k+1) * MDCT(reverse z)[k]
            *v *= if k % 2 == 0 { -scale } else { scale };
        }
    }

    /// Inverse MDCT: `S` coefficients -> `2S` time-aliased samples.
    ///
    /// The output must still be multiplied by the synthesis window and
    /// overlap-added with the neighboring transforms.
    pub fn inverse(&mut self, coeffs: &[f32], output: &mut [f32]) {
        let s = self.size;
        assert!(coeffs.len() >= s);
        assert!(output.len() >= 2 * s);

        self.fold[..s].copy_from_slice(&coeffs[..s]);
        let mut unfolded = std::mem::take(&mut self.unfold);
        self.dct4(&mut unfolded);

        // Transpose of the forward fold.
        let half = s / 2;
        for j in 0..half {
            output[j] = unfolded[half + j];
            output[s - 1 - j] = -unfolded[half + j];
            output[3 * s / 2 - 1 - j] = -unfolded[j];
            output[3 * s / 2 + j] = -unfolded[j];
        }
        self.unfold = unfolded;
    }

    /// DCT-IV of `self.fold` into `output`:
    /// `X[m] = sum_n u[n] cos(pi/S (n+1/2)(m+1/2))`.
    fn dct4(&mut self, output: &mut [f32]) {
        let s = self.size;
        let h = s / 2;

        // Pack even/odd-reflected pairs and pre-twiddle.
        for k in 0..h {
            let re = self.fold[2 * k];
            let im = self.fold[s - 1 - 2 * k];
            let (c, d) = self.pre_tw[k];
            self.temp[2 * k] = re * c - im * d;
            self.temp[2 * k + 1] = re * d + im * c;
        }

        self.fft();

        // Post-twiddle and deinterleave.
        for j in 0..h {
            let re = self.temp[2 * j];
            let im = self.temp[2 * j + 1];
            let (c, d) = self.post_tw[j];
            let wr = re * c - im * d;
            let wi = re * d + im * c;
            output[2 * j] = wr;
            output[s - 1 - 2 * j] = -wi;
        }
    }

    /// In-place H-point complex FFT over `self.temp` (Cooley-Tukey radix-2).
    fn fft(&mut self) {
        let n = self.size / 2;
        if n < 2 {
            return;
        }

        // Bit-reversal permutation.
        let mut j = 0;
        for i in 1..n {
            let mut bit = n >> 1;
            while j & bit != 0 {
                j ^= bit;
                bit >>= 1;
            }
            j ^= bit;
            if i < j {
                self.temp.swap(2 * i, 2 * j);
                self.temp.swap(2 * i + 1, 2 * j + 1);
            }
        }

        // Butterfly stages with precomputed twiddles.
        let mut len = 2;
        while len <= n {
            let half = len / 2;
            let step = n / len;
            for base in (0..n).step_by(len) {
                for k in 0..half {
                    let (wr, wi) = self.fft_tw[k * step];
                    let i1 = base + k;
                    let i2 = i1 + half;
                    let xr = self.temp[2 * i2];
                    let xi = self.temp[2 * i2 + 1];
                    let tr = wr * xr - wi * xi;
                    let ti = wr * xi + wi * xr;
                    self.temp[2 * i2] = self.temp[2 * i1] - tr;
                    self.temp[2 * i2 + 1] = self.temp[2 * i1 + 1] - ti;
                    self.temp[2 * i1] += tr;
                    self.temp[2 * i1 + 1] += ti;
                }
            }
            len *= 2;
        }
    }
}

/// Window one transform's `2S`-sample input.
///
/// The rise transition (width `rise`) is centered on the first quarter
/// point `S/2`, the fall transition (width `fall`) on the third quarter
/// point `3S/2`; the window is 0 before the rise, 1 between the
/// transitions and 0 after the fall.
pub fn apply_analysis_window(src: &[f32], rise: usize, fall: usize, dst: &mut [f32]) {
    let s2 = src.len();
    debug_assert_eq!(dst.len(), s2);
    let s = s2 / 2;
    window_into(rise, fall, s, |i, w| dst[i] = src[i] * w);
}

/// Multiply an IMDCT output in place by the synthesis window (identical
/// in shape to the analysis window).
pub fn apply_synthesis_window(buf: &mut [f32], rise: usize, fall: usize) {
    let s = buf.len() / 2;
    window_into(rise, fall, s, |i, w| buf[i] *= w);
}

fn window_into(rise: usize, fall: usize, s: usize, mut f: impl FnMut(usize, f32)) {
    let rise_start = s / 2 - rise / 2;
    let rise_end = s / 2 + rise / 2;
    let fall_start = 3 * s / 2 - fall / 2;
    let fall_end = 3 * s / 2 + fall / 2;
    for i in 0..rise_start {
        f(i, 0.0);
    }
    for i in rise_start..rise_end {
        let t = (i - rise_start) as f32 + 0.5;
        f(i, (FRAC_PI_2 * t / rise as f32).sin());
    }
    for i in rise_end..fall_start {
        f(i, 1.0);
    }
    for i in fall_start..fall_end {
        let t = (i - fall_start) as f32 + 0.5;
        f(i, (FRAC_PI_2 * t / fall as f32).cos());
    }
    for i in fall_end..2 * s {
        f(i, 0.0);
    }
}
