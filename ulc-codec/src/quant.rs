//! Companded quantization and quantizer-zone partitioning.
//!
//! Coefficients are companded: for a zone quantizer value `q = 2^-e`,
//! the coded value is `round(sqrt(|c| / q))` clamped to 7, and the
//! reconstruction is `sign * vq^2 * q`. Zones are split along the
//! running `c^2`-weighted geometric mean of log-amplitudes; each zone's
//! exponent is then the finest scale whose code range still admits the
//! zone maximum.

/// Largest legal quantizer exponent; quantizer values are `2^-e`.
pub const MAX_QUANT_EXP: u8 = 14;

/// Smallest codeable coefficient magnitude.
pub const COEF_EPS: f32 = 1.0 / (1u64 << 31) as f32;

/// Mathematically optimal companded rounding: the smallest input mapped
/// to a nonzero code is 0.5.
pub fn companded_quantize_unsigned(v: f32) -> u32 {
    if v >= 0.5 {
        (v - 0.25).sqrt().round() as u32
    } else {
        0
    }
}

/// Companded quantization of a signed coefficient, clamped to `limit`.
pub fn companded_quantize_coef(v: f32, limit: u32) -> i32 {
    let vq = companded_quantize_unsigned(v.abs()).min(limit) as i32;
    if v < 0.0 {
        -vq
    } else {
        vq
    }
}

/// Reconstruction of a companded value.
pub fn companded_dequantize(vq: i32, q: f32) -> f32 {
    (vq * vq.abs()) as f32 * q
}

/// A contiguous coefficient range sharing one quantizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub start: usize,
    pub end: usize,
}

impl Zone {
    pub fn width(&self) -> usize {
        self.end - self.start
    }
}

/// Partition one channel's spectrum into quantizer zones.
///
/// Walks the bands in order keeping a `c^2`-weighted running mean of
/// log-amplitudes; a band further than `quant_range` Nepers from the
/// running mean opens a new zone, as does a sub-block boundary. At most
/// `max_zones` zones are produced.
pub fn partition_zones(
    coef: &[f32],
    nepers: &[f32],
    sub_block_bounds: &[usize],
    quant_range: f32,
    max_zones: usize,
) -> Vec<Zone> {
    let n = coef.len();
    let mut zones: Vec<Zone> = Vec::with_capacity(16);
    let mut start = 0usize;
    let mut avg = 0.0f32;
    let mut avg_w = 0.0f32;
    let mut bound_idx = 0usize;

    for band in 0..n {
        let mut split = false;
        while bound_idx < sub_block_bounds.len() && sub_block_bounds[bound_idx] <= band {
            if sub_block_bounds[bound_idx] == band && band != 0 {
                split = true;
            }
            bound_idx += 1;
        }

        let c = coef[band];
        if c.abs() >= 0.5 * COEF_EPS {
            let v = nepers[band];
            // Compare against the running weighted mean of the zone.
            if !split
                && avg_w > 0.0
                && ((v + quant_range) * avg_w < avg || (v - quant_range) * avg_w > avg)
            {
                split = true;
            }
            if split && band > start && zones.len() < max_zones - 1 {
                zones.push(Zone { start, end: band });
                start = band;
                avg = 0.0;
                avg_w = 0.0;
            }
            let w = c * c;
            avg += w * v;
            avg_w += w;
        } else if split && band > start && zones.len() < max_zones - 1 {
            zones.push(Zone { start, end: band });
            start = band;
            avg = 0.0;
            avg_w = 0.0;
        }
    }
    zones.push(Zone { start, end: n });
    zones
}

/// Select a zone's quantizer exponent from its kept coefficients.
///
/// Picks the smallest power-of-two scale (finest quantizer) whose
/// companded code range still admits the zone maximum: the largest `e`
/// with `round(sqrt(max * 2^e)) <= 7`. Returns `None` for an unused
/// zone.
pub fn select_exponent(max_abs: f32) -> Option<u8> {
    if max_abs <= 0.0 {
        return None;
    }
    // round(sqrt(x)) <= 7 holds up to x = 7.5^2 - 0.25 companded.
    let mut e = (56.0 / max_abs)
        .log2()
        .floor()
        .clamp(0.0, MAX_QUANT_EXP as f32) as u8;
    while e > 0 && companded_quantize_unsigned(max_abs * (1u32 << e) as f32) > 7 {
        e -= 1;
    }
    Some(e)
}
