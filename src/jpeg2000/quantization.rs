//! Scalar dead-zone quantisation: per-subband step sizes expressed as an
//! exponent/mantissa pair (Annex E) and the quantise/dequantise
//! operations tier-1 and the rate controller work in terms of.

/// Derives a step size from the exponent/mantissa encoding used in the
/// QCD/QCC marker segments: `delta = 2^(R - exponent) * (1 + mantissa / 2^11)`
/// where `R` is the component's nominal dynamic range (bit depth plus any
/// subband gain already folded into `range_bits` by the caller).
pub fn step_size(range_bits: u8, exponent: u8, mantissa: u16) -> f32 {
    let mantissa_term = 1.0 + (mantissa as f32) / 2048.0;
    let shift = range_bits as i32 - exponent as i32;
    mantissa_term * 2f32.powi(shift)
}

/// Inverse of [`step_size`]: picks the largest exponent (smallest step)
/// representable with an 11-bit mantissa that is `<= requested_step`.
pub fn exponent_mantissa_for_step(range_bits: u8, requested_step: f32) -> (u8, u16) {
    if requested_step <= 0.0 {
        return (range_bits, 0);
    }
    let log2 = requested_step.log2();
    let exponent = (range_bits as f32 - log2).floor().clamp(0.0, range_bits as f32) as u8;
    let shift = range_bits as i32 - exponent as i32;
    let base = 2f32.powi(shift);
    let mantissa = (((requested_step / base) - 1.0) * 2048.0)
        .round()
        .clamp(0.0, 2047.0) as u16;
    (exponent, mantissa)
}

pub fn quantize_scalar(coeff: f32, step: f32) -> i32 {
    if step <= 0.0 {
        return coeff.round() as i32;
    }
    let sign = if coeff < 0.0 { -1 } else { 1 };
    let magnitude = (coeff.abs() / step).floor() as i32;
    sign * magnitude
}

/// Reconstructs the centre of the dead-zone bin, matching the decoder's
/// convention for lossy reconstruction.
pub fn dequantize_scalar(q: i32, step: f32) -> f32 {
    if q == 0 {
        return 0.0;
    }
    let sign = if q < 0 { -1.0 } else { 1.0 };
    let magnitude = q.unsigned_abs() as f32;
    sign * (magnitude + 0.5) * step
}

/// Ceiling on how many bit planes a code block can declare, shared by
/// encoder and decoder so the zero-bit-plane count signalled in a packet
/// header (spec §6.2) is enough on its own to recover `num_bit_planes`.
pub const MAX_BIT_PLANES: u8 = 30;

/// Reversible (5/3) path quantises with an implicit unit step: the
/// integer wavelet coefficients are the quantisation indices directly.
pub fn quantize_reversible(coeff: i32) -> i32 {
    coeff
}

pub fn dequantize_reversible(q: i32) -> i32 {
    q
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_dequantize_roundtrip_within_one_step() {
        let step = 2.0;
        let val = 10.5;
        let q = quantize_scalar(val, step);
        assert_eq!(q, 5);
        let recon = dequantize_scalar(q, step);
        assert!((val - recon).abs() <= step);
    }

    #[test]
    fn zero_stays_zero() {
        assert_eq!(quantize_scalar(0.4, 2.0), 0);
        assert_eq!(dequantize_scalar(0, 2.0), 0.0);
    }

    #[test]
    fn exponent_mantissa_step_size_roundtrip() {
        let range_bits = 8;
        let requested = 0.03125; // 2^-5
        let (exponent, mantissa) = exponent_mantissa_for_step(range_bits, requested);
        let recovered = step_size(range_bits, exponent, mantissa);
        assert!((recovered - requested).abs() / requested < 0.05);
    }

    #[test]
    fn reversible_quantization_is_identity() {
        assert_eq!(quantize_reversible(-17), -17);
        assert_eq!(dequantize_reversible(42), 42);
    }
}
