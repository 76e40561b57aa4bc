//! Multi-component colour transforms applied before the wavelet stage,
//! restricted to the first three components per Part 1.
//!
//! RCT (reversible colour transform) is exact and pairs with the 5/3
//! filter; ICT (irreversible colour transform, BT.601) pairs with the
//! 9/7 filter and loses precision on the round trip.

/// Reversible colour transform: RGB -> Y/Cb/Cr-like (Y, U, V) with exact
/// integer inverse.
pub fn forward_rct(r: i32, g: i32, b: i32) -> (i32, i32, i32) {
    let y = (r + 2 * g + b) >> 2;
    let cb = b - g;
    let cr = r - g;
    (y, cb, cr)
}

pub fn inverse_rct(y: i32, cb: i32, cr: i32) -> (i32, i32, i32) {
    let g = y - ((cb + cr) >> 2);
    let r = cr + g;
    let b = cb + g;
    (r, g, b)
}

const ICT_Y: [f32; 3] = [0.299, 0.587, 0.114];

pub fn forward_ict(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let y = ICT_Y[0] * r + ICT_Y[1] * g + ICT_Y[2] * b;
    let cb = -0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (y, cb, cr)
}

pub fn inverse_ict(y: f32, cb: f32, cr: f32) -> (f32, f32, f32) {
    let r = y + 1.402 * cr;
    let g = y - 0.344_136 * cb - 0.714_136 * cr;
    let b = y + 1.772 * cb;
    (r, g, b)
}

/// Applies the configured forward transform to the first three
/// components of a tile in place, leaving any remaining components
/// untouched. Samples are expected pre-level-shifted (DC offset
/// removed) by the caller.
pub fn forward(
    reversible: bool,
    c0: &mut [f32],
    c1: &mut [f32],
    c2: &mut [f32],
) {
    for i in 0..c0.len() {
        let (y, u, v) = if reversible {
            let (y, u, v) = forward_rct(c0[i] as i32, c1[i] as i32, c2[i] as i32);
            (y as f32, u as f32, v as f32)
        } else {
            forward_ict(c0[i], c1[i], c2[i])
        };
        c0[i] = y;
        c1[i] = u;
        c2[i] = v;
    }
}

pub fn inverse(
    reversible: bool,
    c0: &mut [f32],
    c1: &mut [f32],
    c2: &mut [f32],
) {
    for i in 0..c0.len() {
        let (r, g, b) = if reversible {
            let (r, g, b) = inverse_rct(c0[i] as i32, c1[i] as i32, c2[i] as i32);
            (r as f32, g as f32, b as f32)
        } else {
            inverse_ict(c0[i], c1[i], c2[i])
        };
        c0[i] = r;
        c1[i] = g;
        c2[i] = b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rct_roundtrip_exact() {
        for (r, g, b) in [(0, 0, 0), (255, 128, 0), (-10, 300, 17), (4095, 0, 4095)] {
            let (y, cb, cr) = forward_rct(r, g, b);
            let (r2, g2, b2) = inverse_rct(y, cb, cr);
            assert_eq!((r, g, b), (r2, g2, b2));
        }
    }

    #[test]
    fn ict_roundtrip_near_exact() {
        for (r, g, b) in [(0.0, 0.0, 0.0), (255.0, 128.0, 0.0), (12.5, 200.0, 33.0)] {
            let (y, cb, cr) = forward_ict(r, g, b);
            let (r2, g2, b2) = inverse_ict(y, cb, cr);
            assert!((r - r2).abs() < 1e-2);
            assert!((g - g2).abs() < 1e-2);
            assert!((b - b2).abs() < 1e-2);
        }
    }

    #[test]
    fn forward_inverse_slices_match_scalar() {
        let mut c0 = vec![100.0f32];
        let mut c1 = vec![50.0f32];
        let mut c2 = vec![25.0f32];
        forward(true, &mut c0, &mut c1, &mut c2);
        inverse(true, &mut c0, &mut c1, &mut c2);
        assert!((c0[0] - 100.0).abs() < 1e-3);
        assert!((c1[0] - 50.0).abs() < 1e-3);
        assert!((c2[0] - 25.0).abs() < 1e-3);
    }
}
