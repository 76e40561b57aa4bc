//! Discrete Wavelet Transform engine: 1-D lifting for the 5/3 reversible
//! and 9/7 irreversible filter banks, composed into a separable 2-D
//! transform and recursive multi-level decomposition.
//!
//! Boundary handling is symmetric whole-sample extension (reflection
//! about the boundary sample itself, not a virtual half-sample), matching
//! the extension length of each filter's half-support (2 for 5/3, 4 for
//! 9/7 in the sense that two lifting-step pairs each look one sample
//! beyond their neighbour).

/// One level's four orientation bands, each with its own (possibly
/// unequal) dimensions since an odd input length splits unevenly between
/// the low-pass and high-pass halves.
#[derive(Debug, Clone)]
pub struct Bands<T> {
    pub ll: Vec<T>,
    pub ll_w: usize,
    pub ll_h: usize,
    pub hl: Vec<T>,
    pub hl_w: usize,
    pub hl_h: usize,
    pub lh: Vec<T>,
    pub lh_w: usize,
    pub lh_h: usize,
    pub hh: Vec<T>,
    pub hh_w: usize,
    pub hh_h: usize,
}

pub fn low_len(n: usize) -> usize {
    (n + 1) / 2
}
pub fn high_len(n: usize) -> usize {
    n / 2
}

pub struct Dwt53;

impl Dwt53 {
    /// Forward 1-D lifting: returns (low, high) halves of `signal`.
    pub fn forward_1d(signal: &[i32]) -> (Vec<i32>, Vec<i32>) {
        let len = signal.len();
        let mut x = signal.to_vec();
        if len <= 1 {
            return (x, Vec::new());
        }

        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= (left + right) >> 1;
        }
        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += (left + right + 2) >> 2;
        }

        let mut low = Vec::with_capacity(low_len(len));
        let mut high = Vec::with_capacity(high_len(len));
        for (i, &v) in x.iter().enumerate() {
            if i % 2 == 0 {
                low.push(v);
            } else {
                high.push(v);
            }
        }
        (low, high)
    }

    /// Inverse 1-D lifting: reconstructs the original-length signal.
    pub fn inverse_1d(low: &[i32], high: &[i32]) -> Vec<i32> {
        let len = low.len() + high.len();
        if len <= 1 {
            return low.to_vec();
        }
        let mut x = vec![0i32; len];
        for (i, &v) in low.iter().enumerate() {
            x[2 * i] = v;
        }
        for (i, &v) in high.iter().enumerate() {
            x[2 * i + 1] = v;
        }

        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= (left + right + 2) >> 2;
        }
        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += (left + right) >> 1;
        }
        x
    }

    pub fn forward_2d(plane: &[i32], width: usize, height: usize) -> Bands<i32> {
        forward_2d_generic(plane, width, height, Self::forward_1d)
    }

    pub fn inverse_2d(bands: &Bands<i32>) -> Vec<i32> {
        inverse_2d_generic(bands, Self::inverse_1d)
    }
}

pub struct Dwt97;

impl Dwt97 {
    const ALPHA: f32 = -1.586134342;
    const BETA: f32 = -0.052980118;
    const GAMMA: f32 = 0.882911075;
    const DELTA: f32 = 0.443506852;
    const K: f32 = 1.230174105;
    const INV_K: f32 = 1.0 / 1.230174105;

    pub fn forward_1d(signal: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let len = signal.len();
        let mut x = signal.to_vec();
        if len <= 1 {
            return (x, Vec::new());
        }

        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += Self::ALPHA * (left + right);
        }
        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += Self::BETA * (left + right);
        }
        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += Self::GAMMA * (left + right);
        }
        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += Self::DELTA * (left + right);
        }
        for (i, v) in x.iter_mut().enumerate() {
            *v *= if i % 2 == 0 { Self::INV_K } else { Self::K };
        }

        let mut low = Vec::with_capacity(low_len(len));
        let mut high = Vec::with_capacity(high_len(len));
        for (i, &v) in x.iter().enumerate() {
            if i % 2 == 0 {
                low.push(v);
            } else {
                high.push(v);
            }
        }
        (low, high)
    }

    pub fn inverse_1d(low: &[f32], high: &[f32]) -> Vec<f32> {
        let len = low.len() + high.len();
        if len <= 1 {
            return low.to_vec();
        }
        let mut x = vec![0.0f32; len];
        for (i, &v) in low.iter().enumerate() {
            x[2 * i] = v;
        }
        for (i, &v) in high.iter().enumerate() {
            x[2 * i + 1] = v;
        }

        for (i, v) in x.iter_mut().enumerate() {
            *v *= if i % 2 == 0 { Self::K } else { Self::INV_K };
        }
        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= Self::DELTA * (left + right);
        }
        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= Self::GAMMA * (left + right);
        }
        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= Self::BETA * (left + right);
        }
        for i in (1..len).step_by(2) {
            let left = x[i - 1];
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= Self::ALPHA * (left + right);
        }
        x
    }

    pub fn forward_2d(plane: &[f32], width: usize, height: usize) -> Bands<f32> {
        forward_2d_generic(plane, width, height, Self::forward_1d)
    }

    pub fn inverse_2d(bands: &Bands<f32>) -> Vec<f32> {
        inverse_2d_generic(bands, Self::inverse_1d)
    }
}

/// Separable forward transform shared by both filter banks: rows first
/// (producing horizontal low/high half-width planes), then columns on
/// each half (producing the four orientation bands). Band naming is
/// {horizontal}{vertical}: LL/LH/HL/HH.
fn forward_2d_generic<T, F>(plane: &[T], width: usize, height: usize, forward_1d: F) -> Bands<T>
where
    T: Copy + Default,
    F: Fn(&[T]) -> (Vec<T>, Vec<T>),
{
    let lw = low_len(width);
    let hw = high_len(width);
    let mut low_plane = vec![T::default(); lw * height];
    let mut high_plane = vec![T::default(); hw * height];

    for y in 0..height {
        let row = &plane[y * width..(y + 1) * width];
        let (low, high) = forward_1d(row);
        low_plane[y * lw..(y + 1) * lw].copy_from_slice(&low);
        high_plane[y * hw..(y + 1) * hw].copy_from_slice(&high);
    }

    let ll_h = low_len(height);
    let lh_h = high_len(height);
    let mut ll = vec![T::default(); lw * ll_h];
    let mut lh = vec![T::default(); lw * lh_h];
    for x in 0..lw {
        let col: Vec<T> = (0..height).map(|y| low_plane[y * lw + x]).collect();
        let (low, high) = forward_1d(&col);
        for (y, v) in low.into_iter().enumerate() {
            ll[y * lw + x] = v;
        }
        for (y, v) in high.into_iter().enumerate() {
            lh[y * lw + x] = v;
        }
    }

    let hl_h = low_len(height);
    let hh_h = high_len(height);
    let mut hl = vec![T::default(); hw * hl_h];
    let mut hh = vec![T::default(); hw * hh_h];
    for x in 0..hw {
        let col: Vec<T> = (0..height).map(|y| high_plane[y * hw + x]).collect();
        let (low, high) = forward_1d(&col);
        for (y, v) in low.into_iter().enumerate() {
            hl[y * hw + x] = v;
        }
        for (y, v) in high.into_iter().enumerate() {
            hh[y * hw + x] = v;
        }
    }

    Bands {
        ll,
        ll_w: lw,
        ll_h,
        hl,
        hl_w: hw,
        hl_h,
        lh,
        lh_w: lw,
        lh_h,
        hh,
        hh_w: hw,
        hh_h,
    }
}

fn inverse_2d_generic<T, F>(bands: &Bands<T>, inverse_1d: F) -> Vec<T>
where
    T: Copy + Default,
    F: Fn(&[T], &[T]) -> Vec<T>,
{
    let width = bands.ll_w + bands.hl_w;
    let height = bands.ll_h + bands.lh_h;

    // Columns first: reconstruct the horizontal low/high half-width
    // planes from their vertical low/high halves.
    let mut low_plane = vec![T::default(); bands.ll_w * height];
    for x in 0..bands.ll_w {
        let col_l: Vec<T> = (0..bands.ll_h).map(|y| bands.ll[y * bands.ll_w + x]).collect();
        let col_h: Vec<T> = (0..bands.lh_h).map(|y| bands.lh[y * bands.lh_w + x]).collect();
        let col = inverse_1d(&col_l, &col_h);
        for (y, v) in col.into_iter().enumerate() {
            low_plane[y * bands.ll_w + x] = v;
        }
    }

    let mut high_plane = vec![T::default(); bands.hl_w * height];
    for x in 0..bands.hl_w {
        let col_l: Vec<T> = (0..bands.hl_h).map(|y| bands.hl[y * bands.hl_w + x]).collect();
        let col_h: Vec<T> = (0..bands.hh_h).map(|y| bands.hh[y * bands.hh_w + x]).collect();
        let col = inverse_1d(&col_l, &col_h);
        for (y, v) in col.into_iter().enumerate() {
            high_plane[y * bands.hl_w + x] = v;
        }
    }

    let mut output = vec![T::default(); width * height];
    for y in 0..height {
        let row_l = &low_plane[y * bands.ll_w..(y + 1) * bands.ll_w];
        let row_h = &high_plane[y * bands.hl_w..(y + 1) * bands.hl_w];
        let row = inverse_1d(row_l, row_h);
        output[y * width..(y + 1) * width].copy_from_slice(&row);
    }
    output
}

/// Clamp the requested decomposition level count so the coarsest LL band
/// retains at least one sample in each dimension.
pub fn clamp_levels(width: u32, height: u32, requested: u8) -> u8 {
    let mut levels = 0u8;
    let (mut w, mut h) = (width, height);
    while levels < requested && w > 1 && h > 1 {
        w = (w + 1) / 2;
        h = (h + 1) / 2;
        levels += 1;
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dwt53_1d_roundtrip_even() {
        let input = [10, 20, 30, 40, 50, 60, 70, 80];
        let (low, high) = Dwt53::forward_1d(&input);
        let output = Dwt53::inverse_1d(&low, &high);
        assert_eq!(input.to_vec(), output);
    }

    #[test]
    fn dwt53_1d_roundtrip_odd() {
        let input = [10, 20, 30, 40, 50];
        let (low, high) = Dwt53::forward_1d(&input);
        let output = Dwt53::inverse_1d(&low, &high);
        assert_eq!(input.to_vec(), output);
    }

    #[test]
    fn dwt53_2d_roundtrip() {
        let width = 8usize;
        let height = 6usize;
        let plane: Vec<i32> = (0..(width * height) as i32).collect();
        let bands = Dwt53::forward_2d(&plane, width, height);
        let output = Dwt53::inverse_2d(&bands);
        assert_eq!(plane, output);
    }

    #[test]
    fn dwt53_2d_roundtrip_odd_dims() {
        let width = 7usize;
        let height = 5usize;
        let plane: Vec<i32> = (0..(width * height) as i32).map(|v| v * 3 - 7).collect();
        let bands = Dwt53::forward_2d(&plane, width, height);
        let output = Dwt53::inverse_2d(&bands);
        assert_eq!(plane, output);
    }

    #[test]
    fn dwt97_1d_roundtrip_near_exact() {
        let input = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0];
        let (low, high) = Dwt97::forward_1d(&input);
        let output = Dwt97::inverse_1d(&low, &high);
        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
    }

    #[test]
    fn dwt97_2d_roundtrip_near_exact() {
        let width = 8usize;
        let height = 8usize;
        let plane: Vec<f32> = (0..(width * height)).map(|v| v as f32).collect();
        let bands = Dwt97::forward_2d(&plane, width, height);
        let output = Dwt97::inverse_2d(&bands);
        for (a, b) in plane.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-2, "{} vs {}", a, b);
        }
    }

    #[test]
    fn clamp_levels_respects_minimum_ll() {
        assert_eq!(clamp_levels(1, 1, 5), 0);
        assert_eq!(clamp_levels(256, 256, 5), 5);
        assert_eq!(clamp_levels(3, 3, 5), 1);
    }
}
