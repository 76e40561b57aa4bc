//! Caller-facing image data model and the internal per-tile pipeline
//! structures that sit between it and the codestream.

/// One component of a caller-supplied image. Samples are stored as `i32`
/// regardless of declared bit depth so that level-shifting and the colour
/// transform have headroom; `bit_depth`/`signed` describe how to
/// interpret/clip them back to the caller's native type.
#[derive(Debug, Clone)]
pub struct Component {
    pub bit_depth: u8,
    pub signed: bool,
    pub sub_x: u8,
    pub sub_y: u8,
    pub width: u32,
    pub height: u32,
    pub samples: Vec<i32>,
}

impl Component {
    pub fn sample(&self, x: u32, y: u32) -> i32 {
        self.samples[(y * self.width + x) as usize]
    }
}

/// A rectangular sample grid with 1..=16384 components sharing image
/// dimensions (after subsampling).
#[derive(Debug, Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub components: Vec<Component>,
}

impl Image {
    pub fn component_count(&self) -> usize {
        self.components.len()
    }
}

/// Decoded output: the reconstructed image plus any warnings accumulated
/// under `tolerate_truncation`.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: Image,
    pub warnings: Vec<crate::error::DecodeWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubbandOrientation {
    #[default]
    Ll,
    Hl,
    Lh,
    Hh,
}

impl SubbandOrientation {
    /// Index into the 9 significance-propagation context tables, which
    /// vary by orientation group {LL/LH} vs {HL} vs {HH}.
    pub fn zc_group(&self) -> usize {
        match self {
            SubbandOrientation::Ll | SubbandOrientation::Lh => 0,
            SubbandOrientation::Hl => 1,
            SubbandOrientation::Hh => 2,
        }
    }
}

/// A fixed-size rectangular partition of a subband; the independent
/// coding unit of tier-1.
#[derive(Debug, Clone)]
pub struct CodeBlock {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Quantised coefficient magnitudes, row-major, width*height.
    pub coefficients: Vec<i32>,
    /// Per-pass tier-1 output, populated by the encoder.
    pub passes: Vec<crate::jpeg2000::tier1::PassRecord>,
    /// Concatenated MQ byte output across all passes.
    pub coded_bytes: Vec<u8>,
    /// Number of leading all-zero bit planes (signalled in the packet
    /// header on first inclusion).
    pub zero_bit_planes: u8,
    /// Highest bit plane index coded (0 if the block is entirely zero).
    pub num_bit_planes: u8,
    /// Number of passes already signalled as included in a prior layer.
    pub included_passes: usize,
}

impl CodeBlock {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            coefficients: vec![0; (width * height) as usize],
            passes: Vec::new(),
            coded_bytes: Vec::new(),
            zero_bit_planes: 0,
            num_bit_planes: 0,
            included_passes: 0,
        }
    }
}

/// A rectangular partition of a resolution level collecting aligned
/// regions of all orientation bands at that level.
#[derive(Debug, Clone)]
pub struct Precinct {
    pub index: u32,
    /// Code blocks per orientation present at this precinct, keyed by the
    /// same order as `Resolution::subbands`.
    pub code_blocks: Vec<Vec<CodeBlock>>,
}

/// One orientation band (LL at level 0; HL/LH/HH above it) of a
/// resolution level.
#[derive(Debug, Clone)]
pub struct Subband {
    pub orientation: SubbandOrientation,
    pub width: u32,
    pub height: u32,
    pub coefficients: Vec<f32>,
    /// Dynamic-range exponent/mantissa pair used to derive this subband's
    /// quantisation step size (spec §4.3).
    pub exponent: u8,
    pub mantissa: u16,
}

impl Subband {
    pub fn energy_gain(&self) -> f32 {
        // Relative L2 energy gain of this orientation's basis functions,
        // used to weight PCRD-opt distortion estimates across subbands.
        match self.orientation {
            SubbandOrientation::Ll => 1.0,
            SubbandOrientation::Hl | SubbandOrientation::Lh => 1.0 / 1.6651,
            SubbandOrientation::Hh => 1.0 / 2.7713,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub level: u8,
    pub width: u32,
    pub height: u32,
    pub subbands: Vec<Subband>,
    pub precincts: Vec<Precinct>,
}

/// The intersection of a tile with a component; owns the per-tile
/// pipeline scratch (wavelet plane, resolutions, code blocks) exclusively
/// for the duration of one worker's processing of this tile.
#[derive(Debug, Clone)]
pub struct TileComponent {
    pub component_index: u32,
    pub width: u32,
    pub height: u32,
    /// Wavelet coefficients during the DWT stage, before subband
    /// extraction; `i32` for the reversible path, reinterpreted as `f32`
    /// bits for the irreversible path by `dwt::forward`/`dwt::inverse`.
    pub samples: Vec<f32>,
    pub resolutions: Vec<Resolution>,
}

#[derive(Debug, Clone)]
pub struct Tile {
    pub index: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub components: Vec<TileComponent>,
}

/// Dynamic-range gain in bits contributed by an orientation's basis
/// functions relative to LL (spec §4.3's R_b table).
pub fn subband_gain_bits(orientation: SubbandOrientation) -> u8 {
    match orientation {
        SubbandOrientation::Ll => 0,
        SubbandOrientation::Hl | SubbandOrientation::Lh => 1,
        SubbandOrientation::Hh => 2,
    }
}

/// Number of code-block columns/rows a subband of this size splits into.
pub fn codeblock_grid_dims(width: u32, height: u32, cb_width: u32, cb_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (0, 0);
    }
    (width.div_ceil(cb_width).max(1), height.div_ceil(cb_height).max(1))
}

/// Per-resolution subband dimensions for a `levels`-level decomposition
/// of a `width` x `height` plane, without computing any coefficient data.
/// Resolution 0 is the coarsest LL-only level; resolution `levels` is
/// the full-resolution level. Used by the decoder, which must know the
/// code-block grid shape before any tier-1 data has been read.
pub fn build_resolution_geometry(
    width: u32,
    height: u32,
    levels: u8,
) -> Vec<(u32, u32, Vec<(SubbandOrientation, u32, u32)>)> {
    use crate::jpeg2000::dwt::{high_len, low_len};

    struct LevelDims {
        orig_w: u32,
        orig_h: u32,
        lw: u32,
        hw: u32,
        ll_h: u32,
        lh_h: u32,
    }

    let mut level_dims = Vec::with_capacity(levels as usize);
    let (mut w, mut h) = (width, height);
    for _ in 0..levels {
        let lw = low_len(w as usize) as u32;
        let hw = high_len(w as usize) as u32;
        let ll_h = low_len(h as usize) as u32;
        let lh_h = high_len(h as usize) as u32;
        level_dims.push(LevelDims {
            orig_w: w,
            orig_h: h,
            lw,
            hw,
            ll_h,
            lh_h,
        });
        w = lw;
        h = ll_h;
    }

    let mut resolutions = Vec::with_capacity(levels as usize + 1);
    resolutions.push((w, h, vec![(SubbandOrientation::Ll, w, h)]));
    for lvl in level_dims.into_iter().rev() {
        resolutions.push((
            lvl.orig_w,
            lvl.orig_h,
            vec![
                (SubbandOrientation::Hl, lvl.hw, lvl.ll_h),
                (SubbandOrientation::Lh, lvl.lw, lvl.lh_h),
                (SubbandOrientation::Hh, lvl.hw, lvl.lh_h),
            ],
        ));
    }
    resolutions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_block_starts_all_zero() {
        let cb = CodeBlock::new(0, 0, 4, 4);
        assert_eq!(cb.coefficients.len(), 16);
        assert!(cb.coefficients.iter().all(|&c| c == 0));
    }

    #[test]
    fn zc_group_partitions_orientations() {
        assert_eq!(SubbandOrientation::Ll.zc_group(), SubbandOrientation::Lh.zc_group());
        assert_ne!(SubbandOrientation::Hl.zc_group(), SubbandOrientation::Hh.zc_group());
    }

    #[test]
    fn resolution_geometry_has_one_entry_per_level() {
        let resolutions = build_resolution_geometry(64, 48, 3);
        assert_eq!(resolutions.len(), 4);
        assert_eq!(resolutions[0].2.len(), 1);
        assert_eq!(resolutions[0].2[0].0, SubbandOrientation::Ll);
        for r in &resolutions[1..] {
            assert_eq!(r.2.len(), 3);
        }
        assert_eq!(resolutions.last().unwrap().0, 64);
        assert_eq!(resolutions.last().unwrap().1, 48);
    }

    #[test]
    fn codeblock_grid_dims_covers_subband() {
        assert_eq!(codeblock_grid_dims(65, 64, 64, 64), (2, 1));
        assert_eq!(codeblock_grid_dims(0, 10, 64, 64), (0, 0));
    }
}
