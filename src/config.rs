//! Encoder/decoder configuration surface.

use crate::error::{Jpeg2000Error, Jpeg2000Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// 5/3 reversible filter + RCT + identity quantisation.
    Lossless,
    /// 9/7 irreversible filter + ICT + deadzone quantisation.
    Lossy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionOrder {
    Lrcp,
    Rlcp,
    Rpcl,
    Pcrl,
    Cprl,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateControlMode {
    TargetBitrate(f32),
    ConstantQuality(f32),
    /// Open question resolved: treated as `target_psnr ≈ 45 dB` unless the
    /// caller supplies an explicit layer rate (see DESIGN.md).
    VisuallyLossless,
}

/// Code-block coding style bitmask (SPcod/SPcoc Scb field).
///
/// Only the two flags the tier-1 coder actually honours are exposed as
/// named constants. The Scb field has room for more (selective arithmetic
/// coding bypass, per-pass termination, vertical causal context,
/// segmentation symbols); this crate doesn't implement them, so it doesn't
/// claim to by naming bits it would silently ignore. The raw byte still
/// round-trips through COD/COC untouched, so a foreign encoder's flags
/// survive re-encoding even if this crate doesn't act on all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeBlockStyle(pub u8);

impl CodeBlockStyle {
    /// Reset all MQ context probability states before every coding pass
    /// except the first pass of the first bit plane.
    pub const RESET_CONTEXT: CodeBlockStyle = CodeBlockStyle(0x02);
    pub const PREDICTABLE_TERMINATION: CodeBlockStyle = CodeBlockStyle(0x10);

    pub const fn empty() -> Self {
        CodeBlockStyle(0)
    }

    pub const fn contains(&self, other: CodeBlockStyle) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for CodeBlockStyle {
    type Output = CodeBlockStyle;
    fn bitor(self, rhs: CodeBlockStyle) -> CodeBlockStyle {
        CodeBlockStyle(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlockSize {
    pub width: u32,
    pub height: u32,
}

impl CodeBlockSize {
    pub fn is_valid(&self) -> bool {
        let pow2 = |v: u32| v >= 4 && v <= 1024 && (v & (v - 1)) == 0;
        pow2(self.width) && pow2(self.height) && (self.width as u64 * self.height as u64) <= 4096
    }
}

/// Full configuration record for one encode invocation. Construction goes
/// through [`Configuration::lossless`] / [`Configuration::lossy`], which
/// fill in the conventional defaults; callers then override individual
/// fields before calling [`Configuration::validate`].
#[derive(Debug, Clone)]
pub struct Configuration {
    pub compression_mode: CompressionMode,
    pub decomposition_levels: u8,
    pub tile_size: TileSize,
    pub code_block_size: CodeBlockSize,
    pub precinct_sizes: Vec<(u32, u32)>,
    pub progression_order: ProgressionOrder,
    pub layer_count: u16,
    pub layer_rates: Vec<f32>,
    pub multi_component_transform: bool,
    pub code_block_style: CodeBlockStyle,
    pub emit_sop: bool,
    pub emit_eph: bool,
    pub rate_control_mode: RateControlMode,
    pub tolerate_truncation: bool,
}

impl Configuration {
    pub fn lossless(decomposition_levels: u8) -> Self {
        Self {
            compression_mode: CompressionMode::Lossless,
            decomposition_levels,
            tile_size: TileSize {
                width: 4096,
                height: 4096,
            },
            code_block_size: CodeBlockSize {
                width: 64,
                height: 64,
            },
            precinct_sizes: Vec::new(),
            progression_order: ProgressionOrder::Lrcp,
            layer_count: 1,
            layer_rates: Vec::new(),
            multi_component_transform: true,
            code_block_style: CodeBlockStyle::empty(),
            emit_sop: false,
            emit_eph: false,
            rate_control_mode: RateControlMode::VisuallyLossless,
            tolerate_truncation: false,
        }
    }

    pub fn lossy(decomposition_levels: u8, bits_per_sample: f32) -> Self {
        let mut cfg = Self::lossless(decomposition_levels);
        cfg.compression_mode = CompressionMode::Lossy;
        cfg.rate_control_mode = RateControlMode::TargetBitrate(bits_per_sample);
        cfg
    }

    pub fn validate(&self) -> Jpeg2000Result<()> {
        if self.decomposition_levels > 32 {
            return Err(Jpeg2000Error::InvalidParameter(
                "decomposition_levels must be 0..=32".into(),
            ));
        }
        if self.tile_size.width == 0 || self.tile_size.height == 0 {
            return Err(Jpeg2000Error::InvalidParameter(
                "tile_size must be non-zero".into(),
            ));
        }
        if !self.code_block_size.is_valid() {
            return Err(Jpeg2000Error::InvalidParameter(
                "code_block_size must be a power of two in 4..=1024 per dimension with product <= 4096".into(),
            ));
        }
        if self.layer_count == 0 {
            return Err(Jpeg2000Error::InvalidParameter(
                "layer_count must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration consumed by the decoder. Kept separate from
/// [`Configuration`] because decode has no rate-control/progression
/// knobs of its own; it only adds the truncation-tolerance policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeConfiguration {
    pub tolerate_truncation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossless_default_validates() {
        let cfg = Configuration::lossless(5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn invalid_code_block_size_rejected() {
        let mut cfg = Configuration::lossless(5);
        cfg.code_block_size = CodeBlockSize {
            width: 3,
            height: 64,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn code_block_style_flags_combine() {
        let style = CodeBlockStyle::RESET_CONTEXT | CodeBlockStyle::PREDICTABLE_TERMINATION;
        assert!(style.contains(CodeBlockStyle::RESET_CONTEXT));
        assert!(style.contains(CodeBlockStyle::PREDICTABLE_TERMINATION));
        assert!(!CodeBlockStyle::empty().contains(CodeBlockStyle::RESET_CONTEXT));
    }
}
