//! Codestream marker codes (Table A.2/A.3) and the main/tile-part header
//! marker segments that carry coding parameters.

use num_enum::TryFromPrimitive;

/// Markers 0xFF90..=0xFF93 carry no length field; every other
/// marker-segment marker is followed by a 2-byte big-endian length that
/// includes the length field itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum Marker {
    Soc = 0xFF4F,
    Cap = 0xFF50,
    Siz = 0xFF51,
    Cod = 0xFF52,
    Coc = 0xFF53,
    Tlm = 0xFF55,
    Plt = 0xFF58,
    Qcd = 0xFF5C,
    Qcc = 0xFF5D,
    Rgn = 0xFF5E,
    Poc = 0xFF5F,
    Com = 0xFF64,
    Sot = 0xFF90,
    Sop = 0xFF91,
    Eph = 0xFF92,
    Sod = 0xFF93,
    Eoc = 0xFFD9,
}

impl Marker {
    /// True for the markers that carry no length field at all (SOT and
    /// SOP both have one, just fixed-length).
    pub fn has_no_length_field(self) -> bool {
        matches!(self, Marker::Soc | Marker::Sod | Marker::Eph | Marker::Eoc)
    }
}

/// SIZ marker segment: image and tiling geometry plus per-component
/// bit depth/signedness/subsampling.
#[derive(Debug, Clone)]
pub struct SizParams {
    pub rsiz: u16,
    pub width: u32,
    pub height: u32,
    pub x_offset: u32,
    pub y_offset: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_x_offset: u32,
    pub tile_y_offset: u32,
    pub components: Vec<SizComponent>,
}

#[derive(Debug, Clone, Copy)]
pub struct SizComponent {
    pub bit_depth: u8,
    pub signed: bool,
    pub sub_x: u8,
    pub sub_y: u8,
}

/// COD/COC marker segment: SGcod + SPcod coding-style parameters.
#[derive(Debug, Clone)]
pub struct CodParams {
    pub entropy_coder_precincts: bool,
    pub sop_present: bool,
    pub eph_present: bool,
    pub progression_order: crate::config::ProgressionOrder,
    pub layer_count: u16,
    pub multi_component_transform: bool,
    pub decomposition_levels: u8,
    pub code_block_width_exp: u8,
    pub code_block_height_exp: u8,
    pub code_block_style: crate::config::CodeBlockStyle,
    pub transform: WaveletTransform,
    pub precinct_sizes: Vec<(u8, u8)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveletTransform {
    Reversible53,
    Irreversible97,
}

/// QCD/QCC marker segment: quantisation style plus per-subband
/// exponent/mantissa pairs.
#[derive(Debug, Clone)]
pub struct QcdParams {
    pub style: QuantizationStyle,
    pub guard_bits: u8,
    pub step_sizes: Vec<(u8, u16)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizationStyle {
    None,
    ScalarDerived,
    ScalarExpounded,
}

pub fn progression_order_to_byte(order: crate::config::ProgressionOrder) -> u8 {
    use crate::config::ProgressionOrder::*;
    match order {
        Lrcp => 0,
        Rlcp => 1,
        Rpcl => 2,
        Pcrl => 3,
        Cprl => 4,
    }
}

pub fn progression_order_from_byte(byte: u8) -> Option<crate::config::ProgressionOrder> {
    use crate::config::ProgressionOrder::*;
    match byte {
        0 => Some(Lrcp),
        1 => Some(Rlcp),
        2 => Some(Rpcl),
        3 => Some(Pcrl),
        4 => Some(Cprl),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn marker_roundtrip() {
        assert_eq!(Marker::try_from(0xFF4Fu16), Ok(Marker::Soc));
        assert_eq!(Marker::try_from(0xFF93u16), Ok(Marker::Sod));
        assert!(Marker::try_from(0x0000u16).is_err());
    }

    #[test]
    fn progression_order_byte_roundtrip() {
        for byte in 0u8..5 {
            let order = progression_order_from_byte(byte).unwrap();
            assert_eq!(progression_order_to_byte(order), byte);
        }
        assert!(progression_order_from_byte(5).is_none());
    }
}
