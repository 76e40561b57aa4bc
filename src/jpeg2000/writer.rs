//! Codestream writer: emits marker segments over a growable byte buffer.

use crate::config::Configuration;
use crate::jpeg2000::marker::{progression_order_to_byte, Marker};

#[derive(Default)]
pub struct J2kWriter {
    bytes: Vec<u8>,
}

impl J2kWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn write_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn write_u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_be_bytes());
    }

    fn write_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_be_bytes());
    }

    fn write_marker(&mut self, marker: Marker) {
        self.write_u16(marker as u16);
    }

    pub fn write_soc(&mut self) {
        self.write_marker(Marker::Soc);
    }

    pub fn write_eoc(&mut self) {
        self.write_marker(Marker::Eoc);
    }

    pub fn write_siz(
        &mut self,
        width: u32,
        height: u32,
        x_offset: u32,
        y_offset: u32,
        tile_width: u32,
        tile_height: u32,
        components: &[(u8, bool, u8, u8)],
    ) {
        self.write_marker(Marker::Siz);
        let len = 38 + 3 * components.len() as u16;
        self.write_u16(len);
        self.write_u16(0); // Rsiz: no extended capabilities
        self.write_u32(width);
        self.write_u32(height);
        self.write_u32(x_offset);
        self.write_u32(y_offset);
        self.write_u32(tile_width);
        self.write_u32(tile_height);
        self.write_u32(0);
        self.write_u32(0);
        self.write_u16(components.len() as u16);
        for &(bit_depth, signed, sub_x, sub_y) in components {
            let depth_byte = (bit_depth - 1) | if signed { 0x80 } else { 0 };
            self.write_u8(depth_byte);
            self.write_u8(sub_x);
            self.write_u8(sub_y);
        }
    }

    pub fn write_cod(&mut self, config: &Configuration, reversible: bool) {
        self.write_marker(Marker::Cod);
        let precinct_bytes = config.precinct_sizes.len();
        let len = 12 + precinct_bytes as u16;
        self.write_u16(len);

        let mut scod = 0u8;
        if !config.precinct_sizes.is_empty() {
            scod |= 0x01;
        }
        if config.emit_sop {
            scod |= 0x02;
        }
        if config.emit_eph {
            scod |= 0x04;
        }
        self.write_u8(scod);
        self.write_u8(progression_order_to_byte(config.progression_order));
        self.write_u16(config.layer_count);
        self.write_u8(config.multi_component_transform as u8);
        self.write_u8(config.decomposition_levels);
        self.write_u8(exponent_from_size(config.code_block_size.width) - 2);
        self.write_u8(exponent_from_size(config.code_block_size.height) - 2);
        self.write_u8(config.code_block_style.0);
        self.write_u8(if reversible { 0 } else { 1 });

        for &(pw, ph) in &config.precinct_sizes {
            let exp_w = exponent_from_size(pw).min(15);
            let exp_h = exponent_from_size(ph).min(15);
            self.write_u8(exp_w | (exp_h << 4));
        }
    }

    pub fn write_qcd(&mut self, guard_bits: u8, step_sizes: &[(u8, u16)], derived_only: bool) {
        self.write_marker(Marker::Qcd);
        let entry_len = if derived_only { 1 } else { 2 };
        let len = 3 + entry_len * step_sizes.len() as u16;
        self.write_u16(len);
        let style = if derived_only { 1 } else { 2 };
        self.write_u8((guard_bits << 5) | style);
        for &(exponent, mantissa) in step_sizes {
            if derived_only {
                self.write_u8(exponent << 3);
            } else {
                self.write_u16(((exponent as u16) << 11) | (mantissa & 0x07FF));
            }
        }
    }

    pub fn write_sot(&mut self, tile_index: u16, tile_part_length: u32, tile_part_index: u8, tile_part_count: u8) {
        self.write_marker(Marker::Sot);
        self.write_u16(10);
        self.write_u16(tile_index);
        self.write_u32(tile_part_length);
        self.write_u8(tile_part_index);
        self.write_u8(tile_part_count);
    }

    pub fn write_sod(&mut self) {
        self.write_marker(Marker::Sod);
    }

    /// `packet_count` is Nsop, the packet's sequence number within the tile
    /// (wraps at 65536, matching real encoders).
    pub fn write_sop(&mut self, packet_count: u16) {
        self.write_marker(Marker::Sop);
        self.write_u16(4);
        self.write_u16(packet_count);
    }

    pub fn write_eph(&mut self) {
        self.write_marker(Marker::Eph);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Overwrites 4 already-written bytes at `offset`, used to back-patch
    /// Psot once a tile's total length is known.
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn exponent_from_size(size: u32) -> u8 {
    (32 - size.max(1).leading_zeros() - 1) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    #[test]
    fn soc_siz_eoc_roundtrip_shape() {
        let mut w = J2kWriter::new();
        w.write_soc();
        w.write_siz(64, 48, 0, 0, 64, 48, &[(8, false, 1, 1)]);
        w.write_eoc();
        let bytes = w.into_bytes();
        assert_eq!(&bytes[0..2], &[0xFF, 0x4F]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn cod_length_matches_precinct_count() {
        let mut config = Configuration::lossless(3);
        config.precinct_sizes = vec![(128, 128), (64, 64), (32, 32), (32, 32)];
        let mut w = J2kWriter::new();
        w.write_cod(&config, true);
        let bytes = w.into_bytes();
        let len = u16::from_be_bytes([bytes[2], bytes[3]]);
        assert_eq!(len as usize, 12 + config.precinct_sizes.len());
    }
}
