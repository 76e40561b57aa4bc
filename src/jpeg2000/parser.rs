//! Main-header and tile-part marker-segment parsing.

use std::convert::TryFrom;

use crate::config::{CodeBlockStyle, ProgressionOrder};
use crate::error::{DecodeWarning, Jpeg2000Error, Jpeg2000Result};
use crate::jpeg2000::marker::{
    progression_order_from_byte, CodParams, Marker, QcdParams, QuantizationStyle, SizComponent,
    SizParams, WaveletTransform,
};

/// Byte-granular cursor over a codestream; markers and their segments
/// are always byte-aligned, unlike packet-header/tier-1 bitstreams.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn read_u8(&mut self) -> Jpeg2000Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(Jpeg2000Error::Truncated { tile_index: 0 })?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Jpeg2000Result<u16> {
        let hi = self.read_u8()? as u16;
        let lo = self.read_u8()? as u16;
        Ok((hi << 8) | lo)
    }

    pub fn read_u32(&mut self) -> Jpeg2000Result<u32> {
        let hi = self.read_u16()? as u32;
        let lo = self.read_u16()? as u32;
        Ok((hi << 16) | lo)
    }

    pub fn advance(&mut self, count: usize) -> Jpeg2000Result<()> {
        if self.pos + count > self.data.len() {
            return Err(Jpeg2000Error::Truncated { tile_index: 0 });
        }
        self.pos += count;
        Ok(())
    }

    pub fn rewind(&mut self, count: usize) {
        self.pos = self.pos.saturating_sub(count);
    }

    /// Reads the next marker code without advancing the cursor.
    pub fn peek_u16(&self) -> Option<u16> {
        let hi = *self.data.get(self.pos)? as u16;
        let lo = *self.data.get(self.pos + 1)? as u16;
        Some((hi << 8) | lo)
    }

    pub fn take(&mut self, count: usize) -> Jpeg2000Result<&'a [u8]> {
        if self.pos + count > self.data.len() {
            return Err(Jpeg2000Error::Truncated { tile_index: 0 });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }
}

fn read_marker(reader: &mut ByteReader) -> Jpeg2000Result<Marker> {
    let code = reader.read_u16()?;
    Marker::try_from(code).map_err(|_| Jpeg2000Error::MalformedMarker {
        marker_code: code,
        offset: reader.position(),
        detail: "not a recognised marker code".into(),
    })
}

fn parse_siz(reader: &mut ByteReader) -> Jpeg2000Result<SizParams> {
    let _len = reader.read_u16()?;
    let rsiz = reader.read_u16()?;
    let width = reader.read_u32()?;
    let height = reader.read_u32()?;
    let x_offset = reader.read_u32()?;
    let y_offset = reader.read_u32()?;
    let tile_width = reader.read_u32()?;
    let tile_height = reader.read_u32()?;
    let tile_x_offset = reader.read_u32()?;
    let tile_y_offset = reader.read_u32()?;
    let num_components = reader.read_u16()?;

    let mut components = Vec::with_capacity(num_components as usize);
    for _ in 0..num_components {
        let depth_byte = reader.read_u8()?;
        let sub_x = reader.read_u8()?;
        let sub_y = reader.read_u8()?;
        components.push(SizComponent {
            bit_depth: (depth_byte & 0x7F) + 1,
            signed: depth_byte & 0x80 != 0,
            sub_x,
            sub_y,
        });
    }

    Ok(SizParams {
        rsiz,
        width,
        height,
        x_offset,
        y_offset,
        tile_width,
        tile_height,
        tile_x_offset,
        tile_y_offset,
        components,
    })
}

fn parse_cod(reader: &mut ByteReader) -> Jpeg2000Result<CodParams> {
    let len = reader.read_u16()? as usize;
    let scod = reader.read_u8()?;
    let sprog = reader.read_u8()?;
    let num_layers = reader.read_u16()?;
    let mct = reader.read_u8()?;
    let decomposition_levels = reader.read_u8()?;
    let cb_width_exp = reader.read_u8()? + 2;
    let cb_height_exp = reader.read_u8()? + 2;
    let cb_style_byte = reader.read_u8()?;
    let transform_byte = reader.read_u8()?;

    let mut precinct_sizes = Vec::new();
    let entrenched_precincts = scod & 0x01 != 0;
    if entrenched_precincts {
        let count = decomposition_levels as usize + 1;
        for _ in 0..count {
            let b = reader.read_u8()?;
            precinct_sizes.push((b & 0x0F, (b >> 4) & 0x0F));
        }
    }

    let progression_order = progression_order_from_byte(sprog).ok_or(Jpeg2000Error::MalformedMarker {
        marker_code: Marker::Cod as u16,
        offset: reader.position(),
        detail: format!("unknown progression order byte {sprog}"),
    })?;

    let _ = len;
    Ok(CodParams {
        entropy_coder_precincts: entrenched_precincts,
        sop_present: scod & 0x02 != 0,
        eph_present: scod & 0x04 != 0,
        progression_order,
        layer_count: num_layers,
        multi_component_transform: mct & 0x01 != 0,
        decomposition_levels,
        code_block_width_exp: cb_width_exp,
        code_block_height_exp: cb_height_exp,
        code_block_style: CodeBlockStyle(cb_style_byte),
        transform: if transform_byte == 0 {
            WaveletTransform::Reversible53
        } else {
            WaveletTransform::Irreversible97
        },
        precinct_sizes,
    })
}

fn parse_qcd(reader: &mut ByteReader) -> Jpeg2000Result<QcdParams> {
    let len = reader.read_u16()? as usize;
    let sqcd = reader.read_u8()?;
    let style_bits = sqcd & 0x1F;
    let guard_bits = sqcd >> 5;
    let style = match style_bits {
        0 => QuantizationStyle::None,
        1 => QuantizationStyle::ScalarDerived,
        _ => QuantizationStyle::ScalarExpounded,
    };

    let mut bytes_left = len.saturating_sub(3);
    let mut step_sizes = Vec::new();
    let entry_len = if style == QuantizationStyle::None { 1 } else { 2 };
    while bytes_left >= entry_len {
        if style == QuantizationStyle::None {
            let b = reader.read_u8()?;
            step_sizes.push((b >> 3, 0));
        } else {
            let v = reader.read_u16()?;
            step_sizes.push(((v >> 11) as u8, v & 0x07FF));
        }
        bytes_left -= entry_len;
    }
    reader.advance(bytes_left)?;

    Ok(QcdParams {
        style,
        guard_bits,
        step_sizes,
    })
}

/// Fully parsed main header: geometry, default coding style and
/// quantisation, plus any per-component overrides.
#[derive(Debug, Clone)]
pub struct MainHeader {
    pub siz: SizParams,
    pub cod: CodParams,
    pub qcd: QcdParams,
    pub warnings: Vec<DecodeWarning>,
}

pub fn parse_main_header(reader: &mut ByteReader) -> Jpeg2000Result<MainHeader> {
    let soc = read_marker(reader)?;
    if soc != Marker::Soc {
        return Err(Jpeg2000Error::MalformedMarker {
            marker_code: soc as u16,
            offset: reader.position(),
            detail: "expected SOC as the first marker".into(),
        });
    }

    let mut siz = None;
    let mut cod = None;
    let mut qcd = None;
    let mut warnings = Vec::new();

    loop {
        let offset = reader.position();
        let marker_code = reader.read_u16()?;
        let marker = match Marker::try_from(marker_code) {
            Ok(m) => m,
            Err(_) => {
                log::warn!("skipping unknown marker 0x{marker_code:04X} at offset {offset}");
                warnings.push(DecodeWarning::UnknownMarker { marker_code, offset });
                let len = reader.read_u16()? as usize;
                reader.advance(len.saturating_sub(2))?;
                continue;
            }
        };

        match marker {
            Marker::Siz => siz = Some(parse_siz(reader)?),
            Marker::Cod => cod = Some(parse_cod(reader)?),
            Marker::Qcd => qcd = Some(parse_qcd(reader)?),
            Marker::Sot => {
                reader.rewind(2);
                break;
            }
            Marker::Com | Marker::Cap | Marker::Coc | Marker::Qcc | Marker::Poc | Marker::Tlm | Marker::Plt
            | Marker::Rgn => {
                let len = reader.read_u16()? as usize;
                reader.advance(len.saturating_sub(2))?;
            }
            other => {
                return Err(Jpeg2000Error::MalformedMarker {
                    marker_code: other as u16,
                    offset,
                    detail: "unexpected marker in main header".into(),
                })
            }
        }
    }

    Ok(MainHeader {
        siz: siz.ok_or_else(|| Jpeg2000Error::MalformedMarker {
            marker_code: Marker::Siz as u16,
            offset: reader.position(),
            detail: "missing SIZ marker segment".into(),
        })?,
        cod: cod.ok_or_else(|| Jpeg2000Error::MalformedMarker {
            marker_code: Marker::Cod as u16,
            offset: reader.position(),
            detail: "missing COD marker segment".into(),
        })?,
        qcd: qcd.ok_or_else(|| Jpeg2000Error::MalformedMarker {
            marker_code: Marker::Qcd as u16,
            offset: reader.position(),
            detail: "missing QCD marker segment".into(),
        })?,
        warnings,
    })
}

/// One tile-part's header fields plus a slice over its packet data.
pub struct TilePart<'a> {
    pub tile_index: u16,
    pub tile_part_index: u8,
    pub tile_part_count: u8,
    pub data: &'a [u8],
}

pub fn parse_tile_part<'a>(reader: &mut ByteReader<'a>) -> Jpeg2000Result<TilePart<'a>> {
    let sot_start = reader.position();
    let marker = read_marker(reader)?;
    if marker != Marker::Sot {
        return Err(Jpeg2000Error::MalformedMarker {
            marker_code: marker as u16,
            offset: reader.position(),
            detail: "expected SOT".into(),
        });
    }
    let _lsot = reader.read_u16()?;
    let isot = reader.read_u16()?;
    let psot = reader.read_u32()?;
    let tpsot = reader.read_u8()?;
    let tnsot = reader.read_u8()?;

    loop {
        let offset = reader.position();
        let code = reader.read_u16()?;
        match Marker::try_from(code) {
            Ok(Marker::Sod) => break,
            Ok(Marker::Cod) | Ok(Marker::Qcd) | Ok(Marker::Coc) | Ok(Marker::Qcc) | Ok(Marker::Poc)
            | Ok(Marker::Rgn) | Ok(Marker::Com) | Ok(Marker::Plt) | Ok(Marker::Tlm) => {
                let len = reader.read_u16()? as usize;
                reader.advance(len.saturating_sub(2))?;
            }
            _ => {
                log::warn!("unexpected marker 0x{code:04X} in tile-part header at {offset}");
                let len = reader.read_u16()? as usize;
                reader.advance(len.saturating_sub(2))?;
            }
        }
    }

    // Psot is measured from the first byte of the SOT marker segment
    // (i.e. from `sot_start`), covering the header we just consumed plus
    // the packet data that follows.
    let payload_len = if psot == 0 {
        reader.remaining().len()
    } else {
        (psot as usize).saturating_sub(reader.position() - sot_start)
    };
    let data = reader.take(payload_len)?;

    Ok(TilePart {
        tile_index: isot,
        tile_part_index: tpsot,
        tile_part_count: tnsot,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_main_header() -> Vec<u8> {
        vec![
            0xFF, 0x4F, // SOC
            0xFF, 0x51, 0x00, 0x29, 0x00, 0x00, // SIZ, len, rsiz
            0x00, 0x00, 0x01, 0x00, // width 256
            0x00, 0x00, 0x01, 0x00, // height 256
            0x00, 0x00, 0x00, 0x00, // x offset
            0x00, 0x00, 0x00, 0x00, // y offset
            0x00, 0x00, 0x01, 0x00, // tile width 256
            0x00, 0x00, 0x01, 0x00, // tile height 256
            0x00, 0x00, 0x00, 0x00, // tile x offset
            0x00, 0x00, 0x00, 0x00, // tile y offset
            0x00, 0x01, // 1 component
            0x07, 0x01, 0x01, // 8-bit unsigned, 1x1
            0xFF, 0x52, 0x00, 0x0C, // COD, len 12
            0x00, // scod
            0x00, // progression LRCP
            0x00, 0x01, // 1 layer
            0x00, // mct off
            0x03, // decomposition levels
            0x04, // cb width exp - 2
            0x04, // cb height exp - 2
            0x00, // cb style
            0x00, // transform (reversible)
            0xFF, 0x5C, 0x00, 0x04, // QCD len 4
            0x06, // sqcd: guard bits 0, style=ScalarExpounded(2)... actually 6 = no
            0x10, // step
            0xFF, 0x90, // SOT starts next header
        ];
    }

    #[test]
    fn parses_siz_cod_qcd() {
        let data = sample_main_header();
        let mut reader = ByteReader::new(&data);
        let header = parse_main_header(&mut reader).unwrap();
        assert_eq!(header.siz.width, 256);
        assert_eq!(header.siz.height, 256);
        assert_eq!(header.siz.components.len(), 1);
        assert_eq!(header.cod.decomposition_levels, 3);
        assert_eq!(header.cod.progression_order, ProgressionOrder::Lrcp);
    }

    #[test]
    fn unknown_marker_in_main_header_is_skipped_with_warning() {
        let mut data = sample_main_header();
        // Splice a COM marker with 4 bytes of payload right after SIZ's end.
        let com: Vec<u8> = vec![0xFF, 0x64, 0x00, 0x06, b'h', b'i', b'!', b'?'];
        let splice_at = 2 + 2 + 41; // after SOC + SIZ
        for (i, b) in com.iter().enumerate() {
            data.insert(splice_at + i, *b);
        }
        let mut reader = ByteReader::new(&data);
        let header = parse_main_header(&mut reader).unwrap();
        assert_eq!(header.siz.width, 256);
    }
}
