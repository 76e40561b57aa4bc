//! Top-level decode pipeline: marker parsing, tier-2 packet reading,
//! tier-1 reconstruction, inverse DWT and inverse colour transform.

use std::collections::HashSet;

use crate::config::{CodeBlockStyle, DecodeConfiguration};
use crate::error::{Jpeg2000Error, Jpeg2000Result};
use crate::jpeg2000::bit_io::BitReader;
use crate::jpeg2000::color;
use crate::jpeg2000::dwt::{clamp_levels, Bands, Dwt53, Dwt97};
use crate::jpeg2000::image::{
    build_resolution_geometry, codeblock_grid_dims, subband_gain_bits, Component, DecodedImage,
    Image, SubbandOrientation,
};
use crate::jpeg2000::marker::WaveletTransform;
use crate::jpeg2000::packet::{self, CodeBlockPacketState};
use crate::jpeg2000::parser::{self, ByteReader, MainHeader};
use crate::jpeg2000::quantization;
use crate::jpeg2000::tag_tree::TagTree;
use crate::jpeg2000::tier1;

struct TileGeometry {
    index: u32,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

fn tile_grid(main: &MainHeader) -> Vec<TileGeometry> {
    let siz = &main.siz;
    let tw = siz.tile_width.min(siz.width).max(1);
    let th = siz.tile_height.min(siz.height).max(1);
    let cols = siz.width.div_ceil(tw);
    let rows = siz.height.div_ceil(th);
    let mut out = Vec::with_capacity((cols * rows) as usize);
    for row in 0..rows {
        for col in 0..cols {
            let x = col * tw;
            let y = row * th;
            out.push(TileGeometry {
                index: row * cols + col,
                x,
                y,
                width: tw.min(siz.width - x),
                height: th.min(siz.height - y),
            });
        }
    }
    out
}

/// Decoded data for one code block: the zero-bit-plane count signalled
/// on first inclusion plus whatever coded bytes have accumulated from
/// every packet it appeared in across quality layers.
#[derive(Default, Clone)]
struct CodeBlockAccum {
    zero_bit_planes: u8,
    bytes: Vec<u8>,
}

struct SubbandDecodeState {
    cols: u32,
    rows: u32,
    inclusion_tree: TagTree,
    zero_bp_tree: TagTree,
    block_states: Vec<CodeBlockPacketState>,
    blocks: Vec<CodeBlockAccum>,
}

impl SubbandDecodeState {
    fn new(width: u32, height: u32, cb_w: u32, cb_h: u32) -> Self {
        let (cols, rows) = codeblock_grid_dims(width, height, cb_w, cb_h);
        let count = (cols * rows) as usize;
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
            inclusion_tree: TagTree::new(cols.max(1), rows.max(1)),
            zero_bp_tree: TagTree::new(cols.max(1), rows.max(1)),
            block_states: vec![CodeBlockPacketState::default(); count],
            blocks: vec![CodeBlockAccum::default(); count],
        }
    }
}

fn read_packet_into(
    reader: &[u8],
    offset: &mut usize,
    subbands: &mut [SubbandDecodeState],
    layer: u16,
    sop_present: bool,
    eph_present: bool,
) -> Jpeg2000Result<()> {
    let mut pos = *offset;
    if sop_present {
        if pos + 6 > reader.len() {
            return Err(Jpeg2000Error::Truncated { tile_index: 0 });
        }
        pos += 6; // SOP marker + length field + Nsop
    }

    let mut bit_reader = BitReader::new(&reader[pos..]);
    let mut decoded_per_subband = Vec::with_capacity(subbands.len());

    for sub in subbands.iter_mut() {
        let decoded = packet::read_packet_header(
            &mut bit_reader,
            &mut sub.inclusion_tree,
            &mut sub.zero_bp_tree,
            sub.cols,
            sub.rows,
            &mut sub.block_states,
            layer,
        );
        decoded_per_subband.push(decoded);
    }

    bit_reader.align_to_byte();
    let header_bytes = bit_reader.bytes_consumed();
    let mut body_offset = pos + header_bytes;
    if eph_present {
        body_offset += 2;
    }

    for (sub, decoded) in subbands.iter_mut().zip(decoded_per_subband.iter()) {
        for (b, header) in decoded.iter().enumerate() {
            if !header.newly_included || header.byte_length == 0 {
                continue;
            }
            if header.new_passes > 0 && sub.blocks[b].bytes.is_empty() {
                sub.blocks[b].zero_bit_planes = header.zero_bit_planes;
            }
            let end = body_offset + header.byte_length;
            if end > reader.len() {
                return Err(Jpeg2000Error::Truncated { tile_index: 0 });
            }
            sub.blocks[b].bytes.extend_from_slice(&reader[body_offset..end]);
            body_offset = end;
        }
    }

    *offset = body_offset;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn reconstruct_component(
    subband_states: &[Vec<SubbandDecodeState>],
    cw: u32,
    ch: u32,
    levels: u8,
    reversible: bool,
    depth: u8,
    style: CodeBlockStyle,
) -> Vec<i32> {
    let geometry = build_resolution_geometry(cw, ch, levels);

    // LL (resolution 0).
    let (ll_w, ll_h, ll_subbands) = &geometry[0];

    let mut ll_i32: Vec<i32> = vec![0; (*ll_w * *ll_h) as usize];
    let mut ll_f32: Vec<f32> = vec![0.0; (*ll_w * *ll_h) as usize];

    decode_into(
        &subband_states[0][0],
        ll_subbands[0].0,
        *ll_w,
        *ll_h,
        depth,
        reversible,
        style,
        &mut ll_i32,
        &mut ll_f32,
    );

    let (mut cur_w, mut cur_h) = (*ll_w, *ll_h);

    for (level_idx, (res_w, res_h, subs)) in geometry.iter().enumerate().skip(1) {
        let sub_state = &subband_states[level_idx];
        let mut hl_i32 = vec![0i32; 0];
        let mut hl_f32: Vec<f32> = vec![];
        let mut lh_i32 = vec![0i32; 0];
        let mut lh_f32: Vec<f32> = vec![];
        let mut hh_i32 = vec![0i32; 0];
        let mut hh_f32: Vec<f32> = vec![];
        let mut hl_w = 0u32;
        let mut hl_h = 0u32;
        let mut lh_w = 0u32;
        let mut lh_h = 0u32;
        let mut hh_w = 0u32;
        let mut hh_h = 0u32;

        for (s, &(orientation, w, h)) in subs.iter().enumerate() {
            let mut i32_buf = vec![0i32; (w * h) as usize];
            let mut f32_buf = vec![0.0f32; (w * h) as usize];
            decode_into(&sub_state[s], orientation, w, h, depth, reversible, style, &mut i32_buf, &mut f32_buf);
            match orientation {
                SubbandOrientation::Hl => {
                    hl_i32 = i32_buf;
                    hl_f32 = f32_buf;
                    hl_w = w;
                    hl_h = h;
                }
                SubbandOrientation::Lh => {
                    lh_i32 = i32_buf;
                    lh_f32 = f32_buf;
                    lh_w = w;
                    lh_h = h;
                }
                SubbandOrientation::Hh => {
                    hh_i32 = i32_buf;
                    hh_f32 = f32_buf;
                    hh_w = w;
                    hh_h = h;
                }
                SubbandOrientation::Ll => unreachable!("LL only appears at resolution 0"),
            }
        }

        if reversible {
            let bands = Bands {
                ll: ll_i32,
                ll_w: cur_w as usize,
                ll_h: cur_h as usize,
                hl: hl_i32,
                hl_w: hl_w as usize,
                hl_h: hl_h as usize,
                lh: lh_i32,
                lh_w: lh_w as usize,
                lh_h: lh_h as usize,
                hh: hh_i32,
                hh_w: hh_w as usize,
                hh_h: hh_h as usize,
            };
            ll_i32 = Dwt53::inverse_2d(&bands);
        } else {
            let bands = Bands {
                ll: ll_f32,
                ll_w: cur_w as usize,
                ll_h: cur_h as usize,
                hl: hl_f32,
                hl_w: hl_w as usize,
                hl_h: hl_h as usize,
                lh: lh_f32,
                lh_w: lh_w as usize,
                lh_h: lh_h as usize,
                hh: hh_f32,
                hh_w: hh_w as usize,
                hh_h: hh_h as usize,
            };
            ll_f32 = Dwt97::inverse_2d(&bands);
        }
        cur_w = *res_w;
        cur_h = *res_h;
    }

    if reversible {
        ll_i32
    } else {
        ll_f32.iter().map(|&v| v.round() as i32).collect()
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_into(
    sub_state: &SubbandDecodeState,
    orientation: SubbandOrientation,
    w: u32,
    h: u32,
    depth: u8,
    reversible: bool,
    style: CodeBlockStyle,
    out_i32: &mut [i32],
    out_f32: &mut [f32],
) {
    if w == 0 || h == 0 {
        return;
    }
    let range_bits = depth + subband_gain_bits(orientation);
    let (exponent, mantissa) = if reversible {
        (range_bits, 0u16)
    } else {
        quantization::exponent_mantissa_for_step(range_bits, 1.0)
    };
    let step = quantization::step_size(range_bits, exponent, mantissa);

    let (cols, rows) = (sub_state.cols, sub_state.rows);
    let block_w = w.div_ceil(cols);
    let block_h = h.div_ceil(rows);

    for by in 0..rows {
        let y0 = by * block_h;
        if y0 >= h {
            continue;
        }
        let bh = block_h.min(h - y0);
        for bx in 0..cols {
            let x0 = bx * block_w;
            if x0 >= w {
                continue;
            }
            let bw = block_w.min(w - x0);
            let block_idx = (by * cols + bx) as usize;
            let accum = &sub_state.blocks[block_idx];
            let num_bit_planes = quantization::MAX_BIT_PLANES.saturating_sub(accum.zero_bit_planes);
            let coeffs = tier1::decode_codeblock(&accum.bytes, bw, bh, num_bit_planes, orientation, style);

            for row in 0..bh {
                for col in 0..bw {
                    let dst = ((y0 + row) * w + (x0 + col)) as usize;
                    let q = coeffs[(row * bw + col) as usize];
                    if reversible {
                        out_i32[dst] = quantization::dequantize_reversible(q);
                    } else {
                        out_f32[dst] = quantization::dequantize_scalar(q, step);
                    }
                }
            }
        }
    }
}

/// Decodes a complete JPEG 2000 codestream into its reconstructed image.
pub fn decode(data: &[u8], config: &DecodeConfiguration) -> Jpeg2000Result<DecodedImage> {
    let mut reader = ByteReader::new(data);
    let main = parser::parse_main_header(&mut reader)?;
    let mut warnings = main.warnings.clone();

    let reversible = main.cod.transform == WaveletTransform::Reversible53;
    let num_components = main.siz.components.len();
    let num_resolutions = main.cod.decomposition_levels + 1;
    let cb_width = 1u32 << main.cod.code_block_width_exp;
    let cb_height = 1u32 << main.cod.code_block_height_exp;

    let mut components: Vec<Component> = main
        .siz
        .components
        .iter()
        .map(|c| {
            let width = main.siz.width.div_ceil(c.sub_x.max(1) as u32);
            let height = main.siz.height.div_ceil(c.sub_y.max(1) as u32);
            Component {
                bit_depth: c.bit_depth,
                signed: c.signed,
                sub_x: c.sub_x,
                sub_y: c.sub_y,
                width,
                height,
                samples: vec![0i32; (width * height) as usize],
            }
        })
        .collect();

    let tiles = tile_grid(&main);
    let precincts_per_resolution = vec![1u32; num_resolutions as usize];
    let mut handled_tiles: HashSet<u32> = HashSet::new();

    loop {
        match reader.peek_u16() {
            Some(code) if code == crate::jpeg2000::marker::Marker::Eoc as u16 => break,
            None => break,
            _ => {}
        }

        let tile_part = match parser::parse_tile_part(&mut reader) {
            Ok(tp) => tp,
            Err(_) if config.tolerate_truncation => break,
            Err(e) => return Err(e),
        };

        let geom = tiles
            .iter()
            .find(|t| t.index == tile_part.tile_index as u32)
            .ok_or(Jpeg2000Error::MalformedMarker {
                marker_code: crate::jpeg2000::marker::Marker::Sot as u16,
                offset: reader.position(),
                detail: "tile index not present in tile grid".into(),
            })?;

        let mut comp_subbands: Vec<Vec<SubbandDecodeState>> = Vec::with_capacity(num_components);
        let mut comp_dims: Vec<(u32, u32, u8)> = Vec::with_capacity(num_components);

        for component in &components {
            let sub_x = component.sub_x.max(1) as u32;
            let sub_y = component.sub_y.max(1) as u32;
            let cw = (geom.width / sub_x).max(1);
            let ch = (geom.height / sub_y).max(1);
            let levels = clamp_levels(cw, ch, main.cod.decomposition_levels);
            let geometry = build_resolution_geometry(cw, ch, levels);

            let mut res_states = Vec::with_capacity(geometry.len());
            for (_, _, subs) in &geometry {
                let sub_states: Vec<SubbandDecodeState> = subs
                    .iter()
                    .map(|&(_, w, h)| SubbandDecodeState::new(w, h, cb_width, cb_height))
                    .collect();
                res_states.push(sub_states);
            }
            comp_subbands.push(res_states);
            comp_dims.push((cw, ch, levels));
        }

        let all_packets = packet::progression_order(
            main.cod.progression_order,
            main.cod.layer_count,
            num_resolutions,
            num_components as u16,
            &precincts_per_resolution,
        );

        let mut offset = 0usize;
        let mut tile_truncated = false;
        'layers: for layer in 0..main.cod.layer_count {
            for pkt in all_packets.iter().filter(|p| p.layer == layer) {
                let comp_idx = pkt.component as usize;
                let res_idx = pkt.resolution as usize;
                if res_idx >= comp_subbands[comp_idx].len() {
                    continue;
                }
                if let Err(e) = read_packet_into(
                    tile_part.data,
                    &mut offset,
                    &mut comp_subbands[comp_idx][res_idx],
                    layer,
                    main.cod.sop_present,
                    main.cod.eph_present,
                ) {
                    if config.tolerate_truncation {
                        warnings.push(crate::error::DecodeWarning::TileReplacedWithZero {
                            tile_index: tile_part.tile_index as u32,
                        });
                        tile_truncated = true;
                        break 'layers;
                    }
                    return Err(e);
                }
            }
        }

        if tile_truncated {
            // The tile's samples stay at their zero-initialised default;
            // nothing in `comp_subbands` is trustworthy past the point of
            // truncation.
            log::warn!("tile {} truncated, replaced with zeros", tile_part.tile_index);
            handled_tiles.insert(tile_part.tile_index as u32);
            continue;
        }

        let mut planes: Vec<Vec<i32>> = Vec::with_capacity(num_components);
        for (i, sub_states) in comp_subbands.iter().enumerate() {
            let (cw, ch, levels) = comp_dims[i];
            let depth = components[i].bit_depth;
            let plane = reconstruct_component(sub_states, cw, ch, levels, reversible, depth, main.cod.code_block_style);
            planes.push(plane);
        }

        if main.cod.multi_component_transform && num_components >= 3 {
            let mut f0: Vec<f32> = planes[0].iter().map(|&v| v as f32).collect();
            let mut f1: Vec<f32> = planes[1].iter().map(|&v| v as f32).collect();
            let mut f2: Vec<f32> = planes[2].iter().map(|&v| v as f32).collect();
            color::inverse(reversible, &mut f0, &mut f1, &mut f2);
            planes[0] = f0.iter().map(|&v| v.round() as i32).collect();
            planes[1] = f1.iter().map(|&v| v.round() as i32).collect();
            planes[2] = f2.iter().map(|&v| v.round() as i32).collect();
        }

        for (i, plane) in planes.into_iter().enumerate() {
            let component = &mut components[i];
            let sub_x = component.sub_x.max(1) as u32;
            let sub_y = component.sub_y.max(1) as u32;
            let cx = geom.x / sub_x;
            let cy = geom.y / sub_y;
            let (cw, ch, _) = comp_dims[i];
            let shift = if component.signed { 0i32 } else { 1i32 << (component.bit_depth - 1) };
            let max_val = (1i64 << component.bit_depth) - 1;

            for row in 0..ch {
                for col in 0..cw {
                    let v = plane[(row * cw + col) as usize] + shift;
                    let clipped = if component.signed {
                        v
                    } else {
                        v.clamp(0, max_val as i32)
                    };
                    let dst_x = cx + col;
                    let dst_y = cy + row;
                    if dst_x < component.width && dst_y < component.height {
                        let dst = (dst_y * component.width + dst_x) as usize;
                        component.samples[dst] = clipped;
                    }
                }
            }
        }

        handled_tiles.insert(tile_part.tile_index as u32);
        log::debug!("decoded tile {}", tile_part.tile_index);
    }

    if config.tolerate_truncation {
        for tile in &tiles {
            if !handled_tiles.contains(&tile.index) {
                warnings.push(crate::error::DecodeWarning::TileReplacedWithZero { tile_index: tile.index });
            }
        }
    }

    let image = Image {
        width: main.siz.width,
        height: main.siz.height,
        x_offset: main.siz.x_offset,
        y_offset: main.siz.y_offset,
        components,
    };

    Ok(DecodedImage { image, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::jpeg2000::encoder;

    fn gradient_image(width: u32, height: u32) -> Image {
        let mut samples = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                samples.push(((x * 5 + y * 11) % 256) as i32);
            }
        }
        Image {
            width,
            height,
            x_offset: 0,
            y_offset: 0,
            components: vec![Component {
                bit_depth: 8,
                signed: false,
                sub_x: 1,
                sub_y: 1,
                width,
                height,
                samples,
            }],
        }
    }

    #[test]
    fn lossless_roundtrip_is_exact() {
        let image = gradient_image(32, 32);
        let mut config = Configuration::lossless(2);
        config.code_block_size = crate::config::CodeBlockSize { width: 16, height: 16 };
        let bytes = encoder::encode(&image, &config).unwrap();

        let decoded = decode(&bytes, &DecodeConfiguration::default()).unwrap();
        assert_eq!(decoded.image.width, 32);
        assert_eq!(decoded.image.height, 32);
        assert_eq!(decoded.image.components[0].samples, image.components[0].samples);
    }

    #[test]
    fn lossy_roundtrip_decodes_without_error() {
        let image = gradient_image(32, 32);
        let mut config = Configuration::lossy(2, 2.0);
        config.code_block_size = crate::config::CodeBlockSize { width: 16, height: 16 };
        let bytes = encoder::encode(&image, &config).unwrap();

        let decoded = decode(&bytes, &DecodeConfiguration::default()).unwrap();
        assert_eq!(decoded.image.width, 32);
        assert_eq!(decoded.image.height, 32);
    }
}
