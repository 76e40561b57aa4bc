//! Top-level encode pipeline: tiling, colour transform, forward DWT,
//! quantisation, code-block partitioning, tier-1 coding, PCRD-opt layer
//! selection and tier-2 packet/marker assembly.

use rayon::prelude::*;

use crate::config::{CodeBlockStyle, CompressionMode, Configuration, RateControlMode};
use crate::error::{Jpeg2000Error, Jpeg2000Result};
use crate::jpeg2000::bit_io::BitWriter;
use crate::jpeg2000::color;
use crate::jpeg2000::dwt::{clamp_levels, Dwt53, Dwt97};
use crate::jpeg2000::image::{
    codeblock_grid_dims, subband_gain_bits, CodeBlock, Image, Precinct, Resolution, Subband,
    SubbandOrientation, Tile, TileComponent,
};
use crate::jpeg2000::packet::{self, CodeBlockContribution, CodeBlockPacketState};
use crate::jpeg2000::quantization;
use crate::jpeg2000::rate_control;
use crate::jpeg2000::tag_tree::TagTree;
use crate::jpeg2000::tier1;
use crate::jpeg2000::writer::J2kWriter;

/// Guard bits used for every QCD entry this encoder emits (SPcod/SPcoc
/// leaves the exact value to the encoder; 2 is the conventional default).
const GUARD_BITS: u8 = 2;

struct TileGeometry {
    index: u32,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

fn tile_grid(image: &Image, config: &Configuration) -> Vec<TileGeometry> {
    let tw = config.tile_size.width.min(image.width).max(1);
    let th = config.tile_size.height.min(image.height).max(1);
    let cols = image.width.div_ceil(tw);
    let rows = image.height.div_ceil(th);
    let mut out = Vec::with_capacity((cols * rows) as usize);
    for row in 0..rows {
        for col in 0..cols {
            let x = col * tw;
            let y = row * th;
            out.push(TileGeometry {
                index: row * cols + col,
                x,
                y,
                width: tw.min(image.width - x),
                height: th.min(image.height - y),
            });
        }
    }
    out
}

fn build_subband(
    orientation: SubbandOrientation,
    width: u32,
    height: u32,
    data: Vec<f32>,
    depth: u8,
    reversible: bool,
) -> Subband {
    let range_bits = depth + subband_gain_bits(orientation);
    let (exponent, mantissa) = if reversible {
        (range_bits, 0)
    } else {
        quantization::exponent_mantissa_for_step(range_bits, 1.0)
    };
    Subband {
        orientation,
        width,
        height,
        coefficients: data,
        exponent,
        mantissa,
    }
}

struct LevelBands {
    orig_w: u32,
    orig_h: u32,
    hl: Vec<f32>,
    hl_w: u32,
    hl_h: u32,
    lh: Vec<f32>,
    lh_w: u32,
    lh_h: u32,
    hh: Vec<f32>,
    hh_w: u32,
    hh_h: u32,
}

/// Recursively decomposes one tile-component plane and arranges the
/// resulting bands into resolution levels (0 = coarsest LL-only level).
fn decompose_component(
    samples: &[i32],
    width: u32,
    height: u32,
    levels: u8,
    reversible: bool,
    depth: u8,
) -> Vec<Resolution> {
    let mut levels_data: Vec<LevelBands> = Vec::with_capacity(levels as usize);

    let mut ll_i32 = samples.to_vec();
    let mut ll_f32: Vec<f32> = if reversible {
        Vec::new()
    } else {
        samples.iter().map(|&v| v as f32).collect()
    };
    let (mut cur_w, mut cur_h) = (width, height);

    for _ in 0..levels {
        if reversible {
            let bands = Dwt53::forward_2d(&ll_i32, cur_w as usize, cur_h as usize);
            levels_data.push(LevelBands {
                orig_w: cur_w,
                orig_h: cur_h,
                hl: bands.hl.iter().map(|&v| v as f32).collect(),
                hl_w: bands.hl_w as u32,
                hl_h: bands.hl_h as u32,
                lh: bands.lh.iter().map(|&v| v as f32).collect(),
                lh_w: bands.lh_w as u32,
                lh_h: bands.lh_h as u32,
                hh: bands.hh.iter().map(|&v| v as f32).collect(),
                hh_w: bands.hh_w as u32,
                hh_h: bands.hh_h as u32,
            });
            cur_w = bands.ll_w as u32;
            cur_h = bands.ll_h as u32;
            ll_i32 = bands.ll;
        } else {
            let bands = Dwt97::forward_2d(&ll_f32, cur_w as usize, cur_h as usize);
            levels_data.push(LevelBands {
                orig_w: cur_w,
                orig_h: cur_h,
                hl: bands.hl,
                hl_w: bands.hl_w as u32,
                hl_h: bands.hl_h as u32,
                lh: bands.lh,
                lh_w: bands.lh_w as u32,
                lh_h: bands.lh_h as u32,
                hh: bands.hh,
                hh_w: bands.hh_w as u32,
                hh_h: bands.hh_h as u32,
            });
            cur_w = bands.ll_w as u32;
            cur_h = bands.ll_h as u32;
            ll_f32 = bands.ll;
        }
    }

    let final_ll: Vec<f32> = if reversible {
        ll_i32.iter().map(|&v| v as f32).collect()
    } else {
        ll_f32
    };

    let mut resolutions = Vec::with_capacity(levels as usize + 1);
    resolutions.push(Resolution {
        level: 0,
        width: cur_w,
        height: cur_h,
        subbands: vec![build_subband(SubbandOrientation::Ll, cur_w, cur_h, final_ll, depth, reversible)],
        precincts: Vec::new(),
    });

    for (i, lb) in levels_data.into_iter().rev().enumerate() {
        resolutions.push(Resolution {
            level: (i + 1) as u8,
            width: lb.orig_w,
            height: lb.orig_h,
            subbands: vec![
                build_subband(SubbandOrientation::Hl, lb.hl_w, lb.hl_h, lb.hl, depth, reversible),
                build_subband(SubbandOrientation::Lh, lb.lh_w, lb.lh_h, lb.lh, depth, reversible),
                build_subband(SubbandOrientation::Hh, lb.hh_w, lb.hh_h, lb.hh, depth, reversible),
            ],
            precincts: Vec::new(),
        });
    }
    resolutions
}

fn quantize_subband(subband: &Subband, depth: u8, reversible: bool) -> Vec<i32> {
    if reversible {
        subband
            .coefficients
            .iter()
            .map(|&v| quantization::quantize_reversible(v.round() as i32))
            .collect()
    } else {
        let range_bits = depth + subband_gain_bits(subband.orientation);
        let step = quantization::step_size(range_bits, subband.exponent, subband.mantissa);
        subband.coefficients.iter().map(|&v| quantization::quantize_scalar(v, step)).collect()
    }
}

fn build_codeblocks(
    subband: &Subband,
    quantized: &[i32],
    cb_w: u32,
    cb_h: u32,
    style: CodeBlockStyle,
) -> Vec<CodeBlock> {
    if subband.width == 0 || subband.height == 0 {
        return Vec::new();
    }

    let mut origins = Vec::new();
    let mut y = 0u32;
    while y < subband.height {
        let mut x = 0u32;
        while x < subband.width {
            origins.push((x, y));
            x += cb_w;
        }
        y += cb_h;
    }

    origins
        .par_iter()
        .map(|&(x, y)| {
            let w = cb_w.min(subband.width - x);
            let h = cb_h.min(subband.height - y);
            let mut cb = CodeBlock::new(x, y, w, h);
            for row in 0..h {
                for col in 0..w {
                    let src = ((y + row) * subband.width + (x + col)) as usize;
                    cb.coefficients[(row * w + col) as usize] = quantized[src];
                }
            }
            let coding = tier1::encode_codeblock(&cb.coefficients, w, h, subband.orientation, style);
            cb.zero_bit_planes = quantization::MAX_BIT_PLANES.saturating_sub(coding.num_bit_planes);
            cb.num_bit_planes = coding.num_bit_planes;
            cb.passes = coding.passes;
            cb.coded_bytes = coding.coded_bytes;
            cb
        })
        .collect()
}

fn build_tile_component(
    component_index: u32,
    samples: Vec<i32>,
    width: u32,
    height: u32,
    config: &Configuration,
    depth: u8,
) -> TileComponent {
    let levels = clamp_levels(width, height, config.decomposition_levels);
    let reversible = config.compression_mode == CompressionMode::Lossless;
    let mut resolutions = decompose_component(&samples, width, height, levels, reversible, depth);

    for resolution in &mut resolutions {
        let mut precinct = Precinct {
            index: 0,
            code_blocks: Vec::with_capacity(resolution.subbands.len()),
        };
        for subband in &resolution.subbands {
            let quantized = quantize_subband(subband, depth, reversible);
            let blocks = build_codeblocks(
                subband,
                &quantized,
                config.code_block_size.width,
                config.code_block_size.height,
                config.code_block_style,
            );
            precinct.code_blocks.push(blocks);
        }
        resolution.precincts.push(precinct);
    }

    TileComponent {
        component_index,
        width,
        height,
        samples: Vec::new(),
        resolutions,
    }
}

fn build_tile(image: &Image, geom: &TileGeometry, config: &Configuration) -> Tile {
    let reversible = config.compression_mode == CompressionMode::Lossless;
    let num_components = image.components.len();
    let mut planes: Vec<Vec<i32>> = Vec::with_capacity(num_components);
    let mut dims = Vec::with_capacity(num_components);

    for component in &image.components {
        let sub_x = component.sub_x.max(1) as u32;
        let sub_y = component.sub_y.max(1) as u32;
        let cx = (geom.x / sub_x).min(component.width.saturating_sub(1));
        let cy = (geom.y / sub_y).min(component.height.saturating_sub(1));
        let cw = (geom.width / sub_x).max(1).min(component.width - cx);
        let ch = (geom.height / sub_y).max(1).min(component.height - cy);

        let mut plane = vec![0i32; (cw * ch) as usize];
        let shift = if component.signed { 0i32 } else { 1i32 << (component.bit_depth - 1) };
        for row in 0..ch {
            for col in 0..cw {
                plane[(row * cw + col) as usize] = component.sample(cx + col, cy + row) - shift;
            }
        }
        planes.push(plane);
        dims.push((component.bit_depth, cw, ch));
    }

    if config.multi_component_transform && num_components >= 3 {
        let mut f0: Vec<f32> = planes[0].iter().map(|&v| v as f32).collect();
        let mut f1: Vec<f32> = planes[1].iter().map(|&v| v as f32).collect();
        let mut f2: Vec<f32> = planes[2].iter().map(|&v| v as f32).collect();
        color::forward(reversible, &mut f0, &mut f1, &mut f2);
        planes[0] = f0.iter().map(|&v| v.round() as i32).collect();
        planes[1] = f1.iter().map(|&v| v.round() as i32).collect();
        planes[2] = f2.iter().map(|&v| v.round() as i32).collect();
    }

    let components: Vec<TileComponent> = planes
        .into_par_iter()
        .enumerate()
        .map(|(i, plane)| {
            let (depth, cw, ch) = dims[i];
            build_tile_component(i as u32, plane, cw, ch, config, depth)
        })
        .collect();

    Tile {
        index: geom.index,
        x: geom.x,
        y: geom.y,
        width: geom.width,
        height: geom.height,
        components,
    }
}

fn qcd_orientation(index: usize) -> SubbandOrientation {
    if index == 0 {
        SubbandOrientation::Ll
    } else {
        match (index - 1) % 3 {
            0 => SubbandOrientation::Hl,
            1 => SubbandOrientation::Lh,
            _ => SubbandOrientation::Hh,
        }
    }
}

fn compute_layer_budgets(config: &Configuration, total_pixels: usize) -> Vec<usize> {
    let layers = config.layer_count.max(1) as usize;
    if !config.layer_rates.is_empty() {
        return config
            .layer_rates
            .iter()
            .map(|&bpp| ((bpp as f64) * total_pixels as f64 / 8.0) as usize)
            .collect();
    }
    match config.rate_control_mode {
        RateControlMode::TargetBitrate(bpp) => {
            let total_budget = ((bpp as f64) * total_pixels as f64 / 8.0) as usize;
            (1..=layers).map(|i| total_budget * i / layers).collect()
        }
        RateControlMode::ConstantQuality(_) | RateControlMode::VisuallyLossless => {
            vec![usize::MAX; layers]
        }
    }
}

/// Per-subband, per-tile-component persistent packet-header state:
/// inclusion/zero-bit-plane tag trees plus each code block's already
/// transmitted byte/pass counts, carried across quality layers.
struct SubbandPacketState {
    cols: u32,
    inclusion_tree: TagTree,
    zero_bp_tree: TagTree,
    block_states: Vec<CodeBlockPacketState>,
    included_bytes: Vec<usize>,
    included_passes: Vec<usize>,
}

fn flatten_index_map(tc: &TileComponent) -> Vec<(usize, usize, usize)> {
    let mut out = Vec::new();
    for (r, resolution) in tc.resolutions.iter().enumerate() {
        for precinct in &resolution.precincts {
            for (s, blocks) in precinct.code_blocks.iter().enumerate() {
                for b in 0..blocks.len() {
                    out.push((r, s, b));
                }
            }
        }
    }
    out
}

fn encode_tile(writer: &mut J2kWriter, tile: &Tile, config: &Configuration) -> Jpeg2000Result<()> {
    let num_resolutions = tile.components.first().map(|c| c.resolutions.len()).unwrap_or(0) as u8;
    let total_pixels = (tile.width as usize) * (tile.height as usize);
    let layer_budgets = compute_layer_budgets(config, total_pixels);
    let num_layers = layer_budgets.len() as u16;

    let mut comp_states: Vec<Vec<Vec<SubbandPacketState>>> = Vec::with_capacity(tile.components.len());
    for tc in &tile.components {
        let mut res_states = Vec::with_capacity(tc.resolutions.len());
        for resolution in &tc.resolutions {
            let mut sub_states = Vec::with_capacity(resolution.subbands.len());
            for subband in &resolution.subbands {
                let (cols, rows) = codeblock_grid_dims(
                    subband.width,
                    subband.height,
                    config.code_block_size.width,
                    config.code_block_size.height,
                );
                let block_count = (cols * rows) as usize;
                sub_states.push(SubbandPacketState {
                    cols: cols.max(1),
                    inclusion_tree: TagTree::new(cols.max(1), rows.max(1)),
                    zero_bp_tree: TagTree::new(cols.max(1), rows.max(1)),
                    block_states: vec![CodeBlockPacketState::default(); block_count],
                    included_bytes: vec![0; block_count],
                    included_passes: vec![0; block_count],
                });
            }
            res_states.push(sub_states);
        }
        comp_states.push(res_states);
    }

    let flat_maps: Vec<Vec<(usize, usize, usize)>> = tile.components.iter().map(flatten_index_map).collect();

    let sot_pos = writer.len();
    writer.write_sot(tile.index as u16, 0, 0, 1);
    writer.write_sod();

    let precincts_per_resolution = vec![1u32; num_resolutions as usize];

    // Enumerated once with the true layer count: `progression_order`
    // drives its own `0..num_layers` loop internally for every ordering,
    // so calling it per layer with `num_layers = 1` would collapse every
    // packet's layer field to 0 instead of the layer actually being
    // assembled.
    let all_packets = packet::progression_order(
        config.progression_order,
        num_layers,
        num_resolutions,
        tile.components.len() as u16,
        &precincts_per_resolution,
    );

    let mut packet_counter: u16 = 0;
    for (layer, &budget) in layer_budgets.iter().enumerate() {
        let layer_inclusions: Vec<Vec<Option<rate_control::Inclusion>>> = tile
            .components
            .iter()
            .map(|tc| rate_control::plan_layer(&tc.resolutions, budget))
            .collect();

        let packets = all_packets.iter().filter(|p| p.layer as usize == layer);

        for pkt in packets {
            if config.emit_sop {
                writer.write_sop(packet_counter);
            }
            packet_counter = packet_counter.wrapping_add(1);
            let comp_idx = pkt.component as usize;
            let res_idx = pkt.resolution as usize;
            let resolution = &tile.components[comp_idx].resolutions[res_idx];
            let precinct = &resolution.precincts[0];
            let flat_map = &flat_maps[comp_idx];
            let inclusions = &layer_inclusions[comp_idx];

            let mut header_writer = BitWriter::new();
            let mut body = Vec::new();

            for (s, blocks) in precinct.code_blocks.iter().enumerate() {
                if blocks.is_empty() {
                    continue;
                }
                let sub_state = &mut comp_states[comp_idx][res_idx][s];
                let mut contributions = Vec::with_capacity(blocks.len());
                for (b, _block) in blocks.iter().enumerate() {
                    let flat_idx = flat_map
                        .iter()
                        .position(|&(r, ss, bb)| r == res_idx && ss == s && bb == b)
                        .expect("every code block is present in its component's flat index map");
                    let inclusion = inclusions[flat_idx];
                    let prior_passes = sub_state.included_passes[b];
                    let (new_passes, byte_length) = match inclusion {
                        Some(inc) if inc.pass_index + 1 > prior_passes => {
                            ((inc.pass_index + 1 - prior_passes) as u32, inc.rate - sub_state.included_bytes[b])
                        }
                        _ => (0u32, 0usize),
                    };
                    contributions.push(CodeBlockContribution {
                        zero_bit_planes: blocks[b].zero_bit_planes,
                        new_passes,
                        byte_length,
                    });
                }

                packet::write_packet_header(
                    &mut header_writer,
                    &mut sub_state.inclusion_tree,
                    &mut sub_state.zero_bp_tree,
                    sub_state.cols,
                    &mut sub_state.block_states,
                    &contributions,
                    layer as u16,
                );

                for (b, block) in blocks.iter().enumerate() {
                    let contribution = &contributions[b];
                    if contribution.new_passes > 0 {
                        let start = sub_state.included_bytes[b];
                        let end = start + contribution.byte_length;
                        body.extend_from_slice(&block.coded_bytes[start..end]);
                        sub_state.included_bytes[b] = end;
                        sub_state.included_passes[b] += contribution.new_passes as usize;
                    }
                }
            }

            writer.write_bytes(&header_writer.finish());
            if config.emit_eph {
                writer.write_eph();
            }
            writer.write_bytes(&body);
        }
    }

    let tile_len = (writer.len() - sot_pos) as u32;
    writer.patch_u32(sot_pos + 6, tile_len);
    Ok(())
}

/// Encodes a caller-supplied image into a complete JPEG 2000 codestream.
pub fn encode(image: &Image, config: &Configuration) -> Jpeg2000Result<Vec<u8>> {
    config.validate()?;
    if image.components.is_empty() {
        return Err(Jpeg2000Error::InvalidParameter("image must have at least one component".into()));
    }

    let reversible = config.compression_mode == CompressionMode::Lossless;
    let tiles_geom = tile_grid(image, config);

    let mut writer = J2kWriter::new();
    writer.write_soc();
    writer.write_siz(
        image.width,
        image.height,
        image.x_offset,
        image.y_offset,
        config.tile_size.width.min(image.width).max(1),
        config.tile_size.height.min(image.height).max(1),
        &image
            .components
            .iter()
            .map(|c| (c.bit_depth, c.signed, c.sub_x, c.sub_y))
            .collect::<Vec<_>>(),
    );
    writer.write_cod(config, reversible);

    let depth = image.components[0].bit_depth;
    let num_qcd_subbands = 1 + 3 * config.decomposition_levels as usize;
    let step_sizes: Vec<(u8, u16)> = (0..num_qcd_subbands)
        .map(|i| {
            let orientation = qcd_orientation(i);
            let range_bits = depth + subband_gain_bits(orientation);
            if reversible {
                (range_bits, 0)
            } else {
                quantization::exponent_mantissa_for_step(range_bits, 1.0)
            }
        })
        .collect();
    writer.write_qcd(GUARD_BITS, &step_sizes, reversible);

    log::debug!(
        "encoding {}x{} image, {} tile(s), {:?}",
        image.width,
        image.height,
        tiles_geom.len(),
        config.compression_mode
    );

    let tiles: Vec<Tile> = tiles_geom.par_iter().map(|g| build_tile(image, g, config)).collect();

    for tile in &tiles {
        encode_tile(&mut writer, tile, config)?;
    }

    writer.write_eoc();
    Ok(writer.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::jpeg2000::image::Component;

    fn gradient_image(width: u32, height: u32) -> Image {
        let mut samples = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                samples.push(((x * 7 + y * 3) % 256) as i32);
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
    fn encode_produces_soc_and_eoc() {
        let image = gradient_image(32, 32);
        let mut config = Configuration::lossless(2);
        config.code_block_size = crate::config::CodeBlockSize { width: 16, height: 16 };
        let bytes = encode(&image, &config).unwrap();
        assert_eq!(&bytes[0..2], &[0xFF, 0x4F]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn rejects_empty_image() {
        let image = Image {
            width: 4,
            height: 4,
            x_offset: 0,
            y_offset: 0,
            components: Vec::new(),
        };
        let config = Configuration::lossless(1);
        assert!(encode(&image, &config).is_err());
    }

    #[test]
    fn lossy_config_produces_shorter_or_equal_output() {
        let image = gradient_image(32, 32);
        let mut lossless = Configuration::lossless(2);
        lossless.code_block_size = crate::config::CodeBlockSize { width: 16, height: 16 };
        let mut lossy = Configuration::lossy(2, 1.0);
        lossy.code_block_size = crate::config::CodeBlockSize { width: 16, height: 16 };

        let lossless_bytes = encode(&image, &lossless).unwrap();
        let lossy_bytes = encode(&image, &lossy).unwrap();
        assert!(lossy_bytes.len() <= lossless_bytes.len() + 64);
    }
}
