//! Tier-2: packet header syntax (inclusion, zero-bit-plane, pass-count
//! and Lblock-grown length coding) and the five progression-order
//! traversals over (layer, resolution, component, precinct) packets.

use crate::config::ProgressionOrder;
use crate::jpeg2000::bit_io::{BitReader, BitWriter};
use crate::jpeg2000::tag_tree::TagTree;

/// Persistent per-code-block packet-header state, carried across every
/// packet a code block can appear in within one tile-component.
#[derive(Debug, Clone, Copy)]
pub struct CodeBlockPacketState {
    pub included: bool,
    pub lblock: u8,
}

impl Default for CodeBlockPacketState {
    fn default() -> Self {
        Self {
            included: false,
            lblock: 3,
        }
    }
}

/// Per-code-block input to one packet's header, describing what (if
/// anything) is newly included this layer.
#[derive(Debug, Clone, Copy)]
pub struct CodeBlockContribution {
    pub zero_bit_planes: u8,
    pub new_passes: u32,
    pub byte_length: usize,
}

#[derive(Debug, Clone)]
pub struct DecodedCodeBlockHeader {
    pub newly_included: bool,
    pub zero_bit_planes: u8,
    pub new_passes: u32,
    pub byte_length: usize,
}

fn encode_pass_count(writer: &mut BitWriter, passes: u32) {
    match passes {
        1 => writer.write_bits(0b0, 1),
        2 => writer.write_bits(0b10, 2),
        3 => writer.write_bits(0b1100, 4),
        4..=5 => {
            writer.write_bits(0b1101, 4);
            writer.write_bits(passes - 4, 1);
        }
        6..=36 => {
            writer.write_bits(0b1110, 4);
            writer.write_bits(passes - 6, 5);
        }
        37..=164 => {
            writer.write_bits(0b1111, 4);
            writer.write_bits(passes - 37, 7);
        }
        _ => panic!("pass count {passes} exceeds the codeable range"),
    }
}

fn decode_pass_count(reader: &mut BitReader) -> u32 {
    if reader.read_bit().unwrap_or(0) == 0 {
        return 1;
    }
    if reader.read_bit().unwrap_or(0) == 0 {
        return 2;
    }
    if reader.read_bit().unwrap_or(0) == 0 {
        return 3;
    }
    if reader.read_bit().unwrap_or(0) == 0 {
        return 4 + reader.read_bits(1).unwrap_or(0);
    }
    if reader.read_bit().unwrap_or(0) == 0 {
        return 6 + reader.read_bits(5).unwrap_or(0);
    }
    37 + reader.read_bits(7).unwrap_or(0)
}

fn read_lblock_growth(reader: &mut BitReader) -> u8 {
    let mut growth = 0u8;
    while reader.read_bit().unwrap_or(0) == 1 {
        growth += 1;
    }
    growth
}

fn write_lblock_growth(writer: &mut BitWriter, growth: u8) {
    for _ in 0..growth {
        writer.write_bit(1);
    }
    writer.write_bit(0);
}

/// Writes one packet's header. `states` and `contributions` are indexed
/// identically, one entry per code block in this precinct's subbands, in
/// the fixed scan order the caller uses everywhere else (so the same
/// order must be used when reading).
pub fn write_packet_header(
    writer: &mut BitWriter,
    inclusion_tree: &mut TagTree,
    zero_bp_tree: &mut TagTree,
    grid_width: u32,
    states: &mut [CodeBlockPacketState],
    contributions: &[CodeBlockContribution],
    layer: u16,
) {
    let any_included = contributions.iter().any(|c| c.new_passes > 0);
    if !any_included {
        writer.write_bit(0);
        return;
    }
    writer.write_bit(1);

    for (i, state) in states.iter_mut().enumerate() {
        let x = (i as u32) % grid_width.max(1);
        let y = (i as u32) / grid_width.max(1);
        let contribution = contributions[i];
        let included_now = contribution.new_passes > 0;

        if !state.included {
            inclusion_tree.set_value(x, y, if included_now { layer as i32 } else { i32::MAX });
            let (bits, _known) = inclusion_tree.encode(x, y, layer as i32);
            for bit in bits {
                writer.write_bit(bit);
            }
            if !included_now {
                continue;
            }
            state.included = true;

            zero_bp_tree.set_value(x, y, contribution.zero_bit_planes as i32);
            let (bits, _) = zero_bp_tree.encode(x, y, contribution.zero_bit_planes as i32 + 1);
            for bit in bits {
                writer.write_bit(bit);
            }
        } else {
            writer.write_bit(included_now as u32);
            if !included_now {
                continue;
            }
        }

        encode_pass_count(writer, contribution.new_passes);

        let needed_bits = 32 - (contribution.byte_length.max(1) as u32).leading_zeros();
        let mut lblock = state.lblock;
        while (lblock as u32) < needed_bits {
            lblock += 1;
        }
        write_lblock_growth(writer, lblock - state.lblock);
        state.lblock = lblock;
        writer.write_bits(contribution.byte_length as u32, lblock as u32);
    }
}

/// Reads one packet's header, returning one entry per code block in the
/// same fixed scan order `write_packet_header` used.
pub fn read_packet_header(
    reader: &mut BitReader,
    inclusion_tree: &mut TagTree,
    zero_bp_tree: &mut TagTree,
    grid_width: u32,
    grid_height: u32,
    states: &mut [CodeBlockPacketState],
    layer: u16,
) -> Vec<DecodedCodeBlockHeader> {
    let mut out = vec![
        DecodedCodeBlockHeader {
            newly_included: false,
            zero_bit_planes: 0,
            new_passes: 0,
            byte_length: 0,
        };
        states.len()
    ];

    let non_empty = reader.read_bit().unwrap_or(0);
    if non_empty == 0 {
        return out;
    }

    for y in 0..grid_height {
        for x in 0..grid_width {
            let i = (y * grid_width + x) as usize;
            let state = &mut states[i];

            let included_now = if !state.included {
                let mut threshold = layer as i32;
                loop {
                    if let Some(v) =
                        inclusion_tree.decode(x, y, threshold, || reader.read_bit().unwrap_or(0))
                    {
                        break v <= layer as i32;
                    }
                    threshold += 1;
                }
            } else {
                reader.read_bit().unwrap_or(0) == 1
            };

            if !included_now {
                continue;
            }

            if !state.included {
                state.included = true;
                let mut threshold = 0i32;
                let zero_bp = loop {
                    if let Some(v) =
                        zero_bp_tree.decode(x, y, threshold, || reader.read_bit().unwrap_or(0))
                    {
                        break v;
                    }
                    threshold += 1;
                };
                out[i].zero_bit_planes = zero_bp.max(0) as u8;
            }
            out[i].newly_included = true;

            let new_passes = decode_pass_count(reader);
            out[i].new_passes = new_passes;

            let growth = read_lblock_growth(reader);
            state.lblock += growth;
            let length = reader.read_bits(state.lblock as u32).unwrap_or(0);
            out[i].byte_length = length as usize;
        }
    }
    out
}

/// One packet identity: which layer/resolution/component/precinct it
/// carries data for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketId {
    pub layer: u16,
    pub resolution: u8,
    pub component: u16,
    pub precinct: u32,
}

/// Enumerates every packet in the order the configured progression
/// requires. `precincts_per_resolution[r]` is the precinct count for
/// resolution level `r` (may vary with `r` since lower resolutions have
/// coarser precinct grids).
pub fn progression_order(
    order: ProgressionOrder,
    num_layers: u16,
    num_resolutions: u8,
    num_components: u16,
    precincts_per_resolution: &[u32],
) -> Vec<PacketId> {
    let mut out = Vec::new();
    let max_precincts = precincts_per_resolution.iter().copied().max().unwrap_or(1);

    let mut push = |l: u16, r: u8, c: u16, p: u32| {
        if p < precincts_per_resolution.get(r as usize).copied().unwrap_or(0) {
            out.push(PacketId {
                layer: l,
                resolution: r,
                component: c,
                precinct: p,
            });
        }
    };

    match order {
        ProgressionOrder::Lrcp => {
            for l in 0..num_layers {
                for r in 0..num_resolutions {
                    for c in 0..num_components {
                        for p in 0..max_precincts {
                            push(l, r, c, p);
                        }
                    }
                }
            }
        }
        ProgressionOrder::Rlcp => {
            for r in 0..num_resolutions {
                for l in 0..num_layers {
                    for c in 0..num_components {
                        for p in 0..max_precincts {
                            push(l, r, c, p);
                        }
                    }
                }
            }
        }
        ProgressionOrder::Rpcl => {
            for r in 0..num_resolutions {
                for p in 0..max_precincts {
                    for c in 0..num_components {
                        for l in 0..num_layers {
                            push(l, r, c, p);
                        }
                    }
                }
            }
        }
        ProgressionOrder::Pcrl => {
            for p in 0..max_precincts {
                for c in 0..num_components {
                    for r in 0..num_resolutions {
                        for l in 0..num_layers {
                            push(l, r, c, p);
                        }
                    }
                }
            }
        }
        ProgressionOrder::Cprl => {
            for c in 0..num_components {
                for p in 0..max_precincts {
                    for r in 0..num_resolutions {
                        for l in 0..num_layers {
                            push(l, r, c, p);
                        }
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_count_roundtrip() {
        for n in [1u32, 2, 3, 4, 5, 6, 20, 36, 37, 100, 164] {
            let mut w = BitWriter::new();
            encode_pass_count(&mut w, n);
            let bytes = w.finish();
            let mut r = BitReader::new(&bytes);
            assert_eq!(decode_pass_count(&mut r), n);
        }
    }

    #[test]
    fn lblock_growth_roundtrip() {
        for growth in [0u8, 1, 2, 5] {
            let mut w = BitWriter::new();
            write_lblock_growth(&mut w, growth);
            let bytes = w.finish();
            let mut r = BitReader::new(&bytes);
            assert_eq!(read_lblock_growth(&mut r), growth);
        }
    }

    #[test]
    fn empty_packet_roundtrip() {
        let mut states = vec![CodeBlockPacketState::default(); 4];
        let contributions = vec![
            CodeBlockContribution {
                zero_bit_planes: 0,
                new_passes: 0,
                byte_length: 0,
            };
            4
        ];
        let mut inc_tree = TagTree::new(2, 2);
        let mut zbp_tree = TagTree::new(2, 2);
        let mut w = BitWriter::new();
        write_packet_header(&mut w, &mut inc_tree, &mut zbp_tree, 2, &mut states, &contributions, 0);
        let bytes = w.finish();

        let mut dec_states = vec![CodeBlockPacketState::default(); 4];
        let mut dec_inc = TagTree::new(2, 2);
        let mut dec_zbp = TagTree::new(2, 2);
        let mut r = BitReader::new(&bytes);
        let decoded = read_packet_header(&mut r, &mut dec_inc, &mut dec_zbp, 2, 2, &mut dec_states, 0);
        assert!(decoded.iter().all(|h| !h.newly_included));
    }

    #[test]
    fn single_inclusion_packet_roundtrip() {
        let mut states = vec![CodeBlockPacketState::default(); 4];
        let mut contributions = vec![
            CodeBlockContribution {
                zero_bit_planes: 0,
                new_passes: 0,
                byte_length: 0,
            };
            4
        ];
        contributions[2] = CodeBlockContribution {
            zero_bit_planes: 3,
            new_passes: 7,
            byte_length: 200,
        };

        let mut inc_tree = TagTree::new(2, 2);
        let mut zbp_tree = TagTree::new(2, 2);
        let mut w = BitWriter::new();
        write_packet_header(&mut w, &mut inc_tree, &mut zbp_tree, 2, &mut states, &contributions, 0);
        let bytes = w.finish();

        let mut dec_states = vec![CodeBlockPacketState::default(); 4];
        let mut dec_inc = TagTree::new(2, 2);
        let mut dec_zbp = TagTree::new(2, 2);
        let mut r = BitReader::new(&bytes);
        let decoded = read_packet_header(&mut r, &mut dec_inc, &mut dec_zbp, 2, 2, &mut dec_states, 0);

        assert!(decoded[2].newly_included);
        assert_eq!(decoded[2].zero_bit_planes, 3);
        assert_eq!(decoded[2].new_passes, 7);
        assert_eq!(decoded[2].byte_length, 200);
        assert!(!decoded[0].newly_included);
    }

    #[test]
    fn lrcp_packet_count_matches_product() {
        let packets = progression_order(ProgressionOrder::Lrcp, 2, 3, 2, &[1, 1, 1]);
        assert_eq!(packets.len(), 2 * 3 * 2 * 1);
    }

    #[test]
    fn all_five_orders_enumerate_same_set() {
        let precincts = [2, 2, 2];
        let mut sets = Vec::new();
        for order in [
            ProgressionOrder::Lrcp,
            ProgressionOrder::Rlcp,
            ProgressionOrder::Rpcl,
            ProgressionOrder::Pcrl,
            ProgressionOrder::Cprl,
        ] {
            let mut packets = progression_order(order, 2, 3, 2, &precincts);
            packets.sort_by_key(|p| (p.layer, p.resolution, p.component, p.precinct));
            sets.push(packets);
        }
        for w in sets.windows(2) {
            assert_eq!(w[0], w[1]);
        }
    }
}
