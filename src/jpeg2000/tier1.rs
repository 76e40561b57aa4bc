//! EBCOT tier-1: per-code-block bit-plane context modelling over the MQ
//! arithmetic coder. Three coding passes per bit plane (significance
//! propagation, magnitude refinement, cleanup), MSB to LSB, each
//! producing a byte-length truncation point the rate controller can cut
//! at without re-coding.

use crate::config::CodeBlockStyle;
use crate::jpeg2000::image::SubbandOrientation;
use crate::jpeg2000::mq_coder::{MqDecoder, MqEncoder, MqTermination, CX_RUN, CX_UNIFORM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassType {
    SignificancePropagation,
    MagnitudeRefinement,
    Cleanup,
}

#[derive(Debug, Clone, Copy)]
pub struct PassRecord {
    pub pass_type: PassType,
    pub bit_plane: u8,
    /// Cumulative coded byte length through the end of this pass.
    pub cumulative_bytes: usize,
}

pub struct CodeBlockCoding {
    pub coded_bytes: Vec<u8>,
    pub passes: Vec<PassRecord>,
    pub num_bit_planes: u8,
}

const SIG: u8 = 1 << 0;
const VISITED: u8 = 1 << 1;
const REFINED: u8 = 1 << 2;
const SIGN_NEG: u8 = 1 << 3;

struct Grid {
    width: i32,
    height: i32,
    state: Vec<u8>,
}

impl Grid {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as i32,
            height: height as i32,
            state: vec![0u8; (width * height) as usize],
        }
    }

    fn idx(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            None
        } else {
            Some((y * self.width + x) as usize)
        }
    }

    fn is_significant(&self, x: i32, y: i32) -> bool {
        self.idx(x, y).map(|i| self.state[i] & SIG != 0).unwrap_or(false)
    }

    fn is_negative(&self, x: i32, y: i32) -> bool {
        self.idx(x, y).map(|i| self.state[i] & SIGN_NEG != 0).unwrap_or(false)
    }

    fn neighbor_counts(&self, x: i32, y: i32) -> (u8, u8, u8) {
        let h = self.is_significant(x - 1, y) as u8 + self.is_significant(x + 1, y) as u8;
        let v = self.is_significant(x, y - 1) as u8 + self.is_significant(x, y + 1) as u8;
        let d = self.is_significant(x - 1, y - 1) as u8
            + self.is_significant(x + 1, y - 1) as u8
            + self.is_significant(x - 1, y + 1) as u8
            + self.is_significant(x + 1, y + 1) as u8;
        (h, v, d)
    }

    /// Zero-coding context label 0..=8, varying by orientation group.
    fn zc_context(&self, group: usize, h: u8, v: u8, d: u8) -> usize {
        match group {
            0 => match (h, v, d) {
                (2, ..) => 8,
                (1, v, _) if v >= 1 => 7,
                (1, 0, d) if d >= 1 => 6,
                (1, 0, 0) => 5,
                (0, 2, _) => 4,
                (0, 1, _) => 3,
                (0, 0, d) if d >= 2 => 2,
                (0, 0, 1) => 1,
                _ => 0,
            },
            1 => self.zc_context(0, v, h, d),
            _ => match (h, v, d) {
                (_, _, d) if d >= 3 => 8,
                (h, v, d) if h + v >= 1 && d >= 2 => 7,
                (0, 0, d) if d >= 2 => 6,
                (h, v, 1) if h + v >= 1 => 5,
                (0, 0, 1) => 4,
                (h, v, 0) if h + v >= 2 => 3,
                (1, _, 0) | (_, 1, 0) => 2,
                _ => 0,
            },
        }
    }

    /// Sign-coding context label 0..=4 plus the xor-flip bit (Table D.2).
    fn sign_context(&self, x: i32, y: i32) -> (usize, u8) {
        let contribution = |sig: bool, neg: bool| -> i32 {
            if !sig {
                0
            } else if neg {
                -1
            } else {
                1
            }
        };
        let h = contribution(self.is_significant(x - 1, y), self.is_negative(x - 1, y))
            + contribution(self.is_significant(x + 1, y), self.is_negative(x + 1, y));
        let v = contribution(self.is_significant(x, y - 1), self.is_negative(x, y - 1))
            + contribution(self.is_significant(x, y + 1), self.is_negative(x, y + 1));
        let h = h.clamp(-1, 1);
        let v = v.clamp(-1, 1);
        match (h, v) {
            (1, 1) => (4, 0),
            (1, 0) => (3, 0),
            (1, -1) => (2, 0),
            (0, 1) => (1, 0),
            (0, 0) => (0, 0),
            (0, -1) => (1, 1),
            (-1, 1) => (2, 1),
            (-1, 0) => (3, 1),
            (-1, -1) => (4, 1),
            _ => unreachable!(),
        }
    }

    fn mr_context(&self, x: i32, y: i32, first_refinement: bool) -> usize {
        if !first_refinement {
            return 16;
        }
        let (h, v, d) = self.neighbor_counts(x, y);
        if h + v + d > 0 {
            15
        } else {
            14
        }
    }
}

fn bit_plane_count(coefficients: &[i32]) -> u8 {
    let max_abs = coefficients.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);
    if max_abs == 0 {
        0
    } else {
        32 - max_abs.leading_zeros() as u8
    }
}

pub fn encode_codeblock(
    coefficients: &[i32],
    width: u32,
    height: u32,
    orientation: SubbandOrientation,
    style: CodeBlockStyle,
) -> CodeBlockCoding {
    let num_bit_planes = bit_plane_count(coefficients);
    let mut passes = Vec::new();
    if num_bit_planes == 0 {
        return CodeBlockCoding {
            coded_bytes: Vec::new(),
            passes,
            num_bit_planes: 0,
        };
    }

    let group = orientation.zc_group();
    let mut grid = Grid::new(width, height);
    let mut encoder = MqEncoder::new();
    let width_i = width as i32;
    let height_i = height as i32;
    let reset_context = style.contains(CodeBlockStyle::RESET_CONTEXT);
    let mut first_pass = true;
    let mut reset_before_pass = |encoder: &mut MqEncoder, first_pass: &mut bool| {
        if reset_context && !*first_pass {
            encoder.reset_contexts();
        }
        *first_pass = false;
    };

    for plane in (0..num_bit_planes).rev() {
        for i in 0..grid.state.len() {
            grid.state[i] &= !VISITED;
        }

        reset_before_pass(&mut encoder, &mut first_pass);
        // Significance propagation: insignificant samples with at least
        // one significant neighbour.
        for y in 0..height_i {
            for x in 0..width_i {
                let idx = (y * width_i + x) as usize;
                if grid.state[idx] & SIG != 0 {
                    continue;
                }
                let (h, v, d) = grid.neighbor_counts(x, y);
                if h + v + d == 0 {
                    continue;
                }
                let cx = grid.zc_context(group, h, v, d);
                let coeff = coefficients[idx];
                let bit = ((coeff.unsigned_abs() >> plane) & 1) as u8;
                encoder.encode(bit, cx);
                grid.state[idx] |= VISITED;
                if bit == 1 {
                    let (sign_cx, xor) = grid.sign_context(x, y);
                    let sign_bit = if coeff < 0 { 1 } else { 0 };
                    encoder.encode(sign_bit ^ xor, 9 + sign_cx);
                    grid.state[idx] |= SIG;
                    if coeff < 0 {
                        grid.state[idx] |= SIGN_NEG;
                    }
                }
            }
        }
        passes.push(PassRecord {
            pass_type: PassType::SignificancePropagation,
            bit_plane: plane,
            cumulative_bytes: encoder.output_len(),
        });

        reset_before_pass(&mut encoder, &mut first_pass);
        // Magnitude refinement: already-significant samples not touched
        // this plane by significance propagation.
        for y in 0..height_i {
            for x in 0..width_i {
                let idx = (y * width_i + x) as usize;
                if grid.state[idx] & SIG == 0 || grid.state[idx] & VISITED != 0 {
                    continue;
                }
                let first_refinement = grid.state[idx] & REFINED == 0;
                let cx = grid.mr_context(x, y, first_refinement);
                let coeff = coefficients[idx];
                let bit = ((coeff.unsigned_abs() >> plane) & 1) as u8;
                encoder.encode(bit, cx);
                grid.state[idx] |= VISITED | REFINED;
            }
        }
        passes.push(PassRecord {
            pass_type: PassType::MagnitudeRefinement,
            bit_plane: plane,
            cumulative_bytes: encoder.output_len(),
        });

        reset_before_pass(&mut encoder, &mut first_pass);
        // Cleanup: everything not yet visited this plane, with
        // run-length coding over vertical stripes of 4.
        let mut y = 0i32;
        while y < height_i {
            let stripe_h = (height_i - y).min(4);
            let mut x = 0i32;
            while x < width_i {
                let all_candidates = (0..stripe_h).all(|dy| {
                    let idx = ((y + dy) * width_i + x) as usize;
                    grid.state[idx] & VISITED == 0
                });
                let all_no_context = (0..stripe_h).all(|dy| {
                    let (h, v, d) = grid.neighbor_counts(x, y + dy);
                    h + v + d == 0
                });

                let mut start_row = 0i32;
                if stripe_h == 4 && all_candidates && all_no_context {
                    let run_nonzero = (0..4).any(|dy| {
                        let idx = ((y + dy) * width_i + x) as usize;
                        (coefficients[idx].unsigned_abs() >> plane) & 1 == 1
                    });
                    encoder.encode(run_nonzero as u8, CX_RUN);
                    if !run_nonzero {
                        for dy in 0..4 {
                            let idx = ((y + dy) * width_i + x) as usize;
                            grid.state[idx] |= VISITED;
                        }
                        x += 1;
                        continue;
                    }
                    let first_set = (0..4)
                        .find(|&dy| {
                            let idx = ((y + dy) * width_i + x) as usize;
                            (coefficients[idx].unsigned_abs() >> plane) & 1 == 1
                        })
                        .unwrap();
                    encoder.encode_bypass(((first_set >> 1) & 1) as u8);
                    encoder.encode_bypass((first_set & 1) as u8);
                    start_row = first_set;
                }

                for dy in start_row..stripe_h {
                    let idx = ((y + dy) * width_i + x) as usize;
                    if grid.state[idx] & VISITED != 0 {
                        continue;
                    }
                    let coeff = coefficients[idx];
                    let bit = ((coeff.unsigned_abs() >> plane) & 1) as u8;
                    if dy != start_row || !(stripe_h == 4 && all_candidates && all_no_context) {
                        let (h, v, d) = grid.neighbor_counts(x, y + dy);
                        let cx = grid.zc_context(group, h, v, d);
                        encoder.encode(bit, cx);
                    }
                    if bit == 1 {
                        let (sign_cx, xor) = grid.sign_context(x, y + dy);
                        let sign_bit = if coeff < 0 { 1 } else { 0 };
                        encoder.encode(sign_bit ^ xor, 9 + sign_cx);
                        grid.state[idx] |= SIG;
                        if coeff < 0 {
                            grid.state[idx] |= SIGN_NEG;
                        }
                    }
                    grid.state[idx] |= VISITED;
                }
                x += 1;
            }
            y += 4;
        }
        passes.push(PassRecord {
            pass_type: PassType::Cleanup,
            bit_plane: plane,
            cumulative_bytes: encoder.output_len(),
        });
    }

    let termination = if style.contains(CodeBlockStyle::PREDICTABLE_TERMINATION) {
        MqTermination::Predictable
    } else {
        MqTermination::NearOptimal
    };
    let coded_bytes = encoder.finish(termination);
    if let Some(last) = passes.last_mut() {
        last.cumulative_bytes = coded_bytes.len();
    }

    CodeBlockCoding {
        coded_bytes,
        passes,
        num_bit_planes,
    }
}

pub fn decode_codeblock(
    data: &[u8],
    width: u32,
    height: u32,
    num_bit_planes: u8,
    orientation: SubbandOrientation,
    style: CodeBlockStyle,
) -> Vec<i32> {
    let mut coefficients = vec![0i32; (width * height) as usize];
    if num_bit_planes == 0 {
        return coefficients;
    }

    let group = orientation.zc_group();
    let mut grid = Grid::new(width, height);
    let mut decoder = MqDecoder::new(data);
    let width_i = width as i32;
    let height_i = height as i32;
    let reset_context = style.contains(CodeBlockStyle::RESET_CONTEXT);
    let mut first_pass = true;
    let mut reset_before_pass = |decoder: &mut MqDecoder, first_pass: &mut bool| {
        if reset_context && !*first_pass {
            decoder.reset_contexts();
        }
        *first_pass = false;
    };

    for plane in (0..num_bit_planes).rev() {
        for i in 0..grid.state.len() {
            grid.state[i] &= !VISITED;
        }

        reset_before_pass(&mut decoder, &mut first_pass);
        for y in 0..height_i {
            for x in 0..width_i {
                let idx = (y * width_i + x) as usize;
                if grid.state[idx] & SIG != 0 {
                    continue;
                }
                let (h, v, d) = grid.neighbor_counts(x, y);
                if h + v + d == 0 {
                    continue;
                }
                let cx = grid.zc_context(group, h, v, d);
                let bit = decoder.decode(cx);
                grid.state[idx] |= VISITED;
                if bit == 1 {
                    let (sign_cx, xor) = grid.sign_context(x, y);
                    let sign_bit = decoder.decode(9 + sign_cx) ^ xor;
                    grid.state[idx] |= SIG;
                    let magnitude = 1i32 << plane;
                    coefficients[idx] = if sign_bit == 1 { -magnitude } else { magnitude };
                    if sign_bit == 1 {
                        grid.state[idx] |= SIGN_NEG;
                    }
                }
            }
        }

        reset_before_pass(&mut decoder, &mut first_pass);
        for y in 0..height_i {
            for x in 0..width_i {
                let idx = (y * width_i + x) as usize;
                if grid.state[idx] & SIG == 0 || grid.state[idx] & VISITED != 0 {
                    continue;
                }
                let first_refinement = grid.state[idx] & REFINED == 0;
                let cx = grid.mr_context(x, y, first_refinement);
                let bit = decoder.decode(cx);
                grid.state[idx] |= VISITED | REFINED;
                if bit == 1 {
                    let magnitude = 1i32 << plane;
                    if grid.state[idx] & SIGN_NEG != 0 {
                        coefficients[idx] -= magnitude;
                    } else {
                        coefficients[idx] += magnitude;
                    }
                }
            }
        }

        reset_before_pass(&mut decoder, &mut first_pass);
        let mut y = 0i32;
        while y < height_i {
            let stripe_h = (height_i - y).min(4);
            let mut x = 0i32;
            while x < width_i {
                let all_candidates = (0..stripe_h).all(|dy| {
                    let idx = ((y + dy) * width_i + x) as usize;
                    grid.state[idx] & VISITED == 0
                });
                let all_no_context = (0..stripe_h).all(|dy| {
                    let (h, v, d) = grid.neighbor_counts(x, y + dy);
                    h + v + d == 0
                });

                let mut start_row = 0i32;
                let mut run_active = false;
                if stripe_h == 4 && all_candidates && all_no_context {
                    let run_nonzero = decoder.decode(CX_RUN);
                    if run_nonzero == 0 {
                        for dy in 0..4 {
                            let idx = ((y + dy) * width_i + x) as usize;
                            grid.state[idx] |= VISITED;
                        }
                        x += 1;
                        continue;
                    }
                    let hi = decoder.decode_bypass();
                    let lo = decoder.decode_bypass();
                    start_row = ((hi << 1) | lo) as i32;
                    run_active = true;
                }

                for dy in start_row..stripe_h {
                    let idx = ((y + dy) * width_i + x) as usize;
                    if grid.state[idx] & VISITED != 0 {
                        continue;
                    }
                    let bit = if dy == start_row && run_active {
                        1
                    } else {
                        let (h, v, d) = grid.neighbor_counts(x, y + dy);
                        let cx = grid.zc_context(group, h, v, d);
                        decoder.decode(cx)
                    };
                    if bit == 1 {
                        let (sign_cx, xor) = grid.sign_context(x, y + dy);
                        let sign_bit = decoder.decode(9 + sign_cx) ^ xor;
                        grid.state[idx] |= SIG;
                        let magnitude = 1i32 << plane;
                        coefficients[idx] = if sign_bit == 1 { -magnitude } else { magnitude };
                        if sign_bit == 1 {
                            grid.state[idx] |= SIGN_NEG;
                        }
                    }
                    grid.state[idx] |= VISITED;
                }
                x += 1;
            }
            y += 4;
        }
    }

    coefficients
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_sparse_block() {
        let width = 8;
        let height = 8;
        let mut coeffs = vec![0i32; (width * height) as usize];
        coeffs[0] = 37;
        coeffs[9] = -12;
        coeffs[40] = 5;
        coeffs[63] = -1;

        let coding = encode_codeblock(&coeffs, width, height, SubbandOrientation::Ll, CodeBlockStyle::empty());
        let decoded = decode_codeblock(
            &coding.coded_bytes,
            width,
            height,
            coding.num_bit_planes,
            SubbandOrientation::Ll,
            CodeBlockStyle::empty(),
        );
        assert_eq!(coeffs, decoded);
    }

    #[test]
    fn encode_decode_roundtrip_dense_block() {
        let width = 4;
        let height = 4;
        let coeffs: Vec<i32> = (0..16).map(|i| if i % 2 == 0 { i - 8 } else { -(i - 8) }).collect();
        let coding = encode_codeblock(&coeffs, width, height, SubbandOrientation::Hh, CodeBlockStyle::empty());
        let decoded = decode_codeblock(
            &coding.coded_bytes,
            width,
            height,
            coding.num_bit_planes,
            SubbandOrientation::Hh,
            CodeBlockStyle::empty(),
        );
        assert_eq!(coeffs, decoded);
    }

    #[test]
    fn reset_context_roundtrips_and_differs_from_default_coding() {
        let width = 8;
        let height = 8;
        let mut coeffs = vec![0i32; (width * height) as usize];
        for (i, c) in coeffs.iter_mut().enumerate() {
            *c = ((i as i32 * 11) % 29) - 14;
        }

        let plain = encode_codeblock(&coeffs, width, height, SubbandOrientation::Hl, CodeBlockStyle::empty());
        let reset = encode_codeblock(&coeffs, width, height, SubbandOrientation::Hl, CodeBlockStyle::RESET_CONTEXT);

        let decoded = decode_codeblock(
            &reset.coded_bytes,
            width,
            height,
            reset.num_bit_planes,
            SubbandOrientation::Hl,
            CodeBlockStyle::RESET_CONTEXT,
        );
        assert_eq!(coeffs, decoded);
        assert_ne!(
            plain.coded_bytes, reset.coded_bytes,
            "resetting contexts every pass should change the coded output"
        );
    }

    #[test]
    fn all_zero_block_produces_no_passes() {
        let coeffs = vec![0i32; 16];
        let coding = encode_codeblock(&coeffs, 4, 4, SubbandOrientation::Lh, CodeBlockStyle::empty());
        assert_eq!(coding.num_bit_planes, 0);
        assert!(coding.coded_bytes.is_empty());
        assert!(coding.passes.is_empty());
    }

    #[test]
    fn pass_byte_lengths_are_monotonic() {
        let width = 8;
        let height = 8;
        let mut coeffs = vec![0i32; (width * height) as usize];
        for (i, c) in coeffs.iter_mut().enumerate() {
            *c = ((i as i32 * 7) % 23) - 11;
        }
        let coding = encode_codeblock(&coeffs, width, height, SubbandOrientation::Hl, CodeBlockStyle::empty());
        let mut last = 0;
        for pass in &coding.passes {
            assert!(pass.cumulative_bytes >= last);
            last = pass.cumulative_bytes;
        }
    }
}
