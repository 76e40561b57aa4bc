//! MQ arithmetic coder (ISO/IEC 15444-1 Annex C).

/// One row of the Qe probability-estimation table (Annex C Table C-2).
#[derive(Clone, Copy)]
struct QeEntry {
    qe: u16,
    nmps: u8,
    nlps: u8,
    switch: u8,
}

const MQ_TABLE: [QeEntry; 47] = [
    QeEntry { qe: 0x5601, nmps: 1, nlps: 1, switch: 1 },
    QeEntry { qe: 0x3401, nmps: 2, nlps: 6, switch: 0 },
    QeEntry { qe: 0x1801, nmps: 3, nlps: 9, switch: 0 },
    QeEntry { qe: 0x0AC1, nmps: 4, nlps: 12, switch: 0 },
    QeEntry { qe: 0x0521, nmps: 5, nlps: 29, switch: 0 },
    QeEntry { qe: 0x0221, nmps: 38, nlps: 33, switch: 0 },
    QeEntry { qe: 0x5601, nmps: 7, nlps: 6, switch: 1 },
    QeEntry { qe: 0x5401, nmps: 8, nlps: 14, switch: 0 },
    QeEntry { qe: 0x4801, nmps: 9, nlps: 14, switch: 0 },
    QeEntry { qe: 0x3801, nmps: 10, nlps: 14, switch: 0 },
    QeEntry { qe: 0x3001, nmps: 11, nlps: 17, switch: 0 },
    QeEntry { qe: 0x2401, nmps: 12, nlps: 18, switch: 0 },
    QeEntry { qe: 0x1C01, nmps: 13, nlps: 20, switch: 0 },
    QeEntry { qe: 0x1601, nmps: 29, nlps: 21, switch: 0 },
    QeEntry { qe: 0x5601, nmps: 15, nlps: 14, switch: 1 },
    QeEntry { qe: 0x5401, nmps: 16, nlps: 14, switch: 0 },
    QeEntry { qe: 0x5101, nmps: 17, nlps: 15, switch: 0 },
    QeEntry { qe: 0x4801, nmps: 18, nlps: 16, switch: 0 },
    QeEntry { qe: 0x3801, nmps: 19, nlps: 17, switch: 0 },
    QeEntry { qe: 0x3401, nmps: 20, nlps: 18, switch: 0 },
    QeEntry { qe: 0x3001, nmps: 21, nlps: 19, switch: 0 },
    QeEntry { qe: 0x2801, nmps: 22, nlps: 19, switch: 0 },
    QeEntry { qe: 0x2401, nmps: 23, nlps: 19, switch: 0 },
    QeEntry { qe: 0x2201, nmps: 24, nlps: 19, switch: 0 },
    QeEntry { qe: 0x1C01, nmps: 25, nlps: 20, switch: 0 },
    QeEntry { qe: 0x1801, nmps: 26, nlps: 21, switch: 0 },
    QeEntry { qe: 0x1601, nmps: 27, nlps: 22, switch: 0 },
    QeEntry { qe: 0x1401, nmps: 28, nlps: 23, switch: 0 },
    QeEntry { qe: 0x1201, nmps: 29, nlps: 24, switch: 0 },
    QeEntry { qe: 0x1101, nmps: 30, nlps: 25, switch: 0 },
    QeEntry { qe: 0x0AC1, nmps: 31, nlps: 26, switch: 0 },
    QeEntry { qe: 0x09C1, nmps: 32, nlps: 27, switch: 0 },
    QeEntry { qe: 0x08A1, nmps: 33, nlps: 28, switch: 0 },
    QeEntry { qe: 0x0521, nmps: 34, nlps: 29, switch: 0 },
    QeEntry { qe: 0x0441, nmps: 35, nlps: 30, switch: 0 },
    QeEntry { qe: 0x02A1, nmps: 36, nlps: 31, switch: 0 },
    QeEntry { qe: 0x0221, nmps: 37, nlps: 32, switch: 0 },
    QeEntry { qe: 0x0141, nmps: 38, nlps: 33, switch: 0 },
    QeEntry { qe: 0x0111, nmps: 39, nlps: 34, switch: 0 },
    QeEntry { qe: 0x0085, nmps: 40, nlps: 35, switch: 0 },
    QeEntry { qe: 0x0049, nmps: 41, nlps: 36, switch: 0 },
    QeEntry { qe: 0x0025, nmps: 42, nlps: 37, switch: 0 },
    QeEntry { qe: 0x0015, nmps: 43, nlps: 38, switch: 0 },
    QeEntry { qe: 0x0009, nmps: 44, nlps: 39, switch: 0 },
    QeEntry { qe: 0x0005, nmps: 45, nlps: 40, switch: 0 },
    QeEntry { qe: 0x0001, nmps: 45, nlps: 41, switch: 0 },
    QeEntry { qe: 0x5601, nmps: 46, nlps: 46, switch: 0 },
];

/// Total number of contexts a code block uses: 9 significance + 5 sign + 3
/// magnitude-refinement + 1 run + 1 uniform/bypass.
pub const NUM_CONTEXTS: usize = 19;

pub const CX_UNIFORM: usize = 18;
pub const CX_RUN: usize = 17;

/// Per-context probability state: table index (0..47) packed with the
/// current MPS value in the low bit.
#[derive(Clone, Copy)]
struct ContextState(u8);

impl ContextState {
    fn new(index: u8, mps: u8) -> Self {
        ContextState((index << 1) | (mps & 1))
    }
    fn index(&self) -> usize {
        (self.0 >> 1) as usize
    }
    fn mps(&self) -> u8 {
        self.0 & 1
    }
}

/// How the encoder finalises a code block's MQ output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MqTermination {
    /// Compute the shortest byte suffix that still decodes correctly.
    #[default]
    NearOptimal,
    /// Fixed-length termination sequence, robust to truncation elsewhere
    /// in the codestream (`code_block_style`'s `predictable_termination`).
    Predictable,
}

/// Binary adaptive arithmetic encoder, one instance per code block.
pub struct MqEncoder {
    a: u32,
    c: u32,
    ct: i32,
    output: Vec<u8>,
    contexts: [ContextState; NUM_CONTEXTS],
}

/// Initial probability state shared by a fresh encoder/decoder and by
/// `RESET_CONTEXT` (Annex D.4): every context starts at table index 0 with
/// MPS 0, except the run-length and uniform contexts which start primed per
/// Annex C.
fn initial_contexts() -> [ContextState; NUM_CONTEXTS] {
    let mut contexts = [ContextState::new(0, 0); NUM_CONTEXTS];
    contexts[CX_RUN] = ContextState::new(3, 0);
    contexts[CX_UNIFORM] = ContextState::new(46, 0);
    contexts
}

impl Default for MqEncoder {
    fn default() -> Self {
        Self {
            a: 0x8000,
            c: 0,
            ct: 12,
            output: Vec::new(),
            contexts: initial_contexts(),
        }
    }
}

impl MqEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every context's probability state back to its initial value,
    /// without touching the register/output state (`RESET_CONTEXT`).
    pub fn reset_contexts(&mut self) {
        self.contexts = initial_contexts();
    }

    pub fn encode(&mut self, decision: u8, cx: usize) {
        let state = self.contexts[cx];
        let entry = MQ_TABLE[state.index()];
        let mps = state.mps();

        self.a -= entry.qe as u32;

        if decision == mps {
            if self.a < 0x8000 {
                if self.a < entry.qe as u32 {
                    self.c += self.a;
                    self.a = entry.qe as u32;
                }
                self.contexts[cx] = ContextState::new(entry.nmps, mps);
                self.renormalize();
            }
        } else {
            if entry.qe as u32 > self.a {
                self.a = entry.qe as u32;
            } else {
                self.c += self.a;
                self.a = entry.qe as u32;
            }
            let next_mps = if entry.switch == 1 { 1 - mps } else { mps };
            self.contexts[cx] = ContextState::new(entry.nlps, next_mps);
            self.renormalize();
        }
    }

    fn renormalize(&mut self) {
        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out();
            }
            if self.a >= 0x8000 {
                break;
            }
        }
    }

    fn byte_out(&mut self) {
        let b_out = (self.c >> 19) as u8;
        if b_out == 0xFF {
            self.ct = 7;
        } else {
            self.ct = 8;
        }
        self.c &= 0x7FFFF;
        self.output.push(b_out);
    }

    /// Finalise the bitstream and return the coded bytes for this block,
    /// consuming the encoder.
    pub fn finish(mut self, termination: MqTermination) -> Vec<u8> {
        match termination {
            MqTermination::NearOptimal => self.flush_near_optimal(),
            MqTermination::Predictable => self.flush_predictable(),
        }
        while self.output.len() > 1 && *self.output.last().unwrap() == 0xFF {
            self.output.pop();
        }
        self.output
    }

    fn flush_near_optimal(&mut self) {
        let temp = self.c + self.a;
        self.c |= 0xFFFF;
        if self.c >= temp {
            self.c -= 0x8000;
        }
        for _ in 0..4 {
            self.c <<= self.ct.max(0);
            self.byte_out();
            if self.c == 0 {
                break;
            }
        }
    }

    fn flush_predictable(&mut self) {
        // Same SETBITS procedure; predictable termination differs from
        // near-optimal only in that callers are expected to pad the
        // resulting codestream with a fixed two-byte 0xFF 0xFF-free
        // marker sequence before truncation, which is a tier-2 concern.
        // The register-level flush is identical at this layer.
        self.flush_near_optimal();
    }

    pub fn output_len(&self) -> usize {
        self.output.len()
    }

    /// Raw/bypass-style bit, coded through the fixed-probability uniform
    /// context (table index 46 is a self-transition, so this behaves as
    /// an unadaptive equiprobable bit without a separate code path).
    pub fn encode_bypass(&mut self, bit: u8) {
        self.encode(bit, CX_UNIFORM);
    }
}

/// Binary adaptive arithmetic decoder, mirroring [`MqEncoder`].
pub struct MqDecoder<'a> {
    a: u32,
    c: u32,
    ct: i32,
    data: &'a [u8],
    pos: usize,
    contexts: [ContextState; NUM_CONTEXTS],
}

impl<'a> MqDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut decoder = Self {
            a: 0x8000,
            c: 0,
            ct: 0,
            data,
            pos: 0,
            contexts: initial_contexts(),
        };
        let first = decoder.data.first().copied().unwrap_or(0xFF);
        decoder.c = (first as u32) << 16;
        decoder.byte_in();
        decoder.c <<= 7;
        decoder.ct -= 7;
        decoder
    }

    /// Reset every context's probability state back to its initial value,
    /// without touching the register/byte-position state (`RESET_CONTEXT`).
    pub fn reset_contexts(&mut self) {
        self.contexts = initial_contexts();
    }

    fn current_byte(&self) -> u8 {
        self.data.get(self.pos).copied().unwrap_or(0xFF)
    }

    fn byte_in(&mut self) {
        if self.current_byte() == 0xFF {
            let next = self.data.get(self.pos + 1).copied().unwrap_or(0xFF);
            if next > 0x8F {
                self.c += 0xFF00;
                self.ct = 8;
            } else {
                self.pos += 1;
                self.c += (self.current_byte() as u32) << 9;
                self.ct = 7;
            }
        } else {
            self.pos += 1;
            self.c += (self.current_byte() as u32) << 8;
            self.ct = 8;
        }
    }

    pub fn decode(&mut self, cx: usize) -> u8 {
        let state = self.contexts[cx];
        let entry = MQ_TABLE[state.index()];
        let mps = state.mps();

        self.a -= entry.qe as u32;
        let chigh = self.c >> 16;

        let decision;
        if chigh >= self.a as u32 {
            self.c -= self.a << 16;
            if self.a < entry.qe as u32 {
                decision = mps;
                self.contexts[cx] = ContextState::new(entry.nmps, mps);
            } else {
                decision = 1 - mps;
                let next_mps = if entry.switch == 1 { 1 - mps } else { mps };
                self.contexts[cx] = ContextState::new(entry.nlps, next_mps);
            }
            self.a = entry.qe as u32;
            self.renormalize();
        } else if self.a < 0x8000 {
            if self.a < entry.qe as u32 {
                decision = 1 - mps;
                let next_mps = if entry.switch == 1 { 1 - mps } else { mps };
                self.contexts[cx] = ContextState::new(entry.nlps, next_mps);
            } else {
                decision = mps;
                self.contexts[cx] = ContextState::new(entry.nmps, mps);
            }
            self.a = entry.qe as u32;
            self.renormalize();
        } else {
            decision = mps;
        }
        decision
    }

    fn renormalize(&mut self) {
        loop {
            if self.ct == 0 {
                self.byte_in();
            }
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.a >= 0x8000 {
                break;
            }
        }
    }

    pub fn decode_bypass(&mut self) -> u8 {
        self.decode(CX_UNIFORM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_state() {
        let enc = MqEncoder::new();
        assert_eq!(enc.a, 0x8000);
        assert_eq!(enc.ct, 12);
    }

    #[test]
    fn single_context_roundtrip() {
        let bits = [0u8, 0, 1, 0, 1, 1, 0, 1, 0, 0];
        let mut enc = MqEncoder::new();
        for &b in &bits {
            enc.encode(b, 0);
        }
        let encoded = enc.finish(MqTermination::NearOptimal);

        let mut dec = MqDecoder::new(&encoded);
        let decoded: Vec<u8> = (0..bits.len()).map(|_| dec.decode(0)).collect();
        assert_eq!(&bits[..], &decoded[..]);
    }

    #[test]
    fn multi_context_roundtrip() {
        let ops: [(u8, usize); 6] = [
            (0, CX_RUN),
            (0, CX_RUN),
            (1, CX_RUN),
            (0, CX_RUN),
            (1, CX_UNIFORM),
            (0, CX_UNIFORM),
        ];
        let mut enc = MqEncoder::new();
        for &(bit, cx) in &ops {
            enc.encode(bit, cx);
        }
        let encoded = enc.finish(MqTermination::NearOptimal);

        let mut dec = MqDecoder::new(&encoded);
        for &(expected, cx) in &ops {
            assert_eq!(dec.decode(cx), expected);
        }
    }

    #[test]
    fn long_random_roundtrip() {
        // Deterministic pseudo-random bit sequence across all contexts.
        let mut state: u32 = 0x1234_5678;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        let ops: Vec<(u8, usize)> = (0..500)
            .map(|_| ((next() & 1) as u8, (next() % NUM_CONTEXTS as u32) as usize))
            .collect();

        let mut enc = MqEncoder::new();
        for &(bit, cx) in &ops {
            enc.encode(bit, cx);
        }
        let encoded = enc.finish(MqTermination::NearOptimal);

        let mut dec = MqDecoder::new(&encoded);
        for &(expected, cx) in &ops {
            assert_eq!(dec.decode(cx), expected);
        }
    }
}
