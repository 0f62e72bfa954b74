// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// Candidate generators. A mutator fills one input slot per call and
// returns false once exhausted; that false is the engine's end-of-stream
// signal. The built-ins are infinite sources — a run with them ends when
// the operator stops it.

use rand::rngs::ThreadRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};
use crate::slots::{InputSlot, INSN_MAXLEN};

/// Fill `slot` with the next candidate; `false` means the source is
/// exhausted. Runs only in the dispatcher, so it needs no `Send`.
pub type Mutator = Box<dyn FnMut(&mut InputSlot) -> bool>;

/// Look up a built-in generator by name. `None` selects the default.
pub fn create(name: Option<&str>) -> Result<Mutator> {
    match name.unwrap_or("havoc") {
        "havoc" => Ok(havoc()),
        "sliding" => Ok(sliding()),
        other => Err(Error::Usage(format!(
            "unknown mutator '{other}' (available: havoc, sliding)"
        ))),
    }
}

/// Uniformly random length and bytes. Cheap and surprisingly effective at
/// hitting decoder disagreements on short garbage.
pub fn havoc() -> Mutator {
    let mut rng = rand::thread_rng();
    Box::new(move |slot| {
        let len = rng.gen_range(1..=INSN_MAXLEN);
        let mut buf = [0u8; INSN_MAXLEN];
        rng.fill(&mut buf[..len]);
        slot.set(&buf[..len]);
        true
    })
}

/// Build one structurally plausible max-length encoding, then emit every
/// tail window of it (offset 0, 1, 2, …) before regenerating. Sliding
/// through a well-formed instruction exercises the prefix/opcode boundary
/// handling where decoders most often disagree.
pub fn sliding() -> Mutator {
    let mut rng = rand::thread_rng();
    let mut cand = [0u8; INSN_MAXLEN];
    let mut len = 0usize;
    let mut off = 0usize;
    Box::new(move |slot| {
        if off >= len {
            len = build_candidate(&mut rng, &mut cand);
            off = 0;
        }
        slot.set(&cand[off..len]);
        off += 1;
        true
    })
}

const LEGACY_PREFIXES: &[u8] = &[
    0x66, 0x67, 0x2e, 0x3e, 0x26, 0x64, 0x65, 0x36, 0xf0, 0xf2, 0xf3,
];

/// Assemble prefix(es) + opcode + ModR/M + SIB + displacement + immediate
/// with random but structurally sensible contents.
fn build_candidate(rng: &mut ThreadRng, buf: &mut [u8; INSN_MAXLEN]) -> usize {
    let mut n = 0;

    for _ in 0..rng.gen_range(0..=4usize) {
        buf[n] = *LEGACY_PREFIXES.choose(rng).unwrap();
        n += 1;
    }
    if rng.gen_bool(0.5) {
        buf[n] = 0x40 | rng.gen_range(0..16u8); // REX
        n += 1;
    }

    // Opcode: one byte, or a 0f / 0f38 / 0f3a escape sequence.
    match rng.gen_range(0..4u8) {
        0 => {
            buf[n] = 0x0f;
            buf[n + 1] = rng.gen();
            n += 2;
        }
        1 => {
            buf[n] = 0x0f;
            buf[n + 1] = if rng.gen_bool(0.5) { 0x38 } else { 0x3a };
            buf[n + 2] = rng.gen();
            n += 3;
        }
        _ => {
            buf[n] = rng.gen();
            n += 1;
        }
    }

    buf[n] = rng.gen(); // ModR/M
    n += 1;
    buf[n] = rng.gen(); // SIB
    n += 1;

    let disp = *[0usize, 1, 4, 8].choose(rng).unwrap();
    rng.fill(&mut buf[n..n + disp]);
    n += disp;

    let imm = *[0usize, 1, 2, 4, 8].choose(rng).unwrap();
    rng.fill(&mut buf[n..n + imm]);
    n += imm;

    n
}
