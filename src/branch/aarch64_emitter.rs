// src/branch/aarch64_emitter.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! aarch64 branch-chase stub: `MOVZ x0, #imm16` + two `MOVK x0, #imm16, lsl
//! #N` build the (48-bit, plenty for a user-space mmap address) target into
//! `x0`, followed by `BR x0` (non-terminal) or `RET` (terminal) — four
//! 4-byte instructions, 16 bytes total.

use super::BranchChaseEmitter;

pub struct Aarch64Emitter;

const STUB_SIZE: usize = 16;

const BR_X0: u32 = 0xD61F_0000;
const RET_X30: u32 = 0xD65F_03C0;

fn movz_x0(imm16: u16, hw: u32) -> u32 {
    (1 << 31) | (0b10 << 29) | (0b100101 << 23) | (hw << 21) | ((imm16 as u32) << 5)
}

fn movk_x0(imm16: u16, hw: u32) -> u32 {
    (1 << 31) | (0b11 << 29) | (0b100101 << 23) | (hw << 21) | ((imm16 as u32) << 5)
}

impl BranchChaseEmitter for Aarch64Emitter {
    fn supports(&self) -> bool {
        cfg!(target_arch = "aarch64")
    }

    fn stub_size(&self) -> usize {
        STUB_SIZE
    }

    fn emit(&self, code: &mut [u8], next_addr: u64, terminal: bool) {
        assert!(code.len() >= STUB_SIZE, "stub buffer too small");
        assert!(next_addr < (1u64 << 48), "address does not fit in 48 bits");

        let imm0 = next_addr as u16;
        let imm16 = (next_addr >> 16) as u16;
        let imm32 = (next_addr >> 32) as u16;

        let insns = [
            movz_x0(imm0, 0),
            movk_x0(imm16, 1),
            movk_x0(imm32, 2),
            if terminal { RET_X30 } else { BR_X0 },
        ];

        for (i, insn) in insns.iter().enumerate() {
            code[i * 4..i * 4 + 4].copy_from_slice(&insn.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_four_instructions_building_the_target() {
        let e = Aarch64Emitter;
        let mut buf = vec![0u8; e.stub_size()];
        e.emit(&mut buf, 0x0000_7f12_3456_7000, false);

        let words: Vec<u32> = buf
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(words.len(), 4);
        assert_eq!(words[3], BR_X0);
        // MOVZ carries the low 16 bits of the address directly.
        assert_eq!(words[0] & 0xFFFF, 0x0000_7f12_3456_7000u64 as u16 as u32);
    }

    #[test]
    fn terminal_stub_ends_in_ret() {
        let e = Aarch64Emitter;
        let mut buf = vec![0u8; e.stub_size()];
        e.emit(&mut buf, 0, true);
        let last = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        assert_eq!(last, RET_X30);
    }

    #[test]
    #[should_panic]
    fn rejects_address_above_48_bits() {
        let e = Aarch64Emitter;
        let mut buf = vec![0u8; e.stub_size()];
        e.emit(&mut buf, 1u64 << 50, false);
    }
}
