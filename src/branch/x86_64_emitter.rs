// src/branch/x86_64_emitter.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! x86_64 branch-chase stub: `movabs rax, imm64` (10 bytes) followed by
//! either `jmp rax` (`FF E0`, non-terminal) or `ret; nop` (`C3 90`,
//! terminal), for a fixed 12-byte stub.

use super::BranchChaseEmitter;

pub struct X86_64Emitter;

const STUB_SIZE: usize = 12;

impl BranchChaseEmitter for X86_64Emitter {
    fn supports(&self) -> bool {
        cfg!(target_arch = "x86_64")
    }

    fn stub_size(&self) -> usize {
        STUB_SIZE
    }

    fn emit(&self, code: &mut [u8], next_addr: u64, terminal: bool) {
        assert!(code.len() >= STUB_SIZE, "stub buffer too small");
        code[0] = 0x48;
        code[1] = 0xB8;
        code[2..10].copy_from_slice(&next_addr.to_le_bytes());
        if terminal {
            code[10] = 0xC3; // ret
            code[11] = 0x90; // nop (padding, never reached)
        } else {
            code[10] = 0xFF; // jmp rax
            code[11] = 0xE0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_movabs_rax_then_jmp_rax() {
        let e = X86_64Emitter;
        let mut buf = vec![0u8; e.stub_size()];
        e.emit(&mut buf, 0x1122_3344_5566_7788, false);
        assert_eq!(&buf[0..2], &[0x48, 0xB8]);
        assert_eq!(&buf[2..10], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&buf[10..12], &[0xFF, 0xE0]);
    }

    #[test]
    fn terminal_stub_ends_in_ret() {
        let e = X86_64Emitter;
        let mut buf = vec![0u8; e.stub_size()];
        e.emit(&mut buf, 0, true);
        assert_eq!(&buf[10..12], &[0xC3, 0x90]);
    }
}
