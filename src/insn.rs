use eyre::{eyre, Result};
use std::fmt::Display;

/// Width of every AArch64 instruction, in bytes.
pub const WIDTH: u64 = 4;

/// Opcode field (bits 31..26) of the unconditional immediate branch `B`.
const B_OPCODE: u32 = 0b00_0101;

/// Number of bits available for the branch displacement.
const IMM26_BITS: u32 = 26;
const IMM26_MASK: u32 = (1 << IMM26_BITS) - 1;

/// A single AArch64 instruction word, as it will be written into the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(u32);

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl Instruction {
    /// `ret`: return to the caller without touching anything else.
    pub const RET: Self = Self(0xd65f_03c0);

    /// The raw instruction word.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The bytes to write into memory (AArch64 code is always little-endian).
    #[must_use]
    pub const fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Encode `b <to>` for an instruction placed at `from`.
    ///
    /// The displacement is the byte distance divided by the instruction width,
    /// truncated toward zero. It must fit in a signed 26-bit immediate, which
    /// gives a reach of +/-128 MiB.
    #[allow(
        clippy::cast_possible_wrap,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn branch(from: u64, to: u64) -> Result<Self> {
        let distance = to.wrapping_sub(from) as i64;
        let words = distance / WIDTH as i64;
        let limit = 1_i64 << (IMM26_BITS - 1);
        if !(-limit..limit).contains(&words) {
            return Err(eyre!(
                "branch from {from:#x} to {to:#x} is out of range ({words} instructions)"
            ));
        }
        let imm26 = (words as u32) & IMM26_MASK;
        log::trace!("Encoding b {to:#x} at {from:#x}: {words} instructions, imm26 = {imm26:#x}");
        Ok(Self(B_OPCODE << IMM26_BITS | imm26))
    }

    /// If this is a `B` instruction placed at `at`, the address it jumps to.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn branch_target(self, at: u64) -> Option<u64> {
        if self.0 >> IMM26_BITS != B_OPCODE {
            return None;
        }
        // Shift the immediate up to the sign bit and back down to sign-extend it.
        let words = ((self.0 << (32 - IMM26_BITS)) as i32) >> (32 - IMM26_BITS);
        Some(at.wrapping_add_signed(words as i64 * WIDTH as i64))
    }
}
