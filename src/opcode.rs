use std::fmt;

use serde::{Deserialize, Serialize};

/// Instruction set. The discriminant is the opcode's prime index, which is
/// the only place the numbering is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(usize)]
pub enum Op {
    Push = 0,
    Add = 1,
    Print = 2,
    Halt = 3,
    Jump = 4,
    PokeChunk = 5,
    BuildChunk = 6,
    Dup = 7,
    Swap = 8,
    Drop = 9,
    Call = 10,
    Return = 11,
    PeekChunk = 12,
    Factorize = 13,
    GetPrime = 14,
    GetPrimeIdx = 15,
    CompareEq = 16,
    JumpIfZero = 17,
    Nop = 18,
    Mod = 19,
    Input = 20,
    Random = 21,
    Sub = 22,
}

impl Op {
    pub const ALL: [Op; 23] = [
        Op::Push,
        Op::Add,
        Op::Print,
        Op::Halt,
        Op::Jump,
        Op::PokeChunk,
        Op::BuildChunk,
        Op::Dup,
        Op::Swap,
        Op::Drop,
        Op::Call,
        Op::Return,
        Op::PeekChunk,
        Op::Factorize,
        Op::GetPrime,
        Op::GetPrimeIdx,
        Op::CompareEq,
        Op::JumpIfZero,
        Op::Nop,
        Op::Mod,
        Op::Input,
        Op::Random,
        Op::Sub,
    ];

    pub fn from_prime_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn prime_index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::Push => "PUSH",
            Op::Add => "ADD",
            Op::Print => "PRINT",
            Op::Halt => "HALT",
            Op::Jump => "JUMP",
            Op::PokeChunk => "POKE_CHUNK",
            Op::BuildChunk => "BUILD_CHUNK",
            Op::Dup => "DUP",
            Op::Swap => "SWAP",
            Op::Drop => "DROP",
            Op::Call => "CALL",
            Op::Return => "RETURN",
            Op::PeekChunk => "PEEK_CHUNK",
            Op::Factorize => "FACTORIZE",
            Op::GetPrime => "GET_PRIME",
            Op::GetPrimeIdx => "GET_PRIME_IDX",
            Op::CompareEq => "COMPARE_EQ",
            Op::JumpIfZero => "JUMP_IF_ZERO",
            Op::Nop => "NOP",
            Op::Mod => "MOD",
            Op::Input => "INPUT",
            Op::Random => "RANDOM",
            Op::Sub => "SUB",
        }
    }

    /// Operands that must be on the stack before dispatch. BUILD_CHUNK
    /// checks its factor pairs itself once the count is known.
    pub fn pops(self) -> usize {
        match self {
            Op::Add | Op::Sub | Op::Mod | Op::CompareEq | Op::Swap | Op::PokeChunk | Op::JumpIfZero => 2,
            Op::Print
            | Op::Drop
            | Op::Dup
            | Op::PeekChunk
            | Op::GetPrime
            | Op::GetPrimeIdx
            | Op::Random
            | Op::BuildChunk
            | Op::Factorize
            | Op::Jump
            | Op::Call => 1,
            Op::Push | Op::Return | Op::Halt | Op::Nop | Op::Input => 0,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
