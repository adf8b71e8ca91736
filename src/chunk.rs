//! Chunk codec.
//!
//! A chunk is a single positive integer whose prime factorization carries an
//! instruction or a data item. The role of each prime factor is given by its
//! exponent:
//!
//! | exponent | role |
//! |---|---|
//! | 4 | opcode (prime index = opcode) |
//! | 5 | PUSH operand (prime index = operand) |
//! | 3 | data scalar |
//! | 2 / 1 | data pair position / value |
//! | >= 6 | checksum, exponent - 6 being a correction factor |
//!
//! The checksum prime is `prime_at(x)` where `x` is the XOR of
//! `index * exponent` over every other factor.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::opcode::Op;
use crate::primes::{self, PrimeError};

pub type Chunk = u128;

pub const CORRUPT_CHUNK: Chunk = 0;
pub const DEGENERATE_CHUNK: Chunk = 1;

pub const OPCODE_EXPONENT: u32 = 4;
pub const OPERAND_EXPONENT: u32 = 5;
pub const DATA_EXPONENT: u32 = 3;
pub const POSITION_EXPONENT: u32 = 2;
pub const VALUE_EXPONENT: u32 = 1;
pub const CHECKSUM_EXPONENT: u32 = 6;

// PUSH of PUSH's own index folds opcode and operand into one prime.
const COLLAPSED_PUSH_EXPONENT: u32 = OPCODE_EXPONENT + OPERAND_EXPONENT;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("chunk 0 is corrupt")]
    Corrupt,
    #[error("chunk {0} carries more than one opcode factor")]
    AmbiguousOpcode(Chunk),
    #[error("chunk {0} carries an operand but no opcode")]
    NoOpcode(Chunk),
    #[error("chunk {0} matches no instruction or data layout")]
    UnrecognizedChunk(Chunk),
    #[error("chunk value does not fit in 128 bits")]
    Overflow,
    #[error("checksum prime collides with the payload of `{0}`")]
    ChecksumCollision(Record),
    #[error("cannot encode record: {0}")]
    InvalidRecord(&'static str),
    #[error(transparent)]
    Prime(#[from] PrimeError),
}

/// A prime factor in index form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Factor {
    pub index: usize,
    pub exponent: u32,
}

impl Factor {
    pub fn new(index: usize, exponent: u32) -> Self {
        Self { index, exponent }
    }

    fn is_collapsed_push(&self) -> bool {
        self.index == Op::Push.prime_index() && self.exponent == COLLAPSED_PUSH_EXPONENT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub op: Op,
    pub operand: Option<usize>,
}

impl Instruction {
    pub fn new(op: Op) -> Self {
        Self { op, operand: None }
    }

    pub fn push(operand: usize) -> Self {
        Self {
            op: Op::Push,
            operand: Some(operand),
        }
    }
}

/// Decoded meaning of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Record {
    Instruction(Instruction),
    Data(usize),
    DataPair { position: usize, value: usize },
    Degenerate,
}

impl Record {
    pub fn op(op: Op) -> Self {
        Record::Instruction(Instruction::new(op))
    }

    pub fn push(operand: usize) -> Self {
        Record::Instruction(Instruction::push(operand))
    }

    pub fn as_instruction(&self) -> Option<Instruction> {
        match self {
            Record::Instruction(instruction) => Some(*instruction),
            _ => None,
        }
    }

    fn factors(&self) -> Result<Vec<Factor>, ChunkError> {
        match *self {
            Record::Instruction(Instruction { op, operand }) => {
                let mut factors = vec![Factor::new(op.prime_index(), OPCODE_EXPONENT)];
                match (op, operand) {
                    (Op::Push, Some(operand)) => factors.push(Factor::new(operand, OPERAND_EXPONENT)),
                    (Op::Push, None) => return Err(ChunkError::InvalidRecord("PUSH needs an operand")),
                    (_, Some(_)) => {
                        return Err(ChunkError::InvalidRecord("only PUSH takes an operand"));
                    }
                    (_, None) => {}
                }
                Ok(factors)
            }
            Record::Data(value) => Ok(vec![Factor::new(value, DATA_EXPONENT)]),
            Record::DataPair { position, value } => {
                if position == value {
                    return Err(ChunkError::InvalidRecord("pair position and value must differ"));
                }
                Ok(vec![
                    Factor::new(position, POSITION_EXPONENT),
                    Factor::new(value, VALUE_EXPONENT),
                ])
            }
            Record::Degenerate => Ok(Vec::new()),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Instruction(Instruction {
                op,
                operand: Some(operand),
            }) => write!(f, "{op} {operand}"),
            Record::Instruction(Instruction { op, operand: None }) => write!(f, "{op}"),
            Record::Data(value) => write!(f, "DATA {value}"),
            Record::DataPair { position, value } => write!(f, "PAIR pos={position} val={value}"),
            Record::Degenerate => f.write_str("DEGENERATE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumStatus {
    Absent,
    Valid { correction: u32 },
    Mismatch,
}

/// Raw and checksum-peeled factorization of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub raw: Vec<Factor>,
    pub logical: Vec<Factor>,
    pub checksum: ChecksumStatus,
}

/// Product of `prime_at(index)^exponent` over `factors`. No checksum is added.
pub fn encode_factors(factors: &[Factor]) -> Result<Chunk, ChunkError> {
    factors.iter().try_fold(1u128, |acc, factor| {
        if factor.exponent == 0 {
            return Ok(acc);
        }
        let prime = Chunk::from(primes::prime_at(factor.index)?);
        let power = prime.checked_pow(factor.exponent).ok_or(ChunkError::Overflow)?;
        acc.checked_mul(power).ok_or(ChunkError::Overflow)
    })
}

pub fn encode(record: &Record, include_checksum: bool) -> Result<Chunk, ChunkError> {
    if include_checksum {
        encode_checksummed(record, 0)
    } else {
        encode_factors(&record.factors()?)
    }
}

/// Encodes `record` with a checksum factor of exponent `6 + correction`.
///
/// Fails with [`ChunkError::ChecksumCollision`] when the checksum prime lands
/// on a payload prime in a way that would change how the chunk decodes.
pub fn encode_checksummed(record: &Record, correction: u32) -> Result<Chunk, ChunkError> {
    let merged = merge(&record.factors()?);
    let index = checksum_index(&merged)?;
    let exponent = CHECKSUM_EXPONENT
        .checked_add(correction)
        .ok_or(ChunkError::Overflow)?;
    let mut factors = merged;
    factors.push(Factor::new(index, exponent));
    let chunk = encode_factors(&factors)?;
    match decode(chunk) {
        Ok(decoded) if decoded == *record => Ok(chunk),
        _ => Err(ChunkError::ChecksumCollision(*record)),
    }
}

pub fn encode_op(op: Op) -> Result<Chunk, ChunkError> {
    encode(&Record::op(op), false)
}

pub fn encode_push(operand: usize) -> Result<Chunk, ChunkError> {
    encode(&Record::push(operand), false)
}

pub fn encode_data(value: usize) -> Result<Chunk, ChunkError> {
    encode(&Record::Data(value), false)
}

fn merge(factors: &[Factor]) -> Vec<Factor> {
    let mut merged: BTreeMap<usize, u32> = BTreeMap::new();
    for factor in factors {
        *merged.entry(factor.index).or_default() += factor.exponent;
    }
    merged
        .into_iter()
        .map(|(index, exponent)| Factor::new(index, exponent))
        .collect()
}

fn checksum_index(factors: &[Factor]) -> Result<usize, ChunkError> {
    factors.iter().try_fold(0usize, |acc, factor| {
        let weight = usize::try_from(factor.exponent)
            .ok()
            .and_then(|e| factor.index.checked_mul(e))
            .ok_or(ChunkError::Overflow)?;
        Ok(acc ^ weight)
    })
}

pub fn analyze(chunk: Chunk) -> Result<Analysis, ChunkError> {
    if chunk == CORRUPT_CHUNK {
        return Err(ChunkError::Corrupt);
    }
    // A factor the prime table cannot index matches no layout.
    let beyond_table = |err| match err {
        PrimeError::LimitExceeded => ChunkError::UnrecognizedChunk(chunk),
        other => ChunkError::Prime(other),
    };
    let raw = primes::factorize(chunk)
        .and_then(|factors| {
            factors
                .into_iter()
                .map(|(prime, exponent)| Ok(Factor::new(primes::index_of(prime)?, exponent)))
                .collect::<Result<Vec<_>, PrimeError>>()
        })
        .map_err(beyond_table)?;

    let candidate = raw
        .iter()
        .position(|f| f.exponent >= CHECKSUM_EXPONENT && !f.is_collapsed_push());
    let Some(position) = candidate else {
        return Ok(Analysis {
            logical: raw.clone(),
            raw,
            checksum: ChecksumStatus::Absent,
        });
    };

    let checksum = raw[position];
    let mut remaining: Vec<Factor> = raw
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != position)
        .map(|(_, f)| *f)
        .collect();

    // An index that cannot even be computed can never match.
    if checksum_index(&remaining).ok() != Some(checksum.index) {
        trace!(%chunk, "checksum mismatch, using raw factors");
        return Ok(Analysis {
            logical: raw.clone(),
            raw,
            checksum: ChecksumStatus::Mismatch,
        });
    }

    let correction = checksum.exponent - CHECKSUM_EXPONENT;
    if correction > 0 {
        remaining.push(Factor::new(checksum.index, correction));
        remaining.sort_by_key(|f| f.index);
    }
    Ok(Analysis {
        raw,
        logical: remaining,
        checksum: ChecksumStatus::Valid { correction },
    })
}

pub fn decode(chunk: Chunk) -> Result<Record, ChunkError> {
    if chunk == DEGENERATE_CHUNK {
        return Ok(Record::Degenerate);
    }
    let analysis = analyze(chunk)?;
    interpret(chunk, &analysis.logical)
}

fn interpret(chunk: Chunk, logical: &[Factor]) -> Result<Record, ChunkError> {
    if logical.is_empty() {
        return Ok(Record::Degenerate);
    }

    let mut opcodes = logical.iter().filter(|f| f.exponent == OPCODE_EXPONENT);
    match (opcodes.next(), opcodes.next()) {
        (Some(_), Some(_)) => Err(ChunkError::AmbiguousOpcode(chunk)),
        (Some(opcode), None) => {
            let op = Op::from_prime_index(opcode.index).ok_or(ChunkError::UnrecognizedChunk(chunk))?;
            if op != Op::Push {
                return Ok(Record::op(op));
            }
            logical
                .iter()
                .find(|f| f.exponent == OPERAND_EXPONENT)
                .map(|operand| Record::push(operand.index))
                .ok_or(ChunkError::UnrecognizedChunk(chunk))
        }
        (None, _) => interpret_data(chunk, logical),
    }
}

fn interpret_data(chunk: Chunk, logical: &[Factor]) -> Result<Record, ChunkError> {
    match logical {
        [single] if single.is_collapsed_push() => return Ok(Record::push(Op::Push.prime_index())),
        [single] if single.exponent == DATA_EXPONENT => return Ok(Record::Data(single.index)),
        [a, b] => {
            let pair = match (a.exponent, b.exponent) {
                (POSITION_EXPONENT, VALUE_EXPONENT) => Some((a.index, b.index)),
                (VALUE_EXPONENT, POSITION_EXPONENT) => Some((b.index, a.index)),
                _ => None,
            };
            if let Some((position, value)) = pair {
                return Ok(Record::DataPair { position, value });
            }
        }
        _ => {}
    }
    if logical.iter().any(|f| f.exponent == OPERAND_EXPONENT) {
        Err(ChunkError::NoOpcode(chunk))
    } else {
        Err(ChunkError::UnrecognizedChunk(chunk))
    }
}

/// Human-readable form of any chunk, including undecodable ones.
pub fn disassemble(chunk: Chunk) -> String {
    match decode(chunk) {
        Ok(record) => record.to_string(),
        Err(err) => format!("?? ({err})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_encodings() {
        assert_eq!(encode_op(Op::Add).unwrap(), 81);
        assert_eq!(encode_push(3).unwrap(), 16 * 7u128.pow(5));
        assert_eq!(encode_data(2).unwrap(), 125);
        let pair = encode(&Record::DataPair { position: 1, value: 0 }, false).unwrap();
        assert_eq!(pair, 9 * 2);
        assert_eq!(decode(pair).unwrap(), Record::DataPair { position: 1, value: 0 });
    }

    #[test]
    fn reserved_chunks() {
        assert_eq!(decode(CORRUPT_CHUNK), Err(ChunkError::Corrupt));
        assert_eq!(decode(DEGENERATE_CHUNK), Ok(Record::Degenerate));
    }

    #[test]
    fn push_zero_collapses_onto_one_prime() {
        let chunk = encode_push(0).unwrap();
        assert_eq!(chunk, 512);
        assert_eq!(decode(chunk).unwrap(), Record::push(0));
        assert_eq!(analyze(chunk).unwrap().checksum, ChecksumStatus::Absent);
    }

    #[test]
    fn malformed_chunks_report_their_kind() {
        let two_opcodes = 81 * 625;
        assert_eq!(decode(two_opcodes), Err(ChunkError::AmbiguousOpcode(two_opcodes)));
        let bare_operand = 7u128.pow(5);
        assert_eq!(decode(bare_operand), Err(ChunkError::NoOpcode(bare_operand)));
        assert_eq!(decode(6), Err(ChunkError::UnrecognizedChunk(6)));
        let push_without_operand = 16;
        assert_eq!(
            decode(push_without_operand),
            Err(ChunkError::UnrecognizedChunk(push_without_operand))
        );
        // prime index 30 (127) is outside the opcode table
        let unknown = 127u128.pow(4);
        assert_eq!(decode(unknown), Err(ChunkError::UnrecognizedChunk(unknown)));
    }

    #[test]
    fn every_opcode_decodes_to_itself() {
        for op in Op::ALL.into_iter().filter(|op| *op != Op::Push) {
            assert_eq!(decode(encode_op(op).unwrap()).unwrap(), Record::op(op), "{op}");
        }
    }

    #[test]
    fn factors_beyond_the_prime_table_are_unrecognized() {
        let big = 1_000_000_007;
        assert_eq!(decode(big), Err(ChunkError::UnrecognizedChunk(big)));
        assert_eq!(decode(16 * big), Err(ChunkError::UnrecognizedChunk(16 * big)));
        assert!(disassemble(big).starts_with("??"));
    }

    #[test]
    fn checksum_is_peeled_when_valid() {
        // ADD: index 1 * exponent 4 = 4 -> checksum prime 11
        let chunk = encode(&Record::op(Op::Add), true).unwrap();
        assert_eq!(chunk, 81 * 11u128.pow(6));
        let analysis = analyze(chunk).unwrap();
        assert_eq!(analysis.checksum, ChecksumStatus::Valid { correction: 0 });
        assert_eq!(analysis.logical, vec![Factor::new(1, 4)]);
        assert_eq!(decode(chunk).unwrap(), Record::op(Op::Add));
    }

    #[test]
    fn checksum_correction_joins_logical_set() {
        let chunk = encode_checksummed(&Record::op(Op::Add), 2).unwrap();
        let analysis = analyze(chunk).unwrap();
        assert_eq!(analysis.checksum, ChecksumStatus::Valid { correction: 2 });
        assert!(analysis.logical.contains(&Factor::new(4, 2)));
        assert_eq!(decode(chunk).unwrap(), Record::op(Op::Add));
    }

    #[test]
    fn colliding_checksum_is_refused() {
        // DATA 0 carries index 0 and its checksum lands on index 0 too.
        assert_eq!(
            encode(&Record::Data(0), true),
            Err(ChunkError::ChecksumCollision(Record::Data(0)))
        );
        // PUSH 0 survives the same collision because the merged exponent
        // still reads back as the collapsed form.
        let chunk = encode(&Record::push(0), true).unwrap();
        assert_eq!(decode(chunk).unwrap(), Record::push(0));
    }

    #[test]
    fn operand_rules_are_enforced() {
        let bad = Record::Instruction(Instruction {
            op: Op::Add,
            operand: Some(1),
        });
        assert!(matches!(encode(&bad, false), Err(ChunkError::InvalidRecord(_))));
        let pair = Record::DataPair { position: 2, value: 2 };
        assert!(matches!(encode(&pair, false), Err(ChunkError::InvalidRecord(_))));
    }

    #[test]
    fn overflow_is_an_error() {
        let huge = [Factor::new(1000, 40)];
        assert_eq!(encode_factors(&huge), Err(ChunkError::Overflow));
    }

    #[test]
    fn disassembly_text() {
        assert_eq!(disassemble(encode_push(5).unwrap()), "PUSH 5");
        assert_eq!(disassemble(encode_op(Op::JumpIfZero).unwrap()), "JUMP_IF_ZERO");
        assert_eq!(disassemble(encode_data(4).unwrap()), "DATA 4");
        assert_eq!(disassemble(1), "DEGENERATE");
        assert!(disassemble(0).starts_with("??"));
    }

    proptest! {
        #[test]
        fn push_round_trips(k in 0usize..400) {
            let chunk = encode_push(k).unwrap();
            prop_assert_eq!(decode(chunk).unwrap(), Record::push(k));
        }

        #[test]
        fn checksummed_push_round_trips(k in 0usize..80) {
            let chunk = encode(&Record::push(k), true).unwrap();
            prop_assert_eq!(decode(chunk).unwrap(), Record::push(k));
        }

        #[test]
        fn corrupted_opcode_exponent_falls_back_to_raw(
            op_index in 1usize..23,
            exponent in prop::sample::select(vec![1u32, 2, 3, 5]),
        ) {
            let op = Op::from_prime_index(op_index).unwrap();
            let checksum = 4 * op_index;
            let corrupted = encode_factors(&[
                Factor::new(op_index, exponent),
                Factor::new(checksum, CHECKSUM_EXPONENT),
            ]).unwrap();
            let analysis = analyze(corrupted).unwrap();
            prop_assert_eq!(analysis.checksum, ChecksumStatus::Mismatch);
            prop_assert_eq!(&analysis.logical, &analysis.raw);
            prop_assert_ne!(decode(corrupted), Ok(Record::op(op)));
        }
    }
}
