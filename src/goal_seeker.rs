//! Generator for the self-modifying goal-seeking program.
//!
//! Layout:
//!
//! ```text
//! 0            PUSH attempt            rewritten after every feedback
//! 1..=slots    NOP ...                 modification slots
//!              DUP PRINT INPUT         show the attempt, read feedback
//!              == success ? success path : failure path
//! success      drain frame, clear failure count, INPUT new target,
//!              rewrite address 0, restart
//! failure      drain frame, count failure, maybe print the stuck signal,
//!              pick the next attempt, rewrite one slot, rewrite address 0,
//!              restart
//! unwind       subroutine: drop everything down to and including the marker
//! guard        HALT
//! cells        DATA previous attempt, failure count, last slot, last kind
//! ```
//!
//! Only the top two stack cells are reachable with DUP/SWAP/DROP, so loop
//! state lives in the data cells (PEEK_CHUNK + FACTORIZE to read,
//! BUILD_CHUNK + POKE_CHUNK to write). Each iteration starts from
//! `[marker, 0 x slots]`; the zero pads give slot ADDs something to consume
//! so the marker survives, and `unwind` drains down to it.

use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::assembler::{Assembler, AssemblyError, SlotBindings, SlotRef};
use crate::chunk::{self, Chunk, DATA_EXPONENT, OPCODE_EXPONENT, OPERAND_EXPONENT, Record};
use crate::config::{AssemblerConfig, ProtocolConfig};
use crate::opcode::Op;
use crate::slots::SlotBank;
use crate::vm::Word;

pub const MAIN_ADDRESS: usize = 0;

/// Instruction kinds a slot can be rewritten to, as drawn by RANDOM.
pub const KIND_PUSH: usize = 0;
pub const KIND_ADD: usize = 1;
pub const KIND_NOP: usize = 2;
const KIND_COUNT: usize = 3;

const MAIN: &str = "main";
const SUCCESS: &str = "success";
const FAILURE: &str = "failure";
const NEXT_ATTEMPT: &str = "failure.next_attempt";
const ACCEPT: &str = "failure.accept";
const SLOT_CHOSEN: &str = "failure.slot_chosen";
const NOT_ADD: &str = "failure.not_add";
const BUILD_PUSH: &str = "failure.build_push";
const WRITE_SLOT: &str = "failure.write_slot";
const UNWIND: &str = "unwind";
const UNWIND_DROP: &str = "unwind.drop";
const GUARD: &str = "guard";
const CELL_PREVIOUS: &str = "cell.previous_attempt";
const CELL_FAILURES: &str = "cell.failure_count";
const CELL_LAST_SLOT: &str = "cell.last_slot";
const CELL_LAST_KIND: &str = "cell.last_kind";

/// Addresses of the program's data cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellLayout {
    pub previous_attempt: usize,
    pub failure_count: usize,
    pub last_slot: usize,
    pub last_kind: usize,
}

impl CellLayout {
    /// Reads a data cell from a (possibly rewritten) program.
    pub fn read(program: &[Chunk], address: usize) -> Option<usize> {
        match chunk::decode(*program.get(address)?) {
            Ok(Record::Data(value)) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoalSeeker {
    pub program: Vec<Chunk>,
    pub labels: BTreeMap<String, usize>,
    pub placeholders: Vec<usize>,
    pub selected_slots: Vec<usize>,
    pub cells: CellLayout,
    frame_marker: usize,
    slot_count: usize,
}

impl GoalSeeker {
    /// Stack the program expects at address 0.
    pub fn initial_stack(&self) -> Vec<Word> {
        let mut stack = vec![self.frame_marker as Word];
        stack.extend(std::iter::repeat(0).take(self.slot_count));
        stack
    }

    pub fn slot_addresses(&self) -> Vec<usize> {
        (1..=self.slot_count).collect()
    }
}

pub struct GoalSeekerBuilder {
    config: AssemblerConfig,
    protocol: ProtocolConfig,
    slots: SlotBank,
}

impl GoalSeekerBuilder {
    pub fn new(config: AssemblerConfig, protocol: ProtocolConfig) -> Result<Self, AssemblyError> {
        let invalid = |msg: &str| Err(AssemblyError::InvalidConfig(msg.to_string()));
        if config.slot_count == 0 {
            return invalid("at least one modification slot is required");
        }
        if config.attempt_modulus < 2 || config.random_offset_bound == 0 {
            return invalid("attempt_modulus must be >= 2 and random_offset_bound >= 1");
        }
        if config.frame_marker < config.attempt_modulus {
            return invalid("frame_marker must not be a reachable attempt value");
        }
        let addresses: Vec<usize> = (1..=config.slot_count).collect();
        let slots = SlotBank::new(
            &addresses,
            chunk::encode_op(Op::Nop)?,
            config.slot_history_limit,
            config.modification_history_limit,
        );
        Ok(Self {
            config,
            protocol,
            slots,
        })
    }

    pub fn slots(&self) -> &SlotBank {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut SlotBank {
        &mut self.slots
    }

    /// Builds a fresh program that starts by attempting `initial_target`.
    /// A longer `failure_streak` lets the failure path choose between more
    /// modification slots.
    pub fn build(&mut self, initial_target: usize, failure_streak: usize) -> Result<GoalSeeker, AssemblyError> {
        let selected_count = self.slots.slots_to_update(failure_streak).len();
        let mut asm = Assembler::new();
        self.emit_main(&mut asm, initial_target)?;
        self.emit_success(&mut asm)?;
        self.emit_failure(&mut asm, selected_count)?;
        self.emit_unwind(&mut asm)?;
        asm.label(GUARD)?;
        asm.emit(Op::Halt)?;
        asm.label(CELL_PREVIOUS)?;
        asm.data(initial_target)?;
        asm.label(CELL_FAILURES)?;
        asm.data(0)?;
        asm.label(CELL_LAST_SLOT)?;
        asm.data(0)?;
        asm.label(CELL_LAST_KIND)?;
        asm.data(KIND_NOP)?;

        let program_len = asm.here();
        let protected: BTreeSet<usize> = (0..program_len)
            .filter(|a| !(1..=self.config.slot_count).contains(a))
            .collect();
        let selected = self.slots.plan(failure_streak, program_len, &protected)?;
        let assembled = asm.finish(&SlotBindings::new(selected.clone()))?;

        let cell = |name: &str| {
            assembled
                .labels
                .get(name)
                .copied()
                .ok_or_else(|| AssemblyError::UndefinedLabel(name.to_string()))
        };
        let cells = CellLayout {
            previous_attempt: cell(CELL_PREVIOUS)?,
            failure_count: cell(CELL_FAILURES)?,
            last_slot: cell(CELL_LAST_SLOT)?,
            last_kind: cell(CELL_LAST_KIND)?,
        };
        info!(
            len = assembled.program.len(),
            initial_target,
            failure_streak,
            slots = ?selected,
            "generated goal-seeker program"
        );
        Ok(GoalSeeker {
            program: assembled.program,
            labels: assembled.labels,
            placeholders: assembled.placeholders,
            selected_slots: selected,
            cells,
            frame_marker: self.config.frame_marker,
            slot_count: self.config.slot_count,
        })
    }

    fn emit_main(&self, asm: &mut Assembler, initial_target: usize) -> Result<(), AssemblyError> {
        asm.label(MAIN)?;
        asm.push(initial_target)?;
        for _ in 0..self.config.slot_count {
            asm.emit(Op::Nop)?;
        }
        asm.emit_all(&[Op::Dup, Op::Print, Op::Input])?;
        asm.push(self.protocol.success_feedback)?;
        asm.emit(Op::CompareEq)?;
        asm.branch_if_false(FAILURE)
    }

    // [marker, .., attempt] -> restart with the controller's next target
    fn emit_success(&self, asm: &mut Assembler) -> Result<(), AssemblyError> {
        asm.label(SUCCESS)?;
        asm.call(UNWIND)?;
        asm.emit(Op::Drop)?;
        asm.push(0)?;
        store_cell(asm, CELL_FAILURES)?;
        asm.emit(Op::Input)?;
        asm.emit(Op::Dup)?;
        store_cell(asm, CELL_PREVIOUS)?;
        poke_main(asm)?;
        asm.push_slot(SlotRef::Default)?;
        store_cell(asm, CELL_LAST_SLOT)?;
        asm.push(KIND_NOP)?;
        store_cell(asm, CELL_LAST_KIND)?;
        self.restart(asm)
    }

    fn emit_failure(&self, asm: &mut Assembler, selected_count: usize) -> Result<(), AssemblyError> {
        let c = &self.config;
        asm.label(FAILURE)?;
        asm.call(UNWIND)?;

        // failure count, stuck signal
        load_cell(asm, CELL_FAILURES)?;
        asm.push(1)?;
        asm.emit(Op::Add)?;
        asm.emit(Op::Dup)?;
        store_cell(asm, CELL_FAILURES)?;
        asm.push(c.max_failures_before_stuck)?;
        asm.emit(Op::CompareEq)?;
        asm.branch_if_false(NEXT_ATTEMPT)?;
        asm.push(self.protocol.stuck_signal)?;
        asm.emit(Op::Print)?;

        // (attempt + RANDOM(bound) + increment) mod modulus, never the previous one
        asm.label(NEXT_ATTEMPT)?;
        asm.push(c.random_offset_bound)?;
        asm.emit(Op::Random)?;
        asm.push(c.attempt_increment)?;
        asm.emit_all(&[Op::Add, Op::Add])?;
        asm.push(c.attempt_modulus)?;
        asm.emit(Op::Mod)?;
        asm.emit(Op::Dup)?;
        load_cell(asm, CELL_PREVIOUS)?;
        asm.emit(Op::CompareEq)?;
        asm.branch_if_false(ACCEPT)?;
        asm.push(1)?;
        asm.emit(Op::Add)?;
        asm.push(c.attempt_modulus)?;
        asm.emit(Op::Mod)?;
        asm.label(ACCEPT)?;

        // slot draw: [attempt] -> [attempt, address]
        asm.push(selected_count)?;
        asm.emit(Op::Random)?;
        for i in 0..selected_count.saturating_sub(1) {
            let skip = format!("failure.slot_skip.{i}");
            asm.emit(Op::Dup)?;
            asm.push(i)?;
            asm.emit(Op::CompareEq)?;
            asm.branch_if_false(&skip)?;
            asm.emit(Op::Drop)?;
            asm.push_slot(SlotRef::Selected(i))?;
            asm.jump(SLOT_CHOSEN)?;
            asm.label(&skip)?;
        }
        asm.emit(Op::Drop)?;
        asm.push_slot(SlotRef::Selected(selected_count.saturating_sub(1)))?;
        asm.label(SLOT_CHOSEN)?;
        asm.emit(Op::Dup)?;
        store_cell(asm, CELL_LAST_SLOT)?;

        // kind draw: [attempt, address] -> [attempt, address, chunk]
        asm.push(KIND_COUNT)?;
        asm.emit(Op::Random)?;
        asm.emit(Op::Dup)?;
        store_cell(asm, CELL_LAST_KIND)?;
        asm.emit(Op::Dup)?;
        asm.push(KIND_ADD)?;
        asm.emit(Op::CompareEq)?;
        asm.branch_if_false(NOT_ADD)?;
        asm.emit(Op::Drop)?;
        build_op(asm, Op::Add)?;
        asm.jump(WRITE_SLOT)?;
        asm.label(NOT_ADD)?;
        asm.push(KIND_NOP)?;
        asm.emit(Op::CompareEq)?;
        asm.branch_if_false(BUILD_PUSH)?;
        build_op(asm, Op::Nop)?;
        asm.jump(WRITE_SLOT)?;
        asm.label(BUILD_PUSH)?;
        asm.push(0)?;
        build_push(asm)?;

        asm.label(WRITE_SLOT)?;
        asm.emit_all(&[Op::Swap, Op::PokeChunk])?;
        asm.emit(Op::Dup)?;
        store_cell(asm, CELL_PREVIOUS)?;
        poke_main(asm)?;
        self.restart(asm)
    }

    // [marker, g.., r] -> [r]
    fn emit_unwind(&self, asm: &mut Assembler) -> Result<(), AssemblyError> {
        asm.label(UNWIND)?;
        asm.emit_all(&[Op::Swap, Op::Dup])?;
        asm.push(self.config.frame_marker)?;
        asm.emit(Op::CompareEq)?;
        asm.branch_if_false(UNWIND_DROP)?;
        asm.emit_all(&[Op::Drop, Op::Return])?;
        asm.label(UNWIND_DROP)?;
        asm.emit(Op::Drop)?;
        asm.jump(UNWIND)
    }

    fn restart(&self, asm: &mut Assembler) -> Result<(), AssemblyError> {
        asm.push(self.config.frame_marker)?;
        for _ in 0..self.config.slot_count {
            asm.push(0)?;
        }
        asm.jump(MAIN)
    }
}

// [] -> [value]
fn load_cell(asm: &mut Assembler, cell: &str) -> Result<(), AssemblyError> {
    asm.push_label(cell)?;
    asm.emit_all(&[Op::PeekChunk, Op::Factorize, Op::Drop, Op::Swap, Op::Drop])
}

// [value] -> []
fn store_cell(asm: &mut Assembler, cell: &str) -> Result<(), AssemblyError> {
    asm.push(DATA_EXPONENT as usize)?;
    asm.emit(Op::Swap)?;
    asm.push(1)?;
    asm.emit(Op::BuildChunk)?;
    asm.push_label(cell)?;
    asm.emit(Op::PokeChunk)?;
    Ok(())
}

// [] -> [chunk of `op`]
fn build_op(asm: &mut Assembler, op: Op) -> Result<(), AssemblyError> {
    asm.push(OPCODE_EXPONENT as usize)?;
    asm.push(op.prime_index())?;
    asm.push(1)?;
    asm.emit(Op::BuildChunk)?;
    Ok(())
}

// [operand] -> [chunk of PUSH operand]
fn build_push(asm: &mut Assembler) -> Result<(), AssemblyError> {
    asm.push(OPERAND_EXPONENT as usize)?;
    asm.emit(Op::Swap)?;
    asm.push(OPCODE_EXPONENT as usize)?;
    asm.push(Op::Push.prime_index())?;
    asm.push(2)?;
    asm.emit(Op::BuildChunk)?;
    Ok(())
}

// [attempt] -> [], address 0 now pushes `attempt`
fn poke_main(asm: &mut Assembler) -> Result<(), AssemblyError> {
    build_push(asm)?;
    asm.push_label(MAIN)?;
    asm.emit(Op::PokeChunk)?;
    Ok(())
}
