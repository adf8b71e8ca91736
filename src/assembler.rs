//! Two-pass assembler.
//!
//! Forward references are emitted as a `PUSH 0` placeholder and recorded as
//! `(address, label)`; `finish` backpatches them once every label is known.
//! Slot references work the same way but resolve to modification-slot
//! addresses chosen at build time. A program is only returned once no
//! placeholder survives.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::chunk::{self, Chunk, ChunkError, Instruction, Record};
use crate::opcode::Op;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("unresolved placeholders at addresses {0:?}")]
    UnresolvedPlaceholder(Vec<usize>),
    #[error("invalid modification target: {0}")]
    InvalidModificationTarget(String),
    #[error("label `{0}` is referenced but never defined")]
    UndefinedLabel(String),
    #[error("label `{0}` is defined twice")]
    DuplicateLabel(String),
    #[error("invalid assembler configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotRef {
    /// The i-th selected slot; missing entries fall back to the last one.
    Selected(usize),
    /// Carry value used when no slot was touched yet.
    Default,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotBindings {
    pub selected: Vec<usize>,
}

impl SlotBindings {
    pub fn new(selected: Vec<usize>) -> Self {
        Self { selected }
    }

    pub fn resolve(&self, slot: SlotRef) -> Option<usize> {
        match slot {
            SlotRef::Selected(i) => self.selected.get(i).or(self.selected.last()).copied(),
            SlotRef::Default => self.selected.first().copied(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub program: Vec<Chunk>,
    pub labels: BTreeMap<String, usize>,
    /// Every address that held a placeholder, ascending.
    pub placeholders: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<Chunk>,
    labels: BTreeMap<String, usize>,
    label_refs: Vec<(usize, String)>,
    slot_refs: Vec<(usize, SlotRef)>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn raw(&mut self, chunk: Chunk) -> usize {
        self.code.push(chunk);
        self.code.len() - 1
    }

    pub fn emit(&mut self, op: Op) -> Result<usize, AssemblyError> {
        Ok(self.raw(chunk::encode_op(op)?))
    }

    pub fn emit_all(&mut self, ops: &[Op]) -> Result<(), AssemblyError> {
        for op in ops {
            self.emit(*op)?;
        }
        Ok(())
    }

    pub fn push(&mut self, value: usize) -> Result<usize, AssemblyError> {
        Ok(self.raw(chunk::encode_push(value)?))
    }

    pub fn data(&mut self, value: usize) -> Result<usize, AssemblyError> {
        Ok(self.raw(chunk::encode_data(value)?))
    }

    pub fn label(&mut self, name: &str) -> Result<usize, AssemblyError> {
        let here = self.here();
        if self.labels.insert(name.to_string(), here).is_some() {
            return Err(AssemblyError::DuplicateLabel(name.to_string()));
        }
        Ok(here)
    }

    pub fn address_of(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    /// Pushes a label's address, deferring forward references.
    pub fn push_label(&mut self, name: &str) -> Result<usize, AssemblyError> {
        if let Some(address) = self.address_of(name) {
            return self.push(address);
        }
        let at = self.push(0)?;
        self.label_refs.push((at, name.to_string()));
        Ok(at)
    }

    pub fn push_slot(&mut self, slot: SlotRef) -> Result<usize, AssemblyError> {
        let at = self.push(0)?;
        self.slot_refs.push((at, slot));
        Ok(at)
    }

    pub fn jump(&mut self, label: &str) -> Result<(), AssemblyError> {
        self.push_label(label)?;
        self.emit(Op::Jump)?;
        Ok(())
    }

    pub fn call(&mut self, label: &str) -> Result<(), AssemblyError> {
        self.push_label(label)?;
        self.emit(Op::Call)?;
        Ok(())
    }

    /// Consumes the condition on top of the stack and jumps to `label` when
    /// it is false.
    pub fn branch_if_false(&mut self, label: &str) -> Result<(), AssemblyError> {
        self.push_label(label)?;
        self.emit(Op::Swap)?;
        self.emit(Op::JumpIfZero)?;
        Ok(())
    }

    pub fn finish(self, bindings: &SlotBindings) -> Result<Assembled, AssemblyError> {
        let Assembler {
            mut code,
            labels,
            label_refs,
            slot_refs,
        } = self;
        let mut placeholders = Vec::with_capacity(label_refs.len() + slot_refs.len());

        for (at, name) in label_refs {
            let target = *labels
                .get(&name)
                .ok_or_else(|| AssemblyError::UndefinedLabel(name.clone()))?;
            code[at] = chunk::encode_push(target)?;
            placeholders.push(at);
        }

        for (at, slot) in slot_refs {
            let target = bindings
                .resolve(slot)
                .ok_or_else(|| AssemblyError::InvalidModificationTarget(format!("{slot:?} is not bound")))?;
            if target == 0 {
                return Err(AssemblyError::InvalidModificationTarget(
                    "address 0 is protected".to_string(),
                ));
            }
            code[at] = chunk::encode_push(target)?;
            placeholders.push(at);
        }

        placeholders.sort_unstable();
        validate_placeholders(&code, &placeholders)?;
        debug!(
            len = code.len(),
            labels = labels.len(),
            placeholders = placeholders.len(),
            "assembled program"
        );
        Ok(Assembled {
            program: code,
            labels,
            placeholders,
        })
    }
}

/// Fails if any of `addresses` holds something other than a PUSH with a
/// non-zero operand.
pub fn validate_placeholders(program: &[Chunk], addresses: &[usize]) -> Result<(), AssemblyError> {
    let unresolved: Vec<usize> = addresses
        .iter()
        .copied()
        .filter(|&at| {
            !matches!(
                program.get(at).map(|c| chunk::decode(*c)),
                Some(Ok(Record::Instruction(Instruction {
                    op: Op::Push,
                    operand: Some(operand),
                }))) if operand != 0
            )
        })
        .collect();
    if unresolved.is_empty() {
        Ok(())
    } else {
        Err(AssemblyError::UnresolvedPlaceholder(unresolved))
    }
}

/// One chunk replacement in a modification plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    pub address: usize,
    pub chunk: Chunk,
}

/// Applies `patches` in address order. Nothing is written if any address is
/// out of range or protected.
pub fn apply_patches(
    program: &mut [Chunk],
    patches: &[Patch],
    protected: &[usize],
) -> Result<usize, AssemblyError> {
    let mut ordered = patches.to_vec();
    ordered.sort_by_key(|p| p.address);
    if let Some(bad) = ordered
        .iter()
        .find(|p| p.address >= program.len() || protected.contains(&p.address))
    {
        return Err(AssemblyError::InvalidModificationTarget(format!(
            "cannot patch address {}",
            bad.address
        )));
    }
    for patch in &ordered {
        program[patch.address] = patch.chunk;
    }
    Ok(ordered.len())
}

/// Rewrites the operand of the PUSH at `address`.
pub fn retarget_push(program: &mut [Chunk], address: usize, operand: usize) -> Result<(), AssemblyError> {
    let current = program
        .get(address)
        .map(|c| chunk::decode(*c))
        .transpose()?
        .and_then(|record| record.as_instruction());
    match current {
        Some(Instruction { op: Op::Push, .. }) => {
            program[address] = chunk::encode_push(operand)?;
            Ok(())
        }
        _ => Err(AssemblyError::InvalidModificationTarget(format!(
            "address {address} is not a PUSH"
        ))),
    }
}

/// Points the control transfer at `transfer_address` to `target` by
/// rewriting the PUSH that feeds it.
pub fn retarget_jump(
    program: &mut [Chunk],
    push_address: usize,
    transfer_address: usize,
    target: usize,
) -> Result<(), AssemblyError> {
    if target >= program.len() || push_address >= transfer_address {
        return Err(AssemblyError::InvalidModificationTarget(format!(
            "jump from {transfer_address} to {target}"
        )));
    }
    let transfer = program
        .get(transfer_address)
        .map(|c| chunk::decode(*c))
        .transpose()?
        .and_then(|record| record.as_instruction())
        .map(|instruction| instruction.op);
    if !matches!(transfer, Some(Op::Jump | Op::JumpIfZero | Op::Call)) {
        return Err(AssemblyError::InvalidModificationTarget(format!(
            "address {transfer_address} is not a control transfer"
        )));
    }
    retarget_push(program, push_address, target)
}
