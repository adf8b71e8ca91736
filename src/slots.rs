//! Modification slots: addresses the running program is allowed to rewrite,
//! each with a short record of how the attempts after a rewrite went.

use std::collections::{BTreeSet, VecDeque};

use tracing::debug;

use crate::assembler::AssemblyError;
use crate::chunk::Chunk;

const RECENT_WINDOW: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationSlot {
    pub address: usize,
    pub last_instruction: Chunk,
    history: VecDeque<bool>,
    history_limit: usize,
}

impl ModificationSlot {
    pub fn new(address: usize, instruction: Chunk, history_limit: usize) -> Self {
        Self {
            address,
            last_instruction: instruction,
            history: VecDeque::with_capacity(history_limit),
            history_limit: history_limit.max(1),
        }
    }

    pub fn record(&mut self, success: bool) {
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(success);
    }

    pub fn history(&self) -> impl Iterator<Item = bool> + '_ {
        self.history.iter().copied()
    }

    /// Successes among the three most recent outcomes.
    pub fn recent_score(&self) -> usize {
        self.history.iter().rev().take(RECENT_WINDOW).filter(|s| **s).count()
    }
}

/// Next address after `pointer` (wrapping at `program_len`) that is neither
/// address 0 nor in `protected`.
pub fn next_target(
    pointer: usize,
    program_len: usize,
    protected: &BTreeSet<usize>,
) -> Result<usize, AssemblyError> {
    let mut candidate = pointer;
    for _ in 0..program_len {
        candidate = (candidate + 1) % program_len;
        if candidate != 0 && !protected.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(AssemblyError::InvalidModificationTarget(format!(
        "no unprotected address in a program of length {program_len}"
    )))
}

#[derive(Debug, Clone)]
pub struct SlotBank {
    slots: Vec<ModificationSlot>,
    pointer: usize,
    modifications: VecDeque<usize>,
    modification_limit: usize,
}

impl SlotBank {
    pub fn new(addresses: &[usize], instruction: Chunk, history_limit: usize, modification_limit: usize) -> Self {
        Self {
            slots: addresses
                .iter()
                .map(|&address| ModificationSlot::new(address, instruction, history_limit))
                .collect(),
            pointer: addresses.first().copied().unwrap_or(0),
            modifications: VecDeque::with_capacity(modification_limit),
            modification_limit: modification_limit.max(1),
        }
    }

    pub fn slots(&self) -> &[ModificationSlot] {
        &self.slots
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// Addresses handed out by `plan`, oldest first.
    pub fn modifications(&self) -> impl Iterator<Item = usize> + '_ {
        self.modifications.iter().copied()
    }

    /// Indices of the slots to rewrite: `1 + failure_streak / 2` of them,
    /// least successful first.
    pub fn slots_to_update(&self, failure_streak: usize) -> Vec<usize> {
        let count = self.slots.len().min(1 + failure_streak / 2);
        let mut order: Vec<usize> = (0..self.slots.len()).collect();
        order.sort_by_key(|&i| self.slots[i].recent_score());
        order.truncate(count);
        order
    }

    /// Chooses slots for this build and moves each to the next address from
    /// the rotating pointer. Slot addresses stay distinct: a slot moving onto
    /// another's address trades places with it.
    pub fn plan(
        &mut self,
        failure_streak: usize,
        program_len: usize,
        protected: &BTreeSet<usize>,
    ) -> Result<Vec<usize>, AssemblyError> {
        let chosen = self.slots_to_update(failure_streak);
        let mut addresses = Vec::with_capacity(chosen.len());
        for i in chosen {
            let target = next_target(self.pointer, program_len, protected)?;
            let previous = self.slots[i].address;
            if let Some(other) = self.slots.iter_mut().find(|s| s.address == target) {
                other.address = previous;
            }
            self.slots[i].address = target;
            self.pointer = target;
            if self.modifications.len() == self.modification_limit {
                self.modifications.pop_front();
            }
            self.modifications.push_back(target);
            addresses.push(target);
        }
        debug!(?addresses, failure_streak, "selected modification slots");
        Ok(addresses)
    }

    /// Records the outcome of the attempt that followed a rewrite at
    /// `address`. Returns `false` if no slot lives there.
    pub fn record_outcome(&mut self, address: usize, instruction: Chunk, success: bool) -> bool {
        match self.slots.iter_mut().find(|s| s.address == address) {
            Some(slot) => {
                slot.last_instruction = instruction;
                slot.record(success);
                true
            }
            None => false,
        }
    }
}
