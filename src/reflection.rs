//! Execution history and a read-only report computed from it.
//!
//! The engine appends an [`Event`] per observable action. Nothing here feeds
//! back into execution; the report is for drivers and humans.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::opcode::Op;

const DIVERSITY_WINDOW: usize = 100;
const PATTERN_WINDOW: usize = 1000;
const PATTERN_LENGTH: usize = 5;
const PATTERN_MIN_REPEATS: usize = 3;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Event {
    Executed { address: usize, op: Op },
    Output(i128),
    Poke { address: usize },
    InputRequested,
    InputSupplied(i128),
    Halted,
    Fault,
}

/// Bounded event log plus lifetime counters that survive eviction.
#[derive(Clone, Debug)]
pub struct ExecutionHistory {
    events: VecDeque<Event>,
    limit: usize,
    executed: u64,
    faults: u64,
    op_counts: BTreeMap<Op, u64>,
    pokes: BTreeMap<usize, u64>,
}

impl ExecutionHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(limit.min(4096)),
            limit: limit.max(1),
            executed: 0,
            faults: 0,
            op_counts: BTreeMap::new(),
            pokes: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, event: Event) {
        match event {
            Event::Executed { op, .. } => {
                self.executed += 1;
                *self.op_counts.entry(op).or_default() += 1;
            }
            Event::Poke { address } => *self.pokes.entry(address).or_default() += 1,
            Event::Fault => self.faults += 1,
            _ => {}
        }
        if self.events.len() == self.limit {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn faults(&self) -> u64 {
        self.faults
    }

    /// The most recent `n` executed opcodes, oldest first.
    pub fn recent_ops(&self, n: usize) -> Vec<Op> {
        let mut ops: Vec<Op> = self
            .events
            .iter()
            .rev()
            .filter_map(|event| match event {
                Event::Executed { op, .. } => Some(*op),
                _ => None,
            })
            .take(n)
            .collect();
        ops.reverse();
        ops
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatedSequence {
    pub ops: Vec<Op>,
    pub occurrences: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReflectionReport {
    pub instructions_executed: u64,
    pub faults: u64,
    pub fault_rate: f64,
    /// Distinct opcodes over total opcodes in the last 100 instructions.
    pub recent_diversity: f64,
    pub op_counts: BTreeMap<String, u64>,
    pub modifications: BTreeMap<usize, u64>,
    pub repeated_sequences: Vec<RepeatedSequence>,
}

impl ReflectionReport {
    pub fn from_history(history: &ExecutionHistory) -> Self {
        let fault_rate = if history.executed == 0 {
            0.0
        } else {
            history.faults as f64 / history.executed as f64
        };

        let recent = history.recent_ops(DIVERSITY_WINDOW);
        let recent_diversity = if recent.is_empty() {
            0.0
        } else {
            let unique: HashSet<&Op> = recent.iter().collect();
            unique.len() as f64 / recent.len() as f64
        };

        Self {
            instructions_executed: history.executed,
            faults: history.faults,
            fault_rate,
            recent_diversity,
            op_counts: history
                .op_counts
                .iter()
                .map(|(op, count)| (op.name().to_string(), *count))
                .collect(),
            modifications: history.pokes.clone(),
            repeated_sequences: repeated_sequences(&history.recent_ops(PATTERN_WINDOW)),
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

fn repeated_sequences(ops: &[Op]) -> Vec<RepeatedSequence> {
    let mut counts: HashMap<&[Op], usize> = HashMap::new();
    for window in ops.windows(PATTERN_LENGTH) {
        *counts.entry(window).or_default() += 1;
    }
    let mut repeated: Vec<RepeatedSequence> = counts
        .into_iter()
        .filter(|(_, occurrences)| *occurrences > PATTERN_MIN_REPEATS)
        .map(|(ops, occurrences)| RepeatedSequence {
            ops: ops.to_vec(),
            occurrences,
        })
        .collect();
    repeated.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then_with(|| a.ops.cmp(&b.ops)));
    repeated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executed(op: Op) -> Event {
        Event::Executed { address: 0, op }
    }

    #[test]
    fn counters_survive_eviction() {
        let mut history = ExecutionHistory::new(2);
        for _ in 0..5 {
            history.record(executed(Op::Nop));
        }
        history.record(Event::Fault);
        assert_eq!(history.events().count(), 2);
        assert_eq!(history.executed(), 5);
        assert_eq!(history.faults(), 1);
    }

    #[test]
    fn report_finds_loops() {
        let mut history = ExecutionHistory::new(1000);
        let body = [Op::Push, Op::Dup, Op::Print, Op::Push, Op::Jump];
        for _ in 0..6 {
            for op in body {
                history.record(executed(op));
            }
        }
        history.record(Event::Poke { address: 3 });

        let report = ReflectionReport::from_history(&history);
        assert_eq!(report.instructions_executed, 30);
        assert_eq!(report.fault_rate, 0.0);
        assert_eq!(report.op_counts["PUSH"], 12);
        assert_eq!(report.modifications[&3], 1);
        assert!((report.recent_diversity - 4.0 / 30.0).abs() < 1e-9);
        let top = &report.repeated_sequences[0];
        assert_eq!(top.ops, body.to_vec());
        assert_eq!(top.occurrences, 6);
    }

    #[test]
    fn empty_history_reports_zeroes() {
        let report = ReflectionReport::from_history(&ExecutionHistory::new(10));
        assert_eq!(report.instructions_executed, 0);
        assert_eq!(report.recent_diversity, 0.0);
        assert!(report.repeated_sequences.is_empty());
    }
}
