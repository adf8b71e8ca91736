use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::chunk::{self, Chunk, ChunkError, Factor, Record};
use crate::config::VmConfig;
use crate::memory::ProgramMemory;
use crate::opcode::Op;
use crate::primes::{self, PrimeError};
use crate::reflection::{Event, ExecutionHistory};

/// Operand stack value.
pub type Word = i128;

pub const TRUE_WORD: Word = 1;
pub const FALSE_WORD: Word = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Ready,
    Running,
    AwaitingInput,
    Halted,
    Errored,
}

impl Phase {
    pub fn is_stopped(self) -> bool {
        matches!(self, Phase::Halted | Phase::Errored)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("stack underflow at address {address} ({op})")]
    StackUnderflow { address: usize, op: Op },
    #[error("stack depth limit {limit} exceeded")]
    StackOverflow { limit: usize },
    #[error("invalid address {0}")]
    InvalidAddress(Word),
    #[error("RETURN with an empty call stack")]
    ReturnStackUnderflow,
    #[error("MOD by zero")]
    DivisionByZero,
    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(Op),
    #[error("invalid operand {value} for {op}")]
    InvalidOperand { op: Op, value: Word },
    #[error("address {address} holds `{record}`, not an instruction")]
    NotAnInstruction { address: usize, record: Record },
    #[error("cannot decode chunk at address {address}: {source}")]
    Decode {
        address: usize,
        #[source]
        source: ChunkError,
    },
    #[error(transparent)]
    Codec(#[from] ChunkError),
    #[error(transparent)]
    Prime(#[from] PrimeError),
    #[error("engine is waiting for input; call resume")]
    AwaitingInput,
    #[error("resume called while {0:?}")]
    NotAwaitingInput(Phase),
    #[error("engine already stopped ({0:?})")]
    Stopped(Phase),
}

/// State observed after one `step` or `resume` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub instruction_pointer: usize,
    pub stack: Vec<Word>,
    pub output_this_step: Option<Word>,
    pub halted: bool,
    pub error: Option<String>,
    pub needs_input: bool,
    /// Full program, present only when memory changed during the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<Vec<Chunk>>,
}

pub struct ChunkVM {
    memory: ProgramMemory,
    stack: Vec<Word>,
    call_stack: Vec<usize>,
    ip: usize,
    phase: Phase,
    last_error: Option<VmError>,
    output_log: Vec<String>,
    rng: StdRng,
    max_stack_depth: usize,
    history: ExecutionHistory,
}

impl ChunkVM {
    pub fn new(program: Vec<Chunk>) -> Self {
        Self::with_config(program, Vec::new(), &VmConfig::default())
    }

    pub fn with_config(program: Vec<Chunk>, stack: Vec<Word>, config: &VmConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            memory: ProgramMemory::new(program),
            stack,
            call_stack: Vec::new(),
            ip: 0,
            phase: Phase::Ready,
            last_error: None,
            output_log: Vec::new(),
            rng,
            max_stack_depth: config.max_stack_depth,
            history: ExecutionHistory::new(config.history_limit),
        }
    }

    /// Returns the engine to `Ready` with a new program and stack. The RNG
    /// stream and history continue.
    pub fn reinitialize(&mut self, program: Vec<Chunk>, stack: Vec<Word>) {
        self.memory = ProgramMemory::new(program);
        self.stack = stack;
        self.call_stack.clear();
        self.ip = 0;
        self.phase = Phase::Ready;
        self.last_error = None;
        self.output_log.clear();
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn stack(&self) -> &[Word] {
        &self.stack
    }

    pub fn program(&self) -> &[Chunk] {
        self.memory.as_slice()
    }

    pub fn output_log(&self) -> &[String] {
        &self.output_log
    }

    pub fn last_output(&self) -> Option<&str> {
        self.output_log.last().map(String::as_str)
    }

    pub fn last_error(&self) -> Option<&VmError> {
        self.last_error.as_ref()
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    pub fn needs_input(&self) -> bool {
        self.phase == Phase::AwaitingInput
    }

    /// Executes exactly one instruction.
    ///
    /// Instruction faults are not returned as `Err`: they move the engine to
    /// `Errored` and appear in [`StepResult::error`]. `Err` means the call
    /// itself was not allowed in the current phase, and nothing changed.
    pub fn step(&mut self) -> Result<StepResult, VmError> {
        match self.phase {
            Phase::AwaitingInput => return Err(VmError::AwaitingInput),
            Phase::Halted | Phase::Errored => return Err(VmError::Stopped(self.phase)),
            Phase::Ready | Phase::Running => {}
        }
        self.phase = Phase::Running;
        Ok(self.advance())
    }

    /// Supplies the value an INPUT asked for, then executes the next
    /// instruction.
    pub fn resume(&mut self, value: Word) -> Result<StepResult, VmError> {
        if self.phase != Phase::AwaitingInput {
            return Err(VmError::NotAwaitingInput(self.phase));
        }
        self.history.record(Event::InputSupplied(value));
        self.phase = Phase::Running;
        if let Err(err) = self.push(value) {
            self.fail(err);
            return Ok(self.snapshot(None));
        }
        Ok(self.advance())
    }

    /// Steps until the engine needs input, stops, or `max_steps` run out.
    /// Returns the last step's result, or a plain snapshot when no step ran.
    pub fn run_until_blocked(&mut self, max_steps: usize) -> Result<StepResult, VmError> {
        let mut last = None;
        for _ in 0..max_steps {
            if self.phase != Phase::Ready && self.phase != Phase::Running {
                break;
            }
            let result = self.step()?;
            let blocked = result.needs_input || result.halted || result.error.is_some();
            last = Some(result);
            if blocked {
                break;
            }
        }
        Ok(last.unwrap_or_else(|| self.snapshot(None)))
    }

    pub fn snapshot(&mut self, output: Option<Word>) -> StepResult {
        StepResult {
            instruction_pointer: self.ip,
            stack: self.stack.clone(),
            output_this_step: output,
            halted: self.phase == Phase::Halted,
            error: self.last_error.as_ref().map(ToString::to_string),
            needs_input: self.phase == Phase::AwaitingInput,
            program: self.memory.take_dirty().then(|| self.memory.to_vec()),
        }
    }

    fn advance(&mut self) -> StepResult {
        match self.execute_next() {
            Ok(output) => self.snapshot(output),
            Err(err) => {
                self.fail(err);
                self.snapshot(None)
            }
        }
    }

    fn fail(&mut self, err: VmError) {
        warn!(ip = self.ip, error = %err, "engine fault");
        self.history.record(Event::Fault);
        self.last_error = Some(err);
        self.phase = Phase::Errored;
    }

    fn execute_next(&mut self) -> Result<Option<Word>, VmError> {
        let address = self.ip;
        let Some(raw) = self.memory.read(address) else {
            debug!(address, "ran past end of program, halting");
            self.halt();
            return Ok(None);
        };
        let record = chunk::decode(raw).map_err(|source| VmError::Decode { address, source })?;
        let instruction = match record {
            Record::Instruction(instruction) => instruction,
            Record::Degenerate => {
                self.ip += 1;
                return Ok(None);
            }
            other => {
                return Err(VmError::NotAnInstruction {
                    address,
                    record: other,
                });
            }
        };

        let op = instruction.op;
        if self.stack.len() < op.pops() {
            return Err(VmError::StackUnderflow { address, op });
        }
        trace!(address, %op, depth = self.stack.len(), "step");
        self.history.record(Event::Executed { address, op });
        self.ip = address + 1;
        self.execute(address, op, instruction.operand)
    }

    fn execute(&mut self, address: usize, op: Op, operand: Option<usize>) -> Result<Option<Word>, VmError> {
        match op {
            Op::Push => {
                let value = operand.ok_or(VmError::InvalidOperand { op, value: -1 })?;
                self.push(value as Word)?;
            }
            Op::Add => {
                let (a, b) = self.pop_pair(address, op)?;
                self.push(a.checked_add(b).ok_or(VmError::ArithmeticOverflow(op))?)?;
            }
            Op::Sub => {
                let (a, b) = self.pop_pair(address, op)?;
                self.push(a.checked_sub(b).ok_or(VmError::ArithmeticOverflow(op))?)?;
            }
            Op::Mod => {
                let (a, b) = self.pop_pair(address, op)?;
                if b == 0 {
                    return Err(VmError::DivisionByZero);
                }
                self.push(a.checked_rem_euclid(b).ok_or(VmError::ArithmeticOverflow(op))?)?;
            }
            Op::CompareEq => {
                let (a, b) = self.pop_pair(address, op)?;
                self.push(if a == b { TRUE_WORD } else { FALSE_WORD })?;
            }
            Op::Dup => {
                let top = *self.stack.last().ok_or(VmError::StackUnderflow { address, op })?;
                self.push(top)?;
            }
            Op::Swap => {
                let len = self.stack.len();
                self.stack.swap(len - 1, len - 2);
            }
            Op::Drop => {
                self.pop(address, op)?;
            }
            Op::Print => {
                let value = self.pop(address, op)?;
                self.output_log.push(value.to_string());
                self.history.record(Event::Output(value));
                return Ok(Some(value));
            }
            Op::Input => {
                self.phase = Phase::AwaitingInput;
                self.history.record(Event::InputRequested);
            }
            Op::Halt => self.halt(),
            Op::Nop => {}
            Op::Jump => {
                let target = self.pop(address, op)?;
                self.ip = self.address(target)?;
            }
            Op::JumpIfZero => {
                let condition = self.pop(address, op)?;
                let target = self.pop(address, op)?;
                if condition == FALSE_WORD {
                    self.ip = self.address(target)?;
                }
            }
            Op::Call => {
                let target = self.pop(address, op)?;
                let target = self.address(target)?;
                if self.call_stack.len() >= self.max_stack_depth {
                    return Err(VmError::StackOverflow {
                        limit: self.max_stack_depth,
                    });
                }
                self.call_stack.push(self.ip);
                self.ip = target;
            }
            Op::Return => {
                self.ip = self.call_stack.pop().ok_or(VmError::ReturnStackUnderflow)?;
            }
            Op::PokeChunk => {
                let target = self.pop(address, op)?;
                let value = self.pop(address, op)?;
                let target = self.address(target)?;
                let chunk = Chunk::try_from(value).map_err(|_| VmError::InvalidOperand { op, value })?;
                self.memory.write(target, chunk);
                self.history.record(Event::Poke { address: target });
                debug!(target, chunk = %chunk::disassemble(chunk), "program memory rewritten");
            }
            Op::PeekChunk => {
                let target = self.pop(address, op)?;
                let target = self.address(target)?;
                let chunk = self.memory.read(target).ok_or(VmError::InvalidAddress(target as Word))?;
                self.push_chunk(op, chunk)?;
            }
            Op::BuildChunk => {
                let count = self.pop(address, op)?;
                let pairs = usize::try_from(count).map_err(|_| VmError::InvalidOperand { op, value: count })?;
                if self.stack.len() < pairs.saturating_mul(2) {
                    return Err(VmError::StackUnderflow { address, op });
                }
                let mut factors = Vec::with_capacity(pairs);
                for _ in 0..pairs {
                    let index = self.pop(address, op)?;
                    let exponent = self.pop(address, op)?;
                    factors.push(Factor::new(
                        usize::try_from(index).map_err(|_| VmError::InvalidOperand { op, value: index })?,
                        u32::try_from(exponent).map_err(|_| VmError::InvalidOperand { op, value: exponent })?,
                    ));
                }
                let chunk = chunk::encode_factors(&factors)?;
                self.push_chunk(op, chunk)?;
            }
            Op::Factorize => {
                let value = self.pop(address, op)?;
                let n = Chunk::try_from(value).map_err(|_| VmError::InvalidOperand { op, value })?;
                let factors = primes::factorize(n)?;
                self.push(factors.len() as Word)?;
                for (prime, exponent) in factors {
                    self.push(primes::index_of(prime)? as Word)?;
                    self.push(Word::from(exponent))?;
                }
            }
            Op::GetPrime => {
                let index = self.pop(address, op)?;
                let index = usize::try_from(index).map_err(|_| VmError::InvalidOperand { op, value: index })?;
                self.push(Word::from(primes::prime_at(index)?))?;
            }
            Op::GetPrimeIdx => {
                let value = self.pop(address, op)?;
                let prime = u64::try_from(value).map_err(|_| VmError::InvalidOperand { op, value })?;
                self.push(primes::index_of(prime)? as Word)?;
            }
            Op::Random => {
                let bound = self.pop(address, op)?;
                if bound <= 0 {
                    return Err(VmError::InvalidOperand { op, value: bound });
                }
                let draw = self.rng.gen_range(0..bound);
                self.push(draw)?;
            }
        }
        Ok(None)
    }

    fn halt(&mut self) {
        self.phase = Phase::Halted;
        self.history.record(Event::Halted);
    }

    fn push(&mut self, value: Word) -> Result<(), VmError> {
        if self.stack.len() >= self.max_stack_depth {
            return Err(VmError::StackOverflow {
                limit: self.max_stack_depth,
            });
        }
        self.stack.push(value);
        Ok(())
    }

    fn push_chunk(&mut self, op: Op, chunk: Chunk) -> Result<(), VmError> {
        let value = Word::try_from(chunk).map_err(|_| VmError::InvalidOperand { op, value: Word::MAX })?;
        self.push(value)
    }

    fn pop(&mut self, address: usize, op: Op) -> Result<Word, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow { address, op })
    }

    /// Pops the right operand, then the left one.
    fn pop_pair(&mut self, address: usize, op: Op) -> Result<(Word, Word), VmError> {
        let right = self.pop(address, op)?;
        let left = self.pop(address, op)?;
        Ok((left, right))
    }

    fn address(&self, value: Word) -> Result<usize, VmError> {
        usize::try_from(value)
            .ok()
            .filter(|addr| *addr < self.memory.len())
            .ok_or(VmError::InvalidAddress(value))
    }
}
