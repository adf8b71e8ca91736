use chunkvm::chunk::{encode_op, encode_push};
use chunkvm::config::VmConfig;
use chunkvm::{ChunkVM, Chunk, Op, StepResult, Word};

pub enum Asm {
    Push(usize),
    Op(Op),
}

/// Encodes a small program written as PUSH/opcode items.
pub fn assemble(items: &[Asm]) -> Vec<Chunk> {
    items
        .iter()
        .map(|item| match item {
            Asm::Push(v) => encode_push(*v).unwrap(),
            Asm::Op(op) => encode_op(*op).unwrap(),
        })
        .collect()
}

pub fn seeded_vm(program: Vec<Chunk>, stack: Vec<Word>, seed: u64) -> ChunkVM {
    let config = VmConfig {
        seed: Some(seed),
        ..VmConfig::default()
    };
    ChunkVM::with_config(program, stack, &config)
}

/// Runs to the next input request and fails the test on anything else.
pub fn run_to_input(vm: &mut ChunkVM) -> StepResult {
    let result = vm.run_until_blocked(10_000).unwrap();
    assert_eq!(result.error, None, "engine faulted");
    assert!(result.needs_input, "expected an input request, got {result:?}");
    result
}
