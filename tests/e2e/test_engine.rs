use chunkvm::chunk::decode;
use chunkvm::program::{load_listing, write_listing};
use chunkvm::{ChunkVM, Op, Phase, Record, ScriptedInput, VmError, drive};

use super::helpers::*;

#[test]
fn test_push_print_halt() {
    let mut vm = ChunkVM::new(assemble(&[Asm::Push(3), Asm::Op(Op::Print), Asm::Op(Op::Halt)]));
    let result = vm.run_until_blocked(10).unwrap();
    assert!(result.halted);
    assert_eq!(vm.output_log(), ["3"]);
    assert!(vm.stack().is_empty());
}

#[test]
fn test_input_is_added_after_resume() {
    let mut vm = ChunkVM::new(assemble(&[
        Asm::Push(7),
        Asm::Op(Op::Input),
        Asm::Op(Op::Add),
        Asm::Op(Op::Print),
        Asm::Op(Op::Halt),
    ]));
    let result = vm.run_until_blocked(10).unwrap();
    assert!(result.needs_input);
    assert_eq!(vm.stack(), [7]);

    // stepping while suspended is refused and leaves the stack alone
    assert_eq!(vm.step(), Err(VmError::AwaitingInput));
    assert_eq!(vm.stack(), [7]);

    vm.resume(2).unwrap();
    vm.run_until_blocked(10).unwrap();
    assert_eq!(vm.phase(), Phase::Halted);
    assert_eq!(vm.output_log(), ["9"]);
    assert!(matches!(vm.step(), Err(VmError::Stopped(Phase::Halted))));
}

#[test]
fn test_identical_runs_are_identical() {
    let program = assemble(&[
        Asm::Push(50),
        Asm::Op(Op::Random),
        Asm::Op(Op::Input),
        Asm::Op(Op::Add),
        Asm::Op(Op::Print),
        Asm::Push(50),
        Asm::Op(Op::Random),
        Asm::Op(Op::Print),
        Asm::Op(Op::Halt),
    ]);
    let run = || {
        let mut vm = seeded_vm(program.clone(), vec![], 42);
        let result = drive(&mut vm, &mut ScriptedInput::new([5]), 100).unwrap();
        (vm.output_log().to_vec(), result)
    };
    assert_eq!(run(), run());
}

#[test]
fn test_self_modification_is_seen_by_the_next_fetch() {
    let mut vm = ChunkVM::new(assemble(&[
        Asm::Push(6),
        // PRINT chunk: one factor, prime index 2, exponent 4
        Asm::Push(4),
        Asm::Push(Op::Print.prime_index()),
        Asm::Push(1),
        Asm::Op(Op::BuildChunk),
        Asm::Push(7),
        Asm::Op(Op::PokeChunk),
        Asm::Op(Op::Halt),
        Asm::Op(Op::Halt),
    ]));
    let poke = vm.run_until_blocked(7).unwrap();
    let rewritten = poke.program.expect("memory changed");
    assert_eq!(decode(rewritten[7]).unwrap(), Record::op(Op::Print));

    vm.run_until_blocked(10).unwrap();
    assert_eq!(vm.output_log(), ["6"]);
    assert_eq!(vm.phase(), Phase::Halted);
    assert_eq!(vm.ip(), 9);
}

#[test]
fn test_listing_file_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("add.chunks");
    let program = assemble(&[
        Asm::Push(7),
        Asm::Op(Op::Input),
        Asm::Op(Op::Add),
        Asm::Op(Op::Print),
        Asm::Op(Op::Halt),
    ]);
    write_listing(&path, &program).unwrap();
    let mut vm = ChunkVM::new(load_listing(&path).unwrap());
    let result = drive(&mut vm, &mut ScriptedInput::new([2]), 100).unwrap();
    assert!(result.halted);
    assert_eq!(vm.output_log(), ["9"]);
}

#[test]
fn test_data_chunks_are_not_executed() {
    let program = vec![chunkvm::chunk::encode_data(5).unwrap()];
    let mut vm = ChunkVM::new(program);
    let result = vm.step().unwrap();
    assert!(result.error.unwrap().contains("DATA 5"));
    assert_eq!(vm.phase(), Phase::Errored);
}
