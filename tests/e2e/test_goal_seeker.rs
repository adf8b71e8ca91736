use chunkvm::chunk::{self, decode};
use chunkvm::config::{AssemblerConfig, ControllerConfig, ProtocolConfig};
use chunkvm::goal_seeker::{CellLayout, GoalSeeker, GoalSeekerBuilder, KIND_ADD, KIND_NOP, KIND_PUSH, MAIN_ADDRESS};
use chunkvm::{ChunkVM, DifficultyController, Op, Record, drive};

use super::helpers::*;

const SUCCESS: i128 = 1;
const FAILURE: i128 = 0;

fn build(target: usize, streak: usize) -> GoalSeeker {
    let mut builder = GoalSeekerBuilder::new(AssemblerConfig::default(), ProtocolConfig::default()).unwrap();
    builder.build(target, streak).unwrap()
}

fn start(seeker: &GoalSeeker, seed: u64) -> ChunkVM {
    seeded_vm(seeker.program.clone(), seeker.initial_stack(), seed)
}

fn cell(vm: &ChunkVM, address: usize) -> usize {
    CellLayout::read(vm.program(), address).expect("data cell")
}

#[test]
fn test_first_attempt_is_the_built_in_target() {
    let seeker = build(5, 0);
    let mut vm = start(&seeker, 1);
    run_to_input(&mut vm);
    assert_eq!(vm.output_log(), ["5"]);
    assert_eq!(vm.stack(), [97, 0, 0, 5]);
}

#[test]
fn test_success_path_installs_the_next_target() {
    let seeker = build(5, 0);
    let mut vm = start(&seeker, 1);
    run_to_input(&mut vm);
    vm.resume(SUCCESS).unwrap();

    // the program now asks for a target instead of printing
    run_to_input(&mut vm);
    assert_eq!(vm.output_log().len(), 1);
    vm.resume(7).unwrap();

    run_to_input(&mut vm);
    assert_eq!(vm.last_output(), Some("7"));
    assert_eq!(decode(vm.program()[MAIN_ADDRESS]).unwrap(), Record::push(7));
    assert_eq!(cell(&vm, seeker.cells.previous_attempt), 7);
    assert_eq!(cell(&vm, seeker.cells.failure_count), 0);
    assert_eq!(cell(&vm, seeker.cells.last_slot), seeker.selected_slots[0]);
    assert_eq!(cell(&vm, seeker.cells.last_kind), KIND_NOP);
    assert_eq!(vm.stack()[0], 97);
}

#[test]
fn test_failure_path_rewrites_main_push_and_a_slot() {
    let seeker = build(5, 0);
    let mut vm = start(&seeker, 3);
    run_to_input(&mut vm);
    vm.resume(FAILURE).unwrap();
    run_to_input(&mut vm);

    let attempt = cell(&vm, seeker.cells.previous_attempt);
    assert_ne!(attempt, 5);
    assert!(attempt < AssemblerConfig::default().attempt_modulus);
    assert_eq!(decode(vm.program()[MAIN_ADDRESS]).unwrap(), Record::push(attempt));
    assert_eq!(cell(&vm, seeker.cells.failure_count), 1);

    let slot = cell(&vm, seeker.cells.last_slot);
    assert!(seeker.selected_slots.contains(&slot));
    let expected = match cell(&vm, seeker.cells.last_kind) {
        KIND_PUSH => Record::push(0),
        KIND_ADD => Record::op(Op::Add),
        KIND_NOP => Record::op(Op::Nop),
        other => panic!("unexpected kind {other}"),
    };
    assert_eq!(decode(vm.program()[slot]).unwrap(), expected);
    assert_eq!(vm.history().faults(), 0);
}

#[test]
fn test_stuck_signal_after_three_failures() {
    let seeker = build(2, 0);
    let mut vm = start(&seeker, 9);
    run_to_input(&mut vm);
    for _ in 0..3 {
        vm.resume(FAILURE).unwrap();
        run_to_input(&mut vm);
    }
    assert_eq!(cell(&vm, seeker.cells.failure_count), 3);
    assert!(vm.output_log().iter().any(|o| o == "99"));
    assert_ne!(vm.last_output(), Some("99"));
}

#[test]
fn test_attempt_never_repeats_the_previous_one() {
    let seeker = build(4, 0);
    let mut vm = start(&seeker, 17);
    run_to_input(&mut vm);
    let mut previous = 4;
    for _ in 0..40 {
        vm.resume(FAILURE).unwrap();
        run_to_input(&mut vm);
        let attempt = cell(&vm, seeker.cells.previous_attempt);
        assert_ne!(attempt, previous);
        previous = attempt;
    }
}

#[test]
fn test_widened_selection_runs_cleanly() {
    let seeker = build(3, 4);
    assert_eq!(seeker.selected_slots.len(), 2);
    let mut vm = start(&seeker, 23);
    run_to_input(&mut vm);
    for _ in 0..60 {
        vm.resume(FAILURE).unwrap();
        run_to_input(&mut vm);
        assert!(seeker.selected_slots.contains(&cell(&vm, seeker.cells.last_slot)));
    }
}

#[test]
fn test_many_controller_cycles_without_faults() {
    let config = ControllerConfig {
        seed: Some(5),
        ..ControllerConfig::default()
    };
    let mut controller = DifficultyController::new(&config, &ProtocolConfig::default());
    let seeker = build(controller.current_target(), 0);
    let mut vm = start(&seeker, 6);

    let result = drive(&mut vm, &mut controller, 200_000).unwrap();
    assert_eq!(result.error, None);
    assert!(!result.halted);
    assert_eq!(vm.history().faults(), 0);
    assert!(controller.monitor().total_attempts > 50);
    assert!(controller.monitor().successes >= 1);
    // every placeholder still resolves to a real address
    chunkvm::assembler::validate_placeholders(&seeker.program, &seeker.placeholders).unwrap();
    assert!(chunk::decode(vm.program()[MAIN_ADDRESS]).unwrap().as_instruction().is_some());
}
