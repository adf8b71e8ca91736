use chunkvm::config::Config;
use chunkvm::controller::InteractionPhase;
use chunkvm::{ReflectionReport, Session, SessionError};

#[test]
fn test_same_seed_same_training() {
    let run = || {
        let mut session = Session::new(Config::default().with_seed(21)).unwrap();
        let summary = session.train(150).unwrap();
        (summary.attempts, summary.successes, summary.controller, session.vm().output_log().to_vec())
    };
    assert_eq!(run(), run());
}

#[test]
fn test_sessions_get_distinct_ids() {
    let a = Session::new(Config::default().with_seed(1)).unwrap();
    let b = Session::new(Config::default().with_seed(1)).unwrap();
    assert_ne!(a.id(), b.id());
}

#[test]
fn test_cycle_alternates_feedback_and_targets() {
    let mut session = Session::new(Config::default().with_seed(8)).unwrap();
    for _ in 0..100 {
        let expecting_target = session.controller().phase() == InteractionPhase::SendTarget;
        let report = session.cycle().unwrap();
        assert_eq!(report.success.is_none(), expecting_target);
    }
}

#[test]
fn test_slot_outcomes_are_recorded() {
    let mut session = Session::new(Config::default().with_seed(4)).unwrap();
    session.train(300).unwrap();
    let recorded: usize = session.builder().slots().slots().iter().map(|s| s.history().count()).sum();
    assert!(recorded > 0);
}

#[test]
fn test_too_small_step_budget_gives_up() {
    let mut config = Config::default().with_seed(2);
    config.session.max_steps_per_cycle = 3;
    config.session.max_restarts = 2;
    let mut session = Session::new(config).unwrap();
    match session.train(5) {
        Err(SessionError::TooManyRestarts(n)) => assert_eq!(n, 2),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = Config::default();
    config.protocol.failure_feedback = config.protocol.success_feedback;
    assert!(matches!(Session::new(config), Err(SessionError::Config(_))));
}

#[test]
fn test_reflection_report_round_trips_through_a_file() {
    let mut session = Session::new(Config::default().with_seed(13)).unwrap();
    session.train(50).unwrap();
    let report = session.reflection();
    assert!(report.instructions_executed > 0);
    assert_eq!(report.faults, 0);
    assert!(report.modifications.contains_key(&0));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    report.save_to_file(&path).unwrap();
    let loaded = ReflectionReport::load_from_file(&path).unwrap();
    assert_eq!(loaded.instructions_executed, report.instructions_executed);
    assert_eq!(loaded.op_counts, report.op_counts);
    assert_eq!(loaded.modifications, report.modifications);
    assert_eq!(loaded.repeated_sequences, report.repeated_sequences);
}
