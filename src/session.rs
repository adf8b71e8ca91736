//! Training sessions: one engine, one controller and the builder that
//! produced the engine's program, driven one input request at a time.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assembler::AssemblyError;
use crate::config::{Config, ConfigError};
use crate::controller::{ControllerSnapshot, DifficultyController, InputSource, InteractionPhase, Tier};
use crate::goal_seeker::{CellLayout, GoalSeeker, GoalSeekerBuilder};
use crate::reflection::ReflectionReport;
use crate::vm::{ChunkVM, Phase, StepResult, VmError, Word};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error("engine faulted: {0}")]
    Fault(String),
    #[error("engine halted")]
    Halted,
    #[error("no input request within {0} steps")]
    StepBudgetExhausted(usize),
    #[error("giving up after {0} restarts")]
    TooManyRestarts(usize),
}

impl SessionError {
    /// Engine-side stops that a rebuild can recover from.
    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::Fault(_) | SessionError::Halted | SessionError::StepBudgetExhausted(_)
        )
    }
}

/// What happened in one `cycle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub input: Word,
    pub last_output: Option<String>,
    /// `Some` when the input was feedback on an attempt.
    pub success: Option<bool>,
    pub stuck_signalled: bool,
    pub controller: ControllerSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub session_id: Uuid,
    pub cycles: usize,
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub average_attempts: f64,
    pub trend: f64,
    pub restarts: usize,
    pub final_tier: Tier,
    pub controller: ControllerSnapshot,
}

pub struct Session {
    id: Uuid,
    config: Config,
    vm: ChunkVM,
    controller: DifficultyController,
    builder: GoalSeekerBuilder,
    seeker: GoalSeeker,
    failure_streak: usize,
    restarts: usize,
    outputs_seen: usize,
}

impl Session {
    pub fn new(config: Config) -> Result<Self, SessionError> {
        config.validate()?;
        let controller = DifficultyController::new(&config.controller, &config.protocol);
        let mut builder = GoalSeekerBuilder::new(config.assembler.clone(), config.protocol.clone())?;
        let seeker = builder.build(controller.current_target(), 0)?;
        let vm = ChunkVM::with_config(seeker.program.clone(), seeker.initial_stack(), &config.vm);
        let id = Uuid::new_v4();
        info!(%id, len = seeker.program.len(), "session started");
        Ok(Self {
            id,
            config,
            vm,
            controller,
            builder,
            seeker,
            failure_streak: 0,
            restarts: 0,
            outputs_seen: 0,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn vm(&self) -> &ChunkVM {
        &self.vm
    }

    pub fn controller(&self) -> &DifficultyController {
        &self.controller
    }

    pub fn seeker(&self) -> &GoalSeeker {
        &self.seeker
    }

    pub fn builder(&self) -> &GoalSeekerBuilder {
        &self.builder
    }

    pub fn failure_streak(&self) -> usize {
        self.failure_streak
    }

    pub fn restarts(&self) -> usize {
        self.restarts
    }

    pub fn reflection(&self) -> ReflectionReport {
        ReflectionReport::from_history(self.vm.history())
    }

    /// Runs to the next input request, answers it and resumes.
    pub fn cycle(&mut self) -> Result<CycleReport, SessionError> {
        let budget = self.config.session.max_steps_per_cycle;
        let result = self.vm.run_until_blocked(budget)?;
        check_blocked(&result, budget)?;

        let stuck = self.config.protocol.stuck_signal.to_string();
        let stuck_signalled = self.vm.output_log()[self.outputs_seen..].iter().any(|o| *o == stuck);
        self.outputs_seen = self.vm.output_log().len();
        if stuck_signalled {
            warn!(streak = self.failure_streak, "program reports it is stuck");
        }

        let last_output = self.vm.last_output().map(str::to_owned);
        let judging = self.controller.phase() == InteractionPhase::AwaitingAttemptResult;
        let input = self.controller.respond(last_output.as_deref());
        let success = judging.then(|| input == self.config.protocol.success_feedback as Word);
        if let Some(success) = success {
            self.record_slot_outcome(success);
            self.failure_streak = if success { 0 } else { self.failure_streak + 1 };
        }

        let resumed = self.vm.resume(input)?;
        if let Some(err) = resumed.error {
            return Err(SessionError::Fault(err));
        }
        debug!(input, ?last_output, ?success, "cycle complete");
        Ok(CycleReport {
            input,
            last_output,
            success,
            stuck_signalled,
            controller: self.controller.snapshot(),
        })
    }

    /// Runs `cycles` cycles, rebuilding the program after recoverable engine
    /// stops up to the configured restart limit.
    pub fn train(&mut self, cycles: usize) -> Result<TrainingSummary, SessionError> {
        let mut completed = 0;
        while completed < cycles {
            match self.cycle() {
                Ok(_) => completed += 1,
                Err(err) if err.is_recoverable() => {
                    if self.restarts >= self.config.session.max_restarts {
                        return Err(SessionError::TooManyRestarts(self.restarts));
                    }
                    warn!(error = %err, restarts = self.restarts, "rebuilding program");
                    self.restarts += 1;
                    self.reinitialize()?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(self.summary(completed))
    }

    /// Builds a fresh program for the current target and failure streak and
    /// loads it into the engine.
    pub fn reinitialize(&mut self) -> Result<(), SessionError> {
        let seeker = self
            .builder
            .build(self.controller.current_target(), self.failure_streak)?;
        self.vm.reinitialize(seeker.program.clone(), seeker.initial_stack());
        self.seeker = seeker;
        self.outputs_seen = 0;
        self.controller.expect_attempt();
        info!(id = %self.id, streak = self.failure_streak, "program rebuilt");
        Ok(())
    }

    pub fn summary(&self, cycles: usize) -> TrainingSummary {
        let monitor = self.controller.monitor();
        TrainingSummary {
            session_id: self.id,
            cycles,
            attempts: monitor.total_attempts,
            successes: monitor.successes,
            success_rate: monitor.success_rate(),
            average_attempts: monitor.average_attempts(),
            trend: monitor.trend(),
            restarts: self.restarts,
            final_tier: self.controller.tier(),
            controller: self.controller.snapshot(),
        }
    }

    fn record_slot_outcome(&mut self, success: bool) {
        let program = self.vm.program();
        let Some(address) = CellLayout::read(program, self.seeker.cells.last_slot) else {
            return;
        };
        if let Some(&instruction) = program.get(address) {
            if address != 0 {
                self.builder.slots_mut().record_outcome(address, instruction, success);
            }
        }
    }
}

fn check_blocked(result: &StepResult, budget: usize) -> Result<(), SessionError> {
    if let Some(err) = &result.error {
        return Err(SessionError::Fault(err.clone()));
    }
    if result.halted {
        return Err(SessionError::Halted);
    }
    if !result.needs_input {
        return Err(SessionError::StepBudgetExhausted(budget));
    }
    Ok(())
}

/// Runs `vm` for at most `max_steps` calls, answering input requests from
/// `source`. Stops early when the engine stops or `source` runs dry.
pub fn drive<S: InputSource + ?Sized>(
    vm: &mut ChunkVM,
    source: &mut S,
    max_steps: usize,
) -> Result<StepResult, VmError> {
    let mut last = vm.snapshot(None);
    for _ in 0..max_steps {
        last = match vm.phase() {
            Phase::Ready | Phase::Running => vm.step()?,
            Phase::AwaitingInput => {
                let output = vm.last_output().map(str::to_owned);
                match source.next_input(output.as_deref()) {
                    Some(value) => vm.resume(value)?,
                    None => break,
                }
            }
            Phase::Halted | Phase::Errored => break,
        };
    }
    Ok(last)
}
