//! Adaptive difficulty controller: the driver on the other side of the
//! engine's INPUT channel.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ControllerConfig, DifficultyLevels, ProtocolConfig, TierParams};
use crate::vm::Word;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Easy,
    Medium,
    Hard,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Easy, Tier::Medium, Tier::Hard];

    pub fn up(self) -> Self {
        match self {
            Tier::Easy => Tier::Medium,
            Tier::Medium | Tier::Hard => Tier::Hard,
        }
    }

    pub fn down(self) -> Self {
        match self {
            Tier::Hard => Tier::Medium,
            Tier::Medium | Tier::Easy => Tier::Easy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionPhase {
    SendTarget,
    AwaitingAttemptResult,
}

/// Anything that can answer the engine's INPUT requests.
pub trait InputSource {
    fn next_input(&mut self, last_output: Option<&str>) -> Option<Word>;
}

/// Replays a fixed list of inputs, then runs dry.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    values: std::collections::VecDeque<Word>,
}

impl ScriptedInput {
    pub fn new(values: impl IntoIterator<Item = Word>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.values.len()
    }
}

impl InputSource for ScriptedInput {
    fn next_input(&mut self, _last_output: Option<&str>) -> Option<Word> {
        self.values.pop_front()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub difficulty_tier: Tier,
    pub attempts_on_target: u32,
    pub quick_success_streak: u32,
    pub struggle_streak: u32,
    pub current_target: usize,
    pub phase: InteractionPhase,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMonitor {
    pub total_attempts: u64,
    pub successes: u64,
    pub attempts_per_success: Vec<u32>,
    current_attempts: u32,
}

impl PerformanceMonitor {
    pub fn record_attempt(&mut self, success: bool) {
        self.total_attempts += 1;
        self.current_attempts += 1;
        if success {
            self.successes += 1;
            self.attempts_per_success.push(self.current_attempts);
            self.current_attempts = 0;
        }
    }

    /// Solved targets over targets seen, the open one included.
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        let seen = self.attempts_per_success.len() + usize::from(self.current_attempts > 0);
        self.successes as f64 / seen.max(1) as f64
    }

    pub fn average_attempts(&self) -> f64 {
        if self.attempts_per_success.is_empty() {
            return 0.0;
        }
        let total: u32 = self.attempts_per_success.iter().sum();
        f64::from(total) / self.attempts_per_success.len() as f64
    }

    /// Positive when the last three targets took fewer attempts than average.
    pub fn trend(&self) -> f64 {
        let n = self.attempts_per_success.len();
        if n < 3 {
            return 0.0;
        }
        let recent: u32 = self.attempts_per_success[n - 3..].iter().sum();
        self.average_attempts() - f64::from(recent) / 3.0
    }
}

pub struct DifficultyController {
    levels: DifficultyLevels,
    protocol: ProtocolConfig,
    quick_successes_to_upgrade: u32,
    struggles_to_downgrade: u32,
    tier: Tier,
    phase: InteractionPhase,
    current_target: usize,
    attempts_on_target: u32,
    quick_success_streak: u32,
    struggle_streak: u32,
    monitor: PerformanceMonitor,
    rng: StdRng,
}

impl DifficultyController {
    /// Starts in `AwaitingAttemptResult`: the first attempt is the target
    /// already baked into the program.
    pub fn new(config: &ControllerConfig, protocol: &ProtocolConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let tier = config.starting_tier;
        let current_target = rng.gen_range(0..=config.levels.params(tier).range_max);
        info!(?tier, current_target, "controller ready");
        Self {
            levels: config.levels.clone(),
            protocol: protocol.clone(),
            quick_successes_to_upgrade: config.quick_successes_to_upgrade,
            struggles_to_downgrade: config.struggles_to_downgrade,
            tier,
            phase: InteractionPhase::AwaitingAttemptResult,
            current_target,
            attempts_on_target: 0,
            quick_success_streak: 0,
            struggle_streak: 0,
            monitor: PerformanceMonitor::default(),
            rng,
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn phase(&self) -> InteractionPhase {
        self.phase
    }

    pub fn current_target(&self) -> usize {
        self.current_target
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    /// Used after the program is rebuilt: its first print is an attempt at
    /// the current target, whatever was expected before.
    pub fn expect_attempt(&mut self) {
        self.phase = InteractionPhase::AwaitingAttemptResult;
    }

    fn params(&self) -> TierParams {
        self.levels.params(self.tier)
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            difficulty_tier: self.tier,
            attempts_on_target: self.attempts_on_target,
            quick_success_streak: self.quick_success_streak,
            struggle_streak: self.struggle_streak,
            current_target: self.current_target,
            phase: self.phase,
        }
    }

    /// The value to feed the engine's pending INPUT.
    pub fn respond(&mut self, last_output: Option<&str>) -> Word {
        match self.phase {
            InteractionPhase::SendTarget => {
                self.phase = InteractionPhase::AwaitingAttemptResult;
                debug!(target = self.current_target, "sending target");
                self.current_target as Word
            }
            InteractionPhase::AwaitingAttemptResult => self.judge(last_output),
        }
    }

    fn judge(&mut self, last_output: Option<&str>) -> Word {
        self.attempts_on_target += 1;
        let stuck = self.protocol.stuck_signal.to_string();
        let attempt = match last_output {
            None => {
                warn!("no attempt printed before input request");
                None
            }
            Some(text) if text == stuck => {
                warn!("last output is the stuck signal, not an attempt");
                None
            }
            Some(text) => match text.parse::<Word>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(output = text, "attempt is not an integer");
                    None
                }
            },
        };
        let Some(attempt) = attempt else {
            self.monitor.record_attempt(false);
            return self.protocol.failure_feedback as Word;
        };

        let success = attempt == self.current_target as Word;
        self.monitor.record_attempt(success);
        if success {
            self.on_success();
            self.protocol.success_feedback as Word
        } else {
            self.on_failure(attempt);
            self.protocol.failure_feedback as Word
        }
    }

    fn on_success(&mut self) {
        let params = self.params();
        info!(
            target = self.current_target,
            attempts = self.attempts_on_target,
            "target reached"
        );
        self.struggle_streak = 0;
        if self.attempts_on_target <= params.quick_success_threshold {
            self.quick_success_streak += 1;
            if self.quick_success_streak >= self.quick_successes_to_upgrade {
                self.change_tier(self.tier.up());
                self.quick_success_streak = 0;
            }
        } else {
            self.quick_success_streak = 0;
        }
        self.new_target();
        self.phase = InteractionPhase::SendTarget;
    }

    fn on_failure(&mut self, attempt: Word) {
        let params = self.params();
        debug!(
            attempt,
            target = self.current_target,
            attempts = self.attempts_on_target,
            "attempt missed"
        );
        if self.attempts_on_target < params.max_attempts_before_struggle {
            return;
        }
        self.quick_success_streak = 0;
        self.struggle_streak += 1;
        if self.struggle_streak >= self.struggles_to_downgrade {
            self.change_tier(self.tier.down());
            self.struggle_streak = 0;
            // The engine is on its failure path and will not ask for a
            // target, so the new one is simply judged against from now on.
            self.new_target();
        }
    }

    fn change_tier(&mut self, tier: Tier) {
        if tier != self.tier {
            info!(from = ?self.tier, to = ?tier, "difficulty changed");
        }
        self.tier = tier;
    }

    fn new_target(&mut self) {
        self.current_target = self.rng.gen_range(0..=self.params().range_max);
        self.attempts_on_target = 0;
    }
}

impl InputSource for DifficultyController {
    fn next_input(&mut self, last_output: Option<&str>) -> Option<Word> {
        Some(self.respond(last_output))
    }
}
