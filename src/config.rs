//! Runtime configuration, loaded from JSON. Every field has a default so a
//! partial file (or none at all) is valid.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::Tier;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vm: VmConfig,
    pub protocol: ProtocolConfig,
    pub assembler: AssemblerConfig,
    pub controller: ControllerConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Applies to both the operand stack and the call stack.
    pub max_stack_depth: usize,
    pub history_limit: usize,
    /// Seed for RANDOM. `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 4096,
            history_limit: 4096,
            seed: None,
        }
    }
}

/// Values exchanged over the single-integer input channel and the output
/// log. Shared by the generated program and the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub success_feedback: usize,
    pub failure_feedback: usize,
    pub stuck_signal: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            success_feedback: 1,
            failure_feedback: 0,
            stuck_signal: 99,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    pub slot_count: usize,
    pub attempt_modulus: usize,
    pub attempt_increment: usize,
    pub random_offset_bound: usize,
    pub max_failures_before_stuck: usize,
    /// Stack sentinel under the slot pads; must exceed every attempt value.
    pub frame_marker: usize,
    pub slot_history_limit: usize,
    pub modification_history_limit: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            slot_count: 2,
            attempt_modulus: 16,
            attempt_increment: 1,
            random_offset_bound: 3,
            max_failures_before_stuck: 3,
            frame_marker: 97,
            slot_history_limit: 10,
            modification_history_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierParams {
    pub range_max: usize,
    pub max_attempts_before_struggle: u32,
    pub quick_success_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultyLevels {
    pub easy: TierParams,
    pub medium: TierParams,
    pub hard: TierParams,
}

impl Default for DifficultyLevels {
    fn default() -> Self {
        Self {
            easy: TierParams {
                range_max: 4,
                max_attempts_before_struggle: 5,
                quick_success_threshold: 1,
            },
            medium: TierParams {
                range_max: 9,
                max_attempts_before_struggle: 4,
                quick_success_threshold: 1,
            },
            hard: TierParams {
                range_max: 14,
                max_attempts_before_struggle: 3,
                quick_success_threshold: 2,
            },
        }
    }
}

impl DifficultyLevels {
    pub fn params(&self, tier: Tier) -> TierParams {
        match tier {
            Tier::Easy => self.easy,
            Tier::Medium => self.medium,
            Tier::Hard => self.hard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub levels: DifficultyLevels,
    pub starting_tier: Tier,
    pub quick_successes_to_upgrade: u32,
    pub struggles_to_downgrade: u32,
    pub seed: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            levels: DifficultyLevels::default(),
            starting_tier: Tier::Medium,
            quick_successes_to_upgrade: 3,
            struggles_to_downgrade: 2,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Instruction budget for one run up to the next input request.
    pub max_steps_per_cycle: usize,
    pub max_restarts: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_steps_per_cycle: 10_000,
            max_restarts: 3,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Seeds both random sources at once.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.vm.seed = Some(seed);
        self.controller.seed = Some(seed.wrapping_add(1));
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let asm = &self.assembler;
        let protocol = &self.protocol;
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if asm.slot_count == 0 {
            return invalid("slot_count must be at least 1".into());
        }
        if asm.attempt_modulus < 2 {
            return invalid("attempt_modulus must be at least 2".into());
        }
        if asm.random_offset_bound == 0 {
            return invalid("random_offset_bound must be at least 1".into());
        }
        if asm.frame_marker < asm.attempt_modulus {
            return invalid(format!(
                "frame_marker {} must not be below attempt_modulus {}",
                asm.frame_marker, asm.attempt_modulus
            ));
        }
        if protocol.success_feedback == protocol.failure_feedback {
            return invalid("success and failure feedback must differ".into());
        }
        if protocol.stuck_signal < asm.attempt_modulus {
            return invalid("stuck_signal must lie outside the attempt range".into());
        }
        for tier in Tier::ALL {
            let params = self.controller.levels.params(tier);
            if params.range_max >= asm.attempt_modulus {
                return invalid(format!(
                    "{tier:?} range_max {} is unreachable with attempt_modulus {}",
                    params.range_max, asm.attempt_modulus
                ));
            }
        }
        if self.vm.max_stack_depth < asm.slot_count + 8 {
            return invalid("max_stack_depth too small for the goal-seeker frame".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = Config::from_json(r#"{ "vm": { "seed": 7 }, "controller": { "starting_tier": "EASY" } }"#)
            .unwrap();
        assert_eq!(config.vm.seed, Some(7));
        assert_eq!(config.vm.max_stack_depth, 4096);
        assert_eq!(config.controller.starting_tier, Tier::Easy);
        assert_eq!(config.assembler, AssemblerConfig::default());
    }

    #[test]
    fn unreachable_targets_are_rejected() {
        let err = Config::from_json(r#"{ "assembler": { "attempt_modulus": 10 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("unreachable")));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "session": {{ "max_restarts": 9 }} }}"#).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.session.max_restarts, 9);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = Config::load("/nonexistent/chunkvm.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/chunkvm.json"));
    }
}
