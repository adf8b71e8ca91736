pub mod primes;
pub mod opcode;
pub mod chunk;
pub mod memory;
pub mod reflection;
pub mod config;
pub mod vm;
pub mod program;
pub mod assembler;
pub mod slots;
pub mod goal_seeker;
pub mod controller;
pub mod session;

pub use chunk::{Chunk, ChunkError, Instruction, Record};
pub use config::{Config, ConfigError};
pub use controller::{DifficultyController, InputSource, InteractionPhase, ScriptedInput, Tier};
pub use goal_seeker::{GoalSeeker, GoalSeekerBuilder};
pub use opcode::Op;
pub use reflection::ReflectionReport;
pub use session::{Session, SessionError, TrainingSummary, drive};
pub use vm::{ChunkVM, Phase, StepResult, VmError, Word};
