use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chunkvm::config::Config;
use chunkvm::controller::ScriptedInput;
use chunkvm::goal_seeker::GoalSeekerBuilder;
use chunkvm::program::{load_listing, render_listing, write_listing};
use chunkvm::{ChunkVM, Session, Word, drive};

#[derive(Parser)]
#[command(name = "chunkvm", about = "Prime-factorization VM and goal-seeking trainer")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble the goal-seeker and print or save its listing
    Generate {
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        initial_target: usize,
        #[arg(long, default_value_t = 0)]
        failure_streak: usize,
    },
    /// Run a listing, answering INPUT from --input values in order
    Run {
        file: PathBuf,
        #[arg(long = "input", allow_negative_numbers = true)]
        inputs: Vec<Word>,
        #[arg(long, default_value_t = 100_000)]
        max_steps: usize,
    },
    /// Print a listing with each chunk decoded
    Disasm { file: PathBuf },
    /// Train the goal-seeker against the difficulty controller
    Train {
        #[arg(long, default_value_t = 100)]
        cycles: usize,
        #[arg(long)]
        seed: Option<u64>,
        /// Write the reflection report here as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Command::Generate {
            output,
            initial_target,
            failure_streak,
        } => {
            let mut builder = GoalSeekerBuilder::new(config.assembler, config.protocol)?;
            let seeker = builder.build(initial_target, failure_streak)?;
            match output {
                Some(path) => {
                    write_listing(&path, &seeker.program)?;
                    println!("wrote {} chunks to {}", seeker.program.len(), path.display());
                }
                None => print!("{}", render_listing(&seeker.program)),
            }
        }
        Command::Run {
            file,
            inputs,
            max_steps,
        } => {
            let program = load_listing(&file)?;
            let mut vm = ChunkVM::with_config(program, Vec::new(), &config.vm);
            let result = drive(&mut vm, &mut ScriptedInput::new(inputs), max_steps)?;
            for line in vm.output_log() {
                println!("{line}");
            }
            if let Some(err) = result.error {
                bail!("program faulted at {}: {err}", result.instruction_pointer);
            }
            if result.needs_input {
                eprintln!("stopped waiting for input at {}", result.instruction_pointer);
            } else if !result.halted {
                eprintln!("step budget of {max_steps} exhausted");
            }
        }
        Command::Disasm { file } => {
            let program = load_listing(&file)?;
            print!("{}", render_listing(&program));
        }
        Command::Train {
            cycles,
            seed,
            report,
        } => {
            let config = match seed {
                Some(seed) => config.with_seed(seed),
                None => config,
            };
            let mut session = Session::new(config)?;
            let summary = session.train(cycles)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if let Some(path) = report {
                session
                    .reflection()
                    .save_to_file(&path)
                    .with_context(|| format!("writing report to {}", path.display()))?;
            }
        }
    }
    Ok(())
}
