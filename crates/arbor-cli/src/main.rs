#![forbid(unsafe_code)]

mod cmd;
mod output;

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use arbor_core::config::{self, EffectiveConfig};
use clap::{CommandFactory, Parser, Subcommand};
use output::OutputMode;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "arbor: live tree projection over a mutating object graph",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Projection config file (defaults to `.arbor/config.toml`).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run a live projection demo",
        long_about = "Mutate an object registry on a producer thread while a pump thread\n\
                      feeds its lifecycle events to a projection and reader threads query it.\n\
                      Prints the converged tree and the engine counters.",
        after_help = "EXAMPLES:\n    # Default demo\n    arbor demo\n\n\
                      # Bigger graph, more readers\n    arbor demo --nodes 200 --readers 8 --seed 7\n\n\
                      # Machine-readable output\n    arbor demo --json"
    )]
    Demo(cmd::demo::DemoArgs),

    #[command(
        about = "Run a simulation campaign across many seeds",
        long_about = "Execute deterministic simulations with delayed, duplicated and reordered\n\
                      event delivery. Reports pass/fail per seed and the first failure for replay.",
        after_help = "EXAMPLES:\n    # Run seeds 0..100 with defaults\n    arbor sim\n\n\
                      # Custom range and harsher faults\n    arbor sim --seeds 100..500 --max-delay 6 --reorder 50\n\n\
                      # Machine-readable output\n    arbor sim --json"
    )]
    Sim(cmd::sim::SimArgs),

    #[command(
        about = "Replay one simulation seed with its trace",
        long_about = "Re-run a single seed and print the delivery trace, engine counters\n\
                      and any invariant violations. Use after a campaign failure.",
        after_help = "EXAMPLES:\n    # Replay seed 42\n    arbor replay --seed 42\n\n\
                      # Include every trace line\n    arbor replay --seed 42 --trace\n\n\
                      # Machine-readable output\n    arbor replay --seed 42 --json"
    )]
    Replay(cmd::replay::ReplayArgs),

    #[command(
        about = "Generate shell completions",
        after_help = "EXAMPLES:\n    # Bash\n    arbor completions bash > ~/.local/share/bash-completion/completions/arbor"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ARBOR_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "arbor=debug,info"
        } else {
            "arbor=info,warn"
        })
    });

    let format = env::var("ARBOR_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Project config plus output mode, with `--config` taking precedence over
/// the project file.
fn load_effective(cli: &Cli, project_root: &Path) -> Result<EffectiveConfig> {
    let mut effective = config::resolve_config(project_root, cli.json)?;
    if let Some(path) = &cli.config {
        let forced = effective.projection.verify.after_each_event;
        effective.projection = config::load_config_file(path)?;
        effective.projection.verify.after_each_event |= forced;
    }
    debug!(?effective, "resolved config");
    Ok(effective)
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    if let Commands::Completions(args) = &cli.command {
        return cmd::completions::run_completions(args, &mut Cli::command());
    }

    let project_root = env::current_dir()?;
    let effective = load_effective(&cli, &project_root)?;
    let output = OutputMode::from_resolved(&effective.resolved_output);

    match &cli.command {
        Commands::Demo(args) => cmd::demo::run_demo(args, &effective.projection, output),
        Commands::Sim(args) => cmd::sim::run_sim(args, output),
        Commands::Replay(args) => cmd::replay::run_replay(args, output),
        Commands::Completions(_) => Ok(()),
    }
}
