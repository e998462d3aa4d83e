//! `devloop` command line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use devloop::exit_codes;
use devloop::io::config::{DevloopConfig, load_config};
use devloop::io::init::{DevloopPaths, InitOptions, init_devloop};
use devloop::io::model::OllamaClient;
use devloop::logging;
use devloop::looping::{Agent, LoopConfig};
use devloop::tools::{ToolRegistry, Toolbox, standard_registry};

#[derive(Parser)]
#[command(
    name = "devloop",
    version,
    about = "Drive a coding agent through one task: write, verify, deliver"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.devloop/config.toml` and `.devloop/env.example`.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one task until it completes, fails, or exhausts its step budget.
    Run {
        /// Task description given to the model.
        #[arg(required = true, num_args = 1..)]
        task: Vec<String>,
        /// Config file (default: .devloop/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override `max_steps` from the config.
        #[arg(long)]
        max_steps: Option<u32>,
        /// Log progress to stderr.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Print the tool catalog shown to the model.
    Tools {
        /// Config file (default: .devloop/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    // Before logging, so a RUST_LOG in .env takes effect.
    let dotenv = dotenvy::dotenv();
    let verbose = matches!(cli.command, Command::Run { verbose: true, .. });
    logging::init(verbose);
    if let Ok(path) = dotenv {
        debug!(path = %path.display(), "loaded .env");
    }

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run {
            task,
            config,
            max_steps,
            verbose: _,
        } => cmd_run(&root, &task.join(" "), config.as_deref(), max_steps),
        Command::Tools { config } => cmd_tools(&root, config.as_deref()),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_devloop(root, &InitOptions { force })?;
    println!("wrote {}", paths.config_path.display());
    println!("wrote {}", paths.env_example_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(
    root: &Path,
    task: &str,
    config_path: Option<&Path>,
    max_steps: Option<u32>,
) -> Result<i32> {
    let mut config = load_project_config(root, config_path)?;
    if let Some(max_steps) = max_steps {
        config.max_steps = max_steps;
        config.validate()?;
    }
    let registry = build_registry(&config, root)?;
    let model = OllamaClient::new(&config.model)?;

    let outcome = Agent::new(&model, &registry, LoopConfig::from_config(&config)).run_task(task);
    println!("{}", outcome.describe());
    Ok(exit_codes::for_outcome(&outcome))
}

fn cmd_tools(root: &Path, config_path: Option<&Path>) -> Result<i32> {
    let config = load_project_config(root, config_path)?;
    let registry = build_registry(&config, root)?;
    for tool in registry.catalog() {
        println!("{}\n  {}", tool.name, tool.description);
        for line in tool.parameters.lines() {
            println!("    {line}");
        }
    }
    println!("task_complete\n  Finish the task with a summary (handled by the loop).");
    Ok(exit_codes::OK)
}

fn load_project_config(root: &Path, config_path: Option<&Path>) -> Result<DevloopConfig> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => DevloopPaths::new(root).config_path,
    };
    load_config(&path)
}

fn build_registry(config: &DevloopConfig, root: &Path) -> Result<ToolRegistry> {
    standard_registry(config, Toolbox::for_project(config, root)?)
}
