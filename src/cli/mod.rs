// src/cli/mod.rs — CLI definition (clap derive)

pub mod progress;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "draftloom",
    about = "Draft with several models, integrate, critique, repeat",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use local echo providers instead of configured back-ends
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Suppress progress output (only emit the final result)
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one prompt module through the feedback loop
    Run {
        /// Module catalog (.json, .yaml, .yml)
        #[arg(long)]
        catalog: PathBuf,
        /// Module id to run
        #[arg(short, long)]
        module: String,
        /// Context as a JSON object
        #[arg(long)]
        context: Option<String>,
        /// Max rounds (1-8)
        #[arg(short, long)]
        rounds: Option<u8>,
        /// Score to accept (0.0-1.0)
        #[arg(short = 'q', long)]
        min_score: Option<f64>,
        /// Provider to use ("name" or "name/model")
        #[arg(short, long)]
        provider: Option<String>,
    },
    /// Run every module of a catalog in order, threading outputs
    Pipeline {
        /// Module catalog (.json, .yaml, .yml)
        #[arg(long)]
        catalog: PathBuf,
        /// Initial context as a JSON object
        #[arg(long)]
        context: Option<String>,
        /// JSON file mapping module ids to provider assignments
        #[arg(long)]
        assignments: Option<PathBuf>,
        /// Continue with the remaining modules after a failure
        #[arg(long)]
        keep_going: bool,
    },
    /// Live multi-agent loop on a free-form goal
    Loop {
        /// The goal to work on
        #[arg(trailing_var_arg = true, required = true)]
        goal: Vec<String>,
        /// Max rounds (1-8)
        #[arg(short, long)]
        rounds: Option<u8>,
        /// Score to accept (0.0-1.0)
        #[arg(short = 'q', long)]
        min_score: Option<f64>,
    },
    /// List configured providers
    Providers,
    /// List the modules of a catalog
    Modules {
        /// Module catalog (.json, .yaml, .yml)
        #[arg(long)]
        catalog: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "draftloom", "run", "--catalog", "m.yaml", "-m", "summarize", "--rounds", "2",
            "--dry-run",
        ])
        .unwrap();
        assert!(cli.dry_run);
        match cli.command {
            Commands::Run { module, rounds, .. } => {
                assert_eq!(module, "summarize");
                assert_eq!(rounds, Some(2));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_loop_goal_words() {
        let cli = Cli::try_parse_from(["draftloom", "loop", "write", "a", "haiku"]).unwrap();
        match cli.command {
            Commands::Loop { goal, .. } => assert_eq!(goal.join(" "), "write a haiku"),
            _ => panic!("expected loop"),
        }
    }

    #[test]
    fn test_loop_requires_goal() {
        assert!(Cli::try_parse_from(["draftloom", "loop"]).is_err());
    }
}
