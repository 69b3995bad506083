// src/main.rs — draftloom entry point

use clap::Parser;

use draftloom::cli::run::{self, RunOptions};
use draftloom::cli::{Cli, Commands};
use draftloom::infra::config::Config;
use draftloom::infra::logger;

#[tokio::main]
async fn main() {
    // Respects RUST_LOG / DRAFTLOOM_LOG
    logger::init_logging("warn");

    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.validate()?;

    let opts = RunOptions {
        config: &config,
        dry_run: cli.dry_run,
        quiet: cli.quiet,
    };

    match &cli.command {
        Commands::Run {
            catalog,
            module,
            context,
            rounds,
            min_score,
            provider,
        } => {
            run::run_module(
                &opts,
                catalog,
                module,
                context.as_deref(),
                *rounds,
                *min_score,
                provider.as_deref(),
            )
            .await
        }
        Commands::Pipeline {
            catalog,
            context,
            assignments,
            keep_going,
        } => {
            run::run_pipeline(
                &opts,
                catalog,
                context.as_deref(),
                assignments.as_deref(),
                *keep_going,
            )
            .await
        }
        Commands::Loop {
            goal,
            rounds,
            min_score,
        } => run::run_loop(&opts, &goal.join(" "), *rounds, *min_score).await,
        Commands::Providers => run::list_providers(&opts),
        Commands::Modules { catalog } => run::list_modules(&config, catalog),
    }
}
