mod cli;
mod config;
mod error;
mod guard;
mod orchestrator;
mod repo;
mod state;
mod steps;
mod target;
mod transport;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use std::io;

use cli::{Cli, Command};
use config::PodupConfig;
use orchestrator::RunOptions;
use steps::Registry;
use target::Target;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    match cli.command {
        Command::Run(args) => {
            let config = PodupConfig::load()?;
            let target = Target::parse(&args.target, args.key.as_deref())?;
            let opts = RunOptions {
                list: args.list,
                from: args.from,
                only: args.only,
                skip: args.skip,
                force: args.force,
                dry_run: args.dry_run,
            };
            orchestrator::run(&Registry::builtin(), &config, target, &opts)
        }
        Command::Steps => {
            orchestrator::print_steps(&Registry::builtin());
            Ok(())
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "podup", &mut io::stdout());
            Ok(())
        }
    }
}
