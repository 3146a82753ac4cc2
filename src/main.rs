//! # um-lat - Main Entry Point
//!
//! Parses the command line, installs logging and dispatches to the `ping`,
//! `pong` or `jitter` driver. Reports go to stdout, diagnostics to stderr.
//! Any error is fatal: it is logged and the process exits non-zero.

use anyhow::Result;
use clap::Parser;
use std::io;
use tracing::{debug, error};
use um_lat::{
    cli::{Args, Command},
    jitter::{self, JitterConfig},
    ping::{self, PingConfig},
    pong::{self, PongConfig},
    results::{PingRecord, ResultsManager},
};

fn main() {
    let args = Args::parse();

    if let Err(e) = um_lat::logging::init(args.verbose) {
        eprintln!("{e:#}");
    }

    if let Err(e) = run(args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    debug!("Configuration: {:?}", args);
    let mut stdout = io::stdout();

    match args.command {
        Command::Ping(ping_args) => {
            let config = PingConfig::from_args(&ping_args)?;
            let outcome = ping::run(&config, &mut stdout, Box::new(io::stdout()))?;

            if let Some(path) = &ping_args.output_file {
                ResultsManager::new(path).write_ping(&PingRecord::new(&config, &outcome))?;
            }
        }
        Command::Pong(pong_args) => {
            let config = PongConfig::from_args(&pong_args)?;
            pong::run(&config, &mut stdout, Box::new(io::stdout()))?;
        }
        Command::Jitter(jitter_args) => {
            let config = JitterConfig::from_args(&jitter_args)?;
            jitter::run(&config, &mut stdout)?;
        }
    }

    Ok(())
}
