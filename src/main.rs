mod args;
mod emit;
mod input;
mod instrument;

#[cfg(test)]
mod tests;

use std::process::ExitCode;

use clap::Parser;
use console::style;
use log::{info, LevelFilter};

use args::{Arguments, Command};

fn main() -> ExitCode {
    let args = Arguments::parse();
    init_logger(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e:#}", style("error").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(args: &Arguments) -> anyhow::Result<()> {
    info!("reading `{}`", args.command.options().path.display());

    match &args.command {
        Command::Instrument(options) => instrument::instrument(options),
        Command::Dump(options) => instrument::dump(options),
    }
}
