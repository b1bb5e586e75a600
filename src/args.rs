use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

/// Basic-block entry counting for block-graph images.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
#[command(propagate_version = true)]
pub struct Arguments {
    #[command(subcommand)]
    pub command: Command,

    /// Log more. Repeat for even more.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Make every basic block of an image count its entries.
    #[command(visible_alias = "i")]
    Instrument(InstrumentOptions),

    /// Print the basic blocks of every decomposable code block.
    #[command(visible_alias = "d")]
    Dump(Options),
}

impl Command {
    pub fn options(&self) -> &Options {
        match self {
            Self::Instrument(opts) => &opts.input,
            Self::Dump(opts) => opts,
        }
    }
}

#[derive(Debug, Args)]
pub struct Options {
    /// The image description to read.
    #[arg(required = true)]
    pub path: PathBuf,
}

#[derive(Debug, Args)]
pub struct InstrumentOptions {
    #[command(flatten)]
    pub input: Options,

    /// Where to write the instrumented image. Defaults to `<path>.instr.json`.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also write the basic-block and conditional ranges here.
    #[arg(long)]
    pub ranges: Option<PathBuf>,

    /// Give the entry thunk the source range of the entry point.
    #[arg(long, action = ArgAction::SetTrue)]
    pub thunk_source_ranges: bool,

    /// Check the recorded ranges for overlaps, even in release builds.
    #[arg(long, action = ArgAction::SetTrue)]
    pub verify: bool,

    /// Print the instrumented code blocks.
    #[arg(long, action = ArgAction::SetTrue)]
    pub listing: bool,
}

impl InstrumentOptions {
    pub fn output(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input.path.with_extension("instr.json"))
    }
}
