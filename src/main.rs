use anyhow::Result;
use clap::Parser;
use daylist::cli::Cli;

fn main() -> Result<()> {
    daylist::run(Cli::parse())
}
