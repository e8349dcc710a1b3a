mod cli;
mod run;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Command::Shader(args) => run::shader(args),
        Command::Prime => run::prime(),
        Command::Warp(args) => run::warp(args),
        Command::Frame(args) => run::frame(args),
    }
}
