// Emit each function's control-flow graph as a GraphViz digraph.

use std::io::Read;

use clap::Parser;

use tacopt::error::Result;
use tacopt::middle_end::cfg::dump_impl;
use tacopt::middle_end::ir::Program;

#[derive(Parser)]
#[command(version, about)]
struct Args {}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let _args = Args::parse();
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let program = Program::from_json_str(&input)?.validate()?;
    print!("{}", dump_impl::dump_program(&program.0)?);
    Ok(())
}
