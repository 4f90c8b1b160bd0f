// The optimizer driver: run a sequence of passes over a program.

use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use tacopt::commons::Valid;
use tacopt::error::Result;
use tacopt::middle_end::ir::Program;
use tacopt::middle_end::optimization::{dce::dead_code_elim, induction::strength_reduce, normalize};

#[derive(Clone, Copy)]
enum Pass {
    Nop,
    Dce,
    IndVar,
}

impl Pass {
    fn run(&self, p: Valid<Program>) -> Result<Valid<Program>> {
        match self {
            Pass::Nop => normalize(p),
            Pass::Dce => dead_code_elim(p),
            Pass::IndVar => strength_reduce(p),
        }
    }
}

impl FromStr for Pass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "nop" => Ok(Pass::Nop),
            "dce" => Ok(Pass::Dce),
            "indvar" => Ok(Pass::IndVar),
            _ => Err(format!("unknown optimization pass: {s}")),
        }
    }
}

// Command-line arguments
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Optimization passes to run, in order.
    #[arg(short = 'n', long = "pass")]
    passes: Vec<Pass>,

    /// Input program (defaults to stdin).
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file (defaults to stdout).
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let input = match &args.input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut s = String::new();
            std::io::stdin().read_to_string(&mut s)?;
            s
        }
    };

    let mut program = Program::from_json_str(&input)?.validate()?;
    for pass in &args.passes {
        program = pass.run(program)?;
    }

    let out = program.0.to_json_string()?;
    match &args.output {
        Some(path) => std::fs::write(path, out)?,
        None => println!("{out}"),
    }
    Ok(())
}
