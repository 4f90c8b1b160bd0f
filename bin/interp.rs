// Reference interpreter: read a program from stdin and execute `main`.

use std::io::Read;

use clap::Parser;

use tacopt::error::Result;
use tacopt::interp;
use tacopt::middle_end::ir::Program;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Report the executed instruction count on success.
    #[arg(short = 'p', long)]
    profile: bool,
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
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let program = Program::from_json_str(&input)?.validate()?;

    let mut stdout = std::io::stdout();
    let count = interp::run(&program, &mut stdout)?;
    if args.profile {
        println!("Executed {count} instructions.");
    }
    Ok(())
}
