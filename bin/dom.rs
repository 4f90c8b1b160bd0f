// Diagnostics driver: dump each function's CFG, dominator relation,
// natural loops, and selected dataflow results to stderr.

use std::io::Read;

use clap::Parser;

use tacopt::error::Result;
use tacopt::middle_end::analysis::{liveness, reaching_defs};
use tacopt::middle_end::cfg::{dump_impl, Cfg, NodeId};
use tacopt::middle_end::control;
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

fn names(cfg: &Cfg, ids: impl IntoIterator<Item = NodeId>) -> String {
    ids.into_iter()
        .map(|id| cfg.name_of(id).to_owned())
        .collect::<Vec<_>>()
        .join(", ")
}

fn run() -> Result<()> {
    let _args = Args::parse();
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let program = Program::from_json_str(&input)?.validate()?;

    for (fname, f) in &program.0.functions {
        let cfg = Cfg::new(f)?;
        eprintln!("{}", dump_impl::dump_cfg(&cfg, fname));

        let doms = control::dominators(&cfg);
        eprintln!("dominators of {fname}:");
        for (n, ds) in &doms.dom {
            eprintln!(
                "  {} -> {{{}}}",
                cfg.name_of(*n),
                names(&cfg, ds.iter().copied())
            );
        }

        eprintln!("loops of {fname}:");
        for lp in control::natural_loops(&cfg, &doms) {
            eprintln!(
                "  header {} tail {} body {{{}}}",
                cfg.name_of(lp.header),
                cfg.name_of(lp.tail),
                names(&cfg, lp.body.iter().copied())
            );
        }

        let live = liveness::analyze(&cfg);
        eprintln!("live variables of {fname}:");
        for id in cfg.real_node_ids() {
            let fmt = |s: &std::collections::BTreeSet<String>| {
                s.iter().cloned().collect::<Vec<_>>().join(", ")
            };
            eprintln!(
                "  {}: in {{{}}} out {{{}}}",
                cfg.name_of(id),
                fmt(&live.input[&id]),
                fmt(&live.output[&id])
            );
        }

        let defs = reaching_defs::analyze(&cfg);
        eprintln!("reaching definitions of {fname}:");
        for id in cfg.real_node_ids() {
            let reaching = defs.input[&id]
                .iter()
                .map(|d| format!("{}@{}.{}", d.var, cfg.name_of(d.node), d.index))
                .collect::<Vec<_>>()
                .join(", ");
            eprintln!("  {}: {{{}}}", cfg.name_of(id), reaching);
        }
    }
    Ok(())
}
