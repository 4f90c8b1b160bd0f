//! Live-variables analysis.
//!
//! Remember that this is a backwards analysis: the transfer function maps a
//! block's live-out set to its live-in set.

use std::collections::BTreeSet as Set;

use super::{run_analysis, Analysis, DataflowResult, Direction};
use crate::middle_end::cfg::{Cfg, NodeId};
use crate::middle_end::ir::Var;

pub struct LiveVars;

impl Analysis for LiveVars {
    type Fact = Var;

    fn direction(&self) -> Direction {
        Direction::Backward
    }

    fn transfer(&self, cfg: &Cfg, node: NodeId, live_out: &Set<Var>) -> Set<Var> {
        let block = &cfg.node(node).block;

        // Upward-exposed reads: read before any local write, terminator
        // included (it runs last).
        let mut used: Set<Var> = Set::new();
        let mut written: Set<Var> = Set::new();
        for inst in &block.insts {
            for v in inst.read_vars() {
                if !written.contains(v) {
                    used.insert(v.clone());
                }
            }
            if let Some(d) = inst.dest() {
                written.insert(d.clone());
            }
        }
        if let Some(cond) = block.term.reads() {
            if !written.contains(cond) {
                used.insert(cond.clone());
            }
        }

        let mut live_in = used;
        for v in live_out {
            if !written.contains(v) {
                live_in.insert(v.clone());
            }
        }
        live_in
    }
}

pub fn analyze(cfg: &Cfg) -> DataflowResult<Var> {
    run_analysis(cfg, &LiveVars)
}
