//! Defined-variables analysis: which variables have a definition on some
//! path from the entry.

use std::collections::BTreeSet as Set;

use super::{run_analysis, Analysis, DataflowResult, Direction};
use crate::middle_end::cfg::{Cfg, NodeId};
use crate::middle_end::ir::Var;

pub struct DefinedVars;

impl Analysis for DefinedVars {
    type Fact = Var;

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn transfer(&self, cfg: &Cfg, node: NodeId, input: &Set<Var>) -> Set<Var> {
        let mut out = input.clone();
        for inst in &cfg.node(node).block.insts {
            if let Some(d) = inst.dest() {
                out.insert(d.clone());
            }
        }
        out
    }
}

pub fn analyze(cfg: &Cfg) -> DataflowResult<Var> {
    run_analysis(cfg, &DefinedVars)
}
