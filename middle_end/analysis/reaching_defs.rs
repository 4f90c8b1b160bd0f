//! Reaching-definitions analysis.

use std::collections::BTreeSet as Set;
use std::fmt;

use super::{run_analysis, Analysis, DataflowResult, Direction};
use crate::middle_end::cfg::{Cfg, NodeId};
use crate::middle_end::ir::Var;

/// A definition site: which variable, and where.  Equality and ordering are
/// structural over all three fields.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Definition {
    pub var: Var,
    pub node: NodeId,
    pub index: usize,
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}.{}", self.var, self.node, self.index)
    }
}

pub struct ReachingDefs;

impl Analysis for ReachingDefs {
    type Fact = Definition;

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    // A new definition of `v` kills every incoming definition of `v` and
    // replaces them with its own site.
    fn transfer(&self, cfg: &Cfg, node: NodeId, input: &Set<Definition>) -> Set<Definition> {
        let mut out = input.clone();
        for (index, inst) in cfg.node(node).block.insts.iter().enumerate() {
            if let Some(d) = inst.dest() {
                out.retain(|def| def.var != *d);
                out.insert(Definition {
                    var: d.clone(),
                    node,
                    index,
                });
            }
        }
        out
    }
}

pub fn analyze(cfg: &Cfg) -> DataflowResult<Definition> {
    run_analysis(cfg, &ReachingDefs)
}
