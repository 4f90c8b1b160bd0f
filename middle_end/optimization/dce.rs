//! Dead-code elimination.
//!
//! Alternates a global live-variables pass with local dead-store
//! elimination until no block shrinks.  Only pure value writes whose
//! results are definitely unobserved are dropped; effect instructions are
//! never touched.

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use log::debug;

use super::per_function;
use crate::commons::Valid;
use crate::error::Result;
use crate::middle_end::analysis::liveness;
use crate::middle_end::cfg::{Cfg, NodeId};
use crate::middle_end::ir::{Program, Var};

/// The actual optimization pass.
pub fn dead_code_elim(program: Valid<Program>) -> Result<Valid<Program>> {
    per_function(program, |f| {
        let mut cfg = Cfg::new(f)?;
        run_on_cfg(&mut cfg);
        Ok(cfg.to_function(&f.name))
    })
}

/// Iterate until a full round leaves every block's instruction count
/// unchanged.
pub fn run_on_cfg(cfg: &mut Cfg) {
    loop {
        let live = liveness::analyze(cfg);
        let mut changed = false;
        for id in cfg.real_node_ids() {
            changed |= drop_dead_writes(cfg, id, &live.output[&id]);
        }
        if !changed {
            break;
        }
    }
}

/// Local killed-locals elimination for one block.  Returns whether the
/// instruction list shrank.
fn drop_dead_writes(cfg: &mut Cfg, id: NodeId, live_out: &Set<Var>) -> bool {
    let node = cfg.node_mut(id);

    // Pending value writes whose result has not been read yet.
    let mut last_def: Map<Var, usize> = Map::new();
    let mut to_drop: Set<usize> = Set::new();

    for (i, inst) in node.block.insts.iter().enumerate() {
        // Reads clear the pending entry before the new definition is
        // recorded, so `a = a + 1` does not drop the prior `a`.
        for v in inst.read_vars() {
            last_def.remove(v);
        }
        if let Some(d) = inst.dest() {
            if let Some(prev) = last_def.insert(d.clone(), i) {
                to_drop.insert(prev);
            }
        }
    }

    let term_read = node.block.term.reads();
    for (v, i) in &last_def {
        if !live_out.contains(v) && term_read != Some(v) {
            to_drop.insert(*i);
        }
    }

    if to_drop.is_empty() {
        return false;
    }
    debug!(
        "dce: dropping {} instruction(s) from `{}`",
        to_drop.len(),
        node.block.name
    );
    let insts = std::mem::take(&mut node.block.insts);
    node.block.insts = insts
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !to_drop.contains(i))
        .map(|(_, inst)| inst)
        .collect();
    true
}
