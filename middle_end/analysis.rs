//! The dataflow worklist framework.
//!
//! An analysis is a descriptor: a direction, an initial lattice value, a
//! join, and a per-block transfer function.  The driver computes the
//! fixpoint over the CFG and always reports `input`/`output` relative to
//! program order, regardless of the analysis direction.

use std::collections::VecDeque;
use std::collections::{BTreeMap as Map, BTreeSet as Set};

use super::cfg::{Cfg, NodeId};
use super::control;

pub mod defined_vars;
pub mod liveness;
pub mod reaching_defs;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

pub trait Analysis {
    type Fact: Clone + Ord;

    fn direction(&self) -> Direction;

    /// The initial lattice value.
    fn init(&self) -> Set<Self::Fact> {
        Set::new()
    }

    /// Join over the incoming values; set union unless overridden.
    fn merge(&self, inputs: &[&Set<Self::Fact>]) -> Set<Self::Fact> {
        let mut acc = Set::new();
        for s in inputs {
            acc.extend((*s).iter().cloned());
        }
        acc
    }

    fn transfer(&self, cfg: &Cfg, node: NodeId, input: &Set<Self::Fact>) -> Set<Self::Fact>;
}

/// Immutable fixpoint snapshot.  Mutating the CFG invalidates it; recompute
/// before consulting it again.
#[derive(Clone, Debug)]
pub struct DataflowResult<F> {
    /// Facts flowing into each block, in program order.
    pub input: Map<NodeId, Set<F>>,
    /// Facts flowing out of each block, in program order.
    pub output: Map<NodeId, Set<F>>,
}

/// Run `analysis` to fixpoint.  Nodes are seeded in reverse postorder for
/// forward analyses and postorder for backward ones; the fixpoint itself is
/// order-insensitive.
pub fn run_analysis<A: Analysis>(cfg: &Cfg, analysis: &A) -> DataflowResult<A::Fact> {
    let forward = analysis.direction() == Direction::Forward;
    let start = if forward { cfg.entry } else { cfg.exit };

    let mut input: Map<NodeId, Set<A::Fact>> = Map::new();
    let mut output: Map<NodeId, Set<A::Fact>> = Map::new();
    for &n in cfg.order() {
        input.insert(n, analysis.init());
        output.insert(n, analysis.init());
    }

    let mut seed: Vec<NodeId> = control::reverse_postorder(cfg);
    if !forward {
        seed.reverse();
    }
    for &n in cfg.order() {
        if !seed.contains(&n) {
            seed.push(n);
        }
    }
    let mut queued: Set<NodeId> = seed.iter().copied().collect();
    let mut worklist: VecDeque<NodeId> = seed.into();

    while let Some(n) = worklist.pop_front() {
        queued.remove(&n);
        let merged = if n == start {
            analysis.init()
        } else {
            let incoming = if forward { cfg.preds(n) } else { cfg.succs(n) };
            let sets: Vec<&Set<A::Fact>> = incoming.iter().map(|p| &output[p]).collect();
            analysis.merge(&sets)
        };
        let out = analysis.transfer(cfg, n, &merged);
        input.insert(n, merged);
        if out != output[&n] {
            output.insert(n, out);
            let outgoing = if forward { cfg.succs(n) } else { cfg.preds(n) };
            for &s in outgoing {
                if queued.insert(s) {
                    worklist.push_back(s);
                }
            }
        }
    }

    if forward {
        DataflowResult { input, output }
    } else {
        // Internally `input` held the merge over successors (program-order
        // live-out); swap so callers always see program order.
        DataflowResult {
            input: output,
            output: input,
        }
    }
}
