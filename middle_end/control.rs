//! Control-structure analysis: reverse postorder, dominators, back edges,
//! and natural loops.

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::collections::VecDeque;

use super::cfg::{Cfg, NodeId};

/// Reverse-postorder list of the nodes reachable from the entry, computed
/// by DFS over successors.
pub fn reverse_postorder(cfg: &Cfg) -> Vec<NodeId> {
    let mut postorder = vec![];
    let mut visited: Set<NodeId> = Set::new();
    // (node, expanded): nodes are emitted when popped the second time.
    let mut stack = vec![(cfg.entry, false)];
    while let Some((n, expanded)) = stack.pop() {
        if expanded {
            postorder.push(n);
            continue;
        }
        if !visited.insert(n) {
            continue;
        }
        stack.push((n, true));
        for &s in cfg.succs(n) {
            if !visited.contains(&s) {
                stack.push((s, false));
            }
        }
    }
    postorder.reverse();
    postorder
}

/// Dominator sets for every reachable node.
#[derive(Clone, Debug)]
pub struct Dominators {
    pub dom: Map<NodeId, Set<NodeId>>,
    rpo: Vec<NodeId>,
}

impl Dominators {
    pub fn dominates(&self, d: NodeId, n: NodeId) -> bool {
        self.dom.get(&n).is_some_and(|s| s.contains(&d))
    }

    pub fn rpo(&self) -> &[NodeId] {
        &self.rpo
    }
}

/// Iterative dominator computation: seed `Dom(entry) = {entry}` and every
/// other node with the full reachable set, then shrink
/// `Dom(n) = {n} ∪ ⋂ Dom(p)` over reverse postorder until fixpoint.
pub fn dominators(cfg: &Cfg) -> Dominators {
    let rpo = reverse_postorder(cfg);
    let all: Set<NodeId> = rpo.iter().copied().collect();

    let mut dom: Map<NodeId, Set<NodeId>> = Map::new();
    for &n in &rpo {
        if n == cfg.entry {
            dom.insert(n, [n].into());
        } else {
            dom.insert(n, all.clone());
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &n in &rpo {
            if n == cfg.entry {
                continue;
            }
            let mut meet: Option<Set<NodeId>> = None;
            for p in cfg.preds(n) {
                let Some(pdom) = dom.get(p) else { continue };
                meet = Some(match meet {
                    None => pdom.clone(),
                    Some(acc) => acc.intersection(pdom).copied().collect(),
                });
            }
            let mut next = meet.unwrap_or_default();
            next.insert(n);
            if dom[&n] != next {
                dom.insert(n, next);
                changed = true;
            }
        }
    }

    Dominators { dom, rpo }
}

/// Edges `t → h` where `h` dominates `t`, in reverse-postorder discovery
/// order.
pub fn back_edges(cfg: &Cfg, doms: &Dominators) -> Vec<(NodeId, NodeId)> {
    let mut edges = vec![];
    for &t in doms.rpo() {
        for &h in cfg.succs(t) {
            if doms.dominates(h, t) {
                edges.push((t, h));
            }
        }
    }
    edges
}

/// A natural loop: one record per back edge, no merging.  Two back edges
/// into the same header yield two records; consumers that need a single
/// region per header deduplicate on `header`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NaturalLoop {
    pub header: NodeId,
    pub tail: NodeId,
    pub body: Set<NodeId>,
}

/// Loop discovery by reverse BFS over predecessors from each back-edge
/// tail, with the header marked pre-visited.
pub fn natural_loops(cfg: &Cfg, doms: &Dominators) -> Vec<NaturalLoop> {
    back_edges(cfg, doms)
        .into_iter()
        .map(|(tail, header)| {
            let mut body: Set<NodeId> = [header, tail].into();
            let mut queue: VecDeque<NodeId> = [tail].into();
            while let Some(n) = queue.pop_front() {
                if n == header {
                    continue;
                }
                for &p in cfg.preds(n) {
                    if body.insert(p) {
                        queue.push_back(p);
                    }
                }
            }
            NaturalLoop { header, tail, body }
        })
        .collect()
}

#[cfg(test)]
mod tests;
