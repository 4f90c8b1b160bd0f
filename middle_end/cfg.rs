//! Basic-block construction and the mutable control-flow graph.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]; edges are index
//! sets, so dominator and loop sets are sets of indices with cheap equality.
//! Two synthetic nodes bracket every function: `__entry__` (no contents, one
//! successor to the first real block) and `__exit__` (target of every `ret`).

use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::fmt;

use log::debug;

use super::ir::*;
use crate::error::{Error, Result};

pub mod dump_impl;

pub const ENTRY: &str = "__entry__";
pub const EXIT: &str = "__exit__";

/// Index of a node in the owning [`Cfg`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// The single exit of a basic block, kept out of the instruction list so
/// edges can be rewritten without disturbing instruction indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
    Jmp(Label),
    Br {
        cond: Var,
        then_to: Label,
        else_to: Label,
    },
    Ret,
}

impl Terminator {
    pub fn from_instruction(inst: &Instruction) -> Option<Terminator> {
        let Instruction::Effect { op, args } = inst else {
            return None;
        };
        match op {
            EffectOp::Jmp => Some(Terminator::Jmp(args[0].clone())),
            EffectOp::Br => Some(Terminator::Br {
                cond: args[0].clone(),
                then_to: args[1].clone(),
                else_to: args[2].clone(),
            }),
            EffectOp::Ret => Some(Terminator::Ret),
            _ => None,
        }
    }

    pub fn to_instruction(&self) -> Instruction {
        match self {
            Terminator::Jmp(l) => Instruction::effect(EffectOp::Jmp, &[l]),
            Terminator::Br {
                cond,
                then_to,
                else_to,
            } => Instruction::effect(EffectOp::Br, &[cond, then_to, else_to]),
            Terminator::Ret => Instruction::effect(EffectOp::Ret, &[]),
        }
    }

    /// The variable read by this terminator, if any (`br` reads its
    /// condition; `jmp` and `ret` read nothing).
    pub fn reads(&self) -> Option<&Var> {
        match self {
            Terminator::Br { cond, .. } => Some(cond),
            _ => None,
        }
    }

    pub fn targets(&self) -> Vec<&Label> {
        match self {
            Terminator::Jmp(l) => vec![l],
            Terminator::Br {
                then_to, else_to, ..
            } => vec![then_to, else_to],
            Terminator::Ret => vec![],
        }
    }

    /// Rewrite every occurrence of `old` in the target list to `new`.
    pub fn rename_target(&mut self, old: &str, new: &str) {
        let rename = |l: &mut Label| {
            if l == old {
                *l = new.to_owned();
            }
        };
        match self {
            Terminator::Jmp(l) => rename(l),
            Terminator::Br {
                then_to, else_to, ..
            } => {
                rename(then_to);
                rename(else_to);
            }
            Terminator::Ret => {}
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_instruction())
    }
}

/// A maximal straight-line instruction sequence plus its terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub name: Label,
    /// Original positional index of the block within its function.
    pub pos: usize,
    pub insts: Vec<Instruction>,
    pub term: Terminator,
}

#[derive(Clone, Debug)]
pub struct CfgNode {
    pub id: NodeId,
    pub block: Block,
    pub succs: Set<NodeId>,
    pub preds: Set<NodeId>,
}

/// Fresh names with a reserved prefix, skipping anything already present
/// in the function (labels and variables alike).
#[derive(Clone, Debug)]
pub struct NameSupply {
    counter: usize,
    taken: Set<String>,
}

impl NameSupply {
    fn from_function(f: &Function) -> NameSupply {
        let mut taken = Set::new();
        for item in &f.items {
            match item {
                Item::Label(l) => {
                    taken.insert(l.clone());
                }
                Item::Code(inst) => {
                    if let Some(d) = inst.dest() {
                        taken.insert(d.clone());
                    }
                    for a in inst.args() {
                        taken.insert(a.clone());
                    }
                }
            }
        }
        NameSupply { counter: 0, taken }
    }

    /// Produce `__<stem><n>` for the next free `n`.
    pub fn fresh(&mut self, stem: &str) -> String {
        loop {
            let name = format!("__{}{}", stem, self.counter);
            self.counter += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }

    /// Use `wanted` verbatim when free, otherwise fall back to a fresh
    /// suffixed variant.
    pub fn claim(&mut self, wanted: &str) -> String {
        if self.taken.insert(wanted.to_owned()) {
            wanted.to_owned()
        } else {
            self.fresh(&format!("{wanted}_"))
        }
    }
}

/// The control-flow graph of one function.
#[derive(Debug)]
pub struct Cfg {
    nodes: Vec<CfgNode>,
    /// Serialization order; starts with the entry and ends with the exit.
    order: Vec<NodeId>,
    by_name: Map<Label, NodeId>,
    pub entry: NodeId,
    pub exit: NodeId,
    pub names: NameSupply,
}

// Intermediate product of the left-to-right walk over a function's items.
struct RawBlock {
    name: Option<Label>,
    insts: Vec<Instruction>,
    term: Option<Terminator>,
}

impl RawBlock {
    // Nop-only anonymous blocks are discarded.
    fn is_discardable(&self) -> bool {
        self.name.is_none()
            && self.term.is_none()
            && self
                .insts
                .iter()
                .all(|i| matches!(i, Instruction::Effect { op: EffectOp::Nop, .. }))
    }
}

impl Cfg {
    /// Build the CFG for `f`: split items into blocks, normalize
    /// fall-throughs into explicit terminators, install edges, and prune
    /// blocks unreachable from the entry.
    pub fn new(f: &Function) -> Result<Cfg> {
        let mut names = NameSupply::from_function(f);

        let mut raw: Vec<RawBlock> = vec![];
        let mut cur = RawBlock {
            name: None,
            insts: vec![],
            term: None,
        };
        let close = |cur: &mut RawBlock, raw: &mut Vec<RawBlock>| {
            if !cur.is_discardable() {
                raw.push(std::mem::replace(
                    cur,
                    RawBlock {
                        name: None,
                        insts: vec![],
                        term: None,
                    },
                ));
            } else {
                cur.insts.clear();
            }
        };

        for item in &f.items {
            match item {
                Item::Label(l) => {
                    close(&mut cur, &mut raw);
                    if l == ENTRY || l == EXIT {
                        return Err(Error::Malformed(format!("label `{l}` is reserved")));
                    }
                    cur.name = Some(l.clone());
                }
                Item::Code(inst) => match Terminator::from_instruction(inst) {
                    Some(term) => {
                        cur.term = Some(term);
                        close(&mut cur, &mut raw);
                    }
                    None => cur.insts.push(inst.clone()),
                },
            }
        }
        close(&mut cur, &mut raw);

        // Fall-through normalization: a block without a terminator jumps to
        // the next block in text order, or returns if it is last.
        let block_names: Vec<Label> = raw
            .iter()
            .map(|b| b.name.clone().unwrap_or_else(|| names.fresh("block_")))
            .collect();
        let blocks: Vec<Block> = raw
            .into_iter()
            .zip(block_names.iter())
            .enumerate()
            .map(|(pos, (b, name))| Block {
                name: name.clone(),
                pos,
                insts: b.insts,
                term: b.term.unwrap_or_else(|| match block_names.get(pos + 1) {
                    Some(next) => Terminator::Jmp(next.clone()),
                    None => Terminator::Ret,
                }),
            })
            .collect();

        // Arena: entry, real blocks, exit.
        let mut nodes = vec![];
        let mut by_name = Map::new();
        let entry = NodeId(0);
        nodes.push(CfgNode {
            id: entry,
            block: Block {
                name: ENTRY.to_owned(),
                pos: 0,
                insts: vec![],
                term: Terminator::Ret,
            },
            succs: Set::new(),
            preds: Set::new(),
        });
        for block in blocks {
            let id = NodeId(nodes.len());
            by_name.insert(block.name.clone(), id);
            nodes.push(CfgNode {
                id,
                block,
                succs: Set::new(),
                preds: Set::new(),
            });
        }
        let exit = NodeId(nodes.len());
        nodes.push(CfgNode {
            id: exit,
            block: Block {
                name: EXIT.to_owned(),
                pos: nodes.len(),
                insts: vec![],
                term: Terminator::Ret,
            },
            succs: Set::new(),
            preds: Set::new(),
        });
        by_name.insert(ENTRY.to_owned(), entry);
        by_name.insert(EXIT.to_owned(), exit);

        let order = (0..nodes.len()).map(NodeId).collect();
        let mut cfg = Cfg {
            nodes,
            order,
            by_name,
            entry,
            exit,
            names,
        };

        // Edge installation.
        let first_real = cfg.order.get(1).copied().filter(|&id| id != cfg.exit);
        if let Some(first) = first_real {
            let name = cfg.nodes[first.0].block.name.clone();
            cfg.nodes[entry.0].block.term = Terminator::Jmp(name);
            cfg.add_edge(entry, first);
        } else {
            cfg.nodes[entry.0].block.term = Terminator::Jmp(EXIT.to_owned());
            cfg.add_edge(entry, exit);
        }
        for id in cfg.real_node_ids() {
            let term = cfg.nodes[id.0].block.term.clone();
            match term {
                Terminator::Ret => cfg.add_edge(id, cfg.exit),
                _ => {
                    for target in term.targets() {
                        let to = cfg
                            .find(target)
                            .ok_or_else(|| Error::UnknownLabel(target.clone()))?;
                        cfg.add_edge(id, to);
                    }
                }
            }
        }

        cfg.prune_unreachable();
        debug!(
            "built cfg for `{}`: {} block(s)",
            f.name,
            cfg.real_node_ids().len()
        );
        Ok(cfg)
    }

    // SECTION: accessors

    pub fn node(&self, id: NodeId) -> &CfgNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut CfgNode {
        &mut self.nodes[id.0]
    }

    pub fn name_of(&self, id: NodeId) -> &str {
        &self.nodes[id.0].block.name
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn succs(&self, id: NodeId) -> &Set<NodeId> {
        &self.nodes[id.0].succs
    }

    pub fn preds(&self, id: NodeId) -> &Set<NodeId> {
        &self.nodes[id.0].preds
    }

    /// Node ids in serialization order, entry first and exit last.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Node ids in serialization order, synthetic entry/exit excluded.
    pub fn real_node_ids(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .copied()
            .filter(|&id| id != self.entry && id != self.exit)
            .collect()
    }

    // SECTION: mutation

    fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from.0].succs.insert(to);
        self.nodes[to.0].preds.insert(from);
    }

    /// Make `target` the sole successor of `n` and point the terminator at
    /// it with an unconditional jump.
    pub fn set_successor(&mut self, n: NodeId, target: NodeId) {
        let old: Vec<NodeId> = self.nodes[n.0].succs.iter().copied().collect();
        for s in old {
            self.nodes[s.0].preds.remove(&n);
        }
        self.nodes[n.0].succs = [target].into();
        self.nodes[target.0].preds.insert(n);
        let name = self.nodes[target.0].block.name.clone();
        self.nodes[n.0].block.term = Terminator::Jmp(name);
    }

    /// Make `{t, f}` the successors of `n` with a conditional branch on
    /// `cond`.
    pub fn set_successors(&mut self, n: NodeId, t: NodeId, f: NodeId, cond: Var) {
        let old: Vec<NodeId> = self.nodes[n.0].succs.iter().copied().collect();
        for s in old {
            self.nodes[s.0].preds.remove(&n);
        }
        self.nodes[n.0].succs = [t, f].into();
        self.nodes[t.0].preds.insert(n);
        self.nodes[f.0].preds.insert(n);
        let then_to = self.nodes[t.0].block.name.clone();
        let else_to = self.nodes[f.0].block.name.clone();
        self.nodes[n.0].block.term = Terminator::Br {
            cond,
            then_to,
            else_to,
        };
    }

    /// Swing the edge `n → old` over to `n → new`, rewriting the
    /// terminator's target list.  No-op when the edge does not exist.
    pub fn replace_edge(&mut self, n: NodeId, old: NodeId, new: NodeId) {
        if !self.nodes[n.0].succs.contains(&old) {
            return;
        }
        self.nodes[n.0].succs.remove(&old);
        self.nodes[old.0].preds.remove(&n);
        self.nodes[n.0].succs.insert(new);
        self.nodes[new.0].preds.insert(n);
        let old_name = self.nodes[old.0].block.name.clone();
        let new_name = self.nodes[new.0].block.name.clone();
        self.nodes[n.0].block.term.rename_target(&old_name, &new_name);
    }

    /// Detach every incoming and outgoing edge of `n` and drop it from the
    /// serialization order.
    pub fn delete(&mut self, n: NodeId) {
        let succs: Vec<NodeId> = self.nodes[n.0].succs.iter().copied().collect();
        for s in succs {
            self.nodes[s.0].preds.remove(&n);
        }
        let preds: Vec<NodeId> = self.nodes[n.0].preds.iter().copied().collect();
        for p in preds {
            self.nodes[p.0].succs.remove(&n);
        }
        self.nodes[n.0].succs.clear();
        self.nodes[n.0].preds.clear();
        self.order.retain(|&id| id != n);
        let name = self.nodes[n.0].block.name.clone();
        self.by_name.remove(&name);
    }

    /// Redirect every non-back-edge predecessor of `header` to `pre`.
    /// Afterwards `header`'s predecessors are exactly
    /// `back_sources ∪ {pre}`.
    pub fn add_header(&mut self, header: NodeId, pre: NodeId, back_sources: &Set<NodeId>) {
        let preds: Vec<NodeId> = self.nodes[header.0].preds.iter().copied().collect();
        for p in preds {
            if p != pre && !back_sources.contains(&p) {
                self.replace_edge(p, header, pre);
            }
        }
    }

    /// Insert a fresh node right before `before` in the serialization
    /// order.  The caller is responsible for wiring its edges.
    pub fn add_node_before(
        &mut self,
        before: NodeId,
        name: Label,
        insts: Vec<Instruction>,
        term: Terminator,
    ) -> Result<NodeId> {
        let at = self
            .order
            .iter()
            .position(|&id| id == before)
            .ok_or_else(|| {
                Error::OptimizerInvariant(format!("node {before} is not in the cfg order"))
            })?;
        let id = NodeId(self.nodes.len());
        self.by_name.insert(name.clone(), id);
        self.nodes.push(CfgNode {
            id,
            block: Block {
                name,
                pos: self.nodes.len(),
                insts,
                term,
            },
            succs: Set::new(),
            preds: Set::new(),
        });
        self.order.insert(at, id);
        Ok(id)
    }

    fn prune_unreachable(&mut self) {
        let mut reachable: Set<NodeId> = Set::new();
        let mut stack = vec![self.entry];
        while let Some(n) = stack.pop() {
            if !reachable.insert(n) {
                continue;
            }
            stack.extend(self.nodes[n.0].succs.iter().copied());
        }
        let doomed: Vec<NodeId> = self
            .order
            .iter()
            .copied()
            .filter(|id| !reachable.contains(id) && *id != self.entry && *id != self.exit)
            .collect();
        for id in doomed {
            debug!("pruning unreachable block `{}`", self.name_of(id));
            self.delete(id);
        }
    }

    // SECTION: serialization

    /// Serialize the graph back to a flat function body: every real block
    /// becomes its label, its instructions, and its terminator — except
    /// that a jump whose sole successor is the exit becomes `ret`.
    pub fn to_function(&self, name: &str) -> Function {
        let mut items = vec![];
        for &id in &self.order {
            if id == self.entry || id == self.exit {
                continue;
            }
            let node = &self.nodes[id.0];
            items.push(Item::Label(node.block.name.clone()));
            items.extend(node.block.insts.iter().cloned().map(Item::Code));
            let exits_only = node.succs.len() == 1 && node.succs.contains(&self.exit);
            let term = match &node.block.term {
                Terminator::Jmp(_) if exits_only => Terminator::Ret,
                t => t.clone(),
            };
            items.push(Item::Code(term.to_instruction()));
        }
        Function {
            name: name.to_owned(),
            items,
        }
    }

    /// Structural well-formedness: the bidirectional edge invariant, the
    /// terminator/successor correspondence, a predecessor-free entry, and a
    /// successor-free exit.
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::OptimizerInvariant(msg));
        if !self.nodes[self.entry.0].preds.is_empty() {
            return fail("entry has predecessors".to_owned());
        }
        if !self.nodes[self.exit.0].succs.is_empty() {
            return fail("exit has successors".to_owned());
        }
        for &id in &self.order {
            let node = &self.nodes[id.0];
            for &s in &node.succs {
                if !self.nodes[s.0].preds.contains(&id) {
                    return fail(format!("edge {id} → {s} is not bidirectional"));
                }
            }
            for &p in &node.preds {
                if !self.nodes[p.0].succs.contains(&id) {
                    return fail(format!("edge {p} → {id} is not bidirectional"));
                }
            }
            if id == self.entry || id == self.exit {
                continue;
            }
            let expected: Set<NodeId> = match &node.block.term {
                Terminator::Ret => [self.exit].into(),
                t => t
                    .targets()
                    .iter()
                    .filter_map(|l| self.find(l))
                    .collect(),
            };
            if expected != node.succs {
                return fail(format!(
                    "`{}`: successors do not match terminator targets",
                    node.block.name
                ));
            }
        }
        Ok(())
    }
}
