//! Loop induction-variable strength reduction.
//!
//! Per natural loop: detect basic induction variables (`i = add i c` with a
//! loop-invariant step), derive variables of the form `k = a*i + b`,
//! materialize the coefficient computations into a synthesized pre-header,
//! replace each derived definition with a copy of a running surrogate,
//! rewrite loop exit comparisons against the surrogate, and finally delete
//! basic variables that no longer have any observable use.

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use log::debug;

use super::per_function;
use crate::commons::Valid;
use crate::error::{Error, Result};
use crate::middle_end::analysis::liveness;
use crate::middle_end::cfg::{Cfg, NodeId, Terminator};
use crate::middle_end::control::{self, NaturalLoop};
use crate::middle_end::ir::{Instruction, Label, Program, Type, ValueOp, Var};

/// The actual optimization pass.
pub fn strength_reduce(program: Valid<Program>) -> Result<Valid<Program>> {
    per_function(program, |f| {
        let mut cfg = Cfg::new(f)?;
        run_on_cfg(&mut cfg)?;
        Ok(cfg.to_function(&f.name))
    })
}

/// Reduce every loop of the function, one at a time.  Dominators and loops
/// are recomputed after each reduction so the bodies of enclosing loops see
/// the nodes inserted for inner ones.
pub fn run_on_cfg(cfg: &mut Cfg) -> Result<()> {
    let mut done: Set<Label> = Set::new();
    loop {
        let doms = control::dominators(cfg);
        let regions = merge_by_header(control::natural_loops(cfg, &doms));
        let next = regions
            .into_iter()
            .find(|lp| !done.contains(cfg.name_of(lp.header)));
        let Some(lp) = next else { break };
        done.insert(cfg.name_of(lp.header).to_owned());
        reduce_loop(cfg, &lp)?;
    }
    Ok(())
}

/// One region per header: bodies and back-edge tails of all back edges
/// into the same header, merged.
struct LoopRegion {
    header: NodeId,
    tails: Set<NodeId>,
    body: Set<NodeId>,
}

fn merge_by_header(loops: Vec<NaturalLoop>) -> Vec<LoopRegion> {
    let mut regions: Vec<LoopRegion> = vec![];
    for lp in loops {
        match regions.iter_mut().find(|r| r.header == lp.header) {
            Some(r) => {
                r.tails.insert(lp.tail);
                r.body.extend(lp.body);
            }
            None => regions.push(LoopRegion {
                header: lp.header,
                tails: [lp.tail].into(),
                body: lp.body,
            }),
        }
    }
    regions
}

// SECTION: induction-variable descriptors

/// Coefficient and offset expression trees.  Leaves name loop-invariant
/// variables; internal nodes are the combinators lowered during
/// materialization.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Expr {
    Var(Var),
    Add(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    PtrAdd(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn add(l: Expr, r: Expr) -> Expr {
        Expr::Add(Box::new(l), Box::new(r))
    }

    fn mul(l: Expr, r: Expr) -> Expr {
        Expr::Mul(Box::new(l), Box::new(r))
    }

    fn ptradd(l: Expr, r: Expr) -> Expr {
        Expr::PtrAdd(Box::new(l), Box::new(r))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IvKind {
    Int,
    Ptr,
}

/// `i` with its single in-loop update `i = add i step` (or `ptradd`).
struct BasicIv {
    var: Var,
    step: Var,
    kind: IvKind,
    node: NodeId,
    index: usize,
}

/// `k = a*base + b`.  An absent `a` encodes the unit coefficient (pure
/// `add`/`ptradd` chains off the basic variable); `b_is_ptr` records
/// whether the offset tree carries the pointer operand.
struct DerivedIv {
    var: Var,
    base: Var,
    a: Option<Expr>,
    b: Option<Expr>,
    b_is_ptr: bool,
    kind: IvKind,
    typ: Type,
    node: NodeId,
    index: usize,
}

/// The slice of a descriptor needed to extend it to a new variable.
struct IvDesc {
    base: Var,
    a: Option<Expr>,
    b: Option<Expr>,
    b_is_ptr: bool,
    kind: IvKind,
}

/// The surrogate chosen for a basic variable (the first derived variable
/// encountered); comparison rewriting reuses its materializations.
struct Surrogate {
    t: Var,
    a: Option<Expr>,
    b: Option<Expr>,
    b_is_ptr: bool,
    base_is_ptr: bool,
    kind: IvKind,
    typ: Type,
}

// SECTION: detection

/// All in-loop definition sites, per variable.
fn loop_defs(cfg: &Cfg, body: &Set<NodeId>) -> Map<Var, Vec<(NodeId, usize)>> {
    let mut defs: Map<Var, Vec<(NodeId, usize)>> = Map::new();
    for &n in body {
        for (i, inst) in cfg.node(n).block.insts.iter().enumerate() {
            if let Some(d) = inst.dest() {
                defs.entry(d.clone()).or_default().push((n, i));
            }
        }
    }
    defs
}

/// Loop-invariant: defined only outside the loop, or by a single in-loop
/// constant write.
fn is_invariant(cfg: &Cfg, defs: &Map<Var, Vec<(NodeId, usize)>>, v: &Var) -> bool {
    match defs.get(v) {
        None => true,
        Some(sites) => {
            sites.len() == 1 && {
                let (n, i) = sites[0];
                matches!(cfg.node(n).block.insts[i], Instruction::Constant { .. })
            }
        }
    }
}

fn find_basic_ivs(
    cfg: &Cfg,
    defs: &Map<Var, Vec<(NodeId, usize)>>,
) -> Vec<BasicIv> {
    let mut out = vec![];
    for (v, sites) in defs {
        if sites.len() != 1 {
            continue;
        }
        let (node, index) = sites[0];
        let Instruction::Value { op, args, .. } = &cfg.node(node).block.insts[index] else {
            continue;
        };
        let kind = match op {
            ValueOp::Add => IvKind::Int,
            ValueOp::PtrAdd => IvKind::Ptr,
            _ => continue,
        };
        // One operand is the variable itself; the other is the step.  A
        // pointer update keeps the pointer on the left.
        let step = match (args[0] == *v, args[1] == *v) {
            (true, false) => &args[1],
            (false, true) if *op == ValueOp::Add => &args[0],
            _ => continue,
        };
        if !is_invariant(cfg, defs, step) {
            continue;
        }
        out.push(BasicIv {
            var: v.clone(),
            step: step.clone(),
            kind,
            node,
            index,
        });
    }
    out
}

fn descriptor_of(v: &Var, basics: &[BasicIv], deriveds: &[DerivedIv]) -> Option<IvDesc> {
    if let Some(b) = basics.iter().find(|b| b.var == *v) {
        return Some(IvDesc {
            base: b.var.clone(),
            a: None,
            b: None,
            b_is_ptr: false,
            kind: b.kind,
        });
    }
    deriveds.iter().find(|d| d.var == *v).map(|d| IvDesc {
        base: d.base.clone(),
        a: d.a.clone(),
        b: d.b.clone(),
        b_is_ptr: d.b_is_ptr,
        kind: d.kind,
    })
}

/// Derived variables, to fixpoint: a single in-loop definition combining
/// one known induction variable with one loop-invariant operand.
fn find_derived_ivs(
    cfg: &Cfg,
    body: &Set<NodeId>,
    defs: &Map<Var, Vec<(NodeId, usize)>>,
    basics: &[BasicIv],
) -> Vec<DerivedIv> {
    let body_order: Vec<NodeId> = cfg
        .order()
        .iter()
        .copied()
        .filter(|id| body.contains(id))
        .collect();
    let mut deriveds: Vec<DerivedIv> = vec![];
    loop {
        let mut grew = false;
        for &n in &body_order {
            for (index, inst) in cfg.node(n).block.insts.iter().enumerate() {
                let Instruction::Value { op, dest, typ, args } = inst else {
                    continue;
                };
                if !matches!(op, ValueOp::Add | ValueOp::Mul | ValueOp::PtrAdd)
                    || args.len() != 2
                {
                    continue;
                }
                if basics.iter().any(|b| b.var == *dest)
                    || deriveds.iter().any(|d| d.var == *dest)
                {
                    continue;
                }
                if defs.get(dest).map_or(true, |sites| sites.len() != 1) {
                    continue;
                }
                let (x, y) = (&args[0], &args[1]);
                let dx = descriptor_of(x, basics, &deriveds);
                let dy = descriptor_of(y, basics, &deriveds);
                let (j, m, iv_first) = match (dx, dy) {
                    (Some(d), None) if is_invariant(cfg, defs, y) => (d, y.clone(), true),
                    (None, Some(d)) if is_invariant(cfg, defs, x) => (d, x.clone(), false),
                    _ => continue,
                };
                let Some(k) = derive(*op, dest, typ, &j, &m, iv_first, n, index) else {
                    continue;
                };
                deriveds.push(k);
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    deriveds
}

fn derive(
    op: ValueOp,
    dest: &Var,
    typ: &Type,
    j: &IvDesc,
    m: &Var,
    iv_first: bool,
    node: NodeId,
    index: usize,
) -> Option<DerivedIv> {
    let mk = |a, b, b_is_ptr, kind| {
        Some(DerivedIv {
            var: dest.clone(),
            base: j.base.clone(),
            a,
            b,
            b_is_ptr,
            kind,
            typ: typ.clone(),
            node,
            index,
        })
    };
    match op {
        // k = mul j m  ⇒  a' = m·a, b' = m·b
        ValueOp::Mul => {
            if j.kind != IvKind::Int || j.b_is_ptr {
                return None;
            }
            let a = Some(match &j.a {
                None => Expr::Var(m.clone()),
                Some(a) => Expr::mul(Expr::Var(m.clone()), a.clone()),
            });
            let b = j.b.as_ref().map(|b| Expr::mul(Expr::Var(m.clone()), b.clone()));
            mk(a, b, false, IvKind::Int)
        }
        // k = add j m  ⇒  a' = a, b' = b + m
        ValueOp::Add => {
            if j.kind != IvKind::Int {
                return None;
            }
            let b = Some(match &j.b {
                None => Expr::Var(m.clone()),
                Some(b) => Expr::add(b.clone(), Expr::Var(m.clone())),
            });
            mk(j.a.clone(), b, false, IvKind::Int)
        }
        ValueOp::PtrAdd if iv_first => {
            // k = ptradd j m: pointer induction variable, integer offset.
            if j.kind != IvKind::Ptr {
                return None;
            }
            let b = Some(match &j.b {
                None => Expr::Var(m.clone()),
                Some(b) if j.b_is_ptr => Expr::ptradd(b.clone(), Expr::Var(m.clone())),
                Some(b) => Expr::add(b.clone(), Expr::Var(m.clone())),
            });
            mk(j.a.clone(), b, j.b_is_ptr, IvKind::Ptr)
        }
        ValueOp::PtrAdd => {
            // k = ptradd m j: loop-invariant pointer displaced by an
            // integer induction variable.
            if j.kind != IvKind::Int || j.b_is_ptr {
                return None;
            }
            let b = Some(match &j.b {
                None => Expr::Var(m.clone()),
                Some(b) => Expr::ptradd(Expr::Var(m.clone()), b.clone()),
            });
            mk(j.a.clone(), b, true, IvKind::Ptr)
        }
        _ => None,
    }
}

// SECTION: rewriting

/// Lower an expression tree into the pre-header, one instruction per
/// internal node.  Identical trees share a single materialization.
fn materialize(
    cfg: &mut Cfg,
    pre: NodeId,
    cache: &mut Map<Expr, Var>,
    e: &Expr,
    ptr_typ: &Type,
) -> Var {
    if let Expr::Var(v) = e {
        return v.clone();
    }
    if let Some(hit) = cache.get(e) {
        return hit.clone();
    }
    let (op, l, r, typ) = match e {
        Expr::Add(l, r) => (ValueOp::Add, l, r, Type::Int),
        Expr::Mul(l, r) => (ValueOp::Mul, l, r, Type::Int),
        Expr::PtrAdd(l, r) => (ValueOp::PtrAdd, l, r, ptr_typ.clone()),
        Expr::Var(_) => unreachable!(),
    };
    let lv = materialize(cfg, pre, cache, l, ptr_typ);
    let rv = materialize(cfg, pre, cache, r, ptr_typ);
    let dest = cfg.names.fresh("t");
    cfg.node_mut(pre)
        .block
        .insts
        .push(Instruction::value(op, &dest, typ, &[lv.as_str(), rv.as_str()]));
    cache.insert(e.clone(), dest.clone());
    dest
}

fn reduce_loop(cfg: &mut Cfg, lp: &LoopRegion) -> Result<()> {
    let header_name = cfg.name_of(lp.header).to_owned();
    debug!("reducing loop headed by `{header_name}`");

    // Pre-header: fresh node just before the header with a single successor
    // to it; every predecessor that is not a back-edge tail is redirected.
    let pre_name = cfg.names.claim(&format!("{header_name}_preentry"));
    let pre = cfg.add_node_before(
        lp.header,
        pre_name,
        vec![],
        Terminator::Jmp(header_name.clone()),
    )?;
    cfg.set_successor(pre, lp.header);
    cfg.add_header(lp.header, pre, &lp.tails);

    let defs = loop_defs(cfg, &lp.body);
    let basics = find_basic_ivs(cfg, &defs);
    if basics.is_empty() {
        return Ok(());
    }
    let deriveds = find_derived_ivs(cfg, &lp.body, &defs, &basics);

    let mut cache: Map<Expr, Var> = Map::new();
    let mut surrogates: Map<Var, Surrogate> = Map::new();
    let mut updates: Map<(NodeId, usize), Vec<Instruction>> = Map::new();

    for k in &deriveds {
        let basic = basics.iter().find(|b| b.var == k.base).ok_or_else(|| {
            Error::OptimizerInvariant(format!("derived variable `{}` has no basic base", k.var))
        })?;
        let a_var = match &k.a {
            Some(a) => Some(materialize(cfg, pre, &mut cache, a, &k.typ)),
            None => None,
        };
        let b_var = match &k.b {
            Some(b) => Some(materialize(cfg, pre, &mut cache, b, &k.typ)),
            None => None,
        };

        let t = cfg.names.fresh("t");
        init_surrogate(cfg, pre, &t, k, basic, a_var.as_deref(), b_var.as_deref())?;

        // The derived definition itself becomes a copy of the surrogate.
        cfg.node_mut(k.node).block.insts[k.index] =
            Instruction::value(ValueOp::Id, &k.var, k.typ.clone(), &[t.as_str()]);

        // Keep `t = a·i + b` in lockstep: after the basic update the
        // surrogate advances by a·step.
        let delta = match &k.a {
            None => basic.step.clone(),
            Some(a) => {
                let e = Expr::mul(a.clone(), Expr::Var(basic.step.clone()));
                materialize(cfg, pre, &mut cache, &e, &k.typ)
            }
        };
        let op = if k.kind == IvKind::Ptr {
            ValueOp::PtrAdd
        } else {
            ValueOp::Add
        };
        updates
            .entry((basic.node, basic.index))
            .or_default()
            .push(Instruction::value(
                op,
                &t,
                k.typ.clone(),
                &[t.as_str(), delta.as_str()],
            ));

        surrogates.entry(k.base.clone()).or_insert_with(|| Surrogate {
            t: t.clone(),
            a: k.a.clone(),
            b: k.b.clone(),
            b_is_ptr: k.b_is_ptr,
            base_is_ptr: basic.kind == IvKind::Ptr,
            kind: k.kind,
            typ: k.typ.clone(),
        });
    }

    apply_updates(cfg, updates);
    rewrite_comparisons(cfg, lp, pre, &defs, &basics, &surrogates, &mut cache);
    eliminate_basics(cfg, lp, &basics);
    Ok(())
}

/// Emit the pre-header initialization `t = a·i + b` for one surrogate.
fn init_surrogate(
    cfg: &mut Cfg,
    pre: NodeId,
    t: &str,
    k: &DerivedIv,
    basic: &BasicIv,
    a: Option<&str>,
    b: Option<&str>,
) -> Result<()> {
    let base = basic.var.as_str();
    match k.kind {
        IvKind::Int => {
            let insts = match (a, b) {
                (Some(a), None) => {
                    vec![Instruction::value(ValueOp::Mul, t, k.typ.clone(), &[base, a])]
                }
                (Some(a), Some(b)) => {
                    let tmp = cfg.names.fresh("t");
                    vec![
                        Instruction::value(ValueOp::Mul, &tmp, Type::Int, &[base, a]),
                        Instruction::value(ValueOp::Add, t, k.typ.clone(), &[tmp.as_str(), b]),
                    ]
                }
                (None, Some(b)) => {
                    vec![Instruction::value(ValueOp::Add, t, k.typ.clone(), &[base, b])]
                }
                (None, None) => {
                    vec![Instruction::value(ValueOp::Id, t, k.typ.clone(), &[base])]
                }
            };
            cfg.node_mut(pre).block.insts.extend(insts);
        }
        // The basic variable is itself the pointer; displace it.
        IvKind::Ptr if basic.kind == IvKind::Ptr => {
            let inst = match b {
                Some(b) => Instruction::value(ValueOp::PtrAdd, t, k.typ.clone(), &[base, b]),
                None => Instruction::value(ValueOp::Id, t, k.typ.clone(), &[base]),
            };
            cfg.node_mut(pre).block.insts.push(inst);
        }
        // The pointer came in through the offset tree; scale the integer
        // base and displace the materialized pointer.
        IvKind::Ptr => {
            let Some(b) = b else {
                return Err(Error::OptimizerInvariant(format!(
                    "pointer surrogate for `{}` lacks a pointer operand",
                    k.var
                )));
            };
            let scaled = match a {
                Some(a) => {
                    let tmp = cfg.names.fresh("t");
                    cfg.node_mut(pre).block.insts.push(Instruction::value(
                        ValueOp::Mul,
                        &tmp,
                        Type::Int,
                        &[base, a],
                    ));
                    tmp
                }
                None => basic.var.clone(),
            };
            cfg.node_mut(pre).block.insts.push(Instruction::value(
                ValueOp::PtrAdd,
                t,
                k.typ.clone(),
                &[b, scaled.as_str()],
            ));
        }
    }
    Ok(())
}

/// Insert the surrogate advances right after each basic update, highest
/// index first so earlier indices stay valid.
fn apply_updates(cfg: &mut Cfg, updates: Map<(NodeId, usize), Vec<Instruction>>) {
    let mut by_node: Map<NodeId, Vec<(usize, Vec<Instruction>)>> = Map::new();
    for ((n, i), insts) in updates {
        by_node.entry(n).or_default().push((i, insts));
    }
    for (n, mut inserts) in by_node {
        inserts.sort_by(|a, b| b.0.cmp(&a.0));
        let block = &mut cfg.node_mut(n).block;
        for (i, insts) in inserts {
            for (off, inst) in insts.into_iter().enumerate() {
                block.insts.insert(i + 1 + off, inst);
            }
        }
    }
}

struct CmpSite {
    node: NodeId,
    index: usize,
    dest: Var,
    iv_first: bool,
    basic: Var,
    bound: Var,
}

/// Rewrite `cmp = lt i n` (either operand order) against the surrogate of
/// `i`, synthesizing `N = a·n + b` in the pre-header.
fn rewrite_comparisons(
    cfg: &mut Cfg,
    lp: &LoopRegion,
    pre: NodeId,
    defs: &Map<Var, Vec<(NodeId, usize)>>,
    basics: &[BasicIv],
    surrogates: &Map<Var, Surrogate>,
    cache: &mut Map<Expr, Var>,
) {
    let mut sites = vec![];
    for &n in cfg.order() {
        if !lp.body.contains(&n) {
            continue;
        }
        for (index, inst) in cfg.node(n).block.insts.iter().enumerate() {
            let Instruction::Value { op, dest, args, .. } = inst else {
                continue;
            };
            if !matches!(op, ValueOp::Lt | ValueOp::PtrLt) || args.len() != 2 {
                continue;
            }
            let (x, y) = (&args[0], &args[1]);
            let is_basic = |v: &Var| {
                basics.iter().any(|b| b.var == *v) && surrogates.contains_key(v)
            };
            let site = if is_basic(x) && is_invariant(cfg, defs, y) {
                Some((true, x.clone(), y.clone()))
            } else if is_basic(y) && is_invariant(cfg, defs, x) {
                Some((false, y.clone(), x.clone()))
            } else {
                None
            };
            if let Some((iv_first, basic, bound)) = site {
                sites.push(CmpSite {
                    node: n,
                    index,
                    dest: dest.clone(),
                    iv_first,
                    basic,
                    bound,
                });
            }
        }
    }

    for site in sites {
        let s = &surrogates[&site.basic];
        let scaled = match &s.a {
            None => Expr::Var(site.bound.clone()),
            Some(a) => Expr::mul(Expr::Var(site.bound.clone()), a.clone()),
        };
        let bound_expr = match &s.b {
            None => scaled,
            Some(b) if s.base_is_ptr => Expr::ptradd(scaled, b.clone()),
            Some(b) if s.b_is_ptr => Expr::ptradd(b.clone(), scaled),
            Some(b) => Expr::add(b.clone(), scaled),
        };
        let n_var = materialize(cfg, pre, cache, &bound_expr, &s.typ);
        let op = if s.kind == IvKind::Ptr {
            ValueOp::PtrLt
        } else {
            ValueOp::Lt
        };
        let args: [&str; 2] = if site.iv_first {
            [s.t.as_str(), n_var.as_str()]
        } else {
            [n_var.as_str(), s.t.as_str()]
        };
        debug!("rewriting comparison `{}` against surrogate `{}`", site.dest, s.t);
        cfg.node_mut(site.node).block.insts[site.index] =
            Instruction::value(op, &site.dest, Type::Bool, &args);
    }
}

/// Delete basic variables that are dead outside the loop and whose only
/// remaining in-loop use is their own self-update.
fn eliminate_basics(cfg: &mut Cfg, lp: &LoopRegion, basics: &[BasicIv]) {
    let live = liveness::analyze(cfg);
    for basic in basics {
        let live_outside = lp.body.iter().any(|&n| {
            cfg.succs(n)
                .iter()
                .any(|s| !lp.body.contains(s) && live.input[s].contains(&basic.var))
        });
        if live_outside {
            continue;
        }
        let Some((un, ui)) = find_update(cfg, &lp.body, &basic.var) else {
            continue;
        };
        let mut used_elsewhere = false;
        for &n in &lp.body {
            let node = cfg.node(n);
            for (i, inst) in node.block.insts.iter().enumerate() {
                if n == un && i == ui {
                    continue;
                }
                if inst.read_vars().iter().any(|v| **v == basic.var) {
                    used_elsewhere = true;
                }
            }
            if node.block.term.reads() == Some(&basic.var) {
                used_elsewhere = true;
            }
        }
        if used_elsewhere {
            continue;
        }
        debug!("deleting basic induction variable `{}`", basic.var);
        cfg.node_mut(un).block.insts.remove(ui);
    }
}

fn find_update(cfg: &Cfg, body: &Set<NodeId>, var: &Var) -> Option<(NodeId, usize)> {
    for &n in body {
        for (i, inst) in cfg.node(n).block.insts.iter().enumerate() {
            if inst.dest() == Some(var) {
                return Some((n, i));
            }
        }
    }
    None
}
