use pretty_assertions::assert_eq;

use super::*;
use crate::middle_end::cfg::Cfg;
use crate::middle_end::ir::Program;

fn cfg_of(src: &str) -> Cfg {
    let p = Program::from_json_str(src).unwrap().validate().unwrap();
    Cfg::new(&p.0.functions["main"]).unwrap()
}

const LOOP: &str = r#"{"functions": [{"name": "main", "instrs": [
    {"op": "const", "dest": "i", "type": "int", "value": 0},
    {"op": "const", "dest": "n", "type": "int", "value": 3},
    {"op": "const", "dest": "one", "type": "int", "value": 1},
    {"label": "loop"},
    {"op": "lt", "dest": "cond", "type": "bool", "args": ["i", "n"]},
    {"op": "br", "args": ["cond", "body", "end"]},
    {"label": "body"},
    {"op": "add", "dest": "i", "type": "int", "args": ["i", "one"]},
    {"op": "jmp", "args": ["loop"]},
    {"label": "end"},
    {"op": "ret"}
]}]}"#;

#[test]
fn rpo_starts_at_the_entry() {
    let cfg = cfg_of(LOOP);
    let rpo = reverse_postorder(&cfg);
    assert_eq!(rpo[0], cfg.entry);
    // Every reachable node appears exactly once.
    let unique: Set<NodeId> = rpo.iter().copied().collect();
    assert_eq!(unique.len(), rpo.len());
    assert_eq!(unique.len(), cfg.order().len());
}

#[test]
fn dominators_of_a_linear_chain() {
    let cfg = cfg_of(
        r#"{"functions": [{"name": "main", "instrs": [
            {"label": "a"},
            {"op": "jmp", "args": ["b"]},
            {"label": "b"},
            {"op": "jmp", "args": ["c"]},
            {"label": "c"},
            {"op": "ret"}
        ]}]}"#,
    );
    let doms = dominators(&cfg);
    let (a, b, c) = (
        cfg.find("a").unwrap(),
        cfg.find("b").unwrap(),
        cfg.find("c").unwrap(),
    );
    assert!(doms.dominates(cfg.entry, c));
    assert!(doms.dominates(a, b));
    assert!(doms.dominates(a, c));
    assert!(doms.dominates(b, c));
    assert!(!doms.dominates(c, b));
    assert!(!doms.dominates(b, a));
    assert_eq!(doms.dom[&c], Set::from([cfg.entry, a, b, c]));
}

#[test]
fn diamond_branches_do_not_dominate_the_join() {
    let cfg = cfg_of(
        r#"{"functions": [{"name": "main", "instrs": [
            {"op": "const", "dest": "p", "type": "bool", "value": true},
            {"op": "br", "args": ["p", "l", "r"]},
            {"label": "l"},
            {"op": "jmp", "args": ["join"]},
            {"label": "r"},
            {"op": "jmp", "args": ["join"]},
            {"label": "join"},
            {"op": "ret"}
        ]}]}"#,
    );
    let doms = dominators(&cfg);
    let first = cfg.find("__block_0").unwrap();
    let l = cfg.find("l").unwrap();
    let r = cfg.find("r").unwrap();
    let join = cfg.find("join").unwrap();

    assert!(doms.dominates(first, join));
    assert!(!doms.dominates(l, join));
    assert!(!doms.dominates(r, join));
    // Dom(n) \ {n} agrees with the intersection over predecessors.
    let expected: Set<NodeId> = doms.dom[&l]
        .intersection(&doms.dom[&r])
        .copied()
        .collect();
    let mut strict = doms.dom[&join].clone();
    strict.remove(&join);
    assert_eq!(strict, expected);
}

#[test]
fn back_edge_requires_domination() {
    let cfg = cfg_of(LOOP);
    let doms = dominators(&cfg);
    let header = cfg.find("loop").unwrap();
    let body = cfg.find("body").unwrap();
    assert_eq!(back_edges(&cfg, &doms), vec![(body, header)]);
    assert!(doms.dominates(header, body));
}

#[test]
fn natural_loop_body_is_reverse_reachable() {
    let cfg = cfg_of(LOOP);
    let doms = dominators(&cfg);
    let loops = natural_loops(&cfg, &doms);
    let header = cfg.find("loop").unwrap();
    let body = cfg.find("body").unwrap();
    assert_eq!(
        loops,
        vec![NaturalLoop {
            header,
            tail: body,
            body: Set::from([header, body]),
        }]
    );
}

#[test]
fn two_back_edges_yield_two_loop_records() {
    let cfg = cfg_of(
        r#"{"functions": [{"name": "main", "instrs": [
            {"op": "const", "dest": "p", "type": "bool", "value": true},
            {"label": "loop"},
            {"op": "br", "args": ["p", "t1", "t2"]},
            {"label": "t1"},
            {"op": "jmp", "args": ["loop"]},
            {"label": "t2"},
            {"op": "br", "args": ["p", "loop", "end"]},
            {"label": "end"},
            {"op": "ret"}
        ]}]}"#,
    );
    let doms = dominators(&cfg);
    let loops = natural_loops(&cfg, &doms);
    let header = cfg.find("loop").unwrap();
    assert_eq!(loops.len(), 2);
    assert!(loops.iter().all(|lp| lp.header == header));
    let tails: Set<NodeId> = loops.iter().map(|lp| lp.tail).collect();
    assert_eq!(
        tails,
        Set::from([cfg.find("t1").unwrap(), cfg.find("t2").unwrap()])
    );
}

#[test]
fn self_loop_is_its_own_tail() {
    let cfg = cfg_of(
        r#"{"functions": [{"name": "main", "instrs": [
            {"op": "const", "dest": "p", "type": "bool", "value": false},
            {"label": "spin"},
            {"op": "br", "args": ["p", "spin", "out"]},
            {"label": "out"},
            {"op": "ret"}
        ]}]}"#,
    );
    let doms = dominators(&cfg);
    let loops = natural_loops(&cfg, &doms);
    let spin = cfg.find("spin").unwrap();
    assert_eq!(
        loops,
        vec![NaturalLoop {
            header: spin,
            tail: spin,
            body: Set::from([spin]),
        }]
    );
}
