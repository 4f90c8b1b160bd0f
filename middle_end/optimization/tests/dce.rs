use num_bigint::BigInt;
use pretty_assertions::assert_eq;

use super::*;
use crate::commons::skip_validation;
use crate::middle_end::ir::{EffectOp, Literal};
use crate::middle_end::optimization::dce::dead_code_elim;
use crate::middle_end::optimization::normalize;

const SHADOWED_WRITE: &str = r#"{"functions": [{"name": "main", "instrs": [
    {"op": "const", "dest": "x", "type": "int", "value": 1},
    {"op": "const", "dest": "x", "type": "int", "value": 2},
    {"op": "print", "args": ["x"]},
    {"op": "ret"}
]}]}"#;

#[test]
fn drops_an_overwritten_write() {
    let after = preserves_output(dead_code_elim, SHADOWED_WRITE);
    let insts = main_instructions(&after);
    let consts: Vec<&Instruction> = insts
        .iter()
        .filter(|i| matches!(i, Instruction::Constant { .. }))
        .collect();
    assert_eq!(consts.len(), 1);
    assert!(matches!(
        consts[0],
        Instruction::Constant { value: Literal::Int(v), .. } if *v == BigInt::from(2)
    ));
    assert!(insts
        .iter()
        .any(|i| matches!(i, Instruction::Effect { op: EffectOp::Print, .. })));
}

#[test]
fn keeps_effectful_instructions() {
    let after = preserves_output(
        dead_code_elim,
        r#"{"functions": [{"name": "main", "instrs": [
            {"op": "const", "dest": "one", "type": "int", "value": 1},
            {"op": "alloc", "dest": "p", "type": {"ptr": "int"}, "args": ["one"]},
            {"op": "free", "args": ["p"]},
            {"op": "ret"}
        ]}]}"#,
    );
    // const, alloc, free, ret: nothing here is a dead pure write.
    assert_eq!(main_instructions(&after).len(), 4);
}

#[test]
fn removes_dead_chains_to_fixpoint() {
    let after = preserves_output(
        dead_code_elim,
        r#"{"functions": [{"name": "main", "instrs": [
            {"op": "const", "dest": "a", "type": "int", "value": 1},
            {"op": "const", "dest": "b", "type": "int", "value": 2},
            {"op": "add", "dest": "c", "type": "int", "args": ["a", "b"]},
            {"op": "const", "dest": "d", "type": "int", "value": 5},
            {"op": "print", "args": ["d"]},
            {"op": "ret"}
        ]}]}"#,
    );
    // Dropping c makes a and b dead; the outer fixpoint catches them too.
    assert_eq!(main_instructions(&after).len(), 3);
}

#[test]
fn a_read_keeps_the_previous_write() {
    let after = preserves_output(
        dead_code_elim,
        r#"{"functions": [{"name": "main", "instrs": [
            {"op": "const", "dest": "one", "type": "int", "value": 1},
            {"op": "const", "dest": "a", "type": "int", "value": 2},
            {"op": "add", "dest": "a", "type": "int", "args": ["a", "one"]},
            {"op": "print", "args": ["a"]},
            {"op": "ret"}
        ]}]}"#,
    );
    // `a = add a one` reads the prior `a`, so nothing may be dropped.
    assert_eq!(main_instructions(&after).len(), 5);
    assert_eq!(interp_output(&after), "3\n");
}

#[test]
fn keeps_writes_live_across_branches() {
    let after = preserves_output(
        dead_code_elim,
        r#"{"functions": [{"name": "main", "instrs": [
            {"op": "const", "dest": "p", "type": "bool", "value": true},
            {"op": "const", "dest": "x", "type": "int", "value": 7},
            {"op": "br", "args": ["p", "l", "r"]},
            {"label": "l"},
            {"op": "jmp", "args": ["join"]},
            {"label": "r"},
            {"op": "jmp", "args": ["join"]},
            {"label": "join"},
            {"op": "print", "args": ["x"]},
            {"op": "ret"}
        ]}]}"#,
    );
    assert!(main_instructions(&after)
        .iter()
        .any(|i| i.dest().map(String::as_str) == Some("x")));
}

#[test]
fn dce_is_idempotent() {
    let once = dead_code_elim(parse(SHADOWED_WRITE)).unwrap().0;
    let twice = dead_code_elim(skip_validation(once.clone())).unwrap().0;
    assert_eq!(once, twice);
}

#[test]
fn normalize_drops_unreachable_blocks() {
    let after = normalize(parse(
        r#"{"functions": [{"name": "main", "instrs": [
            {"op": "const", "dest": "v", "type": "int", "value": 1},
            {"op": "print", "args": ["v"]},
            {"op": "ret"},
            {"label": "orphan"},
            {"op": "print", "args": ["v"]},
            {"op": "ret"}
        ]}]}"#,
    ))
    .unwrap();
    assert!(!after.0.functions["main"]
        .items
        .iter()
        .any(|i| matches!(i, Item::Label(l) if l == "orphan")));
}

#[test]
fn normalize_is_identity_on_normal_form() {
    let src = r#"{"functions": [{"name": "main", "instrs": [
        {"label": "b0"},
        {"op": "const", "dest": "v", "type": "int", "value": 1},
        {"op": "print", "args": ["v"]},
        {"op": "ret"}
    ]}]}"#;
    let p = parse(src).0;
    let after = normalize(skip_validation(p.clone())).unwrap().0;
    assert_eq!(p, after);
}
