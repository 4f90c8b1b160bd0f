use pretty_assertions::assert_eq;

use super::*;
use crate::middle_end::ir::ValueOp;
use crate::middle_end::optimization::induction::strength_reduce;

// A counted loop multiplying the counter by a constant each iteration.
const COUNTED_MUL: &str = r#"{"functions": [{"name": "main", "instrs": [
    {"op": "const", "dest": "i", "type": "int", "value": 0},
    {"op": "const", "dest": "n", "type": "int", "value": 3},
    {"op": "const", "dest": "c", "type": "int", "value": 5},
    {"op": "const", "dest": "one", "type": "int", "value": 1},
    {"label": "loop"},
    {"op": "lt", "dest": "cond", "type": "bool", "args": ["i", "n"]},
    {"op": "br", "args": ["cond", "body", "end"]},
    {"label": "body"},
    {"op": "mul", "dest": "k", "type": "int", "args": ["i", "c"]},
    {"op": "print", "args": ["k"]},
    {"op": "add", "dest": "i", "type": "int", "args": ["i", "one"]},
    {"op": "jmp", "args": ["loop"]},
    {"label": "end"},
    {"op": "ret"}
]}]}"#;

fn block<'a>(
    groups: &'a [(String, Vec<Instruction>)],
    label: &str,
) -> &'a Vec<Instruction> {
    &groups.iter().find(|(l, _)| l == label).unwrap().1
}

#[test]
fn prints_the_same_sequence() {
    let after = preserves_output(strength_reduce, COUNTED_MUL);
    assert_eq!(interp_output(&after), "0\n5\n10\n");
}

#[test]
fn body_loses_its_multiplication() {
    let after = preserves_output(strength_reduce, COUNTED_MUL);
    let groups = instructions_by_label(&after);
    let body = block(&groups, "body");
    assert!(body
        .iter()
        .all(|i| !matches!(i, Instruction::Value { op: ValueOp::Mul, .. })));
    // The derived variable becomes a copy of the surrogate.
    assert!(body.iter().any(|i| matches!(
        i,
        Instruction::Value { op: ValueOp::Id, dest, .. } if dest == "k"
    )));
    // The surrogate advances where the counter used to.
    assert!(body
        .iter()
        .any(|i| matches!(i, Instruction::Value { op: ValueOp::Add, .. })));
}

#[test]
fn pre_header_is_inserted_before_the_header() {
    let after = preserves_output(strength_reduce, COUNTED_MUL);
    let groups = instructions_by_label(&after);
    let pre = groups
        .iter()
        .position(|(l, _)| l == "loop_preentry")
        .unwrap();
    let header = groups.iter().position(|(l, _)| l == "loop").unwrap();
    assert!(pre < header);
    // The scaled initialization lives in the pre-header.
    assert!(groups[pre]
        .1
        .iter()
        .any(|i| matches!(i, Instruction::Value { op: ValueOp::Mul, .. })));
}

#[test]
fn dead_basic_variable_is_deleted() {
    let after = preserves_output(strength_reduce, COUNTED_MUL);
    let groups = instructions_by_label(&after);
    // i's only surviving definition is its initialization outside the loop.
    assert!(block(&groups, "body")
        .iter()
        .all(|i| i.dest().map(String::as_str) != Some("i")));
    // The exit test now runs against the surrogate.
    for inst in block(&groups, "loop") {
        if let Instruction::Value { op: ValueOp::Lt, args, .. } = inst {
            assert!(args.iter().all(|a| a != "i"));
        }
    }
}

#[test]
fn add_chains_use_the_unit_coefficient() {
    let after = preserves_output(
        strength_reduce,
        r#"{"functions": [{"name": "main", "instrs": [
            {"op": "const", "dest": "i", "type": "int", "value": 0},
            {"op": "const", "dest": "n", "type": "int", "value": 4},
            {"op": "const", "dest": "m", "type": "int", "value": 10},
            {"op": "const", "dest": "one", "type": "int", "value": 1},
            {"label": "loop"},
            {"op": "lt", "dest": "cond", "type": "bool", "args": ["i", "n"]},
            {"op": "br", "args": ["cond", "body", "end"]},
            {"label": "body"},
            {"op": "add", "dest": "k", "type": "int", "args": ["i", "m"]},
            {"op": "print", "args": ["k"]},
            {"op": "add", "dest": "i", "type": "int", "args": ["i", "one"]},
            {"op": "jmp", "args": ["loop"]},
            {"label": "end"},
            {"op": "ret"}
        ]}]}"#,
    );
    assert_eq!(interp_output(&after), "10\n11\n12\n13\n");
    let groups = instructions_by_label(&after);
    assert!(block(&groups, "body").iter().any(|i| matches!(
        i,
        Instruction::Value { op: ValueOp::Id, dest, .. } if dest == "k"
    )));
}

#[test]
fn pointer_loops_reduce_via_ptradd() {
    let after = preserves_output(
        strength_reduce,
        r#"{"functions": [{"name": "main", "instrs": [
            {"op": "const", "dest": "n", "type": "int", "value": 3},
            {"op": "alloc", "dest": "p", "type": {"ptr": "int"}, "args": ["n"]},
            {"op": "const", "dest": "i", "type": "int", "value": 0},
            {"op": "const", "dest": "one", "type": "int", "value": 1},
            {"label": "loop"},
            {"op": "lt", "dest": "cond", "type": "bool", "args": ["i", "n"]},
            {"op": "br", "args": ["cond", "body", "done"]},
            {"label": "body"},
            {"op": "ptradd", "dest": "q", "type": {"ptr": "int"}, "args": ["p", "i"]},
            {"op": "store", "args": ["q", "i"]},
            {"op": "add", "dest": "i", "type": "int", "args": ["i", "one"]},
            {"op": "jmp", "args": ["loop"]},
            {"label": "done"},
            {"op": "load", "dest": "x0", "type": "int", "args": ["p"]},
            {"op": "print", "args": ["x0"]},
            {"op": "ptradd", "dest": "p1", "type": {"ptr": "int"}, "args": ["p", "one"]},
            {"op": "load", "dest": "x1", "type": "int", "args": ["p1"]},
            {"op": "print", "args": ["x1"]},
            {"op": "free", "args": ["p"]},
            {"op": "ret"}
        ]}]}"#,
    );
    assert_eq!(interp_output(&after), "0\n1\n");
    let groups = instructions_by_label(&after);
    // The address computation is a copy now, and the exit test is a
    // pointer comparison against a bound materialized in the pre-header.
    assert!(block(&groups, "body").iter().any(|i| matches!(
        i,
        Instruction::Value { op: ValueOp::Id, dest, .. } if dest == "q"
    )));
    assert!(block(&groups, "loop").iter().any(|i| matches!(
        i,
        Instruction::Value { op: ValueOp::PtrLt, dest, .. } if dest == "cond"
    )));
}

#[test]
fn non_induction_updates_are_left_alone() {
    let after = preserves_output(
        strength_reduce,
        r#"{"functions": [{"name": "main", "instrs": [
            {"op": "const", "dest": "i", "type": "int", "value": 1},
            {"op": "const", "dest": "two", "type": "int", "value": 2},
            {"op": "const", "dest": "n", "type": "int", "value": 16},
            {"label": "loop"},
            {"op": "lt", "dest": "cond", "type": "bool", "args": ["i", "n"]},
            {"op": "br", "args": ["cond", "body", "end"]},
            {"label": "body"},
            {"op": "mul", "dest": "i", "type": "int", "args": ["i", "two"]},
            {"op": "jmp", "args": ["loop"]},
            {"label": "end"},
            {"op": "print", "args": ["i"]},
            {"op": "ret"}
        ]}]}"#,
    );
    assert_eq!(interp_output(&after), "16\n");
    // A multiplicative update is not a basic induction variable.
    let groups = instructions_by_label(&after);
    assert!(block(&groups, "body")
        .iter()
        .any(|i| matches!(i, Instruction::Value { op: ValueOp::Mul, .. })));
}

#[test]
fn duplicate_back_edges_share_one_pre_header() {
    let after = preserves_output(
        strength_reduce,
        r#"{"functions": [{"name": "main", "instrs": [
            {"op": "const", "dest": "i", "type": "int", "value": 0},
            {"op": "const", "dest": "n", "type": "int", "value": 3},
            {"op": "const", "dest": "c", "type": "int", "value": 5},
            {"op": "const", "dest": "one", "type": "int", "value": 1},
            {"op": "const", "dest": "flag", "type": "bool", "value": true},
            {"label": "loop"},
            {"op": "lt", "dest": "cond", "type": "bool", "args": ["i", "n"]},
            {"op": "br", "args": ["cond", "body", "end"]},
            {"label": "body"},
            {"op": "mul", "dest": "k", "type": "int", "args": ["i", "c"]},
            {"op": "print", "args": ["k"]},
            {"op": "add", "dest": "i", "type": "int", "args": ["i", "one"]},
            {"op": "br", "args": ["flag", "loop", "cont"]},
            {"label": "cont"},
            {"op": "jmp", "args": ["loop"]},
            {"label": "end"},
            {"op": "ret"}
        ]}]}"#,
    );
    assert_eq!(interp_output(&after), "0\n5\n10\n");
    let groups = instructions_by_label(&after);
    let pre_headers = groups
        .iter()
        .filter(|(l, _)| l.starts_with("loop_preentry"))
        .count();
    assert_eq!(pre_headers, 1);
}
