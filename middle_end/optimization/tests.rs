use pretty_assertions::assert_eq;

use crate::commons::Valid;
use crate::error::Result;
use crate::middle_end::ir::{Instruction, Item, Program};

mod dce;
mod induction;

fn parse(src: &str) -> Valid<Program> {
    Program::from_json_str(src).unwrap().validate().unwrap()
}

fn interp_output(program: &Valid<Program>) -> String {
    let mut out = Vec::new();
    crate::interp::run(program, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

// Run `pass` over the program and check that the optimized form prints the
// same output as the original, then hand it back for structural checks.
fn preserves_output(
    pass: fn(Valid<Program>) -> Result<Valid<Program>>,
    src: &str,
) -> Valid<Program> {
    let before = parse(src);
    let after = pass(parse(src)).unwrap();
    assert_eq!(interp_output(&before), interp_output(&after));
    after
}

// The instructions of `main`, labels dropped.
fn main_instructions(program: &Valid<Program>) -> Vec<Instruction> {
    program.0.functions["main"]
        .items
        .iter()
        .filter_map(|item| match item {
            Item::Code(inst) => Some(inst.clone()),
            Item::Label(_) => None,
        })
        .collect()
}

// The instructions of `main` grouped by the label that opens their block.
fn instructions_by_label(program: &Valid<Program>) -> Vec<(String, Vec<Instruction>)> {
    let mut groups: Vec<(String, Vec<Instruction>)> = vec![];
    for item in &program.0.functions["main"].items {
        match item {
            Item::Label(l) => groups.push((l.clone(), vec![])),
            Item::Code(inst) => {
                if let Some((_, insts)) = groups.last_mut() {
                    insts.push(inst.clone());
                }
            }
        }
    }
    groups
}
