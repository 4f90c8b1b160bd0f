//! Implementation for generating a graphviz file for the Control Flow Graph.

use std::collections::BTreeSet as Set;

use super::*;
use crate::middle_end::ir::Program;

pub fn dump_cfg(cfg: &Cfg, fname: &str) -> String {
    let mut node_str = String::new();
    let mut edge_str = String::new();

    let mut gen_node = |id: NodeId| {
        let block = &cfg.node(id).block;
        let mut label = format!("{}:\\l", block.name);
        for inst in &block.insts {
            label.push_str(&format!("  {inst}\\l"));
        }
        if id != cfg.entry && id != cfg.exit {
            label.push_str(&format!("  {}\\l", block.term));
        }
        node_str.push_str(&format!(
            r#"
{fname}__{} [label = "{label}"];
"#,
            block.name
        ));
    };

    let mut gen_edge = |from: NodeId, to: NodeId| {
        edge_str.push_str(&format!(
            r#"
{fname}__{} -> {fname}__{};
"#,
            cfg.name_of(from),
            cfg.name_of(to)
        ));
    };

    let mut worklist = vec![cfg.entry];
    let mut visited = Set::<NodeId>::new();
    while let Some(id) = worklist.pop() {
        if !visited.insert(id) {
            continue;
        }
        gen_node(id);
        for &next in cfg.succs(id) {
            gen_edge(id, next);
            worklist.push(next);
        }
    }

    format!(
        r#"digraph {fname} {{
label = "{fname}";
node [shape=box nojustify=true];
{node_str}
{edge_str}
}}
"#
    )
}

/// One digraph per function, in name order.
pub fn dump_program(program: &Program) -> crate::error::Result<String> {
    let mut out = String::new();
    for (name, f) in &program.functions {
        out.push_str(&dump_cfg(&Cfg::new(f)?, name));
    }
    Ok(out)
}
