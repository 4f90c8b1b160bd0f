//! Optimization passes.
//!
//! Every pass takes a validated program, rebuilds each function through the
//! CFG, transforms it in place, and serializes it back.  Passes re-validate
//! their output so a pass bug cannot leak a broken program downstream.

use crate::commons::Valid;
use crate::error::Result;
use crate::middle_end::cfg::Cfg;
use crate::middle_end::ir::{Function, Program};

pub mod dce;
pub mod induction;

#[cfg(test)]
mod tests;

/// Run `rewrite` over every function of `program`.
fn per_function(
    program: Valid<Program>,
    mut rewrite: impl FnMut(&Function) -> Result<Function>,
) -> Result<Valid<Program>> {
    let mut program = program.0;
    program.functions = program
        .functions
        .iter()
        .map(|(id, f)| Ok((id.clone(), rewrite(f)?)))
        .collect::<Result<_>>()?;
    program.validate()
}

/// The identity pass: round-trip every function through CFG construction
/// and serialization.  Terminators become explicit and blocks unreachable
/// from the entry disappear, but no instruction is otherwise touched.
pub fn normalize(program: Valid<Program>) -> Result<Valid<Program>> {
    per_function(program, |f| Ok(Cfg::new(f)?.to_function(&f.name)))
}
