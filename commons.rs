//! Helpers shared by every stage of the toolchain.

/// A witness that a value passed validation.
///
/// Passes take and return `Valid<Program>` so that a program that skipped
/// [`crate::middle_end::ir::Program::validate`] cannot reach the optimizer
/// by accident.
#[derive(Clone, Debug)]
pub struct Valid<T>(pub T);

/// Escape hatch for values that are valid by construction (tests, programs
/// freshly serialized from a CFG).
pub fn skip_validation<T>(t: T) -> Valid<T> {
    Valid(t)
}
