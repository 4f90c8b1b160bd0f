use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure this toolchain can surface.
///
/// Errors are never recovered: each tool runs a single program and reports
/// one diagnostic with a non-zero exit.
#[derive(Error, Debug)]
pub enum Error {
    /// The input IR is structurally broken (missing fields, bad shapes).
    #[error("malformed instruction: {0}")]
    Malformed(String),

    #[error("unknown opcode `{0}`")]
    UnknownOpcode(String),

    #[error("`{op}` expects {expected} argument(s), got {got}")]
    WrongArgCount {
        op: String,
        expected: usize,
        got: usize,
    },

    #[error("program has no function named `main`")]
    MissingMain,

    #[error("duplicate label `{0}`")]
    DuplicateLabel(String),

    #[error("unknown label `{0}`")]
    UnknownLabel(String),

    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),

    #[error("type error: {0}")]
    TypeError(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("heap misuse: {0}")]
    HeapError(String),

    #[error("cannot compare pointers into different allocations")]
    CrossAllocationCompare,

    /// The program terminated while allocations were still live.
    #[error("{0} allocation(s) still live at program exit")]
    LeakedAllocations(usize),

    /// An optimizer bug, not a user error.
    #[error("optimizer invariant violated: {0}")]
    OptimizerInvariant(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid program JSON: {0}")]
    Json(#[from] serde_json::Error),
}
