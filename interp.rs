//! The reference interpreter.
//!
//! Executes `main` over the flat item list: straightforward dispatch with a
//! typed environment, arbitrary-precision integer arithmetic, and a typed
//! heap.  On termination the heap must be empty; anything still live is an
//! execution error.

use std::collections::BTreeMap as Map;
use std::fmt;
use std::io::Write;

use log::debug;
use num_bigint::BigInt;
use num_traits::Zero;

use crate::commons::Valid;
use crate::error::{Error, Result};
use crate::middle_end::ir::*;

use heap::{Heap, Key};

pub mod heap;

/// A runtime value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Int(BigInt),
    Bool(bool),
    Ptr(Key),
}

impl Value {
    pub fn runtime_type(&self) -> Type {
        match self {
            Value::Int(_) => Type::Int,
            Value::Bool(_) => Type::Bool,
            Value::Ptr(_) => Type::Ptr(None),
        }
    }

    fn as_int(&self) -> Result<&BigInt> {
        match self {
            Value::Int(i) => Ok(i),
            other => Err(Error::TypeError(format!("expected an int, got {other}"))),
        }
    }

    fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::TypeError(format!("expected a bool, got {other}"))),
        }
    }

    fn as_ptr(&self) -> Result<&Key> {
        match self {
            Value::Ptr(k) => Ok(k),
            other => Err(Error::TypeError(format!("expected a pointer, got {other}"))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Ptr(k) => write!(f, "ptr@{}+{}", k.base, k.offset),
        }
    }
}

/// Execute `main`, writing `print` output to `out`.  Returns the number of
/// instructions executed.
pub fn run<W: Write>(program: &Valid<Program>, out: &mut W) -> Result<u64> {
    let program = &program.0;
    let main = program.functions.get("main").ok_or(Error::MissingMain)?;
    let mut interp = Interp {
        env: Map::new(),
        heap: Heap::new(),
        out,
        count: 0,
    };
    interp.run_function(main)?;
    if !interp.heap.is_empty() {
        return Err(Error::LeakedAllocations(interp.heap.live_count()));
    }
    debug!("executed {} instruction(s)", interp.count);
    Ok(interp.count)
}

struct Interp<'w, W: Write> {
    env: Map<Var, Value>,
    heap: Heap,
    out: &'w mut W,
    count: u64,
}

impl<W: Write> Interp<'_, W> {
    fn run_function(&mut self, f: &Function) -> Result<()> {
        let labels: Map<Label, usize> = f
            .items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                Item::Label(l) => Some((l.clone(), i)),
                Item::Code(_) => None,
            })
            .collect();
        let jump = |l: &Label| -> Result<usize> {
            labels.get(l).copied().ok_or_else(|| Error::UnknownLabel(l.clone()))
        };

        let mut pc = 0;
        while pc < f.items.len() {
            let item = &f.items[pc];
            pc += 1;
            let Item::Code(inst) = item else { continue };
            self.count += 1;
            match inst {
                Instruction::Constant { dest, typ, value } => {
                    let v = match (typ, value) {
                        (Type::Int, Literal::Int(i)) => Value::Int(i.clone()),
                        (Type::Bool, Literal::Bool(b)) => Value::Bool(*b),
                        _ => {
                            return Err(Error::TypeError(format!(
                                "const of {value} does not have type {typ}"
                            )))
                        }
                    };
                    self.env.insert(dest.clone(), v);
                }
                Instruction::Value { op, dest, typ, args } => {
                    let v = self.eval(*op, typ, args)?;
                    self.env.insert(dest.clone(), v);
                }
                Instruction::Effect { op, args } => match op {
                    EffectOp::Jmp => pc = jump(&args[0])?,
                    EffectOp::Br => {
                        let taken = if self.get(&args[0])?.as_bool()? {
                            &args[1]
                        } else {
                            &args[2]
                        };
                        pc = jump(taken)?;
                    }
                    EffectOp::Ret => return Ok(()),
                    EffectOp::Print => {
                        let line = args
                            .iter()
                            .map(|a| self.get(a).map(Value::to_string))
                            .collect::<Result<Vec<_>>>()?
                            .join(" ");
                        writeln!(self.out, "{line}")?;
                    }
                    EffectOp::Store => {
                        let v = self.get(&args[1])?.clone();
                        let k = self.get(&args[0])?.as_ptr()?.clone();
                        self.heap.write(&k, v)?;
                    }
                    EffectOp::Free => {
                        let k = self.get(&args[0])?.as_ptr()?.clone();
                        self.heap.free(&k)?;
                    }
                    EffectOp::Nop => {}
                },
            }
        }
        // Falling off the end behaves as `ret`.
        Ok(())
    }

    fn get(&self, v: &Var) -> Result<&Value> {
        self.env
            .get(v)
            .ok_or_else(|| Error::UndefinedVariable(v.clone()))
    }

    fn eval(&mut self, op: ValueOp, typ: &Type, args: &[Var]) -> Result<Value> {
        use ValueOp::*;
        Ok(match op {
            Add | Sub | Mul | Div => {
                let a = self.get(&args[0])?.as_int()?.clone();
                let b = self.get(&args[1])?.as_int()?.clone();
                if op == Div && b.is_zero() {
                    return Err(Error::DivisionByZero);
                }
                Value::Int(match op {
                    Add => a + b,
                    Sub => a - b,
                    Mul => a * b,
                    _ => a / b,
                })
            }
            Eq | Lt | Le | Gt | Ge => {
                let a = self.get(&args[0])?.as_int()?.clone();
                let b = self.get(&args[1])?.as_int()?.clone();
                Value::Bool(match op {
                    Eq => a == b,
                    Lt => a < b,
                    Le => a <= b,
                    Gt => a > b,
                    _ => a >= b,
                })
            }
            Not => Value::Bool(!self.get(&args[0])?.as_bool()?),
            And => {
                let a = self.get(&args[0])?.as_bool()?;
                let b = self.get(&args[1])?.as_bool()?;
                Value::Bool(a && b)
            }
            Or => {
                let a = self.get(&args[0])?.as_bool()?;
                let b = self.get(&args[1])?.as_bool()?;
                Value::Bool(a || b)
            }
            Id => self.get(&args[0])?.clone(),
            Alloc => {
                let n = self.get(&args[0])?.as_int()?.clone();
                Value::Ptr(self.heap.alloc(&n, typ.pointee().cloned())?)
            }
            Load => {
                let k = self.get(&args[0])?.as_ptr()?.clone();
                self.heap.read(&k)?
            }
            PtrAdd => {
                let k = self.get(&args[0])?.as_ptr()?.clone();
                let delta = self.get(&args[1])?.as_int()?.clone();
                Value::Ptr(k.shifted(&delta))
            }
            PtrEq | PtrLt | PtrLe | PtrGt | PtrGe => {
                let a = self.get(&args[0])?.as_ptr()?.clone();
                let b = self.get(&args[1])?.as_ptr()?.clone();
                if a.base != b.base {
                    return Err(Error::CrossAllocationCompare);
                }
                Value::Bool(match op {
                    PtrEq => a.offset == b.offset,
                    PtrLt => a.offset < b.offset,
                    PtrLe => a.offset <= b.offset,
                    PtrGt => a.offset > b.offset,
                    _ => a.offset >= b.offset,
                })
            }
        })
    }
}
