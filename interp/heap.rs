//! The typed heap: per-allocation cell arrays addressed by (base, offset)
//! keys.

use std::collections::BTreeMap as Map;

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use super::Value;
use crate::error::{Error, Result};
use crate::middle_end::ir::Type;

/// A pointer: which allocation, and a displacement into it.
///
/// `ptradd` shifts the offset without validation; dereferencing validates.
/// Keys are comparable only within a single allocation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Key {
    pub base: usize,
    pub offset: BigInt,
}

impl Key {
    pub fn shifted(&self, delta: &BigInt) -> Key {
        Key {
            base: self.base,
            offset: &self.offset + delta,
        }
    }
}

struct Allocation {
    cells: Vec<Option<Value>>,
    /// Declared pointee type of the allocating instruction; checked against
    /// every stored value.  `None` for opaque pointer allocations.
    elem: Option<Type>,
}

#[derive(Default)]
pub struct Heap {
    store: Map<usize, Allocation>,
    next_base: usize,
}

impl Heap {
    pub fn new() -> Heap {
        Heap::default()
    }

    /// Allocate `n > 0` cells, all uninitialized.
    pub fn alloc(&mut self, n: &BigInt, elem: Option<Type>) -> Result<Key> {
        if !n.is_positive() {
            return Err(Error::HeapError(format!("alloc of non-positive size {n}")));
        }
        let len = n
            .to_usize()
            .ok_or_else(|| Error::HeapError(format!("alloc of unrepresentable size {n}")))?;
        let base = self.next_base;
        self.next_base += 1;
        self.store.insert(
            base,
            Allocation {
                cells: vec![None; len],
                elem,
            },
        );
        Ok(Key {
            base,
            offset: BigInt::zero(),
        })
    }

    /// Release an allocation.  Only the original zero-offset pointer of a
    /// live allocation may be freed.
    pub fn free(&mut self, k: &Key) -> Result<()> {
        if !k.offset.is_zero() {
            return Err(Error::HeapError(format!(
                "free of interior pointer (offset {})",
                k.offset
            )));
        }
        if self.store.remove(&k.base).is_none() {
            return Err(Error::HeapError(format!(
                "free of dead allocation {}",
                k.base
            )));
        }
        Ok(())
    }

    pub fn read(&self, k: &Key) -> Result<Value> {
        let alloc = self.live(k)?;
        let idx = in_bounds(k, alloc.cells.len())?;
        alloc.cells[idx].clone().ok_or_else(|| {
            Error::HeapError(format!(
                "load from uninitialized cell {}+{}",
                k.base, k.offset
            ))
        })
    }

    pub fn write(&mut self, k: &Key, v: Value) -> Result<()> {
        let alloc = self
            .store
            .get_mut(&k.base)
            .ok_or_else(|| Error::HeapError(format!("access to dead allocation {}", k.base)))?;
        if let Some(elem) = &alloc.elem {
            if !elem.compatible(&v.runtime_type()) {
                return Err(Error::TypeError(format!(
                    "store of {} into an allocation of {elem}",
                    v.runtime_type()
                )));
            }
        }
        let idx = in_bounds(k, alloc.cells.len())?;
        alloc.cells[idx] = Some(v);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.store.len()
    }

    fn live(&self, k: &Key) -> Result<&Allocation> {
        self.store
            .get(&k.base)
            .ok_or_else(|| Error::HeapError(format!("access to dead allocation {}", k.base)))
    }
}

fn in_bounds(k: &Key, len: usize) -> Result<usize> {
    k.offset.to_usize().filter(|&i| i < len).ok_or_else(|| {
        Error::HeapError(format!(
            "out-of-bounds access at {}+{} (length {len})",
            k.base, k.offset
        ))
    })
}
