use std::rc::Rc;

use crate::error::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::pool::{ValueHandle, ValuePool};
use crate::value::TypedValue;

/// Scoped owner of a pooled value.
///
/// Dropping or resetting the guard returns its value to the pool exactly once.
/// Ownership moves with [`OwnershipGuard::transfer`]; guards are not clonable, so a
/// value can never be owned by two guards at the same time.
pub struct OwnershipGuard<'p, N: XdmNode> {
    pool: Option<&'p ValuePool<N>>,
    handle: Option<ValueHandle>,
}

impl<'p, N: XdmNode> OwnershipGuard<'p, N> {
    pub fn new(pool: &'p ValuePool<N>, handle: ValueHandle) -> Self {
        Self { pool: Some(pool), handle: Some(handle) }
    }

    pub fn empty() -> Self {
        Self { pool: None, handle: None }
    }

    pub fn get(&self) -> Option<ValueHandle> {
        self.handle
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    /// Dereference the held value. An empty guard yields `EmptyGuard`, a handle
    /// invalidated behind the guard's back yields `UseAfterInvalidation`.
    pub fn value(&self) -> Result<Rc<TypedValue<N>>, Error> {
        match (self.pool, self.handle) {
            (Some(pool), Some(handle)) => pool.get(handle),
            _ => Err(Error::from_code(ErrorCode::EmptyGuard, "ownership guard holds no value")),
        }
    }

    /// Return the held value (if any) and leave the guard empty.
    pub fn reset(&mut self) {
        if let (Some(pool), Some(handle)) = (self.pool, self.handle.take()) {
            if !pool.return_object(handle) {
                tracing::trace!(?handle, "guarded value was already invalidated");
            }
        }
    }

    /// Give up ownership without returning the value.
    pub fn release(&mut self) -> Option<ValueHandle> {
        self.handle.take()
    }

    /// Move ownership into a new guard; `self` is left empty.
    #[must_use]
    pub fn transfer(&mut self) -> Self {
        Self { pool: self.pool, handle: self.handle.take() }
    }
}

impl<N: XdmNode> Default for OwnershipGuard<'_, N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<N: XdmNode> Drop for OwnershipGuard<'_, N> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<N: XdmNode> std::fmt::Debug for OwnershipGuard<'_, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipGuard").field("handle", &self.handle).finish()
    }
}
