//! Value factory owning the lifetime of every [`TypedValue`] created during a
//! transformation run.
//!
//! Values live in a generational slot arena. A [`ValueHandle`] names its pool, the
//! pool epoch it was created in, a slot index and the slot generation, so a handle
//! kept past [`ValuePool::return_object`] or [`ValuePool::reset`] is detected
//! instead of aliasing whatever reuses the slot.
//!
//! The pool is single-threaded and hands out `Rc`s; its methods take `&self` so that
//! [`OwnershipGuard`]s borrowing the pool can coexist with further allocations.
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use compact_str::CompactString;

use crate::error::{Error, ErrorCode};
use crate::guard::OwnershipGuard;
use crate::model::XdmNode;
use crate::node_list::NodeList;
use crate::value::{ResultTreeFragment, Span, TypedValue, ValuePayload};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Shared {
    True,
    False,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Shared(Shared),
    Pooled { epoch: u32, index: usize, generation: u32 },
}

/// Opaque, copyable reference to a value owned by a [`ValuePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueHandle {
    pool: PoolId,
    slot: Slot,
}

impl ValueHandle {
    pub fn pool_id(&self) -> PoolId {
        self.pool
    }

    /// True for canonical singletons (`true`, `false`, null) shared across calls.
    pub fn is_shared(&self) -> bool {
        matches!(self.slot, Slot::Shared(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Values allocated into a slot (singleton hits excluded).
    pub created: u64,
    /// Allocations served by a previously returned slot.
    pub recycled: u64,
    /// Canonical singletons handed out.
    pub shared_hits: u64,
    pub returned: u64,
    /// `return_object` calls that had no effect.
    pub rejected_returns: u64,
    pub resets: u64,
}

struct LiveValue<N> {
    value: Rc<TypedValue<N>>,
    refs: u32,
}

struct PoolSlot<N> {
    generation: u32,
    entry: Option<LiveValue<N>>,
}

struct PoolState<N> {
    epoch: u32,
    slots: Vec<PoolSlot<N>>,
    free: Vec<usize>,
    live: usize,
    stats: PoolStats,
}

impl<N> PoolState<N> {
    fn slot_mut(&mut self, epoch: u32, index: usize, generation: u32) -> Option<&mut LiveValue<N>> {
        if epoch != self.epoch {
            return None;
        }
        let slot = self.slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.entry.as_mut()
    }
}

pub struct ValuePool<N> {
    id: PoolId,
    state: RefCell<PoolState<N>>,
    true_value: Rc<TypedValue<N>>,
    false_value: Rc<TypedValue<N>>,
    null_value: Rc<TypedValue<N>>,
}

impl<N: XdmNode> Default for ValuePool<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: XdmNode> ValuePool<N> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            id: PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed)),
            state: RefCell::new(PoolState {
                epoch: 0,
                slots: Vec::with_capacity(capacity),
                free: Vec::new(),
                live: 0,
                stats: PoolStats::default(),
            }),
            true_value: Rc::new(TypedValue::new(ValuePayload::Boolean(true))),
            false_value: Rc::new(TypedValue::new(ValuePayload::Boolean(false))),
            null_value: Rc::new(TypedValue::new(ValuePayload::Null)),
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    fn shared(&self, which: Shared) -> ValueHandle {
        self.state.borrow_mut().stats.shared_hits += 1;
        ValueHandle { pool: self.id, slot: Slot::Shared(which) }
    }

    fn insert(&self, payload: ValuePayload<N>) -> ValueHandle {
        let value = Rc::new(TypedValue::new(payload));
        let mut state = self.state.borrow_mut();
        let epoch = state.epoch;
        let entry = LiveValue { value, refs: 0 };
        let (index, generation) = if let Some(index) = state.free.pop() {
            let slot = &mut state.slots[index];
            slot.generation = slot.generation.wrapping_add(1);
            slot.entry = Some(entry);
            let generation = slot.generation;
            state.stats.recycled += 1;
            tracing::trace!(index, generation, "value pool recycled slot");
            (index, generation)
        } else {
            state.slots.push(PoolSlot { generation: 0, entry: Some(entry) });
            (state.slots.len() - 1, 0)
        };
        state.live += 1;
        state.stats.created += 1;
        ValueHandle { pool: self.id, slot: Slot::Pooled { epoch, index, generation } }
    }

    /// `optimize` allows (but does not promise) a shared canonical instance.
    pub fn create_boolean(&self, value: bool, optimize: bool) -> ValueHandle {
        if optimize {
            self.shared(if value { Shared::True } else { Shared::False })
        } else {
            self.insert(ValuePayload::Boolean(value))
        }
    }

    pub fn create_null(&self, optimize: bool) -> ValueHandle {
        if optimize { self.shared(Shared::Null) } else { self.insert(ValuePayload::Null) }
    }

    pub fn create_number(&self, value: f64) -> ValueHandle {
        self.insert(ValuePayload::Number(value))
    }

    pub fn create_string(&self, value: impl Into<CompactString>) -> ValueHandle {
        self.insert(ValuePayload::String(value.into()))
    }

    /// Accepts a `NodeList`, a `MutableNodeList` or a `Vec` of nodes.
    pub fn create_node_set(&self, nodes: impl Into<NodeList<N>>) -> ValueHandle {
        self.insert(ValuePayload::NodeSet(nodes.into()))
    }

    pub fn create_node_set_from_node(&self, node: N) -> ValueHandle {
        self.insert(ValuePayload::NodeSet(NodeList::from_node(node)))
    }

    pub fn create_span(&self, nodes: impl Into<NodeList<N>>) -> ValueHandle {
        self.insert(ValuePayload::Span(Span::new(nodes)))
    }

    pub fn create_span_from_node(&self, node: N) -> ValueHandle {
        self.insert(ValuePayload::Span(Span::new(NodeList::from_node(node))))
    }

    pub fn create_result_tree_fragment(&self, fragment: ResultTreeFragment<N>) -> ValueHandle {
        self.insert(ValuePayload::ResultTreeFragment(fragment))
    }

    pub fn create_unknown(&self, name: impl Into<CompactString>) -> ValueHandle {
        self.insert(ValuePayload::Unknown(name.into()))
    }

    /// Register an independent copy of `value` with this pool, whichever pool
    /// produced the original.
    pub fn clone_value(&self, value: &TypedValue<N>) -> ValueHandle {
        self.insert(value.payload().clone())
    }

    /// Look up a live value. Stale handles fail with `UseAfterInvalidation`.
    pub fn get(&self, handle: ValueHandle) -> Result<Rc<TypedValue<N>>, Error> {
        if handle.pool != self.id {
            return Err(Error::from_code(
                ErrorCode::ForeignValue,
                format!("value handle belongs to pool {:?}, not {:?}", handle.pool, self.id),
            ));
        }
        match handle.slot {
            Slot::Shared(Shared::True) => Ok(Rc::clone(&self.true_value)),
            Slot::Shared(Shared::False) => Ok(Rc::clone(&self.false_value)),
            Slot::Shared(Shared::Null) => Ok(Rc::clone(&self.null_value)),
            Slot::Pooled { epoch, index, generation } => self
                .state
                .borrow_mut()
                .slot_mut(epoch, index, generation)
                .map(|live| Rc::clone(&live.value))
                .ok_or_else(|| Error::stale("value handle")),
        }
    }

    pub fn contains(&self, handle: ValueHandle) -> bool {
        self.get(handle).is_ok()
    }

    /// Give a value back. Returns `false` without side effects for handles of other
    /// pools, stale handles and double returns.
    pub fn return_object(&self, handle: ValueHandle) -> bool {
        if handle.pool != self.id {
            self.state.borrow_mut().stats.rejected_returns += 1;
            return false;
        }
        let (epoch, index, generation) = match handle.slot {
            Slot::Shared(_) => return true,
            Slot::Pooled { epoch, index, generation } => (epoch, index, generation),
        };
        let released = {
            let mut state = self.state.borrow_mut();
            let released = if state.slot_mut(epoch, index, generation).is_some() {
                state.slots[index].entry.take()
            } else {
                None
            };
            if released.is_some() {
                state.free.push(index);
                state.live -= 1;
                state.stats.returned += 1;
            } else {
                state.stats.rejected_returns += 1;
            }
            released
        };
        // The value (and any node references it pins) drops outside the borrow.
        released.is_some()
    }

    /// Mark a value as entering active use; returns the new reference count.
    pub fn referenced(&self, handle: ValueHandle) -> Result<u32, Error> {
        self.adjust_refs(handle, |refs| Ok(refs + 1))
    }

    /// Mark a value as leaving active use; returns the new reference count.
    pub fn dereferenced(&self, handle: ValueHandle) -> Result<u32, Error> {
        self.adjust_refs(handle, |refs| {
            refs.checked_sub(1).ok_or_else(|| {
                Error::from_code(ErrorCode::RefCountUnderflow, "value dereferenced more often than referenced")
            })
        })
    }

    fn adjust_refs(
        &self,
        handle: ValueHandle,
        step: impl FnOnce(u32) -> Result<u32, Error>,
    ) -> Result<u32, Error> {
        if handle.pool != self.id {
            return Err(Error::from_code(ErrorCode::ForeignValue, "value handle belongs to another pool"));
        }
        match handle.slot {
            // Singletons are never released, their count is not tracked.
            Slot::Shared(_) => Ok(1),
            Slot::Pooled { epoch, index, generation } => {
                let mut state = self.state.borrow_mut();
                let live = state.slot_mut(epoch, index, generation).ok_or_else(|| Error::stale("value handle"))?;
                live.refs = step(live.refs)?;
                Ok(live.refs)
            }
        }
    }

    /// Invalidate every live non-singleton value by starting a new epoch.
    pub fn reset(&self) {
        let dropped = {
            let mut state = self.state.borrow_mut();
            let invalidated = state.live;
            state.epoch = state.epoch.wrapping_add(1);
            state.free.clear();
            state.live = 0;
            state.stats.resets += 1;
            tracing::debug!(pool = ?self.id, invalidated, epoch = state.epoch, "value pool reset");
            std::mem::take(&mut state.slots)
        };
        drop(dropped);
    }

    pub fn live_count(&self) -> usize {
        self.state.borrow().live
    }

    pub fn stats(&self) -> PoolStats {
        self.state.borrow().stats.clone()
    }

    /// Bind `handle` to a guard that returns it to this pool when dropped.
    pub fn guard(&self, handle: ValueHandle) -> OwnershipGuard<'_, N> {
        OwnershipGuard::new(self, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{elem, FragmentNode};
    use rstest::rstest;

    #[rstest]
    fn recycled_slot_rejects_old_handle() {
        let pool: ValuePool<FragmentNode> = ValuePool::new();
        let first = pool.create_number(1.0);
        assert!(pool.return_object(first));
        let second = pool.create_number(2.0);
        assert_eq!(pool.stats().recycled, 1);
        assert_ne!(first, second);
        assert_eq!(pool.get(first).unwrap_err().code(), ErrorCode::UseAfterInvalidation);
        assert_eq!(pool.get(second).unwrap().to_number(), 2.0);
    }

    #[rstest]
    fn reset_discards_free_list() {
        let pool: ValuePool<FragmentNode> = ValuePool::with_capacity(4);
        let a = pool.create_string("a");
        pool.return_object(a);
        pool.reset();
        let b = pool.create_string("b");
        assert_eq!(pool.stats().recycled, 0);
        assert_eq!(pool.get(b).unwrap().as_str(), "b");
    }

    #[rstest]
    fn singletons_do_not_count_as_live() {
        let pool: ValuePool<FragmentNode> = ValuePool::new();
        let t = pool.create_boolean(true, true);
        let n = pool.create_null(true);
        assert!(t.is_shared() && n.is_shared());
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.referenced(t).unwrap(), 1);
    }

    #[rstest]
    fn released_value_drops_node_references() {
        let pool: ValuePool<FragmentNode> = ValuePool::new();
        let h = pool.create_node_set_from_node(elem("r").build());
        let weak = std::rc::Rc::downgrade(&pool.get(h).unwrap());
        assert!(pool.return_object(h));
        assert!(weak.upgrade().is_none());
    }
}
