use std::{any::Any, marker::PhantomData};

use derive_ex::derive_ex;

use crate::{
    core::{CellFlags, CellId, ComputeFn, CycleError, RawCell, Runtime},
    state::erase_eq,
    SignalContext, Subscription,
};


impl Runtime {
    /// Creates a derived cell.
    ///
    /// The body runs lazily: on the first read, and again only when the
    /// dirty check confirms that one of the cells it read actually changed.
    /// A recompute that returns a value equal (by `PartialEq`) to the
    /// cached one stops propagation there.
    pub fn computed<T>(
        &mut self,
        f: impl FnMut(&mut SignalContext) -> T + 'static,
    ) -> Computed<T>
    where
        T: PartialEq + 'static,
    {
        self.computed_with_eq(f, T::eq)
    }

    /// Creates a derived cell with a host-supplied equality predicate used
    /// to decide whether a recompute actually changed the value.
    pub fn computed_with_eq<T>(
        &mut self,
        mut f: impl FnMut(&mut SignalContext) -> T + 'static,
        eq: impl Fn(&T, &T) -> bool + 'static,
    ) -> Computed<T>
    where
        T: 'static,
    {
        let compute: ComputeFn = Box::new(move |sc: &mut SignalContext| Box::new(f(sc)) as Box<dyn Any>);
        let id = self
            .raw_mut()
            .alloc_cell(RawCell::derived(compute, erase_eq(eq)));
        Computed {
            id,
            _value: PhantomData,
        }
    }
}

/// A derived cell: a cached, lazily recomputed function of other cells.
///
/// Like [`State`](crate::State), this is a `Copy` id into the runtime's
/// pool. Reading it inside a running consumer links the two; reading it
/// while it is stale recomputes it first.
#[derive_ex(Clone, Copy, bound())]
pub struct Computed<T> {
    id: CellId,
    _value: PhantomData<fn() -> T>,
}

impl<T: 'static> Computed<T> {
    /// Gets the current value, recomputing first if needed.
    ///
    /// Panics if the cell turns out to depend on itself before ever
    /// producing a value; [`try_get`](Self::try_get) reports that case as
    /// an error instead.
    pub fn get(&self, sc: &mut SignalContext) -> T
    where
        T: Clone,
    {
        self.try_get(sc).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Gets the current value, recomputing first if needed.
    pub fn try_get(&self, sc: &mut SignalContext) -> Result<T, CycleError>
    where
        T: Clone,
    {
        self.try_with(sc, T::clone)
    }

    /// Calls `f` with a reference to the current value, recomputing first
    /// if needed.
    pub fn with<R>(&self, sc: &mut SignalContext, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(sc, f).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Calls `f` with a reference to the current value, recomputing first
    /// if needed.
    ///
    /// Returns [`CycleError`] when no value exists: the cell read itself
    /// before its first evaluation finished, or every evaluation so far
    /// panicked.
    pub fn try_with<R>(
        &self,
        sc: &mut SignalContext,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R, CycleError> {
        sc.track(self.id);
        sc.rt.ensure_fresh(self.id)?;
        let value = sc.rt.cells[self.id.0]
            .value
            .as_ref()
            .and_then(|v| v.downcast_ref::<T>())
            .expect("derived cell value missing after refresh");
        Ok(f(value))
    }

    /// Keeps the cache even when no consumer is subscribed.
    ///
    /// Normally a derived cell that loses its last subscriber is detached
    /// from its producers and recomputes from scratch on the next read. A
    /// kept cell stays wired, so its cache stays valid and writes upstream
    /// keep invalidating it.
    pub fn keep(self, rt: &mut Runtime) -> Self {
        rt.raw_mut().cells[self.id.0].flags.insert(CellFlags::KEEP);
        self
    }

    /// Subscribes to the value of this cell.
    ///
    /// Calls `f` with the current value first, then again after each
    /// change. Dropping the returned [`Subscription`] cancels it.
    pub fn subscribe(&self, rt: &mut Runtime, mut f: impl FnMut(&T) + 'static) -> Subscription {
        let this = *self;
        rt.effect(move |sc| this.with(sc, &mut f))
    }

    #[cfg(test)]
    pub(crate) fn id(&self) -> CellId {
        self.id
    }
}
