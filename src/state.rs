use std::{any::Any, marker::PhantomData};

use derive_ex::derive_ex;

use crate::{
    core::{CellId, EqFn, RawCell, Runtime},
    ActionContext, SignalContext, Subscription,
};


impl Runtime {
    /// Creates a source cell with the given initial value.
    ///
    /// Writing a value equal (by `PartialEq`) to the current one is a
    /// no-op: nothing propagates and no effect runs.
    pub fn state<T>(&mut self, value: T) -> State<T>
    where
        T: PartialEq + 'static,
    {
        self.state_with_eq(value, T::eq)
    }

    /// Creates a source cell with a host-supplied equality predicate used
    /// to decide whether a write actually changed the value.
    pub fn state_with_eq<T>(&mut self, value: T, eq: impl Fn(&T, &T) -> bool + 'static) -> State<T>
    where
        T: 'static,
    {
        let id = self
            .raw_mut()
            .alloc_cell(RawCell::source(Box::new(value), erase_eq(eq)));
        State {
            id,
            _value: PhantomData,
        }
    }
}

pub(crate) fn erase_eq<T: 'static>(eq: impl Fn(&T, &T) -> bool + 'static) -> EqFn {
    Box::new(
        move |a: &dyn Any, b: &dyn Any| match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => eq(a, b),
            _ => false,
        },
    )
}

/// A mutable input cell.
///
/// `State` is a small id into the runtime's pool; it is `Copy` and does not
/// keep the value alive by itself. Reads inside a running consumer register
/// a dependency; writes propagate to everything downstream.
#[derive_ex(Clone, Copy, bound())]
pub struct State<T> {
    id: CellId,
    _value: PhantomData<fn() -> T>,
}

impl<T: 'static> State<T> {
    /// Gets the current value, adding a dependency on this cell to the
    /// running consumer if there is one.
    pub fn get(&self, sc: &mut SignalContext) -> T
    where
        T: Clone,
    {
        self.with(sc, T::clone)
    }

    /// Calls `f` with a reference to the current value, adding a dependency
    /// on this cell to the running consumer if there is one.
    pub fn with<R>(&self, sc: &mut SignalContext, f: impl FnOnce(&T) -> R) -> R {
        sc.track(self.id);
        let value = self.cells_value(sc);
        f(value)
    }

    fn cells_value<'a>(&self, sc: &'a SignalContext) -> &'a T {
        let value = sc.rt.cells[self.id.0].value.as_ref();
        value
            .and_then(|v| v.downcast_ref::<T>())
            .expect("source cell value missing")
    }

    /// Sets a new value.
    ///
    /// A write with an unchanged value is a no-op. A real change propagates
    /// to consumers immediately and, outside a batch, runs the affected
    /// effects before returning.
    pub fn set(&self, value: T, ac: &mut ActionContext) {
        let cell = &mut ac.raw().cells[self.id.0];
        let same = {
            let old = cell
                .value
                .as_ref()
                .and_then(|v| v.downcast_ref::<T>())
                .expect("source cell value missing");
            let eq = cell.eq.as_ref().expect("source cell comparer missing");
            eq(old, &value)
        };
        if same {
            return;
        }
        cell.value = Some(Box::new(value));
        ac.after_write(self.id);
    }

    /// Replaces the value with `f` applied to the current one.
    pub fn update(&self, ac: &mut ActionContext, f: impl FnOnce(&T) -> T) {
        let new = {
            let cell = &ac.raw().cells[self.id.0];
            let old = cell
                .value
                .as_ref()
                .and_then(|v| v.downcast_ref::<T>())
                .expect("source cell value missing");
            f(old)
        };
        self.set(new, ac);
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
