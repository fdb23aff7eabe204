use std::any::Any;

use crate::{
    core::{ComputeFn, RawCell, Runtime},
    SignalContext, Subscription,
};


impl Runtime {
    /// Calls `f` now, and again each time a cell it read changes.
    ///
    /// The first run happens before this function returns, to establish the
    /// effect's dependencies. Re-runs happen at flush time, after the write
    /// (or batch) that invalidated them, and only when a dirty check
    /// confirms that a dependency actually changed value.
    ///
    /// Dropping the returned [`Subscription`] detaches the effect from all
    /// of its dependencies; it will not run again.
    #[must_use]
    pub fn effect(&mut self, mut f: impl FnMut(&mut SignalContext) + 'static) -> Subscription {
        let run: ComputeFn = Box::new(move |sc: &mut SignalContext| {
            f(sc);
            Box::new(()) as Box<dyn Any>
        });
        let rt = self.raw_mut();
        rt.apply_disposals();
        let id = rt.alloc_cell(RawCell::effect(run));
        rt.recompute(id);
        Subscription::new(id)
    }
}
