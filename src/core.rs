use std::{
    any::Any,
    cell::RefCell,
    fmt,
    mem::{replace, take, transmute},
    ops::{BitOr, BitOrAssign},
    panic::panic_any,
    result::Result,
    thread::AccessError,
};

use derive_ex::derive_ex;
use parse_display::Display;
use slabmap::SlabMap;
use thiserror::Error;

mod dirty;
mod graph;
mod propagate;
mod scheduler;
mod track;

pub(crate) use graph::{ComputeFn, EqFn, Link, RawCell};
pub(crate) use propagate::Mark;

#[cfg(test)]
mod tests;

thread_local! {
    static GLOBALS: RefCell<Globals> = RefCell::new(Globals::new());
}

type Action = Box<dyn FnOnce(&mut ActionContext)>;

struct Globals {
    is_runtime_exists: bool,
    actions: Vec<Action>,
    disposals: Vec<CellId>,
}
impl Globals {
    fn new() -> Self {
        Self {
            is_runtime_exists: false,
            actions: Vec::new(),
            disposals: Vec::new(),
        }
    }
    fn with<T>(f: impl FnOnce(&mut Self) -> T) -> T {
        GLOBALS.with(|g| f(&mut g.borrow_mut()))
    }
    fn try_with<T>(f: impl FnOnce(&mut Self) -> T) -> Result<T, AccessError> {
        GLOBALS.try_with(|g| f(&mut g.borrow_mut()))
    }
    fn assert_exists(&self) {
        if !self.is_runtime_exists {
            panic!("`Runtime` is not created.");
        }
    }
}

/// Schedules a disposal from a context-less place such as `Drop`.
///
/// Applied the next time the runtime is entered.
pub(crate) fn schedule_dispose(id: CellId) {
    let _ = Globals::try_with(|g| g.disposals.push(id));
}

/// Spawns a new action.
///
/// The function runs with an [`ActionContext`] when the runtime next
/// flushes: after any effects already running, or at the end of the current
/// batch. This is the supported way for an effect body to write source
/// cells.
pub fn spawn_action(f: impl FnOnce(&mut ActionContext) + 'static) {
    Globals::with(|g| {
        g.assert_exists();
        g.actions.push(Box::new(f));
    });
}

/// Identifier of a cell in the runtime's pool.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Display)]
#[display("cell#{0}")]
pub(crate) struct CellId(pub(crate) usize);

/// Identifier of one producer→consumer edge in the link pool.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub(crate) struct LinkId(pub(crate) usize);

/// Kind and state bits of a cell.
///
/// The kind bits are fixed at creation. The state bits follow the
/// propagation protocol: STALE means "must recompute", PENDING means "an
/// ancestor may have changed, check before recomputing".
#[derive(Clone, Copy, Eq, PartialEq, Default)]
pub(crate) struct CellFlags(u16);

impl CellFlags {
    pub const SOURCE: Self = Self(1);
    pub const DERIVED: Self = Self(1 << 1);
    pub const EFFECT: Self = Self(1 << 2);
    pub const STALE: Self = Self(1 << 3);
    pub const PENDING: Self = Self(1 << 4);
    pub const RUNNING: Self = Self(1 << 5);
    pub const QUEUED: Self = Self(1 << 6);
    pub const RECURSIVE: Self = Self(1 << 7);
    pub const DISPOSED: Self = Self(1 << 8);
    pub const KEEP: Self = Self(1 << 9);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for CellFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
impl BitOrAssign for CellFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

impl fmt::Debug for CellFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const NAMES: [(CellFlags, &str); 10] = [
            (CellFlags::SOURCE, "SOURCE"),
            (CellFlags::DERIVED, "DERIVED"),
            (CellFlags::EFFECT, "EFFECT"),
            (CellFlags::STALE, "STALE"),
            (CellFlags::PENDING, "PENDING"),
            (CellFlags::RUNNING, "RUNNING"),
            (CellFlags::QUEUED, "QUEUED"),
            (CellFlags::RECURSIVE, "RECURSIVE"),
            (CellFlags::DISPOSED, "DISPOSED"),
            (CellFlags::KEEP, "KEEP"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("(none)")?;
        }
        Ok(())
    }
}

/// Payload used to abort a compute body that read a value-less cell
/// mid-cycle. Caught at the recompute boundary, never shown to the host.
pub(crate) struct CycleAbort;

/// The cell's value cannot be produced because the cell (transitively)
/// depends on itself, or because every evaluation so far panicked.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[error("cyclic dependency detected")]
pub struct CycleError;

/// Reactive runtime: owns the cell graph and the effect scheduler.
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Runtime {
    rt: RawRuntime,
}

impl Runtime {
    pub fn new() -> Self {
        Globals::with(|g| {
            if replace(&mut g.is_runtime_exists, true) {
                panic!("Only one `Runtime` can exist in the same thread at the same time.");
            }
            // drop-scheduled work from a previous runtime is void
            g.actions.clear();
            g.disposals.clear();
        });
        Self {
            rt: RawRuntime::new(),
        }
    }

    /// Context for writing source cells.
    pub fn ac(&mut self) -> &mut ActionContext {
        self.rt.apply_disposals();
        ActionContext::new(self)
    }

    /// Context for reading cells outside of any consumer (untracked).
    pub fn sc(&mut self) -> SignalContext {
        self.rt.apply_disposals();
        SignalContext {
            rt: &mut self.rt,
            sink: None,
        }
    }

    /// Runs `f` with writes batched: propagation happens per write, but
    /// effects run once, when the outermost batch exits.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut ActionContext) -> R) -> R {
        self.rt.apply_disposals();
        self.rt.batch_depth += 1;
        let ret = f(ActionContext::new(self));
        self.rt.batch_depth -= 1;
        if self.rt.batch_depth == 0 {
            self.flush_inner();
        }
        ret
    }

    /// Runs queued effects, and any actions they spawned, until the graph
    /// settles. A no-op while a batch is open or a flush is already
    /// running.
    pub fn flush(&mut self) {
        self.rt.apply_disposals();
        self.flush_inner();
    }

    pub(crate) fn flush_inner(&mut self) {
        if self.rt.flushing || self.rt.batch_depth > 0 {
            return;
        }
        self.rt.flushing = true;
        let mut i = 0;
        loop {
            while i < self.rt.queue.len() {
                let id = self.rt.queue[i];
                i += 1;
                self.rt.apply_disposals();
                let cell = &mut self.rt.cells[id.0];
                cell.flags.remove(CellFlags::QUEUED);
                let flags = cell.flags;
                if flags.contains(CellFlags::DISPOSED) {
                    continue;
                }
                if flags.contains(CellFlags::STALE)
                    || (flags.contains(CellFlags::PENDING) && self.rt.check_dirty(id))
                {
                    self.rt.recompute(id);
                }
            }
            let actions = Globals::with(|g| take(&mut g.actions));
            if actions.is_empty() {
                if i >= self.rt.queue.len() {
                    break;
                }
                continue;
            }
            for f in actions {
                f(ActionContext::new(self));
            }
        }
        self.rt.queue.clear();
        self.rt.flushing = false;
        self.rt.bury();
    }

    pub(crate) fn raw_mut(&mut self) -> &mut RawRuntime {
        &mut self.rt
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let _ = Globals::try_with(|g| {
            g.is_runtime_exists = false;
            g.actions.clear();
            g.disposals.clear();
        });
    }
}

pub(crate) struct RawRuntime {
    pub(crate) cells: SlabMap<RawCell>,
    pub(crate) links: SlabMap<Link>,
    queue: Vec<CellId>,
    graveyard: Vec<CellId>,
    drain_list: Vec<LinkId>,
    dirty_stack: Vec<LinkId>,
    propagate_queue: Vec<(LinkId, Mark)>,
    pub(crate) batch_depth: usize,
    flushing: bool,
}

impl RawRuntime {
    fn new() -> Self {
        Self {
            cells: SlabMap::new(),
            links: SlabMap::new(),
            queue: Vec::new(),
            graveyard: Vec::new(),
            drain_list: Vec::new(),
            dirty_stack: Vec::new(),
            propagate_queue: Vec::new(),
            batch_depth: 0,
            flushing: false,
        }
    }

    /// Makes a derived cell's value current, per the read rules: STALE
    /// recomputes unconditionally; PENDING recomputes only if the dirty
    /// check confirms that a changed value reached this cell.
    pub(crate) fn ensure_fresh(&mut self, id: CellId) -> Result<(), CycleError> {
        let flags = self.cells[id.0].flags;
        if flags.contains(CellFlags::RUNNING) {
            self.note_cycle(id);
            if self.cells[id.0].value.is_some() {
                // the previous value stands in for the cycling read
                return Ok(());
            }
            panic_any(CycleAbort);
        }
        if flags.contains(CellFlags::STALE) {
            self.recompute(id);
        } else if flags.contains(CellFlags::PENDING) && self.check_dirty(id) {
            self.recompute(id);
        }
        if self.cells[id.0].value.is_some() {
            Ok(())
        } else {
            Err(CycleError)
        }
    }

    fn note_cycle(&mut self, id: CellId) {
        self.cells[id.0].flags.insert(CellFlags::RECURSIVE);
        tracing::warn!(cell = %id, "cyclic dependency: cell was read while evaluating itself");
    }

    /// Re-evaluates a derived or effect cell under tracking. Returns true
    /// if a derived cell's stored value changed.
    pub(crate) fn recompute(&mut self, id: CellId) -> bool {
        if self.cells[id.0].flags.contains(CellFlags::RUNNING) {
            return false;
        }
        let Some(mut compute) = self.cells[id.0].compute.take() else {
            return false;
        };
        self.begin_track(id);
        let rt = &mut *self;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut sc = SignalContext {
                rt,
                sink: Some(id),
            };
            compute(&mut sc)
        }));
        self.end_track(id);
        let changed = match result {
            Ok(new_value) => {
                let cell = &mut self.cells[id.0];
                cell.compute = Some(compute);
                if cell.flags.contains(CellFlags::DERIVED) {
                    let changed = match (&cell.value, &cell.eq) {
                        (Some(old), Some(eq)) => !eq(old.as_ref(), new_value.as_ref()),
                        _ => true,
                    };
                    cell.value = Some(new_value);
                    changed
                } else {
                    false
                }
            }
            Err(payload) => {
                self.cells[id.0].compute = Some(compute);
                if !payload.is::<CycleAbort>() {
                    // the cell keeps its prior value; dependents are not
                    // propagated through
                    tracing::error!(cell = %id, "compute panicked: {}", panic_message(&*payload));
                }
                false
            }
        };
        if changed {
            self.repropagate_shallow(id);
        }
        changed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

/// Context for changing state.
#[repr(transparent)]
pub struct ActionContext(Runtime);

impl ActionContext {
    fn new(rt: &mut Runtime) -> &mut Self {
        unsafe { transmute(rt) }
    }

    /// Context for reading cells (untracked) during an action.
    pub fn sc(&mut self) -> SignalContext {
        SignalContext {
            rt: &mut self.0.rt,
            sink: None,
        }
    }

    /// Runs `f` inside the current batch, or opens a nested one.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut ActionContext) -> R) -> R {
        self.0.batch(f)
    }

    pub(crate) fn raw(&mut self) -> &mut RawRuntime {
        &mut self.0.rt
    }

    /// Called after a source cell stored a genuinely new value.
    pub(crate) fn after_write(&mut self, id: CellId) {
        if let Some(head) = self.raw().cells[id.0].subs_head {
            self.raw().propagate(head);
        }
        if self.raw().batch_depth == 0 {
            self.0.flush_inner();
        }
    }
}

/// Context for reading cells and tracking dependencies.
///
/// While a derived cell or effect is evaluating, `sink` names it; every
/// read performed through this context links the producer to it.
pub struct SignalContext<'s> {
    pub(crate) rt: &'s mut RawRuntime,
    pub(crate) sink: Option<CellId>,
}

impl SignalContext<'_> {
    /// Calls `f` with dependency tracking disabled.
    pub fn untrack<T>(&mut self, f: impl FnOnce(&mut SignalContext) -> T) -> T {
        let sink = self.sink.take();
        let ret = f(self);
        self.sink = sink;
        ret
    }

    /// Records that the running consumer (if any) read `dep`.
    pub(crate) fn track(&mut self, dep: CellId) {
        if let Some(sink) = self.sink {
            // a cell reading itself mid-cycle links nothing
            if sink != dep && self.rt.cells[sink.0].flags.contains(CellFlags::RUNNING) {
                self.rt.track_dep(dep, sink);
            }
        }
    }
}
