use std::mem::take;

use super::{CellFlags, CellId, Globals, RawRuntime};

impl RawRuntime {
    /// Queues an effect for the next flush. The QUEUED bit keeps an effect
    /// from being enqueued twice; RECURSIVE effects are never enqueued.
    pub(crate) fn schedule_effect(&mut self, id: CellId) {
        let cell = &mut self.cells[id.0];
        if cell
            .flags
            .intersects(CellFlags::QUEUED | CellFlags::RECURSIVE | CellFlags::DISPOSED)
        {
            return;
        }
        cell.flags.insert(CellFlags::QUEUED);
        self.queue.push(id);
    }

    /// Applies disposals scheduled from `Drop`.
    pub(crate) fn apply_disposals(&mut self) {
        loop {
            let disposals = Globals::with(|g| take(&mut g.disposals));
            if disposals.is_empty() {
                break;
            }
            for id in disposals {
                self.dispose(id);
            }
        }
    }

    /// Detaches an effect from everything it reads. Safe to call while the
    /// effect is queued or running; the record is only freed once the
    /// scheduler can no longer be holding its id.
    pub(crate) fn dispose(&mut self, id: CellId) {
        let Some(cell) = self.cells.get_mut(id.0) else {
            return;
        };
        if cell.flags.contains(CellFlags::DISPOSED) {
            return;
        }
        cell.flags.insert(CellFlags::DISPOSED);
        cell.flags
            .remove(CellFlags::STALE | CellFlags::PENDING | CellFlags::QUEUED);
        self.detach_all_deps(id);
        if self.flushing || self.batch_depth > 0 || !self.queue.is_empty() {
            self.graveyard.push(id);
        } else {
            let _ = self.cells.remove(id.0);
        }
    }

    /// Frees disposed cells once the flush that might still reference them
    /// is over. A disposed effect that kept running re-acquires links; they
    /// are detached here before the record goes away.
    pub(crate) fn bury(&mut self) {
        while let Some(id) = self.graveyard.pop() {
            self.detach_all_deps(id);
            let _ = self.cells.remove(id.0);
        }
    }
}
