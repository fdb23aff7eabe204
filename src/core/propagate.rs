use std::mem::take;

use super::{CellFlags, CellId, Link, LinkId, RawRuntime};

/// How a change reaches a consumer: `Stale` from a producer whose value
/// really changed, `Pending` through a derived cell that may yet settle to
/// the same value.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Mark {
    Stale,
    Pending,
}

impl Mark {
    fn flag(self) -> CellFlags {
        match self {
            Mark::Stale => CellFlags::STALE,
            Mark::Pending => CellFlags::PENDING,
        }
    }
}

impl RawRuntime {
    /// Walks forward from a changed producer, marking consumers and handing
    /// effects to the scheduler.
    ///
    /// A consumer that already carries a propagation flag (or is currently
    /// evaluating) only accumulates the new mark; its own consumers were
    /// walked when it was first marked.
    pub(crate) fn propagate(&mut self, head: LinkId) {
        let mut queue = take(&mut self.propagate_queue);
        queue.push((head, Mark::Stale));
        let mut next = 0;
        while next < queue.len() {
            let (chain, mark) = queue[next];
            next += 1;
            let mut cursor = Some(chain);
            while let Some(l) = cursor {
                let Link { sub, next_sub, .. } = self.links[l.0];
                cursor = next_sub;
                let cell = &mut self.cells[sub.0];
                let flags = cell.flags;
                if flags.contains(CellFlags::RECURSIVE) {
                    continue;
                }
                cell.flags.insert(mark.flag());
                if flags.intersects(CellFlags::STALE | CellFlags::PENDING | CellFlags::RUNNING) {
                    continue;
                }
                if flags.contains(CellFlags::EFFECT) {
                    self.schedule_effect(sub);
                } else if let Some(sub_head) = self.cells[sub.0].subs_head {
                    // a derived consumer may not actually change value, so
                    // everything past it is only pending
                    queue.push((sub_head, Mark::Pending));
                }
            }
        }
        queue.clear();
        self.propagate_queue = queue;
    }

    /// After a derived recompute produced a genuinely new value, its
    /// immediate consumers that were only PENDING are now known stale.
    /// Deeper consumers resolve through the dirty check, which will pass
    /// through the upgraded flag.
    pub(crate) fn repropagate_shallow(&mut self, id: CellId) {
        let mut cursor = self.cells[id.0].subs_head;
        while let Some(l) = cursor {
            let Link { sub, next_sub, .. } = self.links[l.0];
            cursor = next_sub;
            let cell = &mut self.cells[sub.0];
            if cell.flags.contains(CellFlags::RECURSIVE) {
                continue;
            }
            if cell.flags.contains(CellFlags::PENDING) {
                cell.flags.remove(CellFlags::PENDING);
                cell.flags.insert(CellFlags::STALE);
                if cell.flags.contains(CellFlags::EFFECT) {
                    self.schedule_effect(sub);
                }
            }
        }
    }
}
