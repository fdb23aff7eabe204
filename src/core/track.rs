use std::mem::take;

use super::{CellFlags, CellId, LinkId, RawRuntime};

impl RawRuntime {
    /// Prepares `sub` for re-evaluation. The previous deps chain stays in
    /// place; tracking walks it front to back and reuses every link whose
    /// dep matches the new read order.
    pub(crate) fn begin_track(&mut self, sub: CellId) {
        let cell = &mut self.cells[sub.0];
        cell.deps_tail = None;
        cell.flags.remove(CellFlags::STALE | CellFlags::PENDING);
        cell.flags.insert(CellFlags::RUNNING);
    }

    /// Records that the running consumer `sub` read `dep`.
    pub(crate) fn track_dep(&mut self, dep: CellId, sub: CellId) {
        let tail = self.cells[sub.0].deps_tail;
        if let Some(t) = tail {
            // same dep twice in a row
            if self.links[t.0].dep == dep {
                return;
            }
        }
        let candidate = match tail {
            Some(t) => self.links[t.0].next_dep,
            None => self.cells[sub.0].deps_head,
        };
        if let Some(c) = candidate {
            // the prior run read the same dep at this position; the link is
            // still wired on both sides and can simply be kept
            if self.links[c.0].dep == dep {
                self.cells[sub.0].deps_tail = Some(c);
                return;
            }
        }
        // out-of-order read: a dep consumed earlier this run must not be
        // linked twice
        let mut cursor = self.cells[sub.0].deps_head;
        while cursor != candidate {
            let Some(l) = cursor else { break };
            if self.links[l.0].dep == dep {
                return;
            }
            cursor = self.links[l.0].next_dep;
        }
        // truly new for this position: splice in right after deps_tail,
        // keeping the not-yet-revisited remainder of the old chain behind it
        let id = self.alloc_link(dep, sub, candidate);
        match tail {
            Some(t) => self.links[t.0].next_dep = Some(id),
            None => self.cells[sub.0].deps_head = Some(id),
        }
        self.cells[sub.0].deps_tail = Some(id);
    }

    /// Finishes a tracked run. Everything after the final `deps_tail` was
    /// not re-read this run and is unlinked; producers that lose their last
    /// subscriber in the process become unobserved and are detached from
    /// their own producers in turn.
    pub(crate) fn end_track(&mut self, sub: CellId) {
        let tail = self.cells[sub.0].deps_tail;
        let leftover = match tail {
            Some(t) => self.links[t.0].next_dep.take(),
            None => self.cells[sub.0].deps_head.take(),
        };
        self.drain_detached(leftover);
        self.cells[sub.0].flags.remove(CellFlags::RUNNING);
    }

    /// Unlinks an effect from everything it reads.
    pub(crate) fn detach_all_deps(&mut self, id: CellId) {
        let cell = &mut self.cells[id.0];
        cell.deps_tail = None;
        let head = cell.deps_head.take();
        self.drain_detached(head);
    }

    /// Frees every link in the given deps chain. A dep whose subs list
    /// becomes empty here is no longer observed by anyone: it is marked
    /// STALE so the next reader recomputes it, and its own deps chain joins
    /// the drain.
    fn drain_detached(&mut self, first: Option<LinkId>) {
        let mut drain = take(&mut self.drain_list);
        if let Some(l) = first {
            drain.push(l);
        }
        while let Some(chain) = drain.pop() {
            let mut cursor = Some(chain);
            while let Some(l) = cursor {
                cursor = self.links[l.0].next_dep;
                if let Some(dep) = self.unlink_from_dep(l) {
                    let dep_cell = &mut self.cells[dep.0];
                    if dep_cell.flags.contains(CellFlags::DERIVED)
                        && !dep_cell.flags.contains(CellFlags::KEEP)
                    {
                        if let Some(head) = dep_cell.deps_head.take() {
                            dep_cell.deps_tail = None;
                            dep_cell.flags.insert(CellFlags::STALE);
                            dep_cell.flags.remove(CellFlags::PENDING);
                            drain.push(head);
                        }
                    }
                }
            }
        }
        self.drain_list = drain;
    }
}
