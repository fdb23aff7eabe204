use std::mem::take;

use super::{CellFlags, CellId, LinkId, RawRuntime};

impl RawRuntime {
    /// Decides whether a PENDING consumer really has a changed value
    /// upstream, recomputing stale ancestors along the way.
    ///
    /// The traversal is a DFS over the consumer's deps with an explicit
    /// stack holding the links taken downward. A STALE dep recomputes on
    /// the spot; if its value changed, the cells along the path recompute
    /// in reverse order, and the walk either surfaces with `true` or
    /// resumes from the first ancestor that settled to an unchanged value.
    /// A cell reached twice recomputes at most once: the first recompute
    /// clears its flags.
    ///
    /// Links are re-read through `get` after every recompute: on cyclic
    /// graphs a nested evaluation can rewrite a chain this walk still
    /// holds, and a vanished link then reads as the end of its chain.
    pub(crate) fn check_dirty(&mut self, id: CellId) -> bool {
        let mut stack = take(&mut self.dirty_stack);
        let mut cursor = self.cells[id.0].deps_head;
        let mut confirmed = false;
        'dfs: loop {
            let Some(l) = cursor else {
                // end of chain. The owner's walked deps settled unchanged,
                // but a recompute elsewhere in this walk may have upgraded
                // the owner itself to STALE through a shared dep.
                let Some(pl) = stack.pop() else {
                    break;
                };
                let Some(&plink) = self.links.get(pl.0) else {
                    cursor = None;
                    continue;
                };
                let owner = plink.dep;
                if self.cells[owner.0].flags.contains(CellFlags::STALE) {
                    if self.recompute(owner) {
                        if let Some(next) = self.bubble(&mut stack) {
                            cursor = next;
                            continue;
                        }
                        confirmed = true;
                        break;
                    }
                } else {
                    self.cells[owner.0].flags.remove(CellFlags::PENDING);
                }
                cursor = self.next_dep_of(pl);
                continue;
            };
            let Some(&link) = self.links.get(l.0) else {
                cursor = None;
                continue;
            };
            let dep = link.dep;
            let flags = self.cells[dep.0].flags;
            if flags.contains(CellFlags::RUNNING) {
                // evaluation already in progress further up the path
                tracing::warn!(
                    cell = %dep,
                    "cyclic dependency: dep is mid-evaluation, treated as unchanged"
                );
                cursor = link.next_dep;
            } else if flags.contains(CellFlags::RECURSIVE) {
                self.cells[dep.0]
                    .flags
                    .remove(CellFlags::STALE | CellFlags::PENDING);
                cursor = link.next_dep;
            } else if flags.contains(CellFlags::STALE) {
                if self.recompute(dep) {
                    // a real change: recompute the ancestors on the path
                    if let Some(next) = self.bubble(&mut stack) {
                        cursor = next;
                        continue 'dfs;
                    }
                    confirmed = true;
                    break 'dfs;
                }
                cursor = self.next_dep_of(l);
            } else if flags.contains(CellFlags::PENDING) {
                stack.push(l);
                cursor = self.cells[dep.0].deps_head;
            } else {
                cursor = link.next_dep;
            }
        }
        stack.clear();
        self.dirty_stack = stack;
        // a shared dep may have upgraded the checked cell itself
        if !confirmed && self.cells[id.0].flags.contains(CellFlags::STALE) {
            confirmed = true;
        }
        if !confirmed {
            self.cells[id.0].flags.remove(CellFlags::PENDING);
        }
        confirmed
    }

    /// Recomputes the path ancestors after a confirmed change, deepest
    /// first. Returns `None` when the change surfaced all the way (the
    /// checked cell must recompute), or the link to resume from when an
    /// ancestor absorbed the change by settling unchanged.
    fn bubble(&mut self, stack: &mut Vec<LinkId>) -> Option<Option<LinkId>> {
        loop {
            let pl = stack.pop()?;
            let Some(&plink) = self.links.get(pl.0) else {
                continue;
            };
            if !self.recompute(plink.dep) {
                return Some(self.next_dep_of(pl));
            }
        }
    }

    fn next_dep_of(&self, l: LinkId) -> Option<LinkId> {
        self.links.get(l.0).and_then(|link| link.next_dep)
    }
}
