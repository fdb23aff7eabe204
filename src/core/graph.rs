use std::any::Any;

use super::{CellFlags, CellId, LinkId, RawRuntime, SignalContext};

pub(crate) type ComputeFn = Box<dyn FnMut(&mut SignalContext) -> Box<dyn Any>>;
pub(crate) type EqFn = Box<dyn Fn(&dyn Any, &dyn Any) -> bool>;

/// One node of the graph. Source cells, derived cells and effects share
/// this record; the kind bits in `flags` say which fields are in play.
pub(crate) struct RawCell {
    pub flags: CellFlags,
    /// Outgoing edges to the producers read on the last completed run, in
    /// read order.
    pub deps_head: Option<LinkId>,
    pub deps_tail: Option<LinkId>,
    /// Incoming edges from consumers.
    pub subs_head: Option<LinkId>,
    pub subs_tail: Option<LinkId>,
    pub value: Option<Box<dyn Any>>,
    pub compute: Option<ComputeFn>,
    pub eq: Option<EqFn>,
}

impl RawCell {
    fn empty(flags: CellFlags) -> Self {
        Self {
            flags,
            deps_head: None,
            deps_tail: None,
            subs_head: None,
            subs_tail: None,
            value: None,
            compute: None,
            eq: None,
        }
    }

    pub fn source(value: Box<dyn Any>, eq: EqFn) -> Self {
        Self {
            value: Some(value),
            eq: Some(eq),
            ..Self::empty(CellFlags::SOURCE)
        }
    }

    /// Derived cells start STALE; the first read runs `compute`.
    pub fn derived(compute: ComputeFn, eq: EqFn) -> Self {
        Self {
            compute: Some(compute),
            eq: Some(eq),
            ..Self::empty(CellFlags::DERIVED | CellFlags::STALE)
        }
    }

    pub fn effect(run: ComputeFn) -> Self {
        Self {
            compute: Some(run),
            ..Self::empty(CellFlags::EFFECT)
        }
    }
}

/// One directed producer→consumer edge. The same record is spliced through
/// both endpoint lists: doubly linked in `dep`'s subs list, singly linked
/// in `sub`'s deps list (tracking rewrites that list head to tail, so no
/// back pointer is needed).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Link {
    pub dep: CellId,
    pub sub: CellId,
    pub prev_sub: Option<LinkId>,
    pub next_sub: Option<LinkId>,
    pub next_dep: Option<LinkId>,
}

impl RawRuntime {
    pub(crate) fn alloc_cell(&mut self, cell: RawCell) -> CellId {
        CellId(self.cells.insert(cell))
    }

    /// Creates a link and appends it to the tail of `dep`'s subs list.
    /// Splicing it into `sub`'s deps list is the caller's job.
    pub(crate) fn alloc_link(
        &mut self,
        dep: CellId,
        sub: CellId,
        next_dep: Option<LinkId>,
    ) -> LinkId {
        let prev_sub = self.cells[dep.0].subs_tail;
        let id = LinkId(self.links.insert(Link {
            dep,
            sub,
            prev_sub,
            next_sub: None,
            next_dep,
        }));
        match prev_sub {
            Some(prev) => self.links[prev.0].next_sub = Some(id),
            None => self.cells[dep.0].subs_head = Some(id),
        }
        self.cells[dep.0].subs_tail = Some(id);
        id
    }

    /// Splices a link out of its dep's subs list and frees it. Returns the
    /// dep when the link was its last subscriber.
    pub(crate) fn unlink_from_dep(&mut self, id: LinkId) -> Option<CellId> {
        let Link {
            dep,
            prev_sub,
            next_sub,
            ..
        } = self.links[id.0];
        match prev_sub {
            Some(prev) => self.links[prev.0].next_sub = next_sub,
            None => self.cells[dep.0].subs_head = next_sub,
        }
        match next_sub {
            Some(next) => self.links[next.0].prev_sub = prev_sub,
            None => self.cells[dep.0].subs_tail = prev_sub,
        }
        let _ = self.links.remove(id.0);
        if self.cells[dep.0].subs_head.is_none() {
            Some(dep)
        } else {
            None
        }
    }
}
