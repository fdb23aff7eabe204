use std::{
    cell::Cell,
    collections::HashSet,
    rc::Rc,
};

use super::*;

/// Walks the whole graph and asserts the structural invariants: every link
/// is reachable from exactly one deps chain and one subs chain, both chains
/// agree on head/tail, and neither chain loops.
fn assert_graph_invariants(rt: &mut Runtime, cells: &[CellId]) {
    let raw = rt.raw_mut();
    let bound = raw.links.len() + 1;
    let mut from_deps = HashSet::new();
    let mut from_subs = HashSet::new();
    for &c in cells {
        let mut deps = HashSet::new();
        let mut cursor = raw.cells[c.0].deps_head;
        let mut last = None;
        let mut steps = 0;
        while let Some(l) = cursor {
            steps += 1;
            assert!(steps <= bound, "cycle in deps list of {c}");
            let link = raw.links[l.0];
            assert_eq!(link.sub, c, "deps link of {c} points at another sub");
            assert!(deps.insert(link.dep), "{c} linked to {} twice", link.dep);
            assert!(from_deps.insert(l), "link shared between deps lists");
            last = Some(l);
            cursor = link.next_dep;
        }
        assert_eq!(raw.cells[c.0].deps_tail, last, "deps_tail of {c} is stale");

        let mut cursor = raw.cells[c.0].subs_head;
        let mut prev = None;
        let mut steps = 0;
        while let Some(l) = cursor {
            steps += 1;
            assert!(steps <= bound, "cycle in subs list of {c}");
            let link = raw.links[l.0];
            assert_eq!(link.dep, c, "subs link of {c} points at another dep");
            assert_eq!(link.prev_sub, prev, "broken back pointer in subs of {c}");
            assert!(from_subs.insert(l), "link shared between subs lists");
            prev = Some(l);
            cursor = link.next_sub;
        }
        assert_eq!(raw.cells[c.0].subs_tail, prev, "subs_tail of {c} is stale");
    }
    assert_eq!(from_deps, from_subs);
    assert_eq!(from_deps.len(), raw.links.len(), "orphan links in the pool");
}

fn deps_of(rt: &mut Runtime, id: CellId) -> Vec<CellId> {
    let raw = rt.raw_mut();
    let mut out = Vec::new();
    let mut cursor = raw.cells[id.0].deps_head;
    while let Some(l) = cursor {
        out.push(raw.links[l.0].dep);
        cursor = raw.links[l.0].next_dep;
    }
    out
}

fn dep_links_of(rt: &mut Runtime, id: CellId) -> Vec<LinkId> {
    let raw = rt.raw_mut();
    let mut out = Vec::new();
    let mut cursor = raw.cells[id.0].deps_head;
    while let Some(l) = cursor {
        out.push(l);
        cursor = raw.links[l.0].next_dep;
    }
    out
}

fn flags_of(rt: &mut Runtime, id: CellId) -> CellFlags {
    rt.raw_mut().cells[id.0].flags
}

#[test]
#[should_panic(expected = "Only one `Runtime`")]
fn second_runtime_on_the_same_thread_panics() {
    let _rt = Runtime::new();
    let _rt2 = Runtime::new();
}

#[test]
#[should_panic(expected = "`Runtime` is not created.")]
fn spawn_action_without_runtime_panics() {
    spawn_action(|_| {});
}

#[test]
fn spawn_action_runs_on_flush() {
    let mut rt = Runtime::new();
    let s = rt.state(1);
    spawn_action(move |ac| s.set(5, ac));
    assert_eq!(s.get(&mut rt.sc()), 1);
    rt.flush();
    assert_eq!(s.get(&mut rt.sc()), 5);
}

#[test]
fn diamond_links_mirror_both_lists() {
    let mut rt = Runtime::new();
    let s = rt.state(1);
    let a = rt.computed(move |sc| s.get(sc) + 1);
    let b = rt.computed(move |sc| s.get(sc) + 2);
    let c = rt.computed(move |sc| a.get(sc) + b.get(sc));
    let e = rt.effect(move |sc| {
        c.get(sc);
    });
    let cells = vec![s.id(), a.id(), b.id(), c.id(), e.id().unwrap()];
    assert_graph_invariants(&mut rt, &cells);
    assert_eq!(deps_of(&mut rt, c.id()), vec![a.id(), b.id()]);
    assert_eq!(deps_of(&mut rt, a.id()), vec![s.id()]);
    s.set(5, rt.ac());
    assert_graph_invariants(&mut rt, &cells);
}

#[test]
fn in_order_reruns_reuse_every_link() {
    let mut rt = Runtime::new();
    let x = rt.state(1);
    let y = rt.state(2);
    let d = rt.computed(move |sc| x.get(sc) + y.get(sc));
    assert_eq!(d.get(&mut rt.sc()), 3);
    let before = dep_links_of(&mut rt, d.id());
    x.set(10, rt.ac());
    assert_eq!(d.get(&mut rt.sc()), 12);
    let after = dep_links_of(&mut rt, d.id());
    assert_eq!(before, after);
    assert_graph_invariants(&mut rt, &[x.id(), y.id(), d.id()]);
}

#[test]
fn same_dep_read_twice_links_once() {
    let mut rt = Runtime::new();
    let x = rt.state(1);
    let y = rt.state(2);
    let d = rt.computed(move |sc| x.get(sc) + y.get(sc) + x.get(sc));
    assert_eq!(d.get(&mut rt.sc()), 4);
    assert_eq!(deps_of(&mut rt, d.id()), vec![x.id(), y.id()]);
    assert_graph_invariants(&mut rt, &[x.id(), y.id(), d.id()]);
}

#[test]
fn out_of_order_reread_keeps_surviving_links() {
    let mut rt = Runtime::new();
    let tick = rt.state(0);
    let x = rt.state(1);
    let y = rt.state(2);
    let swap = Rc::new(Cell::new(false));
    let swap2 = swap.clone();
    let d = rt.computed(move |sc| {
        let _ = tick.get(sc);
        if swap2.get() {
            y.get(sc) * 10 + x.get(sc)
        } else {
            x.get(sc) * 10 + y.get(sc)
        }
    });
    assert_eq!(d.get(&mut rt.sc()), 12);
    assert_eq!(deps_of(&mut rt, d.id()), vec![tick.id(), x.id(), y.id()]);
    let before = dep_links_of(&mut rt, d.id());

    swap.set(true);
    tick.set(1, rt.ac());
    assert_eq!(d.get(&mut rt.sc()), 21);
    assert_eq!(deps_of(&mut rt, d.id()), vec![tick.id(), y.id(), x.id()]);
    let after = dep_links_of(&mut rt, d.id());
    // the in-position link (tick) and the in-order remainder (x) survive;
    // y's old link was past the reuse point and was rebuilt
    assert_eq!(after[0], before[0]);
    assert_eq!(after[2], before[1]);
    assert_graph_invariants(&mut rt, &[tick.id(), x.id(), y.id(), d.id()]);
}

#[test]
fn conditional_reread_unlinks_abandoned_branch() {
    let mut rt = Runtime::new();
    let cond = rt.state(true);
    let x = rt.state(1);
    let y = rt.state(2);
    let d = rt.computed(move |sc| {
        if cond.get(sc) {
            x.get(sc)
        } else {
            y.get(sc)
        }
    });
    assert_eq!(d.get(&mut rt.sc()), 1);
    assert_eq!(deps_of(&mut rt, d.id()), vec![cond.id(), x.id()]);

    cond.set(false, rt.ac());
    assert_eq!(d.get(&mut rt.sc()), 2);
    assert_eq!(deps_of(&mut rt, d.id()), vec![cond.id(), y.id()]);
    assert_eq!(rt.raw_mut().cells[x.id().0].subs_head, None);
    assert_graph_invariants(&mut rt, &[cond.id(), x.id(), y.id(), d.id()]);
}

#[test]
fn disposing_last_observer_prunes_upstream() {
    let mut rt = Runtime::new();
    let s = rt.state(1);
    let d = rt.computed(move |sc| s.get(sc) + 1);
    let e = rt.effect(move |sc| {
        d.get(sc);
    });
    e.dispose(&mut rt);
    let raw = rt.raw_mut();
    assert!(raw.cells[d.id().0].flags.contains(CellFlags::STALE));
    assert_eq!(raw.cells[d.id().0].deps_head, None);
    assert_eq!(raw.cells[d.id().0].subs_head, None);
    assert_eq!(raw.cells[s.id().0].subs_head, None);
    assert_eq!(raw.links.len(), 0);
}

#[test]
fn propagation_marks_stale_then_pending() {
    let mut rt = Runtime::new();
    let s = rt.state(1);
    let a = rt.computed(move |sc| s.get(sc) + 1);
    let b = rt.computed(move |sc| a.get(sc) + 1);
    let e = rt.effect(move |sc| {
        b.get(sc);
    });
    let (aid, bid) = (a.id(), b.id());
    let eid = e.id().unwrap();
    rt.batch(move |ac| {
        s.set(2, ac);
        let raw = ac.raw();
        // the immediate consumer of the written source is known stale
        assert!(raw.cells[aid.0].flags.contains(CellFlags::STALE));
        assert!(!raw.cells[aid.0].flags.contains(CellFlags::PENDING));
        // consumers reached only through derived cells are merely pending
        assert!(raw.cells[bid.0].flags.contains(CellFlags::PENDING));
        assert!(!raw.cells[bid.0].flags.contains(CellFlags::STALE));
        assert!(raw.cells[eid.0].flags.contains(CellFlags::PENDING | CellFlags::QUEUED));
    });
    assert_eq!(b.get(&mut rt.sc()), 4);
}

#[test]
fn equal_write_changes_no_flags() {
    let mut rt = Runtime::new();
    let s = rt.state(1);
    let d = rt.computed(move |sc| s.get(sc) + 1);
    let runs = Rc::new(Cell::new(0));
    let runs2 = runs.clone();
    let e = rt.effect(move |sc| {
        d.get(sc);
        runs2.set(runs2.get() + 1);
    });
    assert_eq!(runs.get(), 1);
    let before = (
        flags_of(&mut rt, s.id()),
        flags_of(&mut rt, d.id()),
        flags_of(&mut rt, e.id().unwrap()),
    );
    s.set(1, rt.ac());
    let after = (
        flags_of(&mut rt, s.id()),
        flags_of(&mut rt, d.id()),
        flags_of(&mut rt, e.id().unwrap()),
    );
    assert_eq!(before, after);
    assert_eq!(runs.get(), 1);
}
