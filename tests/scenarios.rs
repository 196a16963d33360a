//! The end-to-end seed scenarios from the specification, run as integration tests against the
//! public API only (no access to crate-internal node/edge machinery).

use weave_reactive::*;

#[test]
fn diamond() {
    create_root(|| {
        let a = create_signal(1);
        let b = create_memo(move || a.get() * 2);
        let c = create_memo(move || a.get() * 3);
        let runs_d = create_signal(0);
        let d = create_memo(move || {
            runs_d.update(|n| {
                *n += 1;
                true
            });
            b.get() + c.get()
        });
        assert_eq!(d.get(), 5);
        a.set(10);
        assert_eq!(d.get(), 50);
        assert_eq!(runs_d.get_untracked(), 2);
    });
}

#[test]
fn filtered_diamond() {
    create_root(|| {
        let s = create_signal(10);
        let a = create_memo(move || if s.get() < 50 { 0 } else { s.get() });
        let b = create_memo(move || if s.get() < 50 { 0 } else { s.get() });
        let e_runs = create_signal(0);
        let e = create_memo(move || {
            e_runs.update(|n| {
                *n += 1;
                true
            });
            a.get() + b.get()
        });
        for s_value in [10, 20, 30, 40] {
            s.set(s_value);
            assert_eq!(e.get(), 0);
        }
        assert_eq!(e_runs.get_untracked(), 1);
    });
}

#[test]
fn conditional_dependency() {
    create_root(|| {
        let c = create_signal(true);
        let x = create_signal(1);
        let y = create_signal(2);
        let r = create_memo(move || if c.get() { x.get() } else { y.get() });
        assert_eq!(r.get(), 1);

        y.set(99);
        assert_eq!(r.get(), 1);

        c.set(false);
        assert_eq!(r.get(), 99);

        x.set(42);
        assert_eq!(r.get(), 99);
    });
}

#[test]
fn batch_runs_effect_once_with_final_values() {
    create_root(|| {
        let a = create_signal(1);
        let b = create_signal(2);
        let sum = create_memo(move || a.get() + b.get());
        let runs = create_signal(0);
        let observed = create_signal(0);
        create_effect(move || {
            observed.set_silent(sum.get());
            runs.update(|n| {
                *n += 1;
                true
            });
        });
        assert_eq!(runs.get_untracked(), 1);
        batch(|| {
            a.set(10);
            b.set(20);
        });
        assert_eq!(runs.get_untracked(), 2);
        assert_eq!(observed.get_untracked(), 30);
    });
}

#[test]
fn reconcile_list_of_five_rotated() {
    create_root(|| {
        let list = KeyedList::from_iter([(1, 'a'), (2, 'b'), (3, 'c'), (4, 'd'), (5, 'e')]);
        let new_items = [(1, 'a'), (3, 'c'), (5, 'e'), (2, 'b'), (4, 'd')];
        let mut moves = 0;
        let mut inserts = 0;
        let mut removes = 0;
        reconcile(
            &list,
            &new_items,
            ReconcileCallbacks {
                on_move: Some(Box::new(|_| moves += 1)),
                on_insert: Some(Box::new(|_, _| inserts += 1)),
                on_remove: Some(Box::new(|_| removes += 1)),
                ..Default::default()
            },
        );
        assert_eq!(inserts, 0);
        assert_eq!(removes, 0);
        assert_eq!(moves, 2);
        assert_eq!(list.peek(), new_items.to_vec());
    });
}

#[test]
fn deep_chain_of_a_thousand_derived_nodes() {
    create_root(|| {
        let c0 = create_signal(0);
        let mut prev = create_memo(move || c0.get() + 1);
        for _ in 1..1000 {
            let p = prev;
            prev = create_memo(move || p.get() + 1);
        }
        let c1000 = prev;
        c0.set(10);
        assert_eq!(c1000.get(), 1010);
    });
}

#[test]
fn sibling_effects_rerun_in_subscription_order() {
    create_root(|| {
        let s = create_signal(0);
        let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let log_a = log.clone();
        create_effect(move || {
            s.get();
            log_a.borrow_mut().push('a');
        });
        let log_b = log.clone();
        create_effect(move || {
            s.get();
            log_b.borrow_mut().push('b');
        });
        log.borrow_mut().clear();
        s.set(1);
        assert_eq!(*log.borrow(), vec!['a', 'b']);
    });
}

#[test]
fn disposing_a_mid_queue_consumer_does_not_drop_its_successors() {
    create_root(|| {
        let s = create_signal(0);
        let runs = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

        let runs1 = runs.clone();
        create_effect(move || {
            s.get();
            runs1.borrow_mut().push(1);
        });
        let runs2 = runs.clone();
        let e2 = create_effect(move || {
            s.get();
            runs2.borrow_mut().push(2);
        });
        let runs3 = runs.clone();
        create_effect(move || {
            s.get();
            runs3.borrow_mut().push(3);
        });
        runs.borrow_mut().clear();

        // All three are scheduled in order (1, 2, 3) by the same write; disposing the middle one
        // while it still sits in the queue must not corrupt the link to the third.
        batch(|| {
            s.set(1);
            e2.dispose();
        });

        assert_eq!(*runs.borrow(), vec![1, 3]);
    });
}
