//! Crate-level scenario tests: the observable contract of the engine,
//! exercised through the public surface only.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::{
    Reactive, ReactiveError, Value, batch, computed, create_reactive, effect, is_reactive, notify,
    to_raw, untrack, watch_fn, wrap,
};

fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
    let c = Rc::new(Cell::new(0));
    (c.clone(), c)
}

#[test]
fn wrapping_is_idempotent_and_referentially_stable() {
    let wrapped = wrap(Value::object([("x", 1)]));
    assert!(is_reactive(&wrapped));
    assert_eq!(wrap(wrapped.clone()), wrapped);

    let handle = wrapped.as_handle().unwrap();
    assert_eq!(create_reactive(Value::Ref(handle)).unwrap(), handle);
}

#[test]
fn effect_sees_write_synchronously_outside_a_batch() {
    let s = create_reactive(Value::object([("count", 0)])).unwrap();
    let seen = Rc::new(Cell::new(0.0));
    let seen_in = seen.clone();

    let _binding = effect(move || {
        seen_in.set(s.get("count").as_num().unwrap_or(f64::NAN));
    });
    assert_eq!(seen.get(), 0.0);

    s.set("count", 5);
    assert_eq!(seen.get(), 5.0, "propagation is synchronous with no batch");
}

#[test]
fn dependency_precision_and_write_suppression() {
    let s = create_reactive(Value::object([("a", 1), ("b", 1)])).unwrap();
    let (runs, runs_in) = counter();

    let _binding = effect(move || {
        let _ = s.get("a");
        runs_in.set(runs_in.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    s.set("b", 2);
    assert_eq!(runs.get(), 1, "unread key must not re-run the effect");

    {
        cov_mark::check!(write_suppressed);
        s.set("a", 1);
    }
    assert_eq!(runs.get(), 1, "equal write must not re-run the effect");

    s.set("a", 2);
    assert_eq!(runs.get(), 2);
}

#[test]
fn batch_coalesces_to_one_run_with_final_value() {
    let s = create_reactive(Value::object([("a", 0)])).unwrap();
    let (runs, runs_in) = counter();
    let last = Rc::new(Cell::new(0.0));
    let last_in = last.clone();

    let _binding = effect(move || {
        last_in.set(s.get("a").as_num().unwrap_or(f64::NAN));
        runs_in.set(runs_in.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    batch(|| {
        s.set("a", 1);
        s.set("a", 2);
        assert_eq!(runs.get(), 1, "no effect runs while the batch is open");
    });

    assert_eq!(runs.get(), 2, "exactly one run for the whole batch");
    assert_eq!(last.get(), 2.0, "the run observes the final value");
}

#[test]
fn only_the_outermost_batch_drains() {
    let s = create_reactive(Value::object([("a", 0)])).unwrap();
    let (runs, runs_in) = counter();

    let _binding = effect(move || {
        let _ = s.get("a");
        runs_in.set(runs_in.get() + 1);
    });

    batch(|| {
        s.set("a", 1);
        batch(|| s.set("a", 2));
        assert_eq!(runs.get(), 1, "inner batch exit must not drain");
    });
    assert_eq!(runs.get(), 2);
}

#[test]
fn effect_registered_inside_a_batch_still_runs_immediately() {
    let s = create_reactive(Value::object([("a", 0)])).unwrap();
    let (runs, runs_in) = counter();

    batch(|| {
        let _binding = effect(move || {
            let _ = s.get("a");
            runs_in.set(runs_in.get() + 1);
        });
        assert_eq!(runs.get(), 1, "registration is not propagation");
    });
}

#[test]
fn derived_value_is_lazy_memoized_and_fresh() {
    let s = create_reactive(Value::object([("count", 3)])).unwrap();
    let (calls, calls_in) = counter();

    computed(s, "double", move || {
        calls_in.set(calls_in.get() + 1);
        Value::Num(s.get("count").as_num().unwrap_or(0.0) * 2.0)
    })
    .unwrap();

    // Fresh object, no writes yet: first read evaluates.
    assert_eq!(s.get("double"), Value::Num(6.0));
    assert_eq!(s.get("double"), Value::Num(6.0));
    assert_eq!(calls.get(), 1, "clean reads share one evaluation");

    s.set("count", 5);
    assert_eq!(calls.get(), 1, "a write marks dirty without evaluating");
    assert_eq!(s.get("double"), Value::Num(10.0));
    assert_eq!(calls.get(), 2);
}

#[test]
fn derived_chains_propagate_to_effects() {
    let s = create_reactive(Value::object([("count", 1)])).unwrap();
    computed(s, "double", move || {
        Value::Num(s.get("count").as_num().unwrap_or(0.0) * 2.0)
    })
    .unwrap();
    computed(s, "quad", move || {
        Value::Num(s.get("double").as_num().unwrap_or(0.0) * 2.0)
    })
    .unwrap();

    let seen = Rc::new(Cell::new(0.0));
    let seen_in = seen.clone();
    let _binding = effect(move || {
        seen_in.set(s.get("quad").as_num().unwrap_or(f64::NAN));
    });
    assert_eq!(seen.get(), 4.0);

    s.set("count", 3);
    assert_eq!(seen.get(), 12.0, "derived-on-derived chain reached the effect");
}

#[test]
fn array_push_notifies_array_subscribers_once() {
    let arr = create_reactive(Value::array([1, 2, 3])).unwrap();
    let (runs, runs_in) = counter();
    let len_seen = Rc::new(Cell::new(0));
    let len_in = len_seen.clone();

    let _binding = effect(move || {
        // Reads both the length and the contents: still one run per push.
        len_in.set(arr.len());
        let _ = arr.to_vec();
        runs_in.set(runs_in.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    arr.push(4).unwrap();
    assert_eq!(runs.get(), 2, "one coordinated notification per push");
    assert_eq!(len_seen.get(), 4);
}

#[test]
fn structural_array_ops_notify_once_each() {
    let arr = create_reactive(Value::array([3, 1, 2])).unwrap();
    let (runs, runs_in) = counter();

    let _binding = effect(move || {
        let _ = arr.to_vec();
        runs_in.set(runs_in.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    arr.sort_by(|a, b| {
        a.as_num()
            .unwrap_or(0.0)
            .total_cmp(&b.as_num().unwrap_or(0.0))
    })
    .unwrap();
    assert_eq!(runs.get(), 2);
    assert_eq!(to_raw(arr), Value::array([1, 2, 3]));

    arr.reverse().unwrap();
    assert_eq!(runs.get(), 3);
    assert_eq!(to_raw(arr), Value::array([3, 2, 1]));

    assert_eq!(arr.shift().unwrap(), Some(Value::Num(3.0)));
    assert_eq!(runs.get(), 4);

    arr.unshift(9).unwrap();
    assert_eq!(runs.get(), 5);

    let removed = arr.splice(0, 2, vec![Value::Num(7.0)]).unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(runs.get(), 6);

    // No-op structural calls stay quiet.
    let empty = create_reactive(Value::array(Vec::<Value>::new())).unwrap();
    assert_eq!(empty.pop().unwrap(), None);
}

#[test]
fn disposal_detaches_and_is_idempotent() {
    let s = create_reactive(Value::object([("a", 0)])).unwrap();
    let (runs, runs_in) = counter();

    let binding = effect(move || {
        let _ = s.get("a");
        runs_in.set(runs_in.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    binding.dispose();
    binding.dispose();

    s.set("a", 1);
    assert_eq!(runs.get(), 1, "a disposed effect never runs again");
}

#[test]
fn deep_reactivity_through_nested_objects() {
    let s = create_reactive(Value::object([(
        "nested",
        Value::object([("x", 1)]),
    )]))
    .unwrap();
    let seen = Rc::new(Cell::new(0.0));
    let seen_in = seen.clone();

    let _binding = effect(move || {
        let nested = s.get("nested").as_handle().expect("nested is wrapped");
        seen_in.set(nested.get("x").as_num().unwrap_or(f64::NAN));
    });
    assert_eq!(seen.get(), 1.0);

    let nested = s.get("nested").as_handle().unwrap();
    nested.set("x", 2);
    assert_eq!(seen.get(), 2.0);
}

#[test]
fn conditional_dependencies_follow_the_branch_taken() {
    let s = create_reactive(Value::object([
        ("flag", Value::Bool(true)),
        ("a", Value::Num(1.0)),
        ("b", Value::Num(10.0)),
    ]))
    .unwrap();
    let (runs, runs_in) = counter();

    let _binding = effect(move || {
        if s.get("flag").as_bool().unwrap_or(false) {
            let _ = s.get("a");
        } else {
            let _ = s.get("b");
        }
        runs_in.set(runs_in.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    s.set("b", 11);
    assert_eq!(runs.get(), 1, "untaken branch is not a dependency");

    s.set("flag", false);
    assert_eq!(runs.get(), 2);

    s.set("a", 2);
    assert_eq!(runs.get(), 2, "stale dependency was cleared by re-tracking");

    s.set("b", 12);
    assert_eq!(runs.get(), 3);
}

#[test]
fn a_panicking_subscriber_does_not_block_its_siblings() {
    let s = create_reactive(Value::object([("k", 0)])).unwrap();
    let fail = Rc::new(Cell::new(false));
    let fail_in = fail.clone();
    let (runs, runs_in) = counter();

    let _first = effect(move || {
        let _ = s.get("k");
        if fail_in.get() {
            panic!("subscriber failure");
        }
    });
    let _second = effect(move || {
        let _ = s.get("k");
        runs_in.set(runs_in.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    fail.set(true);
    s.set("k", 1);
    assert_eq!(runs.get(), 2, "the sibling after the panicking one still ran");

    s.set("k", 2);
    assert_eq!(runs.get(), 3, "the tracker survived the panic");
}

#[test]
fn self_writing_subscriber_is_skipped_not_looped() {
    cov_mark::check!(self_trigger_skipped);
    let s = create_reactive(Value::object([("k", 0)])).unwrap();
    let (runs, runs_in) = counter();

    let _binding = effect(move || {
        let v = s.get("k").as_num().unwrap_or(0.0);
        runs_in.set(runs_in.get() + 1);
        s.set("k", v + 1.0);
    });
    assert_eq!(runs.get(), 1);
    assert_eq!(s.get("k"), Value::Num(1.0));

    s.set("k", 10);
    assert_eq!(runs.get(), 2);
    assert_eq!(s.get("k"), Value::Num(11.0));
}

#[test]
fn drain_captures_work_scheduled_during_drain() {
    cov_mark::check!(drain_follow_up_pass);
    let s = create_reactive(Value::object([("a", 0), ("b", 0)])).unwrap();
    let seen_b = Rc::new(Cell::new(0.0));
    let seen_b_in = seen_b.clone();

    let _forwarder = effect(move || {
        let a = s.get("a");
        s.set("b", a);
    });
    let _reader = effect(move || {
        seen_b_in.set(s.get("b").as_num().unwrap_or(f64::NAN));
    });

    batch(|| s.set("a", 7));
    assert_eq!(seen_b.get(), 7.0, "the follow-up drain pass ran the reader");
}

#[test]
fn untracked_reads_are_not_dependencies() {
    let s = create_reactive(Value::object([("a", 0), ("b", 0)])).unwrap();
    let (runs, runs_in) = counter();

    let _binding = effect(move || {
        let _ = s.get("a");
        let _ = untrack(|| s.get("b"));
        runs_in.set(runs_in.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    s.set("b", 1);
    assert_eq!(runs.get(), 1, "untracked read created no dependency");

    s.set("a", 1);
    assert_eq!(runs.get(), 2);
}

#[test]
fn manual_notify_forces_a_rerun_and_a_recompute() {
    let s = create_reactive(Value::object([("k", 1)])).unwrap();
    let (runs, runs_in) = counter();
    let _binding = effect(move || {
        let _ = s.get("k");
        runs_in.set(runs_in.get() + 1);
    });

    s.set("k", 1); // suppressed
    assert_eq!(runs.get(), 1);

    notify(s, Some("k"));
    assert_eq!(runs.get(), 2, "manual invalidation bypasses suppression");

    let (calls, calls_in) = counter();
    computed(s, "d", move || {
        calls_in.set(calls_in.get() + 1);
        s.get("k")
    })
    .unwrap();
    let _ = s.get("d");
    assert_eq!(calls.get(), 1);

    notify(s, Some("d"));
    let _ = s.get("d");
    assert_eq!(calls.get(), 2, "notify marked the derived value dirty");

    notify(s, None);
    assert_eq!(runs.get(), 3, "blanket notify re-triggered tracked keys");
}

#[test]
fn propagation_order_is_registration_order() {
    let s = create_reactive(Value::object([("k", 0)])).unwrap();
    let order: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));

    for tag in 1..=3u8 {
        let order_in = order.clone();
        let _ = effect(move || {
            let _ = s.get("k");
            order_in.borrow_mut().push(tag);
        });
    }
    order.borrow_mut().clear();

    s.set("k", 1);
    assert_eq!(*order.borrow(), vec![1, 2, 3]);

    order.borrow_mut().clear();
    batch(|| s.set("k", 2));
    assert_eq!(*order.borrow(), vec![1, 2, 3]);
}

#[test]
fn stale_handles_degrade_gracefully() {
    let ghost = Reactive::stale_for_tests();
    assert!(!ghost.is_live());
    assert_eq!(ghost.get("x"), Value::Null);
    ghost.set("x", 1); // dropped, no panic
    assert_eq!(ghost.push(1), Err(ReactiveError::StaleHandle));
    assert_eq!(to_raw(ghost), Value::Null);
    notify(ghost, Some("x")); // no-op
}

#[test]
fn watch_fn_diffs_composite_sources() {
    let s = create_reactive(Value::object([("first", "ada"), ("last", "l")])).unwrap();
    let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let seen_in = seen.clone();

    let _watcher = watch_fn(
        move || {
            let first = s.get("first");
            let last = s.get("last");
            Value::Str(format!(
                "{} {}",
                first.as_str().unwrap_or(""),
                last.as_str().unwrap_or("")
            ))
        },
        move |new, _old| {
            seen_in
                .borrow_mut()
                .push(new.as_str().unwrap_or("").to_owned());
        },
    );
    assert!(seen.borrow().is_empty());

    s.set("last", "lovelace");
    assert_eq!(*seen.borrow(), vec!["ada lovelace".to_owned()]);

    batch(|| {
        s.set("first", "grace");
        s.set("last", "hopper");
    });
    assert_eq!(
        *seen.borrow(),
        vec!["ada lovelace".to_owned(), "grace hopper".to_owned()],
        "one callback for the whole batch"
    );
}

#[test]
fn storing_a_reactive_inside_another_shares_state() {
    let item = create_reactive(Value::object([("done", false)])).unwrap();
    let list = create_reactive(Value::array(Vec::<Value>::new())).unwrap();
    list.push(item).unwrap();

    let (runs, runs_in) = counter();
    let _binding = effect(move || {
        let stored = list.index(0).as_handle().expect("stored as a link");
        let _ = stored.get("done");
        runs_in.set(runs_in.get() + 1);
    });
    assert_eq!(runs.get(), 1);

    // Writing through the original handle reaches the reader via the list.
    item.set("done", true);
    assert_eq!(runs.get(), 2);
    assert_eq!(list.index(0).as_handle().unwrap(), item);
}
