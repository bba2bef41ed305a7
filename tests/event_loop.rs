use gust::{Break, Events, Loop, Payload, Run, TimerWatcher};

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn start_with_no_watchers_returns_immediately() {
    let ev_loop = Loop::new().expect("Failed to create loop");

    let started = Instant::now();
    assert!(!ev_loop.start(Run::Default), "No pending work expected");
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "Empty loop should not block"
    );
}

#[test]
fn nowait_does_not_block() {
    let ev_loop = Loop::new().expect("Failed to create loop");

    let mut timer = TimerWatcher::new(&ev_loop, |_, _| {});
    assert!(timer.start(5.0, 0.0));

    let started = Instant::now();
    assert!(
        ev_loop.start(Run::NoWait),
        "Armed timer should count as pending work"
    );
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "NoWait should return without blocking"
    );

    timer.stop();
    assert!(!timer.is_active());
}

#[test]
fn once_fires_one_shot_timer() {
    let ev_loop = Loop::new().expect("Failed to create loop");

    let fired = Rc::new(Cell::new(0));
    let mut timer = TimerWatcher::new(&ev_loop, {
        let fired = fired.clone();
        move |revents, payload| {
            assert!(revents.contains(Events::TIMER));
            assert_eq!(payload, Payload::None);
            fired.set(fired.get() + 1);
        }
    });

    assert!(timer.start(0.01, 0.0));
    assert!(timer.is_active());

    let pending = ev_loop.start(Run::Once);

    assert_eq!(fired.get(), 1);
    assert!(!timer.is_active(), "One-shot timer deactivates on fire");
    assert!(!pending);
}

#[test]
fn stop_cancel_clears_pending_break() {
    let ev_loop = Loop::new().expect("Failed to create loop");

    let fired = Rc::new(Cell::new(0));
    let mut timer = TimerWatcher::new(&ev_loop, {
        let fired = fired.clone();
        let handle = ev_loop.clone();
        move |_, _| {
            let n = fired.get() + 1;
            fired.set(n);

            if n == 1 {
                handle.stop(Break::One);
                handle.stop(Break::Cancel);
            } else {
                handle.stop(Break::One);
            }
        }
    });

    assert!(timer.start(0.01, 0.01));
    ev_loop.start(Run::Default);

    assert_eq!(
        fired.get(),
        2,
        "Cancelled break should keep the loop running for another fire"
    );
}

#[test]
fn stop_before_start_is_noop() {
    let ev_loop = Loop::new().expect("Failed to create loop");
    ev_loop.stop(Break::All);

    let fired = Rc::new(Cell::new(0));
    let mut timer = TimerWatcher::new(&ev_loop, {
        let fired = fired.clone();
        move |_, _| fired.set(fired.get() + 1)
    });

    assert!(timer.start(0.01, 0.0));
    ev_loop.start(Run::Default);

    assert_eq!(fired.get(), 1, "Stale stop must not pre-break the run");
}

#[test]
fn nested_start_frames() {
    let ev_loop = Loop::new().expect("Failed to create loop");

    let order: Rc<RefCell<Vec<&str>>> = Rc::new(RefCell::new(Vec::new()));
    let mut outer = TimerWatcher::new(&ev_loop, {
        let order = order.clone();
        let handle = ev_loop.clone();
        move |_, _| {
            order.borrow_mut().push("outer");

            let mut inner = TimerWatcher::new(&handle, {
                let order = order.clone();
                move |_, _| order.borrow_mut().push("inner")
            });
            assert!(inner.start(0.005, 0.0));

            handle.start(Run::Once);
            handle.stop(Break::One);
        }
    });

    assert!(outer.start(0.01, 0.0));
    ev_loop.start(Run::Default);

    assert_eq!(*order.borrow(), vec!["outer", "inner"]);
}

#[test]
fn current_returns_the_same_loop() {
    let fired = Rc::new(Cell::new(0));

    let mut timer = TimerWatcher::new(&Loop::current(), {
        let fired = fired.clone();
        move |_, _| fired.set(fired.get() + 1)
    });
    assert!(timer.start(0.01, 0.0));

    // A second `current()` handle drives the watcher armed through
    // the first one.
    Loop::current().start(Run::Default);

    assert_eq!(fired.get(), 1);
}
