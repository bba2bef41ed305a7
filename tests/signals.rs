use gust::{Break, Dispatcher, Events, Loop, Payload, Run};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn raise(signum: i32) {
    let rc = unsafe { libc::raise(signum) };
    assert_eq!(rc, 0, "raise failed");
}

#[test]
fn signal_event_stops_the_loop() {
    let ev_loop = Loop::new().expect("Failed to create loop");

    let ticks = Rc::new(Cell::new(0u32));
    let signals = Rc::new(Cell::new(0u32));
    let cleanups: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let frees: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let dispatcher = Dispatcher::with_hooks(
        &ev_loop,
        {
            let ticks = ticks.clone();
            let signals = signals.clone();
            let cleanups = cleanups.clone();
            let handle = ev_loop.clone();
            move |target: &&'static str, revents, payload| {
                if revents.contains(Events::CLEANUP) {
                    cleanups.borrow_mut().push(*target);
                    return false;
                }

                match *target {
                    "ticker" => {
                        assert!(revents.contains(Events::TIMER));
                        ticks.set(ticks.get() + 1);
                        if ticks.get() == 1 {
                            raise(libc::SIGUSR1);
                        }
                        true
                    }
                    "sig" => {
                        assert!(revents.contains(Events::SIGNAL));
                        assert_eq!(payload, Payload::Signal(libc::SIGUSR1));
                        signals.set(signals.get() + 1);
                        handle.stop(Break::One);
                        false
                    }
                    other => panic!("unexpected target {other}"),
                }
            }
        },
        |_target: &&'static str| {},
        {
            let frees = frees.clone();
            move |target: &&'static str| frees.borrow_mut().push(*target)
        },
    );

    assert!(dispatcher.watch_signal(&"sig", libc::SIGUSR1));
    assert!(dispatcher.watch_timer(&"ticker", 0.01));

    ev_loop.start(Run::Default);

    assert_eq!(signals.get(), 1, "Exactly one signal event expected");
    assert!(ticks.get() >= 1);

    assert_eq!(
        *cleanups.borrow(),
        vec!["ticker"],
        "Only the still-active target receives the terminal event"
    );

    let mut frees = frees.borrow().clone();
    frees.sort_unstable();
    assert_eq!(frees, vec!["sig", "ticker"]);
}

#[test]
fn one_signum_fans_out_to_every_watching_target() {
    let ev_loop = Loop::new().expect("Failed to create loop");

    let a = Rc::new(Cell::new(0u32));
    let b = Rc::new(Cell::new(0u32));
    let drives = Rc::new(Cell::new(0u32));

    let dispatcher = Dispatcher::new(&ev_loop, {
        let a = a.clone();
        let b = b.clone();
        let drives = drives.clone();
        let handle = ev_loop.clone();
        move |target: &&'static str, revents, payload| {
            if revents.contains(Events::CLEANUP) {
                return false;
            }

            match *target {
                "a" | "b" => {
                    assert_eq!(payload.signum(), Some(libc::SIGUSR2));
                    if *target == "a" {
                        a.set(a.get() + 1);
                    } else {
                        b.set(b.get() + 1);
                    }
                    false
                }
                "driver" => {
                    drives.set(drives.get() + 1);
                    if drives.get() == 1 {
                        raise(libc::SIGUSR2);
                        true
                    } else {
                        handle.stop(Break::One);
                        false
                    }
                }
                other => panic!("unexpected target {other}"),
            }
        }
    });

    assert!(dispatcher.watch_signal(&"a", libc::SIGUSR2));
    assert!(dispatcher.watch_signal(&"b", libc::SIGUSR2));
    assert!(dispatcher.watch_timer(&"driver", 0.01));

    ev_loop.start(Run::Default);

    assert_eq!(a.get(), 1);
    assert_eq!(b.get(), 1);
}

#[test]
fn invalid_signum_is_refused() {
    let ev_loop = Loop::new().expect("Failed to create loop");

    let applies = Rc::new(Cell::new(0u32));
    let dispatcher = Dispatcher::with_hooks(
        &ev_loop,
        |_target: &&'static str, _revents, _payload| false,
        {
            let applies = applies.clone();
            move |_target: &&'static str| applies.set(applies.get() + 1)
        },
        |_target: &&'static str| {},
    );

    assert!(!dispatcher.watch_signal(&"x", -3));
    assert!(!dispatcher.watch_signal(&"x", 1000));
    assert_eq!(applies.get(), 0);
}
