use gust::{Dispatcher, Events, Loop, Payload, Run};

use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::Rc;

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe failed");
    (fds[0], fds[1])
}

fn write_byte(fd: RawFd) {
    let n = unsafe { libc::write(fd, b"x".as_ptr() as *const _, 1) };
    assert_eq!(n, 1);
}

fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

#[test]
fn release_inside_handler_is_authoritative() {
    let ev_loop = Loop::new().expect("Failed to create loop");
    let (rfd, wfd) = pipe();
    write_byte(wfd);

    let fired = Rc::new(Cell::new(0u32));
    let frees = Rc::new(Cell::new(0u32));
    let slot: Rc<RefCell<Option<Dispatcher<&'static str>>>> = Rc::new(RefCell::new(None));

    let dispatcher = Dispatcher::with_hooks(
        &ev_loop,
        {
            let fired = fired.clone();
            let slot = slot.clone();
            move |target: &&'static str, revents, payload| {
                assert!(revents.contains(Events::READ));
                assert_eq!(payload, Payload::Fd(rfd));
                fired.set(fired.get() + 1);

                let guard = slot.borrow();
                let dispatcher = guard.as_ref().unwrap();
                assert!(dispatcher.release_watching(target));

                // The release wins over the truthy return: nothing is
                // left to re-arm.
                true
            }
        },
        |_target: &&'static str| {},
        {
            let frees = frees.clone();
            move |_target: &&'static str| frees.set(frees.get() + 1)
        },
    );

    assert!(dispatcher.watch_io(&"conn", rfd, Events::READ));
    *slot.borrow_mut() = Some(dispatcher);

    ev_loop.start(Run::Once);

    assert_eq!(fired.get(), 1);
    assert_eq!(frees.get(), 1);

    let guard = slot.borrow();
    let dispatcher = guard.as_ref().unwrap();
    assert!(
        !dispatcher.release_watching(&"conn"),
        "The target is already gone"
    );
    drop(guard);

    close(rfd);
    close(wfd);
}

#[test]
fn write_readiness_is_delivered() {
    let ev_loop = Loop::new().expect("Failed to create loop");
    let (rfd, wfd) = pipe();

    let fired = Rc::new(Cell::new(0u32));
    let dispatcher = Dispatcher::new(&ev_loop, {
        let fired = fired.clone();
        move |_target: &&'static str, revents, payload| {
            if revents.contains(Events::CLEANUP) {
                return false;
            }
            assert!(revents.contains(Events::WRITE));
            assert_eq!(payload.fd(), Some(wfd));
            fired.set(fired.get() + 1);
            false
        }
    });

    assert!(dispatcher.watch_io(&"sink", wfd, Events::WRITE));

    ev_loop.start(Run::Once);
    assert_eq!(fired.get(), 1, "An empty pipe is writable immediately");

    close(rfd);
    close(wfd);
}

#[test]
fn invalid_fd_is_refused() {
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

    assert!(!dispatcher.watch_io(&"bad", 1_000_000, Events::READ));
    assert_eq!(applies.get(), 0, "A refused watcher must not enter the registry");

    // The dispatcher stays usable after a refused registration.
    assert!(dispatcher.watch_timer(&"t", 1.0));
    assert_eq!(applies.get(), 1);
}

#[test]
fn falsy_handler_suppresses_the_rest_of_the_batch() {
    let ev_loop = Loop::new().expect("Failed to create loop");
    let (rfd1, wfd1) = pipe();
    let (rfd2, wfd2) = pipe();
    write_byte(wfd1);
    write_byte(wfd2);

    let fired = Rc::new(Cell::new(0u32));
    let dispatcher = Dispatcher::new(&ev_loop, {
        let fired = fired.clone();
        move |_target: &&'static str, revents, _payload| {
            if revents.contains(Events::CLEANUP) {
                return false;
            }
            fired.set(fired.get() + 1);
            false
        }
    });

    // Both descriptors are ready in the same poll batch. Delivering
    // the first event stops every watcher of the target, so the
    // second event must be dropped as stale.
    assert!(dispatcher.watch_io(&"t", rfd1, Events::READ));
    assert!(dispatcher.watch_io(&"t", rfd2, Events::READ));

    ev_loop.start(Run::Once);
    assert_eq!(fired.get(), 1);

    close(rfd1);
    close(wfd1);
    close(rfd2);
    close(wfd2);
}

#[test]
fn hangup_raises_the_error_bit() {
    let ev_loop = Loop::new().expect("Failed to create loop");
    let (rfd, wfd) = pipe();

    let fired = Rc::new(Cell::new(0u32));
    let dispatcher = Dispatcher::new(&ev_loop, {
        let fired = fired.clone();
        move |_target: &&'static str, revents, payload| {
            if revents.contains(Events::CLEANUP) {
                return false;
            }
            assert!(revents.contains(Events::READ));
            assert!(
                revents.contains(Events::ERROR),
                "A hung-up pipe must carry the error bit, got {revents:?}"
            );
            assert_eq!(payload.fd(), Some(rfd));
            fired.set(fired.get() + 1);
            false
        }
    });

    assert!(dispatcher.watch_io(&"conn", rfd, Events::READ));

    // Hanging up the write end leaves the reader readable (EOF) with
    // the hang-up reported as an error event.
    close(wfd);

    ev_loop.start(Run::Once);
    assert_eq!(fired.get(), 1);

    close(rfd);
}

#[test]
fn per_fd_watchers_are_reused() {
    let ev_loop = Loop::new().expect("Failed to create loop");
    let (rfd, wfd) = pipe();

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

    assert!(dispatcher.watch_io(&"t", rfd, Events::READ));
    // Same fd: the existing watcher is re-parameterised in place.
    assert!(dispatcher.watch_io(&"t", rfd, Events::READ | Events::WRITE));
    assert_eq!(applies.get(), 1);

    close(rfd);
    close(wfd);
}
