//! Signal dispatch through the self-pipe. Kept in one test per process
//! concern: signal handlers are process-global.

#![cfg(unix)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use eddy::{EventLoop, LoopBuilder, LoopError};
use signal_hook::consts::{SIGUSR1, SIGUSR2};
use signal_hook::low_level;

#[test]
fn handlers_fire_per_delivery_and_remove_individually() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let seen: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let first_seen = seen.clone();
    let first = handle
        .add_signal(SIGUSR1, move |_| {
            first_seen.borrow_mut().push("a");
            Ok(())
        })
        .unwrap();
    let second_seen = seen.clone();
    let second = handle
        .add_signal(SIGUSR1, move |_| {
            second_seen.borrow_mut().push("b");
            Ok(())
        })
        .unwrap();

    handle.add_timer(Duration::from_millis(10), false, |_| {
        low_level::raise(SIGUSR1).map_err(eddy::Reason::new)
    });

    let h = handle.clone();
    handle.add_timer(Duration::from_millis(50), false, move |_| {
        assert!(h.remove_signal(first).unwrap());
        low_level::raise(SIGUSR1).map_err(eddy::Reason::new)
    });

    let h = handle.clone();
    handle.add_timer(Duration::from_millis(100), false, move |_| {
        assert!(h.remove_signal(second).unwrap());
        assert!(!h.remove_signal(second).unwrap());
        Ok(())
    });

    lp.run().unwrap();
    assert_eq!(*seen.borrow(), vec!["a", "b", "b"]);
}

#[test]
fn handle_from_a_removed_signal_never_aliases_a_new_registration() {
    let lp = EventLoop::new().unwrap();
    let handle = lp.handle();

    let first = handle.add_signal(SIGUSR2, |_| Ok(())).unwrap();
    assert!(handle.remove_signal(first).unwrap());

    // Reuses the freed arena slot.
    let second = handle.add_signal(SIGUSR2, |_| Ok(())).unwrap();
    assert!(
        !handle.remove_signal(first).unwrap(),
        "stale handle removes a newer registration"
    );
    assert!(handle.remove_signal(second).unwrap());
}

#[test]
fn disabled_signals_reject_registration() {
    let lp = LoopBuilder::new().signals(false).build().unwrap();
    let handle = lp.handle();

    match handle.add_signal(SIGUSR1, |_| Ok(())) {
        Err(LoopError::SignalsDisabled) => {}
        other => panic!("expected a signals-disabled error, got {other:?}"),
    }
}
