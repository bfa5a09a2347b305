//! Scheduled-callback queue and loop lifecycle behavior.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use eddy::{EventLoop, LoopBuilder, LoopError, LoopEvent, Reason};

#[test]
fn scheduled_callbacks_run_in_fifo_order() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));

    for tag in [1u32, 2, 3] {
        let order = order.clone();
        handle.schedule(move || {
            order.borrow_mut().push(tag);
            Ok(())
        });
    }

    lp.run().unwrap();
    assert_eq!(*order.borrow(), vec![1, 2, 3]);
}

#[test]
fn schedule_never_runs_inline() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let ran = Rc::new(Cell::new(false));

    let flag = ran.clone();
    handle.schedule(move || {
        flag.set(true);
        Ok(())
    });
    assert!(!ran.get(), "callback must wait for a tick");

    lp.run().unwrap();
    assert!(ran.get());
}

#[test]
fn callbacks_scheduled_from_callbacks_run_before_exit() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let h = handle.clone();
    let outer_order = order.clone();
    handle.schedule(move || {
        outer_order.borrow_mut().push("a");
        let inner_order = outer_order.clone();
        let h2 = h.clone();
        h.schedule(move || {
            inner_order.borrow_mut().push("b");
            let leaf_order = inner_order.clone();
            h2.schedule(move || {
                leaf_order.borrow_mut().push("c");
                Ok(())
            });
            Ok(())
        });
        Ok(())
    });

    lp.run().unwrap();
    assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
}

#[test]
fn schedule_depth_bounds_drain_per_tick() {
    let mut lp = LoopBuilder::new().max_schedule_depth(1).build().unwrap();
    let handle = lp.handle();
    let count = Rc::new(Cell::new(0u32));

    for _ in 0..3 {
        let count = count.clone();
        handle.schedule(move || {
            count.set(count.get() + 1);
            Ok(())
        });
    }

    lp.tick(false).unwrap();
    assert_eq!(count.get(), 1);
    lp.tick(false).unwrap();
    assert_eq!(count.get(), 2);
    lp.tick(false).unwrap();
    assert_eq!(count.get(), 3);
}

#[test]
fn stop_takes_effect_after_the_current_tick() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();

    // Without the stop, this timer would hold the loop open for ten seconds.
    handle.add_timer(Duration::from_secs(10), false, |_| Ok(()));
    let h = handle.clone();
    handle.schedule(move || {
        h.stop();
        Ok(())
    });

    let started = Instant::now();
    lp.run().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!handle.is_running());
    assert!(!handle.is_empty(), "stop leaves registrations in place");
}

#[test]
fn lifecycle_hooks_observe_start_and_stop() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let seen: Rc<RefCell<Vec<LoopEvent>>> = Rc::new(RefCell::new(Vec::new()));

    let events = seen.clone();
    handle.on_lifecycle(move |event| events.borrow_mut().push(event));
    handle.schedule(|| Ok(()));

    lp.run().unwrap();
    assert_eq!(*seen.borrow(), vec![LoopEvent::Started, LoopEvent::Stopped]);
}

#[test]
fn failing_callback_aborts_the_run() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let later_ran = Rc::new(Cell::new(false));

    handle.schedule(|| Err(Reason::msg("boom")));
    let flag = later_ran.clone();
    handle.schedule(move || {
        flag.set(true);
        Ok(())
    });

    let err = lp.run().unwrap_err();
    match err {
        LoopError::Callback(reason) => assert_eq!(reason.to_string(), "boom"),
        other => panic!("expected a callback failure, got {other}"),
    }
    assert!(!later_ran.get(), "the failing callback aborts the tick");
}

#[test]
fn clear_empties_every_registration() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let ran = Rc::new(Cell::new(false));

    let flag = ran.clone();
    handle.schedule(move || {
        flag.set(true);
        Ok(())
    });
    handle.add_timer(Duration::from_millis(5), false, |_| Ok(()));
    assert!(!handle.is_empty());

    lp.clear().unwrap();
    assert!(handle.is_empty());

    lp.run().unwrap();
    assert!(!ran.get());
}
