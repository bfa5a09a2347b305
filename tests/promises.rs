//! Promise engine behavior: settlement, chaining, adoption, delay.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use eddy::{Deferred, EventLoop, LoopError, Promise, Reason, Resolution};

#[test]
fn settlement_is_terminal_and_idempotent() {
    let lp = EventLoop::new().unwrap();
    let handle = lp.handle();

    let (deferred, promise) = Deferred::<u32>::new(&handle);
    assert!(promise.is_pending());

    assert!(deferred.fulfill(1));
    assert!(!deferred.reject(Reason::msg("late")));
    assert!(!deferred.fulfill(2));

    assert!(promise.is_fulfilled());
    assert!(!promise.is_rejected());
    assert_eq!(promise.result().unwrap(), 1);
}

#[test]
fn continuations_on_settled_promises_still_run_asynchronously() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let seen = Rc::new(Cell::new(0u32));

    let out = seen.clone();
    Promise::fulfilled(&handle, 7u32)
        .then(|n| Resolution::Fulfill(n * 2))
        .done(move |n| {
            out.set(n);
            Ok(())
        });
    assert_eq!(seen.get(), 0, "continuations wait for the loop");

    lp.run().unwrap();
    assert_eq!(seen.get(), 14);
}

#[test]
fn rejection_passes_through_then_and_is_caught() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let then_ran = Rc::new(Cell::new(false));
    let caught: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let value = Rc::new(Cell::new(0u32));

    let flag = then_ran.clone();
    let reason_out = caught.clone();
    let value_out = value.clone();
    Promise::<u32>::rejected(&handle, Reason::msg("nope"))
        .then(move |n| {
            flag.set(true);
            Resolution::Fulfill(n)
        })
        .catch(move |reason| {
            *reason_out.borrow_mut() = Some(reason.to_string());
            Resolution::Fulfill(9)
        })
        .done(move |n| {
            value_out.set(n);
            Ok(())
        });

    lp.run().unwrap();
    assert!(!then_ran.get(), "rejection skips fulfillment handlers");
    assert_eq!(caught.borrow().as_deref(), Some("nope"));
    assert_eq!(value.get(), 9);
}

#[test]
fn follow_adopts_through_two_levels() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let seen = Rc::new(Cell::new(0u32));

    let (outer, outer_promise) = Deferred::<u32>::new(&handle);
    let (mid, mid_promise) = Deferred::<u32>::new(&handle);
    let (inner, inner_promise) = Deferred::<u32>::new(&handle);

    assert!(outer.resolve(Resolution::Follow(mid_promise)));
    assert!(!outer.fulfill(99), "a follow claims the promise");
    assert!(mid.resolve(Resolution::Follow(inner_promise)));

    let out = seen.clone();
    outer_promise.done(move |n| {
        out.set(n);
        Ok(())
    });

    assert!(inner.fulfill(7));
    lp.run().unwrap();
    assert_eq!(seen.get(), 7);
}

#[test]
fn handler_rejection_propagates_down_the_chain() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let caught: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));

    let reason_out = caught.clone();
    Promise::fulfilled(&handle, 1u32)
        .then(|_| Resolution::<u32>::Reject(Reason::msg("handler gave up")))
        .done_or_else(
            |_| panic!("fulfillment handler must not run"),
            move |reason| {
                *reason_out.borrow_mut() = Some(reason.to_string());
                Ok(())
            },
        );

    lp.run().unwrap();
    assert_eq!(caught.borrow().as_deref(), Some("handler gave up"));
}

#[test]
fn deferred_settled_from_a_timer_reaches_waiters() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let seen = Rc::new(Cell::new(0u32));

    let (deferred, promise) = Deferred::<u32>::new(&handle);
    let out = seen.clone();
    promise.done(move |n| {
        out.set(n);
        Ok(())
    });

    handle.add_timer(Duration::from_millis(10), false, move |_| {
        deferred.fulfill(42);
        Ok(())
    });

    lp.run().unwrap();
    assert_eq!(seen.get(), 42);
}

#[test]
fn delay_fulfills_after_the_interval() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let seen = Rc::new(Cell::new(0u32));

    let out = seen.clone();
    Promise::fulfilled(&handle, 3u32)
        .delay(Duration::from_millis(30))
        .done(move |n| {
            out.set(n);
            Ok(())
        });

    let started = Instant::now();
    lp.run().unwrap();
    assert_eq!(seen.get(), 3);
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn abandoned_delay_cancels_its_timer() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();

    let delayed = Promise::fulfilled(&handle, 1u32).delay(Duration::from_secs(10));
    drop(delayed);

    let started = Instant::now();
    lp.run().unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "no orphaned ten-second timer may hold the loop open"
    );
}

#[test]
fn unhandled_rejection_reaches_the_policy() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let reported: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    let sink = reported.clone();
    handle.on_unhandled_rejection(move |reason| {
        sink.borrow_mut().push(reason.to_string());
    });

    Promise::<u32>::rejected(&handle, Reason::msg("lost")).done(|_| Ok(()));

    lp.run().unwrap();
    assert_eq!(*reported.borrow(), vec!["lost".to_string()]);
}

#[test]
fn failing_done_handler_surfaces_from_run() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();

    Promise::fulfilled(&handle, 1u32).done(|_| Err(Reason::msg("bad")));

    match lp.run().unwrap_err() {
        LoopError::Callback(reason) => assert_eq!(reason.to_string(), "bad"),
        other => panic!("expected a callback failure, got {other}"),
    }
}
