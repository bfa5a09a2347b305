//! Timer and immediate behavior through full loop runs.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use eddy::EventLoop;

#[test]
fn one_shot_timer_fires_once_then_deactivates() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let count = Rc::new(Cell::new(0u32));

    let fired = count.clone();
    let timer = handle.add_timer(Duration::from_millis(10), false, move |_| {
        fired.set(fired.get() + 1);
        Ok(())
    });
    assert!(handle.timer_active(timer));

    lp.run().unwrap();
    assert_eq!(count.get(), 1);
    assert!(!handle.timer_active(timer));
}

#[test]
fn timers_fire_in_deadline_order() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));

    // Registered shortest-last to rule out insertion-order accidents.
    let late = order.clone();
    handle.add_timer(Duration::from_millis(30), false, move |_| {
        late.borrow_mut().push(2);
        Ok(())
    });
    let early = order.clone();
    handle.add_timer(Duration::from_millis(10), false, move |_| {
        early.borrow_mut().push(1);
        Ok(())
    });

    lp.run().unwrap();
    assert_eq!(*order.borrow(), vec![1, 2]);
}

#[test]
fn periodic_timer_repeats_until_cancelled() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let count = Rc::new(Cell::new(0u32));

    let h = handle.clone();
    let fired = count.clone();
    handle.add_timer(Duration::from_millis(5), true, move |timer| {
        fired.set(fired.get() + 1);
        if fired.get() == 3 {
            assert!(h.cancel_timer(timer));
        }
        Ok(())
    });

    lp.run().unwrap();
    assert_eq!(count.get(), 3);
}

#[test]
fn cancelled_timer_never_fires() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let fired = Rc::new(Cell::new(false));

    let flag = fired.clone();
    let doomed = handle.add_timer(Duration::from_millis(10), false, move |_| {
        flag.set(true);
        Ok(())
    });
    assert!(handle.cancel_timer(doomed));
    assert!(!handle.cancel_timer(doomed));
    assert!(!handle.timer_active(doomed));

    // Keeps the loop alive well past the cancelled deadline.
    handle.add_timer(Duration::from_millis(30), false, |_| Ok(()));

    lp.run().unwrap();
    assert!(!fired.get());
}

#[test]
fn immediate_runs_before_a_pending_timer() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let timer_order = order.clone();
    handle.add_timer(Duration::from_millis(20), false, move |_| {
        timer_order.borrow_mut().push("timer");
        Ok(())
    });
    let imm_order = order.clone();
    handle.add_immediate(move || {
        imm_order.borrow_mut().push("immediate");
        Ok(())
    });

    lp.run().unwrap();
    assert_eq!(*order.borrow(), vec!["immediate", "timer"]);
}

#[test]
fn immediate_pending_state_tracks_execution() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();

    let imm = handle.add_immediate(|| Ok(()));
    assert!(handle.immediate_pending(imm));

    lp.run().unwrap();
    assert!(!handle.immediate_pending(imm));
    assert!(!handle.cancel_immediate(imm), "already ran");
}

#[test]
fn handle_from_a_fired_timer_never_aliases_a_new_timer() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();

    let t1 = handle.add_timer(Duration::from_millis(5), false, |_| Ok(()));
    lp.run().unwrap();
    assert!(!handle.timer_active(t1));

    // Registering again reuses the freed arena slot.
    let fired = Rc::new(Cell::new(false));
    let flag = fired.clone();
    let t2 = handle.add_timer(Duration::from_millis(5), false, move |_| {
        flag.set(true);
        Ok(())
    });
    assert!(!handle.timer_active(t1), "stale handle reports a live timer");
    assert!(!handle.cancel_timer(t1), "stale handle cancels an unrelated timer");
    assert!(handle.timer_active(t2));

    lp.run().unwrap();
    assert!(fired.get());
}

#[test]
fn handle_from_a_ran_immediate_never_aliases_a_new_immediate() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();

    let a = handle.add_immediate(|| Ok(()));
    lp.run().unwrap();
    assert!(!handle.immediate_pending(a));

    let b = handle.add_immediate(|| Ok(()));
    assert!(!handle.immediate_pending(a));
    assert!(!handle.cancel_immediate(a), "stale handle cancels a newer immediate");
    assert!(handle.immediate_pending(b));

    lp.run().unwrap();
}

#[test]
fn cancelled_immediate_is_skipped() {
    let mut lp = EventLoop::new().unwrap();
    let handle = lp.handle();
    let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));

    let first = order.clone();
    let a = handle.add_immediate(move || {
        first.borrow_mut().push(1);
        Ok(())
    });
    let second = order.clone();
    handle.add_immediate(move || {
        second.borrow_mut().push(2);
        Ok(())
    });

    assert!(handle.cancel_immediate(a));
    lp.run().unwrap();
    assert_eq!(*order.borrow(), vec![2]);
}
