//! Tests for the timer set and its scheduler, driven by the mock interval
//! timer and the pinned clock from the [`test`] module.
//!
//! [`test`]: crate::test

use std::cell::{Cell, RefCell};
use std::panic;
use std::rc::Rc;
use std::time::Duration;

use super::{add, len, remove};
use crate::{cleanup, poll_if_needed, test, Timer};

/// One second on the microsecond clock.
const SEC: u64 = crate::clock::MICROS_PER_SEC;

#[test]
fn single_timer_fires() {
    let alarm = test::init();
    test::set_now(SEC);

    let timer = Timer::new(Duration::from_secs(1));
    assert_eq!(timer.deadline(), Some(2 * SEC));
    assert!(!timer.has_expired());
    assert_eq!(alarm.armed(), Some(SEC));

    test::advance(Duration::from_millis(1200));
    alarm.fire();
    poll_if_needed().unwrap();

    assert!(timer.has_expired());
    assert_eq!(test::timer_count(), 0);
    assert_eq!(alarm.armed(), None);
}

#[test]
fn earliest_deadline_is_selected() {
    let alarm = test::init();
    test::set_now(SEC);

    let t_a = Timer::new(Duration::from_secs(5));
    assert_eq!(alarm.armed(), Some(5 * SEC));
    let t_b = Timer::new(Duration::from_secs(2));
    assert_eq!(alarm.armed(), Some(2 * SEC));
    let t_c = Timer::new(Duration::from_secs(8));
    // A later deadline must not shorten the programmed delay.
    assert_eq!(alarm.armed(), Some(2 * SEC));
    assert_eq!(alarm.arm_count(), 3);

    test::advance(Duration::from_millis(2100));
    alarm.fire();
    poll_if_needed().unwrap();

    assert!(!t_a.has_expired());
    assert!(t_b.has_expired());
    assert!(!t_c.has_expired());
    assert_eq!(test::timer_count(), 2);
    // Re-armed for `t_a`, 2.9 seconds out.
    assert_eq!(alarm.armed(), Some(2_900_000));
}

#[test]
fn timer_added_during_dispatch_is_armed() {
    let alarm = test::init();
    test::set_now(SEC);

    let spawned = Rc::new(RefCell::new(None));
    let spawned2 = Rc::clone(&spawned);
    let parent = Timer::with_callback(Duration::from_secs(1), move || {
        *spawned2.borrow_mut() = Some(Timer::new(Duration::from_millis(100)));
    });

    test::advance(Duration::from_millis(1100));
    alarm.fire();
    poll_if_needed().unwrap();

    assert!(parent.has_expired());
    let spawned = spawned.borrow();
    let child = spawned.as_ref().unwrap();
    assert!(!child.has_expired());
    assert_eq!(child.deadline(), Some(2_200_000));
    assert_eq!(alarm.armed(), Some(100_000));
    assert_eq!(test::timer_count(), 1);
}

#[test]
fn dropped_timer_does_not_fire() {
    let alarm = test::init();
    test::set_now(SEC);

    let timer = Timer::new(Duration::from_secs(3));
    assert_eq!(alarm.armed(), Some(3 * SEC));

    test::advance(Duration::from_secs(1));
    drop(timer);
    assert_eq!(alarm.armed(), None);
    assert_eq!(test::timer_count(), 0);

    test::advance(Duration::from_secs(3));
    poll_if_needed().unwrap();
    assert_eq!(test::timer_count(), 0);
    assert_eq!(alarm.armed(), None);
}

#[test]
fn notification_during_scan_forces_second_pass() {
    let alarm = test::init();
    test::set_now(SEC);

    let slow = Timer::new(Duration::from_secs(5));
    let racer = Timer::with_callback(Duration::from_secs(1), || {
        // The deadline of `slow` passes while the scheduler is mid-scan, and
        // the matching notification lands after the pass cleared the flag.
        test::advance(Duration::from_secs(5));
        test::notify();
    });

    test::advance(Duration::from_millis(1500));
    alarm.fire();
    poll_if_needed().unwrap();

    // The pass read the clock once, before the callback advanced it.
    assert!(racer.has_expired());
    assert!(!slow.has_expired());

    // The racing notification forces a second pass, which catches up.
    poll_if_needed().unwrap();
    assert!(slow.has_expired());
    assert_eq!(test::timer_count(), 0);
}

#[test]
fn clone_fires_after_source_is_dropped() {
    let alarm = test::init();
    test::set_now(SEC);

    let fired = Rc::new(Cell::new(0));
    let fired2 = Rc::clone(&fired);
    let original = Timer::with_callback(Duration::from_secs(2), move || {
        fired2.set(fired2.get() + 1);
    });
    let copy = original.clone();
    assert_eq!(copy.deadline(), original.deadline());
    assert_eq!(test::timer_count(), 2);

    test::advance(Duration::from_secs(1));
    drop(original);
    assert_eq!(test::timer_count(), 1);
    assert_eq!(alarm.armed(), Some(SEC));

    test::advance(Duration::from_millis(1100));
    alarm.fire();
    poll_if_needed().unwrap();

    assert!(copy.has_expired());
    // The dropped original never fired: the callback ran exactly once.
    assert_eq!(fired.get(), 1);
    assert_eq!(test::timer_count(), 0);
}

#[test]
fn remove_removes_every_back_reference() {
    let alarm = test::init();
    test::set_now(SEC);

    let timer = Timer::new(Duration::from_secs(2));
    // A defensive caller may register the same timer twice.
    add(timer.inner());
    assert_eq!(len(), 2);

    remove(timer.inner());
    assert_eq!(len(), 0);
    assert_eq!(alarm.armed(), None);

    // Removing a timer that is not a member is not an error.
    remove(timer.inner());
    assert_eq!(len(), 0);
}

#[test]
fn duplicate_back_references_dispatch_once() {
    let alarm = test::init();
    test::set_now(SEC);

    let fired = Rc::new(Cell::new(0));
    let fired2 = Rc::clone(&fired);
    let timer = Timer::with_callback(Duration::from_secs(1), move || {
        fired2.set(fired2.get() + 1);
    });
    add(timer.inner());
    assert_eq!(len(), 2);

    test::advance(Duration::from_secs(2));
    alarm.fire();
    poll_if_needed().unwrap();

    assert!(timer.has_expired());
    assert_eq!(fired.get(), 1);
    assert_eq!(len(), 0);
}

#[test]
fn member_removed_during_dispatch_does_not_fire() {
    let alarm = test::init();
    test::set_now(SEC);

    let victim = Rc::new(RefCell::new(None));
    let victim2 = Rc::clone(&victim);
    let killer = Timer::with_callback(Duration::from_secs(1), move || {
        // Cancel the other timer while the scheduler is mid-pass.
        *victim2.borrow_mut() = None;
    });
    let fired = Rc::new(Cell::new(false));
    let fired2 = Rc::clone(&fired);
    *victim.borrow_mut() = Some(Timer::with_callback(Duration::from_secs(2), move || {
        fired2.set(true);
    }));

    test::advance(Duration::from_secs(2));
    alarm.fire();
    poll_if_needed().unwrap();

    assert!(killer.has_expired());
    assert!(!fired.get());
    assert_eq!(test::timer_count(), 0);
}

#[test]
fn clone_made_during_dispatch_with_passed_deadline_fires_in_the_same_pass() {
    let alarm = test::init();
    test::set_now(SEC);

    let source_slot: Rc<RefCell<Option<Timer>>> = Rc::new(RefCell::new(None));
    let clone_slot = Rc::new(RefCell::new(None));
    let source_slot2 = Rc::clone(&source_slot);
    let clone_slot2 = Rc::clone(&clone_slot);
    let cloner = Timer::with_callback(Duration::from_secs(1), move || {
        let copy = source_slot2.borrow().as_ref().unwrap().clone();
        *clone_slot2.borrow_mut() = Some(copy);
    });
    let fired = Rc::new(Cell::new(0));
    let fired2 = Rc::clone(&fired);
    *source_slot.borrow_mut() = Some(Timer::with_callback(Duration::from_secs(2), move || {
        fired2.set(fired2.get() + 1);
    }));

    // Both the cloner and the clone's source are due; the clone joins the
    // set mid-pass with a deadline that already passed.
    test::advance(Duration::from_secs(2));
    alarm.fire();
    poll_if_needed().unwrap();

    assert!(cloner.has_expired());
    assert_eq!(fired.get(), 2);
    assert!(clone_slot.borrow().as_ref().unwrap().has_expired());
    assert_eq!(test::timer_count(), 0);
}

#[test]
fn assignment_adopts_the_source_deadline() {
    let alarm = test::init();
    test::set_now(SEC);

    let mut timer = Timer::new(Duration::from_secs(10));
    let other = Timer::new(Duration::from_secs(2));
    assert_eq!(alarm.armed(), Some(2 * SEC));

    timer.clone_from(&other);
    assert_eq!(timer.deadline(), Some(3 * SEC));
    assert_eq!(test::timer_count(), 2);
    // The original ten second deadline is cancelled.
    assert_eq!(alarm.armed(), Some(2 * SEC));

    test::advance(Duration::from_millis(2100));
    alarm.fire();
    poll_if_needed().unwrap();

    assert!(timer.has_expired());
    assert!(other.has_expired());
    assert_eq!(test::timer_count(), 0);
}

#[test]
fn assignment_from_inert_source_cancels() {
    let alarm = test::init();
    test::set_now(SEC);

    let mut timer = Timer::new(Duration::from_secs(10));
    let inert = Timer::new(Duration::ZERO);
    timer.clone_from(&inert);
    assert_eq!(timer.deadline(), None);
    assert_eq!(test::timer_count(), 0);
    assert_eq!(alarm.armed(), None);

    test::advance(Duration::from_secs(20));
    test::notify();
    poll_if_needed().unwrap();
    assert!(!timer.has_expired());
}

#[test]
fn assignment_from_expired_source() {
    let alarm = test::init();
    test::set_now(SEC);

    let expired = Timer::new(Duration::from_secs(1));
    test::advance(Duration::from_secs(2));
    alarm.fire();
    poll_if_needed().unwrap();
    assert!(expired.has_expired());

    let mut timer = Timer::new(Duration::from_secs(5));
    timer.clone_from(&expired);
    // Adopted the expired state, no longer a member.
    assert!(timer.has_expired());
    assert_eq!(test::timer_count(), 0);
    assert_eq!(alarm.armed(), None);
}

#[test]
fn assignment_leaves_the_source_registered() {
    let alarm = test::init();
    test::set_now(SEC);

    let mut timer = Timer::new(Duration::from_secs(10));
    let other = Timer::new(Duration::from_secs(2));
    timer.clone_from(&other);
    drop(timer);
    assert_eq!(test::timer_count(), 1);

    test::advance(Duration::from_millis(2100));
    alarm.fire();
    poll_if_needed().unwrap();
    assert!(other.has_expired());
}

#[test]
fn clone_of_expired_timer_is_not_registered() {
    let alarm = test::init();
    test::set_now(SEC);

    let timer = Timer::new(Duration::from_secs(1));
    test::advance(Duration::from_secs(2));
    alarm.fire();
    poll_if_needed().unwrap();
    assert!(timer.has_expired());

    let copy = timer.clone();
    assert!(copy.has_expired());
    assert_eq!(copy.deadline(), timer.deadline());
    assert_eq!(test::timer_count(), 0);
}

#[test]
fn deadline_equal_to_now_fires_in_the_same_poll() {
    let alarm = test::init();
    test::set_now(SEC);

    let timer = Timer::new(Duration::from_secs(1));
    test::set_now(2 * SEC);
    alarm.fire();
    poll_if_needed().unwrap();
    assert!(timer.has_expired());
}

#[test]
fn one_microsecond_deadline_arms_one_microsecond() {
    let alarm = test::init();
    test::set_now(SEC);

    let timer = Timer::new(Duration::from_micros(1));
    assert_eq!(timer.deadline(), Some(SEC + 1));
    assert_eq!(alarm.armed(), Some(1));
}

#[test]
fn poll_without_notification_does_nothing() {
    let alarm = test::init();
    test::set_now(SEC);

    let timer = Timer::new(Duration::from_secs(1));
    test::advance(Duration::from_secs(5));
    // The deadline long passed, but no notification arrived and polling is
    // all the host does: nothing may fire.
    poll_if_needed().unwrap();
    assert!(!timer.has_expired());

    alarm.fire();
    poll_if_needed().unwrap();
    assert!(timer.has_expired());
}

#[test]
fn arm_failure_is_fatal() {
    let alarm = test::init();
    test::set_now(SEC);

    alarm.fail_arms(true);
    let timer = Timer::new(Duration::from_secs(1));
    // The set accepted the timer, but programming the wakeup failed.
    let err = poll_if_needed().unwrap_err();
    assert!(err.to_string().contains("arming"), "unexpected error: {err}");

    // The facility refuses further operation, even for valid arms.
    alarm.fail_arms(false);
    let other = Timer::new(Duration::from_secs(1));
    assert_eq!(alarm.armed(), None);

    test::advance(Duration::from_secs(2));
    test::notify();
    poll_if_needed().unwrap();
    assert!(!timer.has_expired());
    assert!(!other.has_expired());
}

#[test]
fn callback_panic_leaves_the_set_consistent() {
    let alarm = test::init();
    test::set_now(SEC);

    let panicking = Timer::with_callback(Duration::from_secs(1), || {
        panic!("callback failure");
    });
    let pending = Timer::new(Duration::from_secs(5));

    test::advance(Duration::from_millis(1100));
    alarm.fire();
    let result = panic::catch_unwind(poll_if_needed);
    assert!(result.is_err());

    // The panicking timer was detached before its callback ran.
    assert!(panicking.has_expired());
    assert_eq!(test::timer_count(), 1);
    // The abandoned pass never re-armed, but it re-requested a reschedule,
    // so the next poll recovers and programs the remaining deadline.
    assert_eq!(alarm.armed(), None);
    poll_if_needed().unwrap();
    assert_eq!(alarm.armed(), Some(3_900_000));
    assert!(!pending.has_expired());
}

#[test]
fn cleanup_makes_outliving_timers_inert() {
    let alarm = test::init();
    test::set_now(SEC);

    let timer = Timer::new(Duration::from_secs(1));
    cleanup();
    assert!(!alarm.is_installed());

    // No notification fires after cleanup, however far the clock advances.
    test::advance(Duration::from_secs(10));
    test::notify();
    poll_if_needed().unwrap();
    assert!(!timer.has_expired());

    // Dropping a timer that outlived the cleanup is a no-op.
    drop(timer);
}

#[test]
fn init_installs_the_handler_and_cleanup_uninstalls() {
    let alarm = test::init();
    assert!(alarm.is_installed());
    assert_eq!(alarm.armed(), None);

    cleanup();
    assert!(!alarm.is_installed());
}

#[test]
fn member_without_deadline_is_repaired() {
    let alarm = test::init();
    test::set_now(SEC);

    let timer = Timer::new(Duration::from_secs(1));
    // Corrupt the member to exercise the defensive repair.
    timer.inner().borrow_mut().expires_at = 0;

    alarm.fire();
    poll_if_needed().unwrap();
    assert_eq!(test::timer_count(), 0);
    assert!(!timer.has_expired());
    assert_eq!(alarm.armed(), None);
}

#[test]
fn poll_before_init_is_a_noop() {
    poll_if_needed().unwrap();
}

#[test]
#[should_panic(expected = "already initialised")]
fn init_twice_panics() {
    let _alarm = test::init();
    let _ = crate::init();
}

#[test]
#[should_panic(expected = "not initialised")]
fn timer_before_init_panics() {
    let _ = Timer::new(Duration::from_secs(1));
}

#[test]
#[should_panic(expected = "not initialised")]
fn cleanup_before_init_panics() {
    cleanup();
}
