use assert_call::{call, CallRecorder};

use super::*;

#[test]
fn empty_is_noop() {
    let _s = Subscription::empty();
}

#[test]
fn from_fn_calls_on_drop() {
    let mut cr = CallRecorder::new();
    {
        let _s = Subscription::from_fn(|| call!("drop"));
    }
    cr.verify("drop");
}

#[test]
fn from_rc_keeps_value_alive() {
    let rc = Rc::new(5);
    let weak = Rc::downgrade(&rc);
    let s = Subscription::from_rc(rc);
    assert!(weak.upgrade().is_some());
    drop(s);
    assert!(weak.upgrade().is_none());
}
