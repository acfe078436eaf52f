use assert_call::{call, CallRecorder};

use crate::{core::Runtime, effect, effect_writable, Cell};

#[test]
fn runs_once_then_on_change() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let c = Cell::new(10);
    let c0 = c.clone();
    let e = effect(move |sc| call!("{}", c0.get(sc)));
    cr.verify(());

    rt.update();
    cr.verify("10");

    rt.update();
    cr.verify(()); // not called again because nothing changed

    c.set(20, &mut rt.sc());
    rt.update();
    cr.verify("20");

    c.set(30, &mut rt.sc());
    drop(e);
    rt.update();
    cr.verify(()); // not called again because the subscription was dropped
}

#[test]
fn write_not_permitted_by_default() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let trigger = Cell::new(0);
    let target = Cell::new(0);
    let (tr, ta) = (trigger.clone(), target.clone());
    let _e = effect(move |sc| {
        tr.get(sc);
        call!("{:?}", ta.try_set(1, sc));
    });
    rt.update();
    cr.verify("Err(WriteNotPermitted)");
    assert_eq!(*target.untracked(), 0);
}

#[test]
fn writable_effect_may_write() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let source = Cell::new(1);
    let mirror = Cell::new(0);
    let (s0, m0) = (source.clone(), mirror.clone());
    let _w = effect_writable(move |sc| {
        let v = s0.get(sc);
        m0.set(v, sc);
    });
    let m1 = mirror.clone();
    let _e = effect(move |sc| call!("{}", m1.get(sc)));

    rt.update();
    cr.verify("1");

    source.set(5, &mut rt.sc());
    rt.update();
    cr.verify("5");
}

#[test]
fn untrack_suppresses_dependency() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let tracked = Cell::new(1);
    let ignored = Cell::new(10);
    let (t0, i0) = (tracked.clone(), ignored.clone());
    let _e = effect(move |sc| {
        let t = t0.get(sc);
        let i = sc.untrack(|sc| i0.get(sc));
        call!("{t} {i}");
    });
    rt.update();
    cr.verify("1 10");

    ignored.set(20, &mut rt.sc());
    rt.update();
    cr.verify(());

    tracked.set(2, &mut rt.sc());
    rt.update();
    cr.verify("2 20");
}

#[test]
fn coalesces_multiple_changes() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let a = Cell::new(1);
    let b = Cell::new(1);
    let (a0, b0) = (a.clone(), b.clone());
    let _e = effect(move |sc| call!("{}", a0.get(sc) + b0.get(sc)));
    rt.update();
    cr.verify("2");

    a.set(2, &mut rt.sc());
    b.set(2, &mut rt.sc());
    rt.update();
    cr.verify("4"); // one run for both changes
}

#[test]
fn dependencies_recaptured_each_run() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let use_a = Cell::new(true);
    let a = Cell::new(String::from("a"));
    let b = Cell::new(String::from("b"));
    let (u0, a0, b0) = (use_a.clone(), a.clone(), b.clone());
    let _e = effect(move |sc| {
        let v = if u0.get(sc) { a0.get(sc) } else { b0.get(sc) };
        call!("{v}");
    });
    rt.update();
    cr.verify("a");

    b.set(String::from("b2"), &mut rt.sc());
    rt.update();
    cr.verify(());

    use_a.set(false, &mut rt.sc());
    rt.update();
    cr.verify("b2");

    a.set(String::from("a2"), &mut rt.sc());
    rt.update();
    cr.verify(());
}
