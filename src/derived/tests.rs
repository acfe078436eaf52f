use std::{cell::Cell as StdCell, rc::Rc};

use assert_call::{call, CallRecorder};

use crate::{core::Runtime, effect, Cell, Derived, WriteError};

#[test]
fn uppercase_recomputes_on_change() {
    let mut rt = Runtime::new();
    let runs = Rc::new(StdCell::new(0));
    let name = Cell::new(String::from("choc"));
    let n0 = name.clone();
    let r0 = runs.clone();
    let upper = Derived::new(move |sc| {
        r0.set(r0.get() + 1);
        n0.borrow(sc).to_uppercase()
    });

    assert_eq!(upper.get(&mut rt.sc()), "CHOC");
    name.set(String::from("cake"), &mut rt.sc());
    assert_eq!(upper.get(&mut rt.sc()), "CAKE");
    assert_eq!(runs.get(), 2);
}

#[test]
fn memoized_between_changes() {
    let mut rt = Runtime::new();
    let runs = Rc::new(StdCell::new(0));
    let c = Cell::new(1);
    let c0 = c.clone();
    let r0 = runs.clone();
    let d = Derived::new(move |sc| {
        r0.set(r0.get() + 1);
        c0.get(sc) * 2
    });

    assert_eq!(d.get(&mut rt.sc()), 2);
    assert_eq!(d.get(&mut rt.sc()), 2);
    assert_eq!(d.get(&mut rt.sc()), 2);
    assert_eq!(runs.get(), 1);

    c.set(2, &mut rt.sc());
    assert_eq!(d.get(&mut rt.sc()), 4);
    assert_eq!(d.get(&mut rt.sc()), 4);
    assert_eq!(runs.get(), 2);
}

#[test]
fn unchanged_write_does_not_recompute() {
    let mut rt = Runtime::new();
    let runs = Rc::new(StdCell::new(0));
    let c = Cell::new(1);
    let c0 = c.clone();
    let r0 = runs.clone();
    let d = Derived::new(move |sc| {
        r0.set(r0.get() + 1);
        c0.get(sc)
    });

    assert_eq!(d.get(&mut rt.sc()), 1);
    c.set(1, &mut rt.sc());
    c.set(1, &mut rt.sc());
    assert_eq!(d.get(&mut rt.sc()), 1);
    assert_eq!(runs.get(), 1);
}

#[test]
fn write_in_compute_is_illegal() {
    let mut rt = Runtime::new();
    let target = Cell::new(0);
    let t0 = target.clone();
    let d = Derived::new(move |sc| t0.try_set(1, sc).unwrap_err());
    assert_eq!(d.get(&mut rt.sc()), WriteError::IllegalWrite);
    assert_eq!(*target.untracked(), 0);
}

#[test]
#[should_panic(expected = "illegal write during derived cell computation")]
fn set_in_compute_panics() {
    let mut rt = Runtime::new();
    let target = Cell::new(0);
    let t0 = target.clone();
    let d = Derived::new(move |sc| t0.set(1, sc));
    d.get(&mut rt.sc());
}

#[test]
fn dynamic_dependencies() {
    let mut rt = Runtime::new();
    let runs = Rc::new(StdCell::new(0));
    let use_a = Cell::new(true);
    let a = Cell::new(String::from("a"));
    let b = Cell::new(String::from("b"));
    let (u0, a0, b0) = (use_a.clone(), a.clone(), b.clone());
    let r0 = runs.clone();
    let d = Derived::new(move |sc| {
        r0.set(r0.get() + 1);
        if u0.get(sc) {
            a0.get(sc)
        } else {
            b0.get(sc)
        }
    });

    assert_eq!(d.get(&mut rt.sc()), "a");
    assert_eq!(runs.get(), 1);

    // While `use_a` is true, `b` is not a dependency.
    b.set(String::from("b2"), &mut rt.sc());
    assert_eq!(d.get(&mut rt.sc()), "a");
    assert_eq!(runs.get(), 1);

    use_a.set(false, &mut rt.sc());
    assert_eq!(d.get(&mut rt.sc()), "b2");
    assert_eq!(runs.get(), 2);

    // After the switch, `a` is no longer a dependency.
    a.set(String::from("a2"), &mut rt.sc());
    assert_eq!(d.get(&mut rt.sc()), "b2");
    assert_eq!(runs.get(), 2);

    b.set(String::from("b3"), &mut rt.sc());
    assert_eq!(d.get(&mut rt.sc()), "b3");
    assert_eq!(runs.get(), 3);
}

#[test]
fn chained_derived() {
    let mut rt = Runtime::new();
    let c = Cell::new(1);
    let c0 = c.clone();
    let doubled = Derived::new(move |sc| c0.get(sc) * 2);
    let d0 = doubled.clone();
    let plus_one = Derived::new(move |sc| d0.get(sc) + 1);

    assert_eq!(plus_one.get(&mut rt.sc()), 3);
    c.set(10, &mut rt.sc());
    assert_eq!(plus_one.get(&mut rt.sc()), 21);
}

#[test]
fn derived_in_effect() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let c = Cell::new(2);
    let c0 = c.clone();
    let squared = Derived::new(move |sc| c0.get(sc) * c0.get(sc));
    let s0 = squared.clone();
    let _e = effect(move |sc| call!("{}", s0.get(sc)));

    rt.update();
    cr.verify("4");

    c.set(3, &mut rt.sc());
    rt.update();
    cr.verify("9");
}
