mod common;
use common::Session;

#[test]
fn test_precedence() {
    let mut s = Session::new();
    assert_eq!(s.enter("pr.dec 1+2*3"), "7\n");
    assert_eq!(s.enter("pr.dec (1+2)*3"), "9\n");
    assert_eq!(s.enter("pr.dec 2+3*4-5"), "9\n");
    assert_eq!(s.enter("pr.dec 1+2<<3"), "24\n");
    assert_eq!(s.enter("pr.dec 7&3|8"), "11\n");
    assert_eq!(s.enter("pr.dec 1|2^2"), "1\n");
}

#[test]
fn test_left_assoc() {
    let mut s = Session::new();
    assert_eq!(s.enter("pr.dec 20-5-3"), "12\n");
    assert_eq!(s.enter("pr.dec 100/5/2"), "10\n");
}

#[test]
fn test_power() {
    let mut s = Session::new();
    assert_eq!(s.enter("pr.dec 2**10"), "1024\n");
    assert_eq!(s.enter("pr.dec 2**3*2"), "16\n");
    // A negative exponent degenerates to 1.
    assert_eq!(s.enter("pr.dec 2**(0-3)"), "1\n");
}

#[test]
fn test_literals() {
    let mut s = Session::new();
    assert_eq!(s.enter("pr.dec $ff"), "255\n");
    assert_eq!(s.enter("pr.dec 'A'"), "65\n");
    assert_eq!(s.enter("pr.hex 255"), "00ff\n");
    assert_eq!(s.enter("pr.ch 'z'"), "z\n");
}

#[test]
fn test_unary() {
    let mut s = Session::new();
    assert_eq!(s.enter("pr.dec.s -5"), "-5\n");
    assert_eq!(s.enter("pr.dec.s -5+3"), "-2\n");
    assert_eq!(s.enter("pr.dec !0"), "1\n");
    assert_eq!(s.enter("pr.dec !7"), "0\n");
    assert_eq!(s.enter("pr.dec.s ~0"), "-1\n");
    assert_eq!(s.enter("pr.dec +9"), "9\n");
}

#[test]
fn test_comparisons_and_logic() {
    let mut s = Session::new();
    assert_eq!(s.enter("pr.dec 3<5"), "1\n");
    assert_eq!(s.enter("pr.dec 5<=5"), "1\n");
    assert_eq!(s.enter("pr.dec 3>5"), "0\n");
    assert_eq!(s.enter("pr.dec 4==4"), "1\n");
    assert_eq!(s.enter("pr.dec 4!=4"), "0\n");
    assert_eq!(s.enter("pr.dec 1&&0"), "0\n");
    assert_eq!(s.enter("pr.dec 1||0"), "1\n");
    assert_eq!(s.enter("pr.dec 2>1&&3>2"), "1\n");
}

#[test]
fn test_divide_by_zero() {
    let mut s = Session::new();
    assert_eq!(s.enter("word z=10/0"), "?div/0 err\n");
    // The prompt survives.
    assert_eq!(s.enter("pr.dec 5"), "5\n");
    assert_eq!(s.enter("pr.dec 1%0"), "?div/0 err\n");
}

#[test]
fn test_address_and_deref() {
    let mut s = Session::new();
    s.enter("word x=7");
    assert_eq!(s.enter("pr.dec *&x"), "7\n");
    s.enter("byte b=9");
    assert_eq!(s.enter("pr.dec ^&b"), "9\n");
    // Poke through an address.
    s.enter("*&x = 1234");
    assert_eq!(s.enter("pr.dec x"), "1234\n");
    s.enter("^&b = 17");
    assert_eq!(s.enter("pr.dec b"), "17\n");
}

#[test]
fn test_bad_expression() {
    let mut s = Session::new();
    assert_eq!(s.enter("pr.dec )"), "?extra ) err\n");
    assert_eq!(s.enter("pr.dec"), "?bad expr err\n");
    assert_eq!(s.enter("pr.dec 5 5"), "?extra 5 err\n");
}

#[test]
fn test_undefined_variable() {
    let mut s = Session::new();
    assert_eq!(s.enter("pr.dec nothere"), "?expect var err\n");
}
