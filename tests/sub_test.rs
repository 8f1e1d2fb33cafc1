mod common;
use common::Session;

#[test]
fn test_call_and_return() {
    let mut s = Session::new();
    s.program(&[
        "sub greet(word n)",
        "pr.msg \"hi \"",
        "pr.dec n",
        "pr.nl",
        "return 0",
        "endsub",
        "call greet(3)",
    ]);
    assert_eq!(s.run(), "hi 3\n\n");
}

#[test]
fn test_function_value() {
    let mut s = Session::new();
    s.program(&[
        "sub double(word n)",
        "return n*2",
        "endsub",
        "pr.dec double(21)",
        "pr.nl",
    ]);
    assert_eq!(s.run(), "42\n\n");
}

#[test]
fn test_fib() {
    let mut s = Session::new();
    s.program(&[
        "sub fib(word n)",
        "if n<2",
        "return n",
        "endif",
        "return fib(n-1)+fib(n-2)",
        "endsub",
        "pr.dec fib(10)",
        "pr.nl",
    ]);
    assert_eq!(s.run(), "55\n\n");
}

#[test]
fn test_array_pass_by_reference() {
    let mut s = Session::new();
    s.program(&[
        "sub f(word x[])",
        "x[0]=99",
        "return 0",
        "endsub",
        "word a[3]={1,2,3}",
        "call f(a)",
        "pr.dec a[0]",
        "pr.ch ' '",
        "pr.dec a[1]",
        "pr.nl",
    ]);
    assert_eq!(s.run(), "99 2\n\n");
}

#[test]
fn test_locals_are_scoped() {
    let mut s = Session::new();
    s.program(&[
        "sub f(word n)",
        "word local=5",
        "return n+local",
        "endsub",
        "word g=100",
        "pr.dec f(1)",
        "pr.nl",
        "pr.dec g",
        "pr.nl",
    ]);
    assert_eq!(s.run(), "6\n100\n\n");
    // The local must be gone afterwards.
    assert_eq!(s.enter("pr.dec local"), "?expect var err\n");
}

#[test]
fn test_local_shadows_global() {
    let mut s = Session::new();
    s.program(&[
        "sub f(word n)",
        "word v=1",
        "return v",
        "endsub",
        "word v=7",
        "pr.dec f(0)",
        "pr.dec v",
    ]);
    assert_eq!(s.run(), "17\n");
}

#[test]
fn test_endsub_returns_zero() {
    let mut s = Session::new();
    s.program(&[
        "sub noise(word n)",
        "pr.dec n",
        "endsub",
        "pr.dec noise(8)",
        "pr.nl",
    ]);
    assert_eq!(s.run(), "80\n\n");
}

#[test]
fn test_call_from_immediate() {
    let mut s = Session::new();
    s.program(&[
        "end",
        "sub twice(word n)",
        "pr.dec n*2",
        "return n*2",
        "endsub",
    ]);
    s.run();
    // A statement call discards the value but runs the body.
    assert_eq!(s.enter("call twice(6)"), "12\n");
    // An expression call yields the value back mid-line.
    assert_eq!(s.enter("pr.ch 'v'; pr.dec twice(5)+1"), "v1011\n");
}

#[test]
fn test_return_unwinds_loops() {
    let mut s = Session::new();
    s.program(&[
        "sub find(word limit)",
        "word i=0",
        "for i=0:100",
        "if i==limit",
        "return i",
        "endif",
        "endfor",
        "return 0-1",
        "endsub",
        "pr.dec find(4)",
        "pr.nl",
    ]);
    assert_eq!(s.run(), "4\n\n");
}

#[test]
fn test_missing_sub() {
    let mut s = Session::new();
    assert_eq!(s.enter("call nowhere()"), "?no sub err\n");
}

#[test]
fn test_wrong_argument_count() {
    let mut s = Session::new();
    s.program(&[
        "end",
        "sub two(word a, word b)",
        "return a+b",
        "endsub",
    ]);
    s.run();
    assert_eq!(s.enter("pr.dec two(1,2)"), "3\n");
    assert_eq!(s.enter("pr.dec two(1)"), "?arg err\n");
}

#[test]
fn test_byref_type_mismatch() {
    let mut s = Session::new();
    s.program(&[
        "end",
        "sub f(word x[])",
        "return x[0]",
        "endsub",
    ]);
    s.run();
    s.enter("byte b[4]=\"abc\"");
    assert_eq!(s.enter("pr.dec f(b)"), "?type err\n");
    s.enter("word w=5");
    assert_eq!(s.enter("pr.dec f(w)"), "?type err\n");
}
