mod common;
use common::Session;

#[test]
fn test_for_loop() {
    let mut s = Session::new();
    s.program(&[
        "word i",
        "for i=1:5",
        "pr.dec i",
        "pr.ch ' '",
        "endfor",
        "pr.nl",
    ]);
    assert_eq!(s.run(), "1 2 3 4 \n\n");
}

#[test]
fn test_while_countdown() {
    let mut s = Session::new();
    s.program(&[
        "word n=10",
        "while n>0",
        "pr.dec n",
        "pr.ch ' '",
        "n=n-1",
        "endwhile",
        "pr.nl",
    ]);
    assert_eq!(s.run(), "10 9 8 7 6 5 4 3 2 1 \n\n");
}

#[test]
fn test_while_false_guard_skips_body() {
    let mut s = Session::new();
    s.program(&["while 0", "pr.msg \"never\"", "endwhile", "pr.msg \"after\""]);
    assert_eq!(s.run(), "after\n");
}

#[test]
fn test_array_sum() {
    let mut s = Session::new();
    s.program(&[
        "word a[5]={10,20,30,40,50}",
        "word s=0",
        "word i",
        "for i=0:5",
        "s=s+a[i]",
        "endfor",
        "pr.dec s",
        "pr.nl",
    ]);
    assert_eq!(s.run(), "150\n\n");
}

#[test]
fn test_if_else() {
    let mut s = Session::new();
    s.program(&[
        "word x=7",
        "if x>5",
        "pr.msg \"big\"",
        "else",
        "pr.msg \"small\"",
        "endif",
        "pr.nl",
    ]);
    assert_eq!(s.run(), "big\n\n");
    let mut s = Session::new();
    s.program(&[
        "word x=3",
        "if x>5",
        "pr.msg \"big\"",
        "else",
        "pr.msg \"small\"",
        "endif",
        "pr.nl",
    ]);
    assert_eq!(s.run(), "small\n\n");
}

#[test]
fn test_nested_if() {
    let mut s = Session::new();
    s.program(&[
        "word x=7",
        "if x>0",
        "if x>100",
        "pr.msg \"huge\"",
        "else",
        "pr.msg \"modest\"",
        "endif",
        "else",
        "pr.msg \"negative\"",
        "endif",
    ]);
    assert_eq!(s.run(), "modest\n");
}

#[test]
fn test_multiple_statements_per_line() {
    let mut s = Session::new();
    assert_eq!(s.enter("pr.dec 1; pr.ch ' '; pr.dec 2"), "1 2\n");
}

#[test]
fn test_immediate_loop() {
    let mut s = Session::new();
    s.enter("word i=0");
    assert_eq!(s.enter("for i=1:4; pr.dec i; endfor"), "123\n");
}

#[test]
fn test_const() {
    let mut s = Session::new();
    s.enter("const k = 6*7");
    assert_eq!(s.enter("pr.dec k"), "42\n");
    assert_eq!(s.enter("k = 1"), "?const err\n");
    // Storage is untouched.
    assert_eq!(s.enter("pr.dec k"), "42\n");
}

#[test]
fn test_const_requires_constant_expression() {
    let mut s = Session::new();
    s.enter("word v=3");
    assert_eq!(s.enter("const k = v+1"), "?not const err\n");
}

#[test]
fn test_bare_declaration_defaults_to_zero() {
    let mut s = Session::new();
    s.enter("word z");
    assert_eq!(s.enter("pr.dec z"), "0\n");
    s.enter("byte q; word r[4]");
    assert_eq!(s.enter("pr.dec q+r[3]"), "0\n");
}

#[test]
fn test_byte_variables() {
    let mut s = Session::new();
    s.enter("byte b=200");
    assert_eq!(s.enter("pr.dec b"), "200\n");
    // Bytes wrap at 256.
    s.enter("b=b+100");
    assert_eq!(s.enter("pr.dec b"), "44\n");
}

#[test]
fn test_string_initializer() {
    let mut s = Session::new();
    s.enter("byte msg[6]=\"hello\"");
    assert_eq!(s.enter("pr.str msg"), "hello\n");
    assert_eq!(s.enter("pr.ch msg[1]"), "e\n");
}

#[test]
fn test_initializer_too_long() {
    let mut s = Session::new();
    assert_eq!(s.enter("byte m[3]=\"abcdef\""), "?too long err\n");
    let mut s = Session::new();
    assert_eq!(s.enter("word a[2]={1,2,3}"), "?too long err\n");
}

#[test]
fn test_subscript_errors() {
    let mut s = Session::new();
    s.enter("word a[3]={1,2,3}");
    assert_eq!(s.enter("pr.dec a[3]"), "?bad idx err\n");
    assert_eq!(s.enter("a[0-1]=5"), "?bad idx err\n");
    s.enter("word x=1");
    assert_eq!(s.enter("pr.dec x[0]"), "?bad idx err\n");
}

#[test]
fn test_redefinition() {
    let mut s = Session::new();
    s.enter("word x=1");
    assert_eq!(s.enter("word x=2"), "?redef err\n");
}

#[test]
fn test_dim_must_be_constant() {
    let mut s = Session::new();
    s.enter("word n=4");
    assert_eq!(s.enter("word a[n]={1}"), "?not const err\n");
    s.enter("const sz = 4");
    assert_eq!(s.enter("word b[sz]={9}; pr.dec b[0]"), "9\n");
}

#[test]
fn test_unmatched_closers() {
    let mut s = Session::new();
    assert_eq!(s.enter("endif"), "?no if err\n");
    assert_eq!(s.enter("endwhile"), "?no while err\n");
    assert_eq!(s.enter("endfor"), "?no for err\n");
}

#[test]
fn test_kbd_line_input() {
    let mut s = Session::scripted(&["duck soup"], &[]);
    s.enter("byte buf[20]=\"\"");
    s.enter("kbd.ln buf, 20");
    assert_eq!(s.enter("pr.str buf"), "duck soup\n");
}

#[test]
fn test_kbd_char_input() {
    let mut s = Session::scripted(&[], &[b'Q']);
    s.enter("byte c=0");
    s.enter("kbd.ch &c");
    assert_eq!(s.enter("pr.dec c"), "81\n");
}

#[test]
fn test_vars_listing() {
    let mut s = Session::new();
    s.enter("word i=5");
    s.enter("byte flag=1");
    s.enter("word a[3]={1,2,3}");
    let out = s.enter("vars");
    assert!(out.contains("i    w  5"));
    assert!(out.contains("flag b  1"));
    assert!(out.contains("a   [3] w"));
}

#[test]
fn test_clear_drops_variables() {
    let mut s = Session::new();
    s.enter("word x=1");
    s.enter("clear");
    assert_eq!(s.enter("pr.dec x"), "?expect var err\n");
}

#[test]
fn test_run_resets_variables() {
    let mut s = Session::new();
    s.program(&["word x=1", "pr.dec x"]);
    assert_eq!(s.run(), "1\n");
    // A second run must not trip over redefinition.
    assert_eq!(s.run(), "1\n");
}

#[test]
fn test_error_reports_line() {
    let mut s = Session::new();
    s.program(&["word x=1", "word z=1/0", "pr.dec x"]);
    assert_eq!(s.run(), "?div/0 err at 2\n");
}

#[test]
fn test_end_stops_run() {
    let mut s = Session::new();
    s.program(&["pr.msg \"one\"", "end", "pr.msg \"two\""]);
    assert_eq!(s.run(), "one\n");
}

#[test]
fn test_comment_lines() {
    let mut s = Session::new();
    s.program(&["' a remark; even with semicolons", "pr.dec 3"]);
    assert_eq!(s.run(), "3\n");
}
