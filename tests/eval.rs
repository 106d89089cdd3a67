//! End-to-end tests through the public embedding API.

use std::io::Write;

use kokoki::{eval, init, register_native, Ctx, Value, VmError};

fn run(src: &str) -> Vec<Value> {
    let mut ctx = Ctx::new();
    eval(&mut ctx, src);
    ctx.stack
}

fn num(n: f64) -> Value {
    Value::Number(n)
}

#[test]
fn comments_are_skipped_between_operations() {
    assert_eq!(run("# c\n 1 2 3 + # c2\n +"), vec![num(6.0)]);
}

#[test]
fn constant_words_multiply_through() {
    let stack = run(": pi 3.1415 ;  2 pi *");
    assert_eq!(stack.len(), 1);
    let n = stack[0].as_number().expect("number");
    assert!((n - 6.283).abs() < 1e-9);
}

#[test]
fn comparison_pushes_true() {
    assert_eq!(run("7 10 <"), vec![Value::True]);
}

#[test]
fn if_else_selects_by_truthiness() {
    assert_eq!(
        run("10 2 < if \"small\" else \"big\" then"),
        vec![Value::string("big")]
    );
}

#[test]
fn reference_cells_store_update_and_deref() {
    assert_eq!(run("@x 40 ! @x [2 +] !! @x ?"), vec![num(42.0)]);
}

#[test]
fn each_maps_a_block_over_an_array() {
    assert_eq!(
        run("[1 2 3] [2 *] each"),
        vec![Value::array_from(vec![num(2.0), num(4.0), num(6.0)])]
    );
}

#[test]
fn deep_pick_pushes_an_underflow_error() {
    let stack = run("1 2 42 pick");
    assert_eq!(stack.len(), 3);
    match &stack[2] {
        Value::Error(msg) => assert_eq!(&**msg, "Stack underflow! (2 < 43)"),
        other => panic!("expected error, got {:?}", other),
    }
}

#[test]
fn while_loops_accumulate() {
    assert_eq!(run("0 10 [ swap over + swap 1 - dup 0 > ] while drop"), vec![num(55.0)]);
}

#[test]
fn sort_map_fold_pipeline() {
    assert_eq!(run("[5 3 1 4 2] sort [2 *] each [+] fold"), vec![num(30.0)]);
}

#[test]
fn slurp_reads_a_whole_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(file, "Korvatunturin Konkatenatiivinen Kieli\n").unwrap();
    let src = format!("\"{}\" slurp", file.path().display());
    assert_eq!(
        run(&src),
        vec![Value::string("Korvatunturin Konkatenatiivinen Kieli\n")]
    );
}

#[test]
fn slurp_on_a_missing_file_is_an_error_value() {
    let stack = run("\"/no/such/file.ki\" slurp");
    assert_eq!(stack.len(), 1);
    assert!(matches!(stack[0], Value::Error(_)));
}

#[test]
fn use_loads_definitions_from_a_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(file, ": answer 40 2 + ;").unwrap();
    let mut ctx = Ctx::new();
    // loading and calling happen in separate evaluations: words compile
    // against the dictionary as it is when the source is compiled
    assert!(eval(&mut ctx, &format!("\"{}\" use", file.path().display())));
    assert!(eval(&mut ctx, "answer"));
    assert_eq!(ctx.stack, vec![num(42.0)]);
}

#[test]
fn init_hands_out_a_working_context() {
    let mut result = None;
    init(|ctx| {
        assert!(eval(ctx, "6 7 *"));
        result = Some(ctx.stack.clone());
    });
    assert_eq!(result, Some(vec![num(42.0)]));
}

#[test]
fn host_words_participate_like_builtins() {
    fn shout(ctx: &mut Ctx) -> Result<(), VmError> {
        let v = ctx.pop();
        ctx.push(Value::string(format!("{}!", v)));
        Ok(())
    }
    let mut ctx = Ctx::new();
    register_native(&mut ctx, "shout", shout);
    assert!(eval(&mut ctx, "\"hei\" shout"));
    assert_eq!(ctx.stack, vec![Value::string("hei!")]);
    // registered words also resolve dynamically inside blocks
    assert!(eval(&mut ctx, "[\"a\" \"b\"] [shout] each"));
    assert_eq!(
        ctx.stack[1],
        Value::array_from(vec![Value::string("a!"), Value::string("b!")])
    );
}

#[test]
fn definitions_accumulate_across_evaluations() {
    let mut ctx = Ctx::new();
    assert!(eval(&mut ctx, ": double 2 * ;"));
    assert!(eval(&mut ctx, ": quad double double ;"));
    assert!(eval(&mut ctx, "10 quad"));
    assert_eq!(ctx.stack, vec![num(40.0)]);
}

#[test]
fn failed_evaluations_do_not_poison_the_context() {
    let mut ctx = Ctx::new();
    assert!(!eval(&mut ctx, "no-such-word"));
    assert!(!eval(&mut ctx, "[1 2"));
    assert!(eval(&mut ctx, "1 1 +"));
    assert_eq!(ctx.stack.last(), Some(&num(2.0)));
}
