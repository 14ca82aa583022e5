//! Tiered-compilation behavior: hotness threshold, native dispatch,
//! observational equivalence with the interpreter, and NaN-deopt safety.

mod common;

use common::{eval_display, eval_in};
use vdlisp_eval::Interpreter;

/// Drive a function hot with numeric calls, then return (type f) output.
fn hot_type(def: &str, call: &str, times: usize) -> (String, String) {
    let interp = Interpreter::new();
    eval_in(&interp, def);
    let mut last = String::new();
    for _ in 0..times {
        last = eval_in(&interp, call).to_string();
    }
    let ty = eval_in(&interp, "(type f)").to_string();
    (ty, last)
}

#[test]
fn function_becomes_jit_func_after_hot_numeric_calls() {
    let (ty, last) = hot_type("(set f (fn (x) (+ x 1)))", "(f 3)", 5);
    assert_eq!(ty, "jit_func");
    assert_eq!(last, "4");
}

#[test]
fn compiled_function_prints_as_jit_func() {
    let interp = Interpreter::new();
    eval_in(&interp, "(set f (fn (x) (+ x 1)))");
    assert_eq!(eval_in(&interp, "f").to_string(), "<function>");
    for k in 1..=5 {
        eval_in(&interp, &format!("(f {k})"));
    }
    assert_eq!(eval_in(&interp, "f").to_string(), "<jit_func>");
}

#[test]
fn cold_function_stays_interpreted() {
    let interp = Interpreter::new();
    eval_in(&interp, "(set f (fn (x) (+ x 1)))");
    for _ in 0..3 {
        eval_in(&interp, "(f 1)");
    }
    assert_eq!(eval_in(&interp, "(type f)").to_string(), "function");
}

#[test]
fn non_numeric_calls_do_not_heat() {
    let interp = Interpreter::new();
    eval_in(&interp, "(set f (fn (x) x))");
    for _ in 0..10 {
        eval_in(&interp, "(f \"s\")");
    }
    assert_eq!(eval_in(&interp, "(type f)").to_string(), "function");
}

#[test]
fn native_arithmetic_matches_interpreter() {
    let interp = Interpreter::new();
    eval_in(&interp, "(set f (fn (a b) (/ (+ (* a a) b) 2)))");
    let interpreted = eval_in(&interp, "(f 3 5)").to_string();
    for _ in 0..6 {
        eval_in(&interp, "(f 3 5)");
    }
    assert_eq!(eval_in(&interp, "(type f)").to_string(), "jit_func");
    let native = eval_in(&interp, "(f 3 5)").to_string();
    assert_eq!(interpreted, native);
    assert_eq!(native, "7");
}

#[test]
fn native_cond_and_comparison() {
    let interp = Interpreter::new();
    eval_in(&interp, "(set f (fn (x) (cond ((< x 0) (- 0 x)) (#t x))))");
    for _ in 0..6 {
        eval_in(&interp, "(f 4)");
    }
    assert_eq!(eval_in(&interp, "(type f)").to_string(), "jit_func");
    assert_eq!(eval_in(&interp, "(f -9)").to_string(), "9");
    assert_eq!(eval_in(&interp, "(f 9)").to_string(), "9");
}

#[test]
fn native_let_bindings() {
    let interp = Interpreter::new();
    eval_in(&interp, "(set f (fn (x) (let (a (+ x 1) b (* a 2)) (+ a b))))");
    for _ in 0..6 {
        eval_in(&interp, "(f 2)");
    }
    assert_eq!(eval_in(&interp, "(type f)").to_string(), "jit_func");
    assert_eq!(eval_in(&interp, "(f 2)").to_string(), "9");
}

#[test]
fn native_while_that_never_runs_matches_interpreter() {
    let interp = Interpreter::new();
    eval_in(&interp, "(set f (fn (x) (while (< x 0) 1) 7))");
    let interpreted = eval_in(&interp, "(f 1)").to_string();
    for _ in 0..6 {
        eval_in(&interp, "(f 1)");
    }
    assert_eq!(eval_in(&interp, "(type f)").to_string(), "jit_func");
    assert_eq!(eval_in(&interp, "(f 1)").to_string(), interpreted);
}

#[test]
fn recursive_function_compiles_and_matches() {
    let interp = Interpreter::new();
    eval_in(
        &interp,
        "(set fib (fn (n) (cond ((< n 2) n) (#t (+ (fib (- n 1)) (fib (- n 2)))))))",
    );
    let interpreted = eval_in(&interp, "(fib 10)").to_string();
    assert_eq!(interpreted, "55");
    for _ in 0..6 {
        eval_in(&interp, "(fib 10)");
    }
    assert_eq!(eval_in(&interp, "(type fib)").to_string(), "jit_func");
    assert_eq!(eval_in(&interp, "(fib 10)").to_string(), "55");
    assert_eq!(eval_in(&interp, "(fib 20)").to_string(), "6765");
}

#[test]
fn free_variable_reads_go_through_the_env_chain() {
    let interp = Interpreter::new();
    eval_in(&interp, "(set base 100)");
    eval_in(&interp, "(set f (fn (x) (+ x base)))");
    for _ in 0..6 {
        eval_in(&interp, "(f 5)");
    }
    assert_eq!(eval_in(&interp, "(type f)").to_string(), "jit_func");
    assert_eq!(eval_in(&interp, "(f 5)").to_string(), "105");
    // native code re-reads the binding on every call
    eval_in(&interp, "(set base 200)");
    assert_eq!(eval_in(&interp, "(f 5)").to_string(), "205");
}

#[test]
fn deopt_when_free_variable_turns_non_numeric() {
    let interp = Interpreter::new();
    eval_in(&interp, "(set base 1)");
    eval_in(&interp, "(set f (fn (x) (+ x base)))");
    for _ in 0..6 {
        eval_in(&interp, "(f 5)");
    }
    assert_eq!(eval_in(&interp, "(type f)").to_string(), "jit_func");
    // the lookup now yields NaN in native code; the deopt fallback runs
    // the interpreter, which reports exactly what it would have alone
    eval_in(&interp, "(set base (list 1))");
    let e = interp.eval_str("(f 5)").unwrap_err();
    assert!(e.to_string().contains("expected number"));
    // still compiled: a transient deopt does not disable the tier
    assert_eq!(eval_in(&interp, "(type f)").to_string(), "jit_func");
    eval_in(&interp, "(set base 7)");
    assert_eq!(eval_in(&interp, "(f 5)").to_string(), "12");
}

#[test]
fn bridge_call_reenters_interpreter_for_uncompilable_callee() {
    let interp = Interpreter::new();
    // h's body uses `list`, outside the numeric subset, so h never
    // compiles; f calls it through the runtime bridge
    eval_in(&interp, "(set h (fn (x) (car (list x))))");
    eval_in(&interp, "(set f (fn (x) (+ (h x) 1)))");
    for _ in 0..6 {
        eval_in(&interp, "(f 1)");
    }
    assert_eq!(eval_in(&interp, "(f 41)").to_string(), "43");
}

#[test]
fn deopt_when_callee_returns_non_number() {
    let interp = Interpreter::new();
    eval_in(&interp, "(set h (fn (x) (list x)))");
    eval_in(&interp, "(set f (fn (x) (h x)))");
    for _ in 0..6 {
        assert_eq!(eval_in(&interp, "(f 5)").to_string(), "(5)");
    }
    // whether or not f compiled, the user-observable result matches the
    // interpreter exactly
    assert_eq!(eval_in(&interp, "(f 5)").to_string(), "(5)");
}

#[test]
fn uncompilable_body_sets_jit_failed_and_falls_back() {
    let interp = Interpreter::new();
    eval_in(&interp, "(set f (fn (x) (car (cons x x))))");
    for _ in 0..10 {
        assert_eq!(eval_in(&interp, "(f 2)").to_string(), "2");
    }
    assert_eq!(eval_in(&interp, "(type f)").to_string(), "function");
}

#[test]
fn callee_precompilation_enables_direct_native_calls() {
    let interp = Interpreter::new();
    eval_in(&interp, "(set sq (fn (x) (* x x)))");
    eval_in(&interp, "(set f (fn (x) (+ (sq x) 1)))");
    for _ in 0..6 {
        eval_in(&interp, "(f 3)");
    }
    // compiling f best-effort compiles sq as well
    assert_eq!(eval_in(&interp, "(type f)").to_string(), "jit_func");
    assert_eq!(eval_in(&interp, "(type sq)").to_string(), "jit_func");
    assert_eq!(eval_in(&interp, "(f 5)").to_string(), "26");
}

#[test]
fn division_by_zero_in_native_code_follows_ieee() {
    // no zero check in native code: the interpreter raises, the native
    // tier produces inf which is canonicalized on reboxing
    let v = eval_display(
        "(set f (fn (x) (/ 1 x)))
         (f 2) (f 2) (f 2) (f 2) (f 2)
         (f 4)",
    );
    assert_eq!(v, "0.25");
}
