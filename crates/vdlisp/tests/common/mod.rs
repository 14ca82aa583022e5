use vdlisp_core::{Value, VdError};
use vdlisp_eval::Interpreter;

/// Evaluate a script (all top-level forms) in a fresh interpreter and
/// return the last value.
#[allow(dead_code)]
pub fn eval_ok(input: &str) -> Value {
    let interp = Interpreter::new();
    interp
        .eval_str(input)
        .unwrap_or_else(|e| panic!("eval failed for `{input}`: {e}"))
}

/// Evaluate and render the last value the way the script driver would.
#[allow(dead_code)]
pub fn eval_display(input: &str) -> String {
    eval_ok(input).to_string()
}

/// Evaluate, expecting an error.
#[allow(dead_code)]
pub fn eval_err(input: &str) -> VdError {
    let interp = Interpreter::new();
    interp
        .eval_str(input)
        .expect_err(&format!("expected error for `{input}`"))
}

/// Evaluate in a caller-provided interpreter, panicking on error.
#[allow(dead_code)]
pub fn eval_in(interp: &Interpreter, input: &str) -> Value {
    interp
        .eval_str(input)
        .unwrap_or_else(|e| panic!("eval failed for `{input}`: {e}"))
}
