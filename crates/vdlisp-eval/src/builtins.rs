//! Built-in functions. Each receives already-evaluated arguments and is
//! registered in the global environment as a first-class builtin value,
//! so `apply` can receive `+` as an ordinary value.

use vdlisp_core::{
    list_from_slice, pair_set_car, pair_set_cdr, value_equal, Builtin, EvalResult, EvalState,
    Kind, Value, VdError,
};

use crate::eval::Interpreter;

pub(crate) fn register(interp: &Interpreter) {
    let builtins: &[(&str, Builtin)] = &[
        ("+", builtin_add),
        ("-", builtin_sub),
        ("*", builtin_mul),
        ("/", builtin_div),
        ("<", builtin_lt),
        (">", builtin_gt),
        ("<=", builtin_le),
        (">=", builtin_ge),
        ("=", builtin_eq),
        ("cons", builtin_cons),
        ("car", builtin_car),
        ("cdr", builtin_cdr),
        ("setcar", builtin_setcar),
        ("setcdr", builtin_setcdr),
        ("list", builtin_list),
        ("type", builtin_type),
        ("parse", builtin_parse),
        ("print", builtin_print),
        ("error", builtin_error),
        ("exit", builtin_exit),
        ("require", crate::require::builtin_require),
    ];
    for (name, f) in builtins {
        interp.bind_global(name, Value::builtin(*f));
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_else(Value::nil)
}

fn require_number(v: &Value, who: &str) -> Result<f64, VdError> {
    v.as_number()
        .ok_or_else(|| VdError::type_error(who, "number", v.type_name()))
}

fn two_numbers(name: &str, args: &[Value]) -> Result<(f64, f64), VdError> {
    if args.len() != 2 {
        return Err(VdError::arity(name));
    }
    Ok((
        require_number(&args[0], name)?,
        require_number(&args[1], name)?,
    ))
}

// ── Arithmetic ────────────────────────────────────────────────────

fn builtin_add(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let (a, b) = two_numbers("+", args)?;
    Ok(Value::number(a + b))
}

fn builtin_sub(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let (a, b) = two_numbers("-", args)?;
    Ok(Value::number(a - b))
}

fn builtin_mul(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let (a, b) = two_numbers("*", args)?;
    Ok(Value::number(a * b))
}

fn builtin_div(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let (a, b) = two_numbers("/", args)?;
    if b == 0.0 {
        return Err(VdError::DivideByZero);
    }
    Ok(Value::number(a / b))
}

// ── Comparison ────────────────────────────────────────────────────

fn truth(cond: bool) -> Value {
    if cond {
        Value::symbol("#t")
    } else {
        Value::nil()
    }
}

fn builtin_lt(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let (a, b) = two_numbers("<", args)?;
    Ok(truth(a < b))
}

fn builtin_gt(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let (a, b) = two_numbers(">", args)?;
    Ok(truth(a > b))
}

fn builtin_le(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let (a, b) = two_numbers("<=", args)?;
    Ok(truth(a <= b))
}

fn builtin_ge(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let (a, b) = two_numbers(">=", args)?;
    Ok(truth(a >= b))
}

fn builtin_eq(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    if args.len() != 2 {
        return Err(VdError::arity("="));
    }
    Ok(truth(value_equal(&args[0], &args[1])))
}

// ── Pairs and lists ───────────────────────────────────────────────

fn builtin_cons(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    Ok(Value::pair(arg(args, 0), arg(args, 1)))
}

fn builtin_car(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let v = arg(args, 0);
    if v.is_nil() {
        return Ok(Value::nil());
    }
    if v.kind() != Kind::Pair {
        return Err(VdError::eval("car expects a pair"));
    }
    Ok(vdlisp_core::pair_car(&v))
}

fn builtin_cdr(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let v = arg(args, 0);
    if v.is_nil() {
        return Ok(Value::nil());
    }
    if v.kind() != Kind::Pair {
        return Err(VdError::eval("cdr expects a pair"));
    }
    Ok(vdlisp_core::pair_cdr(&v))
}

fn builtin_setcar(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let p = arg(args, 0);
    let v = arg(args, 1);
    if p.kind() != Kind::Pair {
        return Err(VdError::eval("setcar expects a pair"));
    }
    pair_set_car(&p, v.clone());
    Ok(v)
}

fn builtin_setcdr(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let p = arg(args, 0);
    let v = arg(args, 1);
    if p.kind() != Kind::Pair {
        return Err(VdError::eval("setcdr expects a pair"));
    }
    pair_set_cdr(&p, v.clone());
    Ok(v)
}

fn builtin_list(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    Ok(list_from_slice(args))
}

// ── Introspection and I/O ─────────────────────────────────────────

fn builtin_type(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    Ok(Value::symbol(arg(args, 0).type_name()))
}

fn builtin_parse(st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let v = arg(args, 0);
    let Some(src) = v.as_str() else {
        return Err(VdError::eval("parse requires a string"));
    };
    st.parse(src, "(string)")
}

fn builtin_print(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let mut out = String::new();
    for (i, v) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&v.to_string());
    }
    println!("{out}");
    Ok(args.last().cloned().unwrap_or_else(Value::nil))
}

fn builtin_error(_st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let msg = match args.first() {
        Some(v) if !v.is_nil() => v.to_string(),
        _ => "error".to_string(),
    };
    Err(VdError::eval(msg))
}

fn builtin_exit(st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let code = match args.first() {
        Some(v) if !v.is_nil() => require_number(v, "exit")? as i32,
        _ => 0,
    };
    st.shutdown();
    std::process::exit(code);
}
