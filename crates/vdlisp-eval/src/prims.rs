//! Special forms. Each receives the interpreter, the unevaluated argument
//! list and the current environment, and is registered in the global
//! environment as a first-class primitive value.

use std::rc::Rc;

use vdlisp_core::{
    list_to_vec, pair_car, pair_cdr, Env, EvalResult, EvalState, Kind, Value, VdError,
};

use crate::eval::Interpreter;

pub(crate) fn register(interp: &Interpreter) {
    let prims: &[(&str, vdlisp_core::Prim)] = &[
        ("quote", prim_quote),
        ("unquote", prim_unquote),
        ("quasiquote", prim_quasiquote),
        ("set", prim_set),
        ("fn", prim_fn),
        ("macro", prim_macro),
        ("let", prim_let),
        ("while", prim_while),
        ("cond", prim_cond),
        ("apply", prim_apply),
    ];
    for (name, f) in prims {
        interp.bind_global(name, Value::prim(*f));
    }
}

fn prim_quote(_st: &dyn EvalState, args: &Value, _env: &Rc<Env>) -> EvalResult {
    Ok(pair_car(args))
}

fn prim_unquote(st: &dyn EvalState, args: &Value, env: &Rc<Env>) -> EvalResult {
    let expr = pair_car(args);
    if expr.is_nil() {
        Ok(Value::nil())
    } else {
        st.eval(&expr, env)
    }
}

fn prim_quasiquote(st: &dyn EvalState, args: &Value, env: &Rc<Env>) -> EvalResult {
    qq_expand(st, env, &pair_car(args), 1)
}

/// Walk a quasiquoted template. `unquote` at depth 1 evaluates and
/// splices its argument; nested quasiquote/unquote adjust the depth.
fn qq_expand(st: &dyn EvalState, env: &Rc<Env>, expr: &Value, depth: u32) -> EvalResult {
    if expr.kind() != Kind::Pair {
        return Ok(expr.clone());
    }
    let car = pair_car(expr);
    let cdr = pair_cdr(expr);
    if car.is_symbol_named("unquote") {
        if depth == 1 {
            return if cdr.is_nil() {
                Ok(Value::nil())
            } else {
                st.eval(&pair_car(&cdr), env)
            };
        }
        return Ok(Value::pair(car, qq_expand(st, env, &cdr, depth - 1)?));
    }
    if car.is_symbol_named("quasiquote") {
        return Ok(Value::pair(car, qq_expand(st, env, &cdr, depth + 1)?));
    }
    Ok(Value::pair(
        qq_expand(st, env, &car, depth)?,
        qq_expand(st, env, &cdr, depth)?,
    ))
}

fn prim_set(st: &dyn EvalState, args: &Value, env: &Rc<Env>) -> EvalResult {
    let sym = pair_car(args);
    let Some(spur) = sym.as_symbol_spur() else {
        return Err(VdError::eval("set expects a symbol"));
    };
    let valexpr = pair_car(&pair_cdr(args));
    let val = st.eval(&valexpr, env)?;
    env.set(spur, val.clone());
    Ok(val)
}

fn prim_fn(_st: &dyn EvalState, args: &Value, env: &Rc<Env>) -> EvalResult {
    let params = pair_car(args);
    let body = pair_cdr(args);
    Ok(Value::function(params, body, Some(Rc::clone(env))))
}

fn prim_macro(_st: &dyn EvalState, args: &Value, env: &Rc<Env>) -> EvalResult {
    let params = pair_car(args);
    let body = pair_cdr(args);
    Ok(Value::macro_val(params, body, Some(Rc::clone(env))))
}

/// `(let (sym1 e1 sym2 e2 ...) body...)`, also accepting the
/// `((sym1 e1) (sym2 e2) ...)` shape. Bindings evaluate sequentially in
/// the child environment, so later ones see earlier ones.
fn prim_let(st: &dyn EvalState, args: &Value, env: &Rc<Env>) -> EvalResult {
    let bindings = pair_car(args);
    let child = Env::with_parent(Rc::clone(env));
    let paired = pair_car(&bindings).kind() == Kind::Pair;
    let mut b = bindings;
    while b.kind() == Kind::Pair {
        let (sym, valexpr, next) = if paired {
            let entry = pair_car(&b);
            (
                pair_car(&entry),
                pair_car(&pair_cdr(&entry)),
                pair_cdr(&b),
            )
        } else {
            let tail = pair_cdr(&b);
            (pair_car(&b), pair_car(&tail), pair_cdr(&tail))
        };
        let Some(spur) = sym.as_symbol_spur() else {
            return Err(VdError::eval("bind expects a symbol"));
        };
        let val = st.eval(&valexpr, &child)?;
        child.bind(spur, val);
        b = next;
    }
    st.do_list(&pair_cdr(args), &child)
}

fn prim_while(st: &dyn EvalState, args: &Value, env: &Rc<Env>) -> EvalResult {
    let cond = pair_car(args);
    let body = pair_cdr(args);
    let mut res = Value::nil();
    while st.eval(&cond, env)?.is_truthy() {
        res = st.do_list(&body, env)?;
    }
    Ok(res)
}

fn prim_cond(st: &dyn EvalState, args: &Value, env: &Rc<Env>) -> EvalResult {
    let mut clauses = args.clone();
    while clauses.kind() == Kind::Pair {
        let clause = pair_car(&clauses);
        if clause.is_nil() {
            clauses = pair_cdr(&clauses);
            continue;
        }
        let test = pair_car(&clause);
        let body = pair_cdr(&clause);
        if st.eval(&test, env)?.is_truthy() {
            return st.do_list(&body, env);
        }
        clauses = pair_cdr(&clauses);
    }
    Ok(Value::nil())
}

fn prim_apply(st: &dyn EvalState, args: &Value, env: &Rc<Env>) -> EvalResult {
    let fnexpr = pair_car(args);
    if fnexpr.is_nil() {
        return Err(VdError::eval("apply requires a function"));
    }
    let listexpr = pair_car(&pair_cdr(args));
    let f = st.eval(&fnexpr, env)?;
    let list = st.eval(&listexpr, env)?;
    let argv = list_to_vec(&list);
    st.call(&f, &argv)
}
