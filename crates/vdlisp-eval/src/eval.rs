use std::rc::Rc;

use vdlisp_core::{
    intern, list_from_slice, pair_car, pair_cdr, resolve, ChainFrame, Context, Env, EvalResult,
    EvalState, FuncData, Kind, SourceLoc, Value, VdError,
};

/// The interpreter state: the global environment plus the source-location
/// and module side tables.
pub struct Interpreter {
    pub global_env: Rc<Env>,
    pub ctx: Context,
}

impl Interpreter {
    pub fn new() -> Self {
        let interp = Interpreter {
            global_env: Env::new(),
            ctx: Context::new(),
        };
        crate::builtins::register(&interp);
        crate::prims::register(&interp);
        // the truthy symbol evaluates to itself
        interp.bind_global("#t", Value::symbol("#t"));
        vdlisp_jit::set_call_hook(call_from_jit_hook);
        interp
    }

    pub fn bind_global(&self, name: &str, value: Value) {
        self.global_env.bind(intern(name), value);
    }

    /// Parse and evaluate a whole source text in the global environment,
    /// returning the last top-level value.
    pub fn eval_str(&self, input: &str) -> EvalResult {
        self.eval_str_named(input, "(string)")
    }

    pub fn eval_str_named(&self, input: &str, name: &str) -> EvalResult {
        let exprs = self.parse_all(input, name)?;
        let env = Rc::clone(&self.global_env);
        self.do_list(&exprs, &env)
    }

    fn eval_expr(&self, expr: &Value, env: &Rc<Env>) -> EvalResult {
        match expr.kind() {
            Kind::Nil => Ok(Value::nil()),
            Kind::Symbol => {
                let spur = expr.as_symbol_spur().expect("symbol kind");
                match env.lookup(spur) {
                    Some(v) => Ok(v),
                    None => {
                        let mut err = VdError::Unbound(resolve(spur));
                        if let Some(loc) = self.ctx.source_loc(expr) {
                            err = err.with_loc(loc);
                        }
                        Err(err)
                    }
                }
            }
            Kind::Pair => {
                let op = pair_car(expr);
                let rest = pair_cdr(expr);
                let f = self.eval(&op, env)?;
                match f.kind() {
                    Kind::Nil => Err(VdError::NotCallable("nil".to_string())),
                    Kind::Prim => {
                        let prim = f.get_prim().expect("prim kind");
                        prim(self, &rest, env)
                    }
                    Kind::Macro => self.eval_macro_call(expr, &op, &f, &rest, env),
                    _ => {
                        // evaluate arguments left-to-right, then dispatch
                        let mut args = Vec::new();
                        let mut a = rest;
                        while a.kind() == Kind::Pair {
                            args.push(self.eval(&pair_car(&a), env)?);
                            a = pair_cdr(&a);
                        }
                        self.call(&f, &args)
                    }
                }
            }
            // literals and callable values evaluate to themselves
            _ => Ok(expr.clone()),
        }
    }

    /// Expand a macro in the caller's environment: bind the raw argument
    /// forms, evaluate the body in the macro's closure environment, tag
    /// the expansion with the call site, then evaluate the expansion.
    fn eval_macro_call(
        &self,
        expr: &Value,
        op: &Value,
        f: &Value,
        rest: &Value,
        env: &Rc<Env>,
    ) -> EvalResult {
        let md = f.as_macro().expect("macro kind");
        let menv = match md.closure_env.borrow().clone() {
            Some(closure) => Env::with_parent(closure),
            None => Env::new(),
        };
        let raw_args = vdlisp_core::list_to_vec(rest);
        bind_params(&menv, &md.params, &raw_args, true);

        let call_loc = self
            .ctx
            .source_loc(&self.ctx.current_expr())
            .or_else(|| self.ctx.source_loc(expr));
        let mut chain_entry: Vec<ChainFrame> = Vec::new();
        if let Some(loc) = &call_loc {
            let label = match op.symbol_text() {
                Some(name) => format!("macro {name}"),
                None => "macro".to_string(),
            };
            chain_entry.push(ChainFrame::new(loc.clone(), label));
            // include the macro definition so expansion errors show both
            // where the macro was defined and where it was invoked
            if let Some(def_loc) = self.ctx.source_loc(&md.body) {
                chain_entry.push(ChainFrame::new(def_loc, "macro-def"));
            }
            self.ctx.set_call_chain(expr, chain_entry.clone());
        }

        let body = md.body.clone();
        let expansion = self
            .do_list(&body, &menv)
            .map_err(|e| annotate_err(e, &call_loc, &chain_entry))?;

        if let Some(loc) = &call_loc {
            self.propagate_expansion(&expansion, loc, &chain_entry);
        }
        self.eval(&expansion, env)
    }

    /// Tag every node of a macro expansion with the call-site location and
    /// prepend the call chain, so errors raised while evaluating the
    /// expansion still report the expansion site and any outer macros.
    fn propagate_expansion(&self, v: &Value, loc: &SourceLoc, entry: &[ChainFrame]) {
        if v.is_nil() {
            return;
        }
        self.ctx.set_source_loc(v, &loc.file, loc.line, loc.col);
        let mut chain = entry.to_vec();
        if let Some(existing) = self.ctx.call_chain(v) {
            chain.extend(existing);
        }
        self.ctx.set_call_chain(v, chain);
        if v.kind() == Kind::Pair {
            self.propagate_expansion(&pair_car(v), loc, entry);
            self.propagate_expansion(&pair_cdr(v), loc, entry);
        }
    }

    /// Invoke a user function with already-evaluated arguments, taking the
    /// native tier when the call is all-numeric and the function is hot.
    fn call_function(&self, f: &Value, args: &[Value]) -> EvalResult {
        let fd = f.as_func_rc().expect("func kind");
        fd.call_count.set(fd.call_count.get() + 1);

        let mut darr = Vec::with_capacity(args.len());
        let mut numeric = true;
        for a in args {
            match a.as_number() {
                Some(n) => darr.push(n),
                None => {
                    numeric = false;
                    break;
                }
            }
        }

        if numeric {
            fd.numeric_call_count.set(fd.numeric_call_count.get() + 1);
            if fd.numeric_call_count.get() > 3 && !fd.jit_failed.get() {
                // the borrow must end before compile_function installs code
                let needs_compile = fd.compiled.borrow().is_none();
                if needs_compile && vdlisp_jit::compile_function(&fd).is_err() {
                    fd.jit_failed.set(true);
                }
            }
            if let Some(entry) = fd.native_entry() {
                let res = {
                    let _guard = vdlisp_jit::ActiveStateGuard::new(
                        self as *const Interpreter as *const (),
                    );
                    let ptr = if darr.is_empty() {
                        std::ptr::null()
                    } else {
                        darr.as_ptr()
                    };
                    entry(ptr, darr.len() as i32)
                };
                if !res.is_nan() {
                    return Ok(Value::number(res));
                }
                // NaN signals a non-numeric outcome somewhere below:
                // fall back to the interpreter for this call
                let env = self.activation_env(&fd);
                bind_params(&env, &fd.params, args, false);
                return self.do_list(&fd.body, &env);
            }
        }

        // interpreter path, annotated with the call site
        let env = self.activation_env(&fd);
        bind_params(&env, &fd.params, args, false);
        let call_loc = self.ctx.source_loc(&self.ctx.current_expr());
        let chain: Vec<ChainFrame> = call_loc
            .iter()
            .map(|loc| ChainFrame::new(loc.clone(), "fn"))
            .collect();
        self.do_list(&fd.body, &env)
            .map_err(|e| annotate_err(e, &call_loc, &chain))
    }

    fn activation_env(&self, fd: &FuncData) -> Rc<Env> {
        match fd.closure_env.borrow().clone() {
            Some(closure) => Env::with_parent(closure),
            None => Env::with_parent(Rc::clone(&self.global_env)),
        }
    }

    /// Break closure/environment cycles reachable from the global chain
    /// and drop every cache. Best-effort: the process is about to exit.
    pub fn shutdown(&self) {
        let mut chain: Vec<Rc<Env>> = Vec::new();
        let mut cur = Some(Rc::clone(&self.global_env));
        while let Some(env) = cur {
            if chain.iter().any(|e| Rc::ptr_eq(e, &env)) {
                break;
            }
            cur = env.parent();
            chain.push(env);
        }
        for env in &chain {
            for value in env.bindings.borrow().values() {
                clear_closure_env(value);
            }
            env.bindings.borrow_mut().clear();
            env.clear_parent();
        }
        self.ctx.clear();
        vdlisp_core::reset_interner();
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalState for Interpreter {
    /// Evaluate one expression. `current_expr` tracks the expression under
    /// evaluation and is restored only on success, so the failing
    /// expression is still visible to the top-level reporter.
    fn eval(&self, expr: &Value, env: &Rc<Env>) -> EvalResult {
        let prev = self.ctx.current_expr.replace(expr.clone());
        let result = self.eval_expr(expr, env);
        if result.is_ok() {
            self.ctx.current_expr.replace(prev);
        }
        result
    }

    fn call(&self, f: &Value, args: &[Value]) -> EvalResult {
        match f.kind() {
            Kind::Builtin => {
                let builtin = f.get_builtin().expect("builtin kind");
                builtin(self, args)
            }
            Kind::Func => self.call_function(f, args),
            _ => Err(VdError::NotCallable(f.type_name().to_string())),
        }
    }

    fn do_list(&self, body: &Value, env: &Rc<Env>) -> EvalResult {
        let mut res = Value::nil();
        let mut walk = body.clone();
        while walk.kind() == Kind::Pair {
            res = self.eval(&pair_car(&walk), env)?;
            walk = pair_cdr(&walk);
        }
        Ok(res)
    }

    fn parse(&self, src: &str, name: &str) -> EvalResult {
        vdlisp_reader::parse(&self.ctx, src, name)
    }

    fn parse_all(&self, src: &str, name: &str) -> EvalResult {
        vdlisp_reader::parse_all(&self.ctx, src, name)
    }

    fn ctx(&self) -> &Context {
        &self.ctx
    }

    fn global_env(&self) -> &Rc<Env> {
        &self.global_env
    }

    fn shutdown(&self) {
        Interpreter::shutdown(self)
    }
}

/// Bind formals to actuals. A bare or dotted-tail symbol takes the
/// remaining actuals as a list. Function calls stop binding when the
/// actuals run out; macro calls bind the remaining formals to nil.
pub(crate) fn bind_params(
    env: &Rc<Env>,
    params: &Value,
    args: &[Value],
    fill_missing_with_nil: bool,
) {
    let mut p = params.clone();
    let mut i = 0usize;
    loop {
        if let Some(spur) = p.as_symbol_spur() {
            env.bind(spur, list_from_slice(args.get(i..).unwrap_or(&[])));
            break;
        }
        if p.kind() != Kind::Pair {
            break;
        }
        if !fill_missing_with_nil && i >= args.len() {
            break;
        }
        if let Some(spur) = pair_car(&p).as_symbol_spur() {
            env.bind(spur, args.get(i).cloned().unwrap_or_else(Value::nil));
        }
        p = pair_cdr(&p);
        i += 1;
    }
}

/// Annotate an error raised inside a call: located errors keep their own
/// location and gain the call frames; unlocated ones adopt the call site.
fn annotate_err(e: VdError, call_loc: &Option<SourceLoc>, chain: &[ChainFrame]) -> VdError {
    match call_loc {
        Some(loc) => e.with_loc(loc.clone()).prepend_chain(chain),
        None => e,
    }
}

/// Null the closure environment held by a function or macro value.
/// Shutdown only; breaks the closure ⇄ environment cycle.
fn clear_closure_env(v: &Value) {
    if let Some(fd) = v.as_func() {
        fd.closure_env.borrow_mut().take();
    } else if let Some(md) = v.as_macro() {
        md.closure_env.borrow_mut().take();
    }
}

/// Re-entry point for native code calling a function with no native
/// entry: rebuild a numeric argument list, run the evaluator, and map
/// failures or non-numeric results to the NaN deopt signal.
fn call_from_jit_hook(state: *const (), fd: *const FuncData, args: *const f64, argc: i32) -> f64 {
    let interp = unsafe { &*(state as *const Interpreter) };
    let f = unsafe { Value::from_func_ptr(fd) };
    let mut list = Vec::with_capacity(argc.max(0) as usize);
    if !args.is_null() {
        for i in 0..argc.max(0) as usize {
            list.push(Value::number(unsafe { *args.add(i) }));
        }
    }
    match interp.call(&f, &list) {
        Ok(v) => v.as_number().unwrap_or(f64::NAN),
        Err(_) => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdlisp_core::value_equal;

    fn eval_one(interp: &Interpreter, src: &str) -> Value {
        interp.eval_str(src).expect("eval failed")
    }

    #[test]
    fn literals_self_evaluate() {
        let interp = Interpreter::new();
        assert_eq!(eval_one(&interp, "42").as_number(), Some(42.0));
        assert_eq!(eval_one(&interp, "\"hi\"").as_str(), Some("hi"));
        assert!(eval_one(&interp, "nil").is_nil());
    }

    #[test]
    fn unbound_symbol_errors() {
        let interp = Interpreter::new();
        let e = interp.eval_str("zork").unwrap_err();
        assert!(e.to_string().contains("unbound symbol: zork"));
    }

    #[test]
    fn bound_to_nil_is_fine() {
        let interp = Interpreter::new();
        assert!(eval_one(&interp, "(set x nil) x").is_nil());
    }

    #[test]
    fn closures_capture_definition_env() {
        let interp = Interpreter::new();
        let v = eval_one(
            &interp,
            "(set make-adder (fn (n) (fn (x) (+ x n))))
             (set add2 (make-adder 2))
             (set n 100)
             (add2 5)",
        );
        assert_eq!(v.as_number(), Some(7.0));
    }

    #[test]
    fn let_is_sequential_and_shadows() {
        let interp = Interpreter::new();
        let v = eval_one(&interp, "(set x 1) (let (x 10 y (+ x 5)) y)");
        assert_eq!(v.as_number(), Some(15.0));
        // outer binding restored
        assert_eq!(eval_one(&interp, "x").as_number(), Some(1.0));
    }

    #[test]
    fn let_accepts_paired_form() {
        let interp = Interpreter::new();
        let v = eval_one(&interp, "(let ((a 1) (b 2)) (+ a b))");
        assert_eq!(v.as_number(), Some(3.0));
    }

    #[test]
    fn while_loops_and_returns_last_body_value() {
        let interp = Interpreter::new();
        let v = eval_one(
            &interp,
            "(set i 0) (set acc 0) (while (< i 5) (set acc (+ acc i)) (set i (+ i 1)) acc)",
        );
        assert_eq!(v.as_number(), Some(10.0));
        assert!(eval_one(&interp, "(while nil 1)").is_nil());
    }

    #[test]
    fn cond_first_truthy_wins() {
        let interp = Interpreter::new();
        let v = eval_one(&interp, "(cond (nil 1) ((< 1 2) 2) (#t 3))");
        assert_eq!(v.as_number(), Some(2.0));
        assert!(eval_one(&interp, "(cond (nil 1))").is_nil());
    }

    #[test]
    fn quote_returns_structure() {
        let interp = Interpreter::new();
        let v = eval_one(&interp, "'(a (b 2) . c)");
        let w = interp.parse("(a (b 2) . c)", "(p)").unwrap();
        assert!(value_equal(&v, &w));
    }

    #[test]
    fn variadic_bare_symbol_params() {
        let interp = Interpreter::new();
        let v = eval_one(&interp, "(set f (fn args args)) (f 1 2 3)");
        assert_eq!(v.to_string(), "(1 2 3)");
    }

    #[test]
    fn dotted_tail_params() {
        let interp = Interpreter::new();
        let v = eval_one(&interp, "(set f (fn (a b . rest) (list a b rest))) (f 1 2 3 4)");
        assert_eq!(v.to_string(), "(1 2 (3 4))");
    }

    #[test]
    fn macro_missing_args_bind_nil() {
        let interp = Interpreter::new();
        let v = eval_one(&interp, "(set m (macro (a b) (list 'quote (list a b)))) (m 1)");
        assert_eq!(v.to_string(), "(1 nil)");
    }

    #[test]
    fn apply_uses_evaluated_list() {
        let interp = Interpreter::new();
        let v = eval_one(&interp, "(apply + (list 1 2))");
        assert_eq!(v.as_number(), Some(3.0));
    }

    #[test]
    fn call_non_function_errors() {
        let interp = Interpreter::new();
        let e = interp.eval_str("(1 2)").unwrap_err();
        assert!(e.to_string().contains("attempt to call number"));
        let e = interp.eval_str("(set x nil) (x)").unwrap_err();
        assert!(e.to_string().contains("attempt to call nil"));
    }

    #[test]
    fn quasiquote_depth_handling() {
        let interp = Interpreter::new();
        let v = eval_one(&interp, "(set y 10) `(foo ,y bar)");
        assert_eq!(v.to_string(), "(foo 10 bar)");
        let v = eval_one(&interp, "`(a ,(+ 1 2))");
        assert_eq!(v.to_string(), "(a 3)");
        // nested quasiquote decrements depth instead of evaluating
        let v = eval_one(&interp, "``(a ,(+ 1 2))");
        assert_eq!(v.to_string(), "(quasiquote (a (unquote (+ 1 2))))");
    }

    #[test]
    fn shutdown_clears_global_chain() {
        let interp = Interpreter::new();
        let _ = eval_one(&interp, "(set f (fn (x) x))");
        interp.shutdown();
        assert!(interp.global_env.bindings.borrow().is_empty());
        assert!(interp.global_env.parent().is_none());
    }
}
