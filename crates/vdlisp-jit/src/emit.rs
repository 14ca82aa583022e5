//! AST → CLIF lowering for the numeric subset.
//!
//! Everything is an f64. Comparisons select 1.0/0.0; `cond` arms join in
//! a continuation block carrying one f64 block parameter; `let` locals and
//! the `while` result are frontend Variables (the SSA builder supplies the
//! phis). Any form outside the subset aborts lowering for the whole
//! function.

use std::rc::Rc;

use cranelift_codegen::ir::condcodes::FloatCC;
use cranelift_codegen::ir::{types, InstBuilder, MemFlags, SigRef, StackSlotData, StackSlotKind};
use cranelift_frontend::{FunctionBuilder, Variable};
use hashbrown::HashMap;

use vdlisp_core::{pair_car, pair_cdr, spur_to_raw, Env, FuncData, Kind, Spur, Value};

use crate::bridge::{vdlisp_call_from_jit, vdlisp_lookup_number};

pub(crate) struct FnEmitter<'a, 'b> {
    pub builder: &'a mut FunctionBuilder<'b>,
    closure: Option<Rc<Env>>,
    args_ptr: cranelift_codegen::ir::Value,
    param_index: HashMap<Spur, usize>,
    locals: HashMap<Spur, Variable>,
    next_var: usize,
    native_sig: SigRef,
    bridge_sig: SigRef,
    lookup_sig: SigRef,
}

type IrValue = cranelift_codegen::ir::Value;
type EmitResult = Result<IrValue, String>;

impl<'a, 'b> FnEmitter<'a, 'b> {
    pub fn new(
        builder: &'a mut FunctionBuilder<'b>,
        func: &'a FuncData,
        args_ptr: IrValue,
        native_sig: SigRef,
        bridge_sig: SigRef,
        lookup_sig: SigRef,
    ) -> Self {
        // Parameter symbols map to indices into the argument buffer, in
        // declaration order; a dotted-tail symbol takes the next index.
        let mut param_index = HashMap::new();
        let mut idx = 0usize;
        let mut p = func.params.clone();
        loop {
            if let Some(spur) = p.as_symbol_spur() {
                param_index.insert(spur, idx);
                break;
            }
            if p.kind() != Kind::Pair {
                break;
            }
            if let Some(spur) = pair_car(&p).as_symbol_spur() {
                param_index.insert(spur, idx);
                idx += 1;
            }
            p = pair_cdr(&p);
        }
        let closure = func.closure_env.borrow().clone();
        FnEmitter {
            builder,
            closure,
            args_ptr,
            param_index,
            locals: HashMap::new(),
            next_var: 0,
            native_sig,
            bridge_sig,
            lookup_sig,
        }
    }

    fn f64const(&mut self, n: f64) -> IrValue {
        self.builder.ins().f64const(n)
    }

    fn declare_f64_var(&mut self) -> Variable {
        let var = Variable::from_u32(self.next_var as u32);
        self.next_var += 1;
        self.builder.declare_var(var, types::F64);
        var
    }

    pub fn emit_expr(&mut self, expr: &Value) -> EmitResult {
        match expr.kind() {
            Kind::Nil => Ok(self.f64const(0.0)),
            Kind::Number => {
                let n = expr.as_number().unwrap_or(0.0);
                Ok(self.f64const(n))
            }
            Kind::Symbol => self.emit_symbol(expr),
            Kind::Pair => self.emit_form(expr),
            _ => Err(format!("unsupported literal: {}", expr.type_name())),
        }
    }

    fn emit_symbol(&mut self, expr: &Value) -> EmitResult {
        // '#t' is a globally-bound truthy symbol in the interpreter; in
        // the numeric representation it is 1.0 so cond/while default
        // branches lower without an environment lookup.
        if expr.is_symbol_named("#t") {
            return Ok(self.f64const(1.0));
        }
        let spur = expr.as_symbol_spur().ok_or("not a symbol")?;
        if let Some(&i) = self.param_index.get(&spur) {
            let offset = (i * 8) as i32;
            return Ok(self
                .builder
                .ins()
                .load(types::F64, MemFlags::trusted(), self.args_ptr, offset));
        }
        if let Some(&var) = self.locals.get(&spur) {
            return Ok(self.builder.use_var(var));
        }
        // Free variable: runtime lookup in the captured environment
        // chain, NaN when unbound or non-numeric.
        let env_ptr = match &self.closure {
            Some(env) => Rc::as_ptr(env) as i64,
            None => 0,
        };
        let env_arg = self.builder.ins().iconst(types::I64, env_ptr);
        let key_arg = self
            .builder
            .ins()
            .iconst(types::I32, spur_to_raw(spur) as i64);
        let callee = self
            .builder
            .ins()
            .iconst(types::I64, vdlisp_lookup_number as usize as i64);
        let call = self
            .builder
            .ins()
            .call_indirect(self.lookup_sig, callee, &[env_arg, key_arg]);
        Ok(self.builder.inst_results(call)[0])
    }

    fn emit_form(&mut self, expr: &Value) -> EmitResult {
        let op = pair_car(expr);
        let rest = pair_cdr(expr);
        let Some(op_spur) = op.as_symbol_spur() else {
            return Err("operator is not a symbol".to_string());
        };
        let name = vdlisp_core::resolve(op_spur);
        match name.as_str() {
            "cond" => return self.emit_cond(&rest),
            "while" => return self.emit_while(&rest),
            "let" => return self.emit_let(&rest),
            _ => {}
        }

        let mut vals = Vec::new();
        let mut a = rest;
        while a.kind() == Kind::Pair {
            let v = self.emit_expr(&pair_car(&a))?;
            vals.push(v);
            a = pair_cdr(&a);
        }

        match name.as_str() {
            "+" | "-" | "*" | "/" => {
                if vals.len() != 2 {
                    return Err(format!("{name} requires two operands"));
                }
                let (l, r) = (vals[0], vals[1]);
                // no zero check in native code: IEEE inf/NaN propagates
                let out = match name.as_str() {
                    "+" => self.builder.ins().fadd(l, r),
                    "-" => self.builder.ins().fsub(l, r),
                    "*" => self.builder.ins().fmul(l, r),
                    _ => self.builder.ins().fdiv(l, r),
                };
                Ok(out)
            }
            "<" | ">" | "<=" | ">=" | "=" => {
                if vals.len() != 2 {
                    return Err(format!("{name} requires two operands"));
                }
                let cc = match name.as_str() {
                    "<" => FloatCC::LessThan,
                    ">" => FloatCC::GreaterThan,
                    "<=" => FloatCC::LessThanOrEqual,
                    ">=" => FloatCC::GreaterThanOrEqual,
                    _ => FloatCC::Equal,
                };
                let cmp = self.builder.ins().fcmp(cc, vals[0], vals[1]);
                let one = self.f64const(1.0);
                let zero = self.f64const(0.0);
                Ok(self.builder.ins().select(cmp, one, zero))
            }
            _ => self.emit_call(op_spur, &name, &vals),
        }
    }

    /// A call to a symbol that resolves in the closure chain to a user
    /// function: direct native call when the callee is compiled, else a
    /// bridge call that re-enters the evaluator.
    fn emit_call(&mut self, op: Spur, name: &str, vals: &[IrValue]) -> EmitResult {
        let Some(closure) = &self.closure else {
            return Err(format!("unsupported call target: {name}"));
        };
        let Some(found) = closure.lookup(op) else {
            return Err(format!("unsupported call target: {name}"));
        };
        let Some(callee) = found.as_func_rc() else {
            return Err(format!("unsupported call target: {name}"));
        };

        let args_ptr = if vals.is_empty() {
            self.builder.ins().iconst(types::I64, 0)
        } else {
            let slot = self.builder.create_sized_stack_slot(StackSlotData::new(
                StackSlotKind::ExplicitSlot,
                (vals.len() * 8) as u32,
                3, // 8-byte alignment (2^3)
            ));
            for (i, v) in vals.iter().enumerate() {
                self.builder.ins().stack_store(*v, slot, (i * 8) as i32);
            }
            self.builder.ins().stack_addr(types::I64, slot, 0)
        };
        let argc = self.builder.ins().iconst(types::I32, vals.len() as i64);

        if let Some(entry) = callee.native_entry() {
            let addr = self.builder.ins().iconst(types::I64, entry as usize as i64);
            let call = self
                .builder
                .ins()
                .call_indirect(self.native_sig, addr, &[args_ptr, argc]);
            return Ok(self.builder.inst_results(call)[0]);
        }

        let fd_ptr = self
            .builder
            .ins()
            .iconst(types::I64, Rc::as_ptr(&callee) as i64);
        let bridge = self
            .builder
            .ins()
            .iconst(types::I64, vdlisp_call_from_jit as usize as i64);
        let call = self
            .builder
            .ins()
            .call_indirect(self.bridge_sig, bridge, &[fd_ptr, args_ptr, argc]);
        Ok(self.builder.inst_results(call)[0])
    }

    fn emit_cond(&mut self, clauses: &Value) -> EmitResult {
        let cont = self.builder.create_block();
        self.builder.append_block_param(cont, types::F64);

        let mut walk = clauses.clone();
        while walk.kind() == Kind::Pair {
            let clause = pair_car(&walk);
            let test = pair_car(&clause);
            let body = pair_cdr(&clause);

            let testv = self.emit_expr(&test)?;
            let zero = self.f64const(0.0);
            let is_true = self.builder.ins().fcmp(FloatCC::NotEqual, testv, zero);

            let body_block = self.builder.create_block();
            let next_block = self.builder.create_block();
            self.builder
                .ins()
                .brif(is_true, body_block, &[], next_block, &[]);
            self.builder.seal_block(body_block);
            self.builder.seal_block(next_block);

            self.builder.switch_to_block(body_block);
            let mut last = None;
            let mut b = body;
            while b.kind() == Kind::Pair {
                last = Some(self.emit_expr(&pair_car(&b))?);
                b = pair_cdr(&b);
            }
            let arm = match last {
                Some(v) => v,
                None => self.f64const(0.0),
            };
            self.builder.ins().jump(cont, &[arm]);

            self.builder.switch_to_block(next_block);
            walk = pair_cdr(&walk);
        }

        // fall-through contributes 0.0
        let zero = self.f64const(0.0);
        self.builder.ins().jump(cont, &[zero]);
        self.builder.seal_block(cont);
        self.builder.switch_to_block(cont);
        Ok(self.builder.block_params(cont)[0])
    }

    fn emit_while(&mut self, rest: &Value) -> EmitResult {
        let cond = pair_car(rest);
        let body = pair_cdr(rest);

        let last_var = self.declare_f64_var();
        let zero = self.f64const(0.0);
        self.builder.def_var(last_var, zero);

        let header = self.builder.create_block();
        let body_block = self.builder.create_block();
        let cont = self.builder.create_block();

        self.builder.ins().jump(header, &[]);
        self.builder.switch_to_block(header);
        let condv = self.emit_expr(&cond)?;
        let zero = self.f64const(0.0);
        let is_true = self.builder.ins().fcmp(FloatCC::NotEqual, condv, zero);
        self.builder
            .ins()
            .brif(is_true, body_block, &[], cont, &[]);
        self.builder.seal_block(body_block);
        self.builder.seal_block(cont);

        self.builder.switch_to_block(body_block);
        let mut b = body;
        let mut last = None;
        while b.kind() == Kind::Pair {
            last = Some(self.emit_expr(&pair_car(&b))?);
            b = pair_cdr(&b);
        }
        if let Some(v) = last {
            self.builder.def_var(last_var, v);
        }
        self.builder.ins().jump(header, &[]);
        self.builder.seal_block(header);

        self.builder.switch_to_block(cont);
        Ok(self.builder.use_var(last_var))
    }

    fn emit_let(&mut self, rest: &Value) -> EmitResult {
        let bindings = pair_car(rest);
        let body = pair_cdr(rest);

        // both input shapes: (s e s e ...) and ((s e) (s e) ...)
        let paired = pair_car(&bindings).kind() == Kind::Pair;
        let mut b = bindings;
        while b.kind() == Kind::Pair {
            let (name, valexpr, next) = if paired {
                let entry = pair_car(&b);
                (
                    pair_car(&entry),
                    pair_car(&pair_cdr(&entry)),
                    pair_cdr(&b),
                )
            } else {
                let tail = pair_cdr(&b);
                if tail.kind() != Kind::Pair {
                    return Err("malformed let bindings".to_string());
                }
                (pair_car(&b), pair_car(&tail), pair_cdr(&tail))
            };
            let Some(spur) = name.as_symbol_spur() else {
                return Err("let binding name is not a symbol".to_string());
            };
            let v = self.emit_expr(&valexpr)?;
            let var = match self.locals.get(&spur) {
                Some(&var) => var,
                None => {
                    let var = self.declare_f64_var();
                    self.locals.insert(spur, var);
                    var
                }
            };
            self.builder.def_var(var, v);
            b = next;
        }

        let mut last = None;
        let mut w = body;
        while w.kind() == Kind::Pair {
            last = Some(self.emit_expr(&pair_car(&w))?);
            w = pair_cdr(&w);
        }
        match last {
            Some(v) => Ok(v),
            None => Ok(self.f64const(0.0)),
        }
    }
}
