//! Tiered native compiler: lowers hot numeric user functions to machine
//! code with the `(args: *const f64, argc: i32) -> f64` ABI. A NaN result
//! is the deopt signal; the evaluator then falls back to the interpreted
//! body for that call.

mod bridge;
mod emit;

use std::cell::RefCell;
use std::rc::Rc;

use cranelift_codegen::ir::{types, AbiParam, Function, InstBuilder, Signature, UserFuncName};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, Linkage, Module};

use vdlisp_core::{pair_car, pair_cdr, CompiledCode, Env, FuncData, Kind, NativeEntry, Value};

pub use bridge::{set_call_hook, ActiveStateGuard, CallHook};

thread_local! {
    // Guards against mutually-recursive functions re-entering the
    // compiler for a function whose synthesis is still underway.
    static IN_PROGRESS: RefCell<Vec<*const FuncData>> = const { RefCell::new(Vec::new()) };
}

/// Compile a user function, best-effort pre-compiling the user functions
/// its body calls so direct native-to-native calls are available. On
/// success the native entry is installed in `fd.compiled`.
pub fn compile_function(fd: &Rc<FuncData>) -> Result<(), String> {
    let key = Rc::as_ptr(fd);
    let already = IN_PROGRESS.with(|s| {
        let mut stack = s.borrow_mut();
        if stack.contains(&key) {
            true
        } else {
            stack.push(key);
            false
        }
    });
    if already {
        return Err("recursive compilation in progress".to_string());
    }
    let result = compile_inner(fd);
    IN_PROGRESS.with(|s| {
        s.borrow_mut().retain(|p| *p != key);
    });
    result
}

fn compile_inner(fd: &Rc<FuncData>) -> Result<(), String> {
    let closure = fd.closure_env.borrow().clone();
    let mut callees = Vec::new();
    collect_called_funcs(&fd.body, closure.as_ref(), &mut callees);
    for callee in &callees {
        if Rc::ptr_eq(callee, fd) || callee.compiled.borrow().is_some() || callee.jit_failed.get()
        {
            continue;
        }
        if compile_function(callee).is_err() {
            callee.jit_failed.set(true);
        }
    }

    let code = synthesize(fd)?;
    fd.compiled.replace(Some(code));
    Ok(())
}

/// Owns the module whose memory backs one native entry; dropping it
/// returns the memory to the code manager.
struct ModuleHandle {
    module: Option<JITModule>,
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // Invariant: the owning function is unreachable, so nothing
            // can re-enter this module's code.
            unsafe { module.free_memory() };
        }
    }
}

fn synthesize(fd: &Rc<FuncData>) -> Result<CompiledCode, String> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("use_colocated_libcalls", "false")
        .map_err(|e| e.to_string())?;
    flag_builder.set("is_pic", "false").map_err(|e| e.to_string())?;
    let isa_builder = cranelift_native::builder().map_err(|e| format!("native ISA error: {e}"))?;
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| e.to_string())?;
    let call_conv = isa.default_call_conv();

    let mut module = JITModule::new(JITBuilder::with_isa(isa, default_libcall_names()));

    // native ABI: (args: *const f64, argc: i32) -> f64
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(types::I64));
    sig.params.push(AbiParam::new(types::I32));
    sig.returns.push(AbiParam::new(types::F64));

    let name = format!("jit_fn_{:x}", Rc::as_ptr(fd) as usize);
    let func_id = module
        .declare_function(&name, Linkage::Export, &sig)
        .map_err(|e| e.to_string())?;

    let mut func = Function::with_name_signature(UserFuncName::default(), sig.clone());
    let mut builder_ctx = FunctionBuilderContext::new();
    {
        let mut builder = FunctionBuilder::new(&mut func, &mut builder_ctx);

        let mut lookup_sig = Signature::new(call_conv);
        lookup_sig.params.push(AbiParam::new(types::I64));
        lookup_sig.params.push(AbiParam::new(types::I32));
        lookup_sig.returns.push(AbiParam::new(types::F64));
        let lookup_ref = builder.import_signature(lookup_sig);

        let mut bridge_sig = Signature::new(call_conv);
        bridge_sig.params.push(AbiParam::new(types::I64));
        bridge_sig.params.push(AbiParam::new(types::I64));
        bridge_sig.params.push(AbiParam::new(types::I32));
        bridge_sig.returns.push(AbiParam::new(types::F64));
        let bridge_ref = builder.import_signature(bridge_sig);

        let native_ref = builder.import_signature(sig.clone());

        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let args_ptr = builder.block_params(entry)[0];

        let mut emitter =
            emit::FnEmitter::new(&mut builder, fd, args_ptr, native_ref, bridge_ref, lookup_ref);

        let mut last = None;
        let mut body = fd.body.clone();
        while body.kind() == Kind::Pair {
            last = Some(emitter.emit_expr(&pair_car(&body))?);
            body = pair_cdr(&body);
        }
        let ret = match last {
            Some(v) => v,
            None => emitter.builder.ins().f64const(0.0),
        };
        builder.ins().return_(&[ret]);
        builder.finalize();
    }

    let mut ctx = cranelift_codegen::Context::for_function(func);
    module
        .define_function(func_id, &mut ctx)
        .map_err(|e| e.to_string())?;
    module
        .finalize_definitions()
        .map_err(|e| e.to_string())?;

    let code = module.get_finalized_function(func_id);
    let entry: NativeEntry = unsafe { std::mem::transmute(code) };
    Ok(CompiledCode {
        entry,
        module: Box::new(ModuleHandle {
            module: Some(module),
        }),
    })
}

/// Scan a body for symbols in operator position that resolve in the
/// closure chain to user functions.
fn collect_called_funcs(expr: &Value, closure: Option<&Rc<Env>>, out: &mut Vec<Rc<FuncData>>) {
    if expr.kind() != Kind::Pair {
        return;
    }
    let car = pair_car(expr);
    if let Some(spur) = car.as_symbol_spur() {
        if let Some(env) = closure {
            if let Some(found) = env.lookup(spur) {
                if let Some(callee) = found.as_func_rc() {
                    out.push(callee);
                }
            }
        }
    }
    let mut walk = expr.clone();
    while walk.kind() == Kind::Pair {
        collect_called_funcs(&pair_car(&walk), closure, out);
        walk = pair_cdr(&walk);
    }
}
