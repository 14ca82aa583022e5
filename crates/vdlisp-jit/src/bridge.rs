//! Runtime bridge between native code and the interpreter.
//!
//! Native code reaches these helpers through constant function addresses
//! baked in at compile time. The interpreter registers its re-entry hook
//! at startup and surrounds each native invocation with an
//! `ActiveStateGuard` so callbacks can find the live interpreter.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};

use vdlisp_core::{spur_from_raw, Env, FuncData};

/// Re-entry hook installed by the evaluator: (state, funcdata, args, argc)
/// → numeric result or NaN.
pub type CallHook = fn(*const (), *const FuncData, *const f64, i32) -> f64;

thread_local! {
    static ACTIVE_STATE: Cell<*const ()> = const { Cell::new(std::ptr::null()) };
    static CALL_HOOK: Cell<Option<CallHook>> = const { Cell::new(None) };
}

/// Register the evaluator's re-entry hook. Called once at startup.
pub fn set_call_hook(hook: CallHook) {
    CALL_HOOK.with(|h| h.set(Some(hook)));
}

/// Marks the interpreter as active for the duration of one native call;
/// restores the previous pointer on every exit path, including unwinds,
/// so bridge callbacks that re-enter native code stay nested correctly.
pub struct ActiveStateGuard {
    prev: *const (),
}

impl ActiveStateGuard {
    pub fn new(state: *const ()) -> Self {
        let prev = ACTIVE_STATE.with(|s| s.replace(state));
        ActiveStateGuard { prev }
    }
}

impl Drop for ActiveStateGuard {
    fn drop(&mut self) {
        let prev = self.prev;
        ACTIVE_STATE.with(|s| s.set(prev));
    }
}

/// Re-enter the evaluator from native code for a call to a function that
/// has no native entry. Returns the numeric result, or NaN on any failure
/// or non-numeric outcome.
pub(crate) extern "C" fn vdlisp_call_from_jit(
    fd: *const FuncData,
    args: *const f64,
    argc: i32,
) -> f64 {
    let state = ACTIVE_STATE.with(|s| s.get());
    if state.is_null() || fd.is_null() {
        return f64::NAN;
    }
    let Some(hook) = CALL_HOOK.with(|h| h.get()) else {
        return f64::NAN;
    };
    catch_unwind(AssertUnwindSafe(|| hook(state, fd, args, argc))).unwrap_or(f64::NAN)
}

/// Walk a captured environment chain and return the named binding as f64
/// when it is a number; NaN otherwise.
pub(crate) extern "C" fn vdlisp_lookup_number(env: *const Env, spur_key: u32) -> f64 {
    if env.is_null() {
        return f64::NAN;
    }
    let spur = spur_from_raw(spur_key);
    lookup_in(unsafe { &*env }, spur)
}

fn lookup_in(env: &Env, spur: vdlisp_core::Spur) -> f64 {
    if let Some(v) = env.bindings.borrow().get(&spur) {
        return v.as_number().unwrap_or(f64::NAN);
    }
    match env.parent() {
        Some(parent) => lookup_in(&parent, spur),
        None => f64::NAN,
    }
}
