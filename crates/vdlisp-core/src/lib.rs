mod context;
mod env;
mod error;
mod value;

use std::rc::Rc;

pub use context::Context;
pub use env::Env;
pub use error::{ChainFrame, SourceLoc, VdError};
pub use lasso::Spur;
pub use value::{
    intern, list_from_slice, list_to_vec, pair_car, pair_cdr, pair_set_car, pair_set_cdr,
    representation_check, reset_interner, resolve, spur_from_raw, spur_to_raw, value_equal,
    with_resolved, Builtin, CompiledCode, EvalResult, FuncData, Kind, MacroData, NativeEntry,
    PairData, Prim, Value,
};

/// The interpreter surface available to primitives and builtins. The
/// concrete implementation lives in `vdlisp-eval`; keeping the seam here
/// lets callables stay plain function pointers inside `Value` words.
pub trait EvalState {
    fn eval(&self, expr: &Value, env: &Rc<Env>) -> EvalResult;
    fn call(&self, f: &Value, args: &[Value]) -> EvalResult;
    fn do_list(&self, body: &Value, env: &Rc<Env>) -> EvalResult;
    fn parse(&self, src: &str, name: &str) -> EvalResult;
    fn parse_all(&self, src: &str, name: &str) -> EvalResult;
    fn ctx(&self) -> &Context;
    fn global_env(&self) -> &Rc<Env>;
    fn shutdown(&self);
}
