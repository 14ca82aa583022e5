use std::cell::RefCell;

use hashbrown::HashMap;

use crate::error::{ChainFrame, SourceLoc};
use crate::value::Value;

/// Interpreter side tables: source locations keyed by value identity,
/// call chains for expanded nodes, source text for caret rendering, the
/// module cache, and the expression currently under evaluation.
pub struct Context {
    pub src_map: RefCell<HashMap<u64, SourceLoc>>,
    pub call_chain_map: RefCell<HashMap<u64, Vec<ChainFrame>>>,
    pub sources: RefCell<HashMap<String, String>>,
    pub modules: RefCell<HashMap<String, Value>>,
    pub current_expr: RefCell<Value>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            src_map: RefCell::new(HashMap::new()),
            call_chain_map: RefCell::new(HashMap::new()),
            sources: RefCell::new(HashMap::new()),
            modules: RefCell::new(HashMap::new()),
            current_expr: RefCell::new(Value::nil()),
        }
    }

    pub fn set_source_loc(&self, v: &Value, file: &str, line: usize, col: usize) {
        if v.is_nil() {
            return;
        }
        self.src_map
            .borrow_mut()
            .insert(v.identity_key(), SourceLoc::new(file, line, col));
    }

    pub fn source_loc(&self, v: &Value) -> Option<SourceLoc> {
        if v.is_nil() {
            return None;
        }
        self.src_map.borrow().get(&v.identity_key()).cloned()
    }

    pub fn set_call_chain(&self, v: &Value, chain: Vec<ChainFrame>) {
        self.call_chain_map
            .borrow_mut()
            .insert(v.identity_key(), chain);
    }

    pub fn call_chain(&self, v: &Value) -> Option<Vec<ChainFrame>> {
        self.call_chain_map.borrow().get(&v.identity_key()).cloned()
    }

    /// Remember the full text of a source so errors can echo the
    /// offending line.
    pub fn register_source(&self, name: &str, text: &str) {
        self.sources
            .borrow_mut()
            .insert(name.to_string(), text.to_string());
    }

    /// The indicated 1-based line of a registered source.
    pub fn source_line(&self, file: &str, line: usize) -> Option<String> {
        let sources = self.sources.borrow();
        let text = sources.get(file)?;
        text.lines().nth(line.saturating_sub(1)).map(str::to_string)
    }

    pub fn current_expr(&self) -> Value {
        self.current_expr.borrow().clone()
    }

    /// Clear every side table. Shutdown only.
    pub fn clear(&self) {
        self.modules.borrow_mut().clear();
        self.sources.borrow_mut().clear();
        self.src_map.borrow_mut().clear();
        self.call_chain_map.borrow_mut().clear();
        *self.current_expr.borrow_mut() = Value::nil();
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
