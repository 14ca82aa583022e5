use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;
use lasso::Spur;

use crate::value::Value;

/// A lexical environment: bindings keyed by interned symbol, plus a
/// strong reference to the parent scope. The parent slot is nullable so
/// shutdown can break closure/environment cycles.
pub struct Env {
    pub bindings: RefCell<HashMap<Spur, Value>>,
    parent: RefCell<Option<Rc<Env>>>,
}

impl Env {
    pub fn new() -> Rc<Env> {
        Rc::new(Env {
            bindings: RefCell::new(HashMap::new()),
            parent: RefCell::new(None),
        })
    }

    pub fn with_parent(parent: Rc<Env>) -> Rc<Env> {
        Rc::new(Env {
            bindings: RefCell::new(HashMap::new()),
            parent: RefCell::new(Some(parent)),
        })
    }

    pub fn parent(&self) -> Option<Rc<Env>> {
        self.parent.borrow().clone()
    }

    /// Insert or overwrite a binding in this environment directly.
    pub fn bind(&self, name: Spur, value: Value) {
        self.bindings.borrow_mut().insert(name, value);
    }

    /// Walk the chain and overwrite the nearest existing binding; when no
    /// binding exists anywhere, bind in this environment.
    pub fn set(self: &Rc<Env>, name: Spur, value: Value) {
        let mut env = Rc::clone(self);
        loop {
            if env.bindings.borrow().contains_key(&name) {
                env.bindings.borrow_mut().insert(name, value);
                return;
            }
            let parent = env.parent();
            match parent {
                Some(p) => env = p,
                None => break,
            }
        }
        self.bind(name, value);
    }

    /// Look a symbol up along the chain. `None` means unbound, which is
    /// distinct from bound-to-nil.
    pub fn lookup(self: &Rc<Env>, name: Spur) -> Option<Value> {
        let mut env = Rc::clone(self);
        loop {
            if let Some(v) = env.bindings.borrow().get(&name) {
                return Some(v.clone());
            }
            let parent = env.parent();
            match parent {
                Some(p) => env = p,
                None => return None,
            }
        }
    }

    /// Drop the parent reference. Shutdown only.
    pub fn clear_parent(&self) {
        *self.parent.borrow_mut() = None;
    }
}
