//! The `require` builtin: load a file once, keyed by canonical path.
//!
//! Candidates are tried caller-relative first (when the requiring
//! expression has a known file location), then as given. While a module
//! loads, its cache entry is nil so a re-entrant require of the same
//! path returns nil instead of recursing.

use std::path::Path;

use vdlisp_core::{EvalResult, EvalState, Value, VdError};

pub(crate) fn builtin_require(st: &dyn EvalState, args: &[Value]) -> EvalResult {
    let name = match args.first().and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => return Err(VdError::eval("require requires a string")),
    };

    let mut candidates: Vec<String> = Vec::new();
    if !name.starts_with('/') {
        let cur = st.ctx().current_expr();
        if let Some(loc) = st.ctx().source_loc(&cur) {
            if let Some(dir) = Path::new(&loc.file).parent() {
                if !dir.as_os_str().is_empty() {
                    candidates.push(dir.join(&name).to_string_lossy().to_string());
                }
            }
        }
    }
    candidates.push(name.clone());

    let mut tried = Vec::new();
    for cand in &candidates {
        let path = Path::new(cand);
        let key = if path.exists() {
            std::fs::canonicalize(path)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| cand.clone())
        } else {
            cand.clone()
        };

        if let Some(v) = st.ctx().modules.borrow().get(&key) {
            return Ok(v.clone());
        }

        let text = match std::fs::read_to_string(&key) {
            Ok(t) => t,
            Err(_) => {
                tried.push(key);
                continue;
            }
        };

        // mark as loading to break require cycles
        st.ctx()
            .modules
            .borrow_mut()
            .insert(key.clone(), Value::nil());
        let exprs = st.parse_all(&text, &key)?;
        let result = st.do_list(&exprs, st.global_env())?;
        st.ctx()
            .modules
            .borrow_mut()
            .insert(key, result.clone());
        return Ok(result);
    }

    Err(VdError::ModuleLoad { name, tried })
}
