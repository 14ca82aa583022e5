use std::fmt;

/// A source position: file, 1-based line and column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: String,
    pub line: usize,
    pub col: usize,
}

impl SourceLoc {
    pub fn new(file: impl Into<String>, line: usize, col: usize) -> Self {
        SourceLoc {
            file: file.into(),
            line,
            col,
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// One frame of a call chain: a location plus an optional label such as
/// `fn`, `macro foo` or `macro-def`.
#[derive(Debug, Clone)]
pub struct ChainFrame {
    pub loc: SourceLoc,
    pub label: Option<String>,
}

impl ChainFrame {
    pub fn new(loc: SourceLoc, label: impl Into<String>) -> Self {
        ChainFrame {
            loc,
            label: Some(label.into()),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum VdError {
    #[error("{message}")]
    Parse { message: String, loc: SourceLoc },

    #[error("unbound symbol: {0}")]
    Unbound(String),

    #[error("{who}: expected {expected}, got {got}")]
    Type {
        who: String,
        expected: String,
        got: String,
    },

    #[error("{name} requires exactly two arguments")]
    Arity { name: String },

    #[error("division by zero")]
    DivideByZero,

    #[error("attempt to call {0}")]
    NotCallable(String),

    #[error("could not open file: {name} (tried: {joined})", joined = tried.join(", "))]
    ModuleLoad { name: String, tried: Vec<String> },

    #[error("{0}")]
    Eval(String),

    #[error("{inner}")]
    Located { inner: Box<VdError>, loc: SourceLoc },

    #[error("{inner}")]
    Chained {
        inner: Box<VdError>,
        chain: Vec<ChainFrame>,
    },
}

impl VdError {
    pub fn eval(msg: impl Into<String>) -> Self {
        VdError::Eval(msg.into())
    }

    pub fn type_error(who: impl Into<String>, expected: impl Into<String>, got: impl Into<String>) -> Self {
        VdError::Type {
            who: who.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn arity(name: impl Into<String>) -> Self {
        VdError::Arity { name: name.into() }
    }

    /// The primary source location, if one has been attached.
    pub fn primary_loc(&self) -> Option<&SourceLoc> {
        match self {
            VdError::Parse { loc, .. } => Some(loc),
            VdError::Located { loc, .. } => Some(loc),
            VdError::Chained { inner, .. } => inner.primary_loc(),
            _ => None,
        }
    }

    /// Attach a primary location unless one is already present.
    pub fn with_loc(self, loc: SourceLoc) -> Self {
        if self.primary_loc().is_some() {
            return self;
        }
        match self {
            VdError::Chained { inner, chain } => VdError::Chained {
                inner: Box::new(inner.with_loc(loc)),
                chain,
            },
            other => VdError::Located {
                inner: Box::new(other),
                loc,
            },
        }
    }

    /// Prepend call-chain frames (outermost first).
    pub fn prepend_chain(self, frames: &[ChainFrame]) -> Self {
        if frames.is_empty() {
            return self;
        }
        match self {
            VdError::Chained { inner, chain } => {
                let mut new_chain = frames.to_vec();
                new_chain.extend(chain);
                VdError::Chained {
                    inner,
                    chain: new_chain,
                }
            }
            other => VdError::Chained {
                inner: Box::new(other),
                chain: frames.to_vec(),
            },
        }
    }

    pub fn chain(&self) -> Option<&[ChainFrame]> {
        match self {
            VdError::Chained { chain, .. } => Some(chain),
            _ => None,
        }
    }

    /// Strip location/chain wrappers.
    pub fn inner(&self) -> &VdError {
        match self {
            VdError::Located { inner, .. } => inner.inner(),
            VdError::Chained { inner, .. } => inner.inner(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_loc_keeps_first_location() {
        let loc1 = SourceLoc::new("a.lisp", 1, 2);
        let loc2 = SourceLoc::new("b.lisp", 3, 4);
        let e = VdError::eval("boom").with_loc(loc1.clone()).with_loc(loc2);
        assert_eq!(e.primary_loc(), Some(&loc1));
    }

    #[test]
    fn prepend_chain_orders_outermost_first() {
        let fa = ChainFrame::new(SourceLoc::new("a", 1, 1), "macro a");
        let fb = ChainFrame::new(SourceLoc::new("b", 2, 2), "macro b");
        let e = VdError::eval("boom")
            .prepend_chain(std::slice::from_ref(&fb))
            .prepend_chain(std::slice::from_ref(&fa));
        let chain = e.chain().unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].label.as_deref(), Some("macro a"));
        assert_eq!(chain[1].label.as_deref(), Some("macro b"));
    }

    #[test]
    fn messages_match_reporting() {
        assert_eq!(VdError::DivideByZero.to_string(), "division by zero");
        assert_eq!(
            VdError::arity("+").to_string(),
            "+ requires exactly two arguments"
        );
        assert_eq!(
            VdError::Unbound("x".into()).to_string(),
            "unbound symbol: x"
        );
    }
}
