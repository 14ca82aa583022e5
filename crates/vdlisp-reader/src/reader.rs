use vdlisp_core::{Context, SourceLoc, Value, VdError};

/// Parse a single expression. Empty input yields nil.
pub fn parse(ctx: &Context, src: &str, name: &str) -> Result<Value, VdError> {
    ctx.register_source(name, src);
    let mut reader = Reader::new(ctx, src, name);
    reader.read_expr()
}

/// Parse every top-level expression, returned as a proper list.
pub fn parse_all(ctx: &Context, src: &str, name: &str) -> Result<Value, VdError> {
    ctx.register_source(name, src);
    let mut reader = Reader::new(ctx, src, name);
    let mut exprs = Vec::new();
    loop {
        reader.skip_ws_and_comments();
        if reader.at_eof() {
            break;
        }
        exprs.push(reader.read_expr()?);
    }
    Ok(vdlisp_core::list_from_slice(&exprs))
}

struct Reader<'a> {
    ctx: &'a Context,
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    name: &'a str,
}

fn is_delim(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '"' | ';' | '`' | ',')
}

impl<'a> Reader<'a> {
    fn new(ctx: &'a Context, src: &str, name: &'a str) -> Self {
        Reader {
            ctx,
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            name,
        }
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.name, self.line, self.col)
    }

    fn err(&self, loc: SourceLoc, message: &str) -> VdError {
        VdError::Parse {
            message: message.to_string(),
            loc,
        }
    }

    fn skip_ws_and_comments(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else if c == ';' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn read_expr(&mut self) -> Result<Value, VdError> {
        self.skip_ws_and_comments();
        let Some(c) = self.peek() else {
            return Ok(Value::nil());
        };
        match c {
            ')' => Err(self.err(self.loc(), "unexpected )")),
            '(' => self.read_list(),
            '\'' => self.read_wrapper("quote"),
            '`' => self.read_wrapper("quasiquote"),
            ',' => self.read_wrapper("unquote"),
            '"' => self.read_string(),
            _ => self.read_atom(),
        }
    }

    fn read_list(&mut self) -> Result<Value, VdError> {
        let open = self.loc();
        self.advance(); // consume '('
        let mut items: Vec<Value> = Vec::new();
        let mut tail = Value::nil();
        let mut closed = false;
        loop {
            self.skip_ws_and_comments();
            if self.at_eof() {
                break;
            }
            if self.peek() == Some(')') {
                self.advance();
                closed = true;
                break;
            }
            let elem = self.read_expr()?;
            if elem.is_symbol_named(".") {
                // dotted tail: the next expression becomes the final cdr,
                // then the list must close
                self.skip_ws_and_comments();
                if self.at_eof() {
                    return Err(self.err(open, "unexpected EOF after . in list"));
                }
                tail = self.read_expr()?;
                self.skip_ws_and_comments();
                if self.peek() != Some(')') {
                    return Err(self.err(open, "expected ) after dotted-tail"));
                }
                self.advance();
                closed = true;
                break;
            }
            items.push(elem);
        }
        if !closed {
            return Err(self.err(open, "unexpected EOF while reading list"));
        }
        let mut acc = tail;
        for item in items.into_iter().rev() {
            acc = Value::pair(item, acc);
            self.ctx
                .set_source_loc(&acc, self.name, open.line, open.col);
        }
        Ok(acc)
    }

    fn read_wrapper(&mut self, sym: &str) -> Result<Value, VdError> {
        let start = self.loc();
        self.advance(); // consume the quote character
        let inner = self.read_expr()?;
        let res = Value::pair(
            Value::symbol(sym),
            Value::pair(inner, Value::nil()),
        );
        self.ctx
            .set_source_loc(&res, self.name, start.line, start.col);
        Ok(res)
    }

    fn read_string(&mut self) -> Result<Value, VdError> {
        let start = self.loc();
        self.advance(); // consume opening quote
        let mut s = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.err(start, "unexpected EOF while reading string"));
            };
            if c == '"' {
                self.advance();
                break;
            }
            if c == '\\' && self.pos + 1 < self.chars.len() {
                self.advance();
                let esc = self.advance().unwrap_or('\\');
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    '\\' => s.push('\\'),
                    '"' => s.push('"'),
                    other => s.push(other),
                }
            } else {
                s.push(c);
                self.advance();
            }
        }
        let v = Value::string(&s);
        self.ctx
            .set_source_loc(&v, self.name, start.line, start.col);
        Ok(v)
    }

    fn read_atom(&mut self) -> Result<Value, VdError> {
        let start = self.loc();
        let mut tok = String::new();
        while let Some(c) = self.peek() {
            if is_delim(c) {
                break;
            }
            tok.push(c);
            self.advance();
        }
        // a token that parses completely as a float literal is a number
        if let Ok(n) = tok.parse::<f64>() {
            let v = Value::number(n);
            self.ctx
                .set_source_loc(&v, self.name, start.line, start.col);
            return Ok(v);
        }
        if tok == "nil" {
            return Ok(Value::nil());
        }
        let v = Value::symbol(&tok);
        self.ctx
            .set_source_loc(&v, self.name, start.line, start.col);
        Ok(v)
    }
}
