//! Expression parsing for embedded template code.
//!
//! The expression language is deliberately small: member-access paths over
//! the model (or a loop variable), and inline list literals of scalars for
//! `@foreach` iterables. Anything richer belongs to a real expression
//! evaluator, which this engine treats as an external collaborator.

use serde_json::Value;

use crate::error::CompileError;

/// A parsed embedded expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `root(.Member | [index])*`
    Path { root: String, steps: Vec<PathStep> },
    /// `[1, 2, "three", true]`: scalars only, valid as a loop iterable.
    List(Vec<Value>),
}

/// One step along a member-access chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Member(String),
    Index(usize),
}

impl Expr {
    /// Parses an expression as captured by the segment parser.
    ///
    /// `offset` is the expression's byte offset in the template source and is
    /// carried into error values.
    ///
    /// # Errors
    ///
    /// [`CompileError::MalformedExpression`] when the text is not a path or
    /// a scalar list literal.
    pub fn parse(source: &str, offset: usize) -> Result<Expr, CompileError> {
        let mut cursor = Cursor::new(source, offset);
        cursor.skip_whitespace();
        let expr = if cursor.peek() == Some(b'[') {
            cursor.list()?
        } else {
            cursor.path()?
        };
        cursor.skip_whitespace();
        if !cursor.at_end() {
            return Err(cursor.fail("trailing characters after the expression"));
        }
        Ok(expr)
    }

    /// The member name that starts this expression, if it is a path.
    pub fn root(&self) -> Option<&str> {
        match self {
            Expr::Path { root, .. } => Some(root),
            Expr::List(_) => None,
        }
    }
}

struct Cursor<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str, offset: usize) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            offset,
        }
    }

    fn fail(&self, detail: &str) -> CompileError {
        CompileError::MalformedExpression {
            source: self.source.to_string(),
            offset: self.offset,
            detail: detail.to_string(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        let start = self.pos;
        match self.peek() {
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => self.pos += 1,
            _ => return None,
        }
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        Some(&self.source[start..self.pos])
    }

    fn path(&mut self) -> Result<Expr, CompileError> {
        let root = self
            .ident()
            .ok_or_else(|| self.fail("expected an identifier"))?
            .to_string();
        let mut steps = Vec::new();
        loop {
            match self.peek() {
                Some(b'.') => {
                    self.pos += 1;
                    let member = self
                        .ident()
                        .ok_or_else(|| self.fail("expected a member name after '.'"))?;
                    steps.push(PathStep::Member(member.to_string()));
                }
                Some(b'[') => {
                    self.pos += 1;
                    let index = self.integer()?;
                    if self.peek() != Some(b']') {
                        return Err(self.fail("expected ']' after the index"));
                    }
                    self.pos += 1;
                    let index = usize::try_from(index)
                        .map_err(|_| self.fail("negative index"))?;
                    steps.push(PathStep::Index(index));
                }
                _ => break,
            }
        }
        Ok(Expr::Path { root, steps })
    }

    fn list(&mut self) -> Result<Expr, CompileError> {
        debug_assert_eq!(self.peek(), Some(b'['));
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(b']') {
                self.pos += 1;
                return Ok(Expr::List(items));
            }
            items.push(self.scalar()?);
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Expr::List(items));
                }
                _ => return Err(self.fail("expected ',' or ']' in the list literal")),
            }
        }
    }

    fn scalar(&mut self) -> Result<Value, CompileError> {
        match self.peek() {
            Some(b'"') => self.string(),
            Some(b) if b == b'-' || b.is_ascii_digit() => self.number(),
            Some(_) | None => {
                let start = self.pos;
                match self.ident() {
                    Some("true") => Ok(Value::Bool(true)),
                    Some("false") => Ok(Value::Bool(false)),
                    _ => {
                        self.pos = start;
                        Err(self.fail("expected a scalar list element"))
                    }
                }
            }
        }
    }

    fn string(&mut self) -> Result<Value, CompileError> {
        self.pos += 1; // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(Value::String(text));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'"') => text.push('"'),
                        Some(b'\\') => text.push('\\'),
                        Some(b'n') => text.push('\n'),
                        Some(b't') => text.push('\t'),
                        _ => return Err(self.fail("unsupported escape in string literal")),
                    }
                    self.pos += 1;
                }
                Some(_) => {
                    // Strings are scanned bytewise but pushed charwise to keep
                    // multibyte content intact.
                    let c = self.source[self.pos..]
                        .chars()
                        .next()
                        .unwrap_or('\u{FFFD}');
                    text.push(c);
                    self.pos += c.len_utf8();
                }
                None => return Err(self.fail("unterminated string literal")),
            }
        }
    }

    fn number(&mut self) -> Result<Value, CompileError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some(b'.')
            && matches!(self.bytes.get(self.pos + 1), Some(b) if b.is_ascii_digit())
        {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = &self.source[start..self.pos];
        if is_float {
            let parsed: f64 = text
                .parse()
                .map_err(|_| self.fail("invalid number literal"))?;
            serde_json::Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| self.fail("invalid number literal"))
        } else {
            let parsed: i64 = text
                .parse()
                .map_err(|_| self.fail("invalid number literal"))?;
            Ok(Value::Number(parsed.into()))
        }
    }

    fn integer(&mut self) -> Result<i64, CompileError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        self.source[start..self.pos]
            .parse()
            .map_err(|_| self.fail("expected an integer index"))
    }
}
