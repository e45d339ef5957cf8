//! Segment parser for Vellum `@` template markup.
//!
//! This crate turns raw template source into a flat stream of [`Segment`]s:
//! literal text, embedded expressions, control-flow block markers, and
//! template-level directives. It is the first stage of the Vellum compile
//! pipeline; lowering and execution live in `vellum-render`.
//!
//! # Example
//!
//! ```rust
//! use vellum_parser::{parse, Segment};
//!
//! let segments = parse("Hello @Model.Name, welcome!").unwrap();
//! assert_eq!(segments.len(), 3);
//! assert!(matches!(&segments[1], Segment::Expression { source, .. } if source == "Model.Name"));
//! ```
//!
//! # Markup Syntax
//!
//! - `@Model.Name`: expression atom, a member-access chain, greedily matched
//!   over identifier, `.`, and `[index]` characters.
//! - `@inherits TemplateBase<Person>`: model-binding directive; consumes the
//!   rest of its line (newline included) and emits no output.
//! - `@foreach (item in Model.Items) { ... }`: iteration block. Parens are
//!   optional, and a leading element-type annotation before the loop variable
//!   (`@foreach(int i in Model.Ids)`) is accepted and ignored.
//! - `@if (Model.Active) { ... }`: conditional block.
//! - `}`: closes the innermost open block; outside any block it is plain text.
//! - `@@`: escape for a literal `@`.
//!
//! Whitespace directly after a control `{` and directly before a `}` is block
//! formatting, not output: `@foreach(i in Model.Ids) { @i }` emits the items
//! back to back.
//!
//! Block balance is *not* enforced here. The scanner tracks nesting depth only
//! to decide whether `}` closes a block or is literal text; the program
//! builder in `vellum-render` rejects unbalanced streams.

use thiserror::Error;

/// The character that switches the scanner from literal mode to code mode.
pub const MARKER: char = '@';

/// A classified slice of template source, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Verbatim output text.
    Literal { text: String, offset: usize },
    /// An embedded expression whose value is appended to the output.
    Expression { source: String, offset: usize },
    /// A template-level declaration. Emits no output.
    Directive {
        kind: DirectiveKind,
        argument: String,
        offset: usize,
    },
    /// Opens a control-flow block (`@foreach` / `@if`).
    ControlOpen {
        kind: ControlKind,
        /// Iterable expression for `Foreach`, condition for `If`.
        expr: String,
        /// Byte offset of `expr` within the template source.
        expr_offset: usize,
        /// Loop variable name. `Some` for `Foreach`, `None` for `If`.
        var: Option<String>,
        offset: usize,
    },
    /// Closes the innermost open control block.
    ControlClose { offset: usize },
}

impl Segment {
    /// Byte offset of this segment in the template source.
    pub fn offset(&self) -> usize {
        match self {
            Segment::Literal { offset, .. }
            | Segment::Expression { offset, .. }
            | Segment::Directive { offset, .. }
            | Segment::ControlOpen { offset, .. }
            | Segment::ControlClose { offset } => *offset,
        }
    }
}

/// Recognized directive keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    /// `@inherits Base<Model>`: declares the bound model type.
    Inherits,
}

/// Control-flow block kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Foreach,
    If,
}

impl ControlKind {
    fn keyword(self) -> &'static str {
        match self {
            ControlKind::Foreach => "foreach",
            ControlKind::If => "if",
        }
    }
}

/// Malformed markup detected while scanning.
///
/// Offsets are byte positions into the template source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("expected an expression after '@' at offset {offset}")]
    ExpectedExpression { offset: usize },

    #[error("unterminated '(' in @{keyword} header at offset {offset}")]
    UnterminatedHeader { keyword: &'static str, offset: usize },

    #[error("expected '{{' after @{keyword} header at offset {offset}")]
    MissingBlockBrace { keyword: &'static str, offset: usize },

    #[error("malformed @{keyword} header at offset {offset}: {detail}")]
    MalformedHeader {
        keyword: &'static str,
        offset: usize,
        detail: String,
    },

    #[error("@inherits directive at offset {offset} is missing its type argument")]
    MalformedDirective { offset: usize },
}

/// Parses template source into an ordered segment stream.
///
/// Empty literals are never emitted, and every segment carries the byte
/// offset it started at. See the crate docs for the markup grammar.
///
/// # Errors
///
/// Returns [`SyntaxError`] on unterminated control headers, a missing `{`
/// after a control header, a bare `@` that starts no expression, or an
/// `@inherits` directive without a type argument.
pub fn parse(source: &str) -> Result<Vec<Segment>, SyntaxError> {
    Scanner::new(source).run()
}

/// Resolved model binding extracted from the directive stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelBinding {
    /// No `@inherits` directive: expressions resolve dynamically at render time.
    Dynamic,
    /// A declared model type, e.g. `Person` from `@inherits TemplateBase<Person>`.
    Named { type_name: String, offset: usize },
}

impl ModelBinding {
    /// The declared type name, or `None` for dynamic binding.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            ModelBinding::Dynamic => None,
            ModelBinding::Named { type_name, .. } => Some(type_name),
        }
    }
}

/// Invalid directive usage detected while resolving the segment stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("duplicate @inherits directive at offset {second} (first at offset {first})")]
    Duplicate { first: usize, second: usize },

    #[error("malformed @inherits argument {argument:?} at offset {offset}")]
    Malformed { argument: String, offset: usize },
}

/// Extracts the model binding and strips directive segments from the stream.
///
/// The directive argument is parsed structurally: `TemplateBase<Person>`
/// yields `Person` (the generic argument), while a bare `Person` is taken
/// as-is. Dotted names are accepted in both positions.
///
/// # Errors
///
/// [`DirectiveError::Duplicate`] if a second `@inherits` appears, or
/// [`DirectiveError::Malformed`] if the argument is not a type reference.
pub fn resolve_directives(
    segments: Vec<Segment>,
) -> Result<(ModelBinding, Vec<Segment>), DirectiveError> {
    let mut binding = ModelBinding::Dynamic;
    let mut first_offset: Option<usize> = None;
    let mut stripped = Vec::with_capacity(segments.len());

    for segment in segments {
        match segment {
            Segment::Directive {
                kind: DirectiveKind::Inherits,
                argument,
                offset,
            } => {
                if let Some(first) = first_offset {
                    return Err(DirectiveError::Duplicate {
                        first,
                        second: offset,
                    });
                }
                first_offset = Some(offset);
                let type_name = model_type_from_argument(&argument).ok_or_else(|| {
                    DirectiveError::Malformed {
                        argument: argument.clone(),
                        offset,
                    }
                })?;
                binding = ModelBinding::Named { type_name, offset };
            }
            other => stripped.push(other),
        }
    }

    Ok((binding, stripped))
}

/// Scans source for the declared model type without a full parse.
///
/// This is a line scan for the first `@inherits` directive, used to form
/// cache keys cheaply before any compilation happens. The full pipeline
/// re-resolves (and validates) the directive during the build itself.
pub fn scan_model_type(source: &str) -> Option<String> {
    for line in source.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix("@inherits") {
            if rest.starts_with(char::is_whitespace) {
                return model_type_from_argument(rest.trim());
            }
        }
    }
    None
}

/// Extracts the model type name from an `@inherits` argument.
///
/// `Base<T>` forms yield `T`; a bare type name yields itself.
fn model_type_from_argument(argument: &str) -> Option<String> {
    let argument = argument.trim();
    if let Some(open) = argument.find('<') {
        let base = &argument[..open];
        let rest = &argument[open + 1..];
        let inner = rest.strip_suffix('>')?.trim();
        if is_dotted_ident(base) && is_dotted_ident(inner) {
            return Some(inner.to_string());
        }
        return None;
    }
    if is_dotted_ident(argument) {
        return Some(argument.to_string());
    }
    None
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_dotted_ident(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if is_ident_start(c)) && chars.all(is_ident_char)
        })
}

/// Two-mode scanner: literal mode by default, code mode on [`MARKER`].
struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    segments: Vec<Segment>,
    literal: String,
    literal_start: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
            segments: Vec::new(),
            literal: String::new(),
            literal_start: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self, c: char) {
        self.pos += c.len_utf8();
    }

    fn push_literal_char(&mut self, c: char, at: usize) {
        if self.literal.is_empty() {
            self.literal_start = at;
        }
        self.literal.push(c);
    }

    fn flush_literal(&mut self) {
        if !self.literal.is_empty() {
            self.segments.push(Segment::Literal {
                text: std::mem::take(&mut self.literal),
                offset: self.literal_start,
            });
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.bump(c);
        }
    }

    /// Consumes a run of identifier characters, returning the matched slice.
    fn consume_ident(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !is_ident_char(c) {
                break;
            }
            self.bump(c);
        }
        &self.src[start..self.pos]
    }

    fn run(mut self) -> Result<Vec<Segment>, SyntaxError> {
        while let Some(c) = self.peek() {
            match c {
                MARKER => {
                    let at = self.pos;
                    self.bump(c);
                    match self.peek() {
                        // `@@` escape: a literal `@`.
                        Some(MARKER) => {
                            self.push_literal_char(MARKER, at);
                            self.bump(MARKER);
                        }
                        Some(next) if is_ident_start(next) => self.scan_code(at)?,
                        _ => return Err(SyntaxError::ExpectedExpression { offset: at }),
                    }
                }
                '}' if self.depth > 0 => {
                    // Whitespace touching the closing brace is block formatting.
                    let kept = self.literal.trim_end().len();
                    self.literal.truncate(kept);
                    self.flush_literal();
                    self.segments.push(Segment::ControlClose { offset: self.pos });
                    self.depth -= 1;
                    self.bump(c);
                }
                _ => {
                    self.push_literal_char(c, self.pos);
                    self.bump(c);
                }
            }
        }
        self.flush_literal();
        Ok(self.segments)
    }

    /// Classifies the token following `@`: directive, control keyword, or
    /// expression atom. `at` is the offset of the marker itself.
    fn scan_code(&mut self, at: usize) -> Result<(), SyntaxError> {
        let word_start = self.pos;
        let word = self.consume_ident();
        match word {
            "inherits" if self.peek().is_none() || self.peek().is_some_and(char::is_whitespace) => {
                self.flush_literal();
                self.scan_directive(at)
            }
            "foreach" => {
                self.flush_literal();
                self.scan_control(ControlKind::Foreach, at)
            }
            "if" => {
                self.flush_literal();
                self.scan_control(ControlKind::If, at)
            }
            _ => {
                self.flush_literal();
                self.scan_expression_tail(word_start, at);
                Ok(())
            }
        }
    }

    /// Consumes an `@inherits` line, newline included.
    fn scan_directive(&mut self, at: usize) -> Result<(), SyntaxError> {
        let rest = &self.src[self.pos..];
        let (argument, consumed) = match rest.find('\n') {
            Some(nl) => (&rest[..nl], nl + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;
        let argument = argument.trim();
        if argument.is_empty() {
            return Err(SyntaxError::MalformedDirective { offset: at });
        }
        self.segments.push(Segment::Directive {
            kind: DirectiveKind::Inherits,
            argument: argument.to_string(),
            offset: at,
        });
        self.literal_start = self.pos;
        Ok(())
    }

    /// Parses a control header, parenthesized or bare, and its opening `{`.
    fn scan_control(&mut self, kind: ControlKind, at: usize) -> Result<(), SyntaxError> {
        let keyword = kind.keyword();
        self.skip_whitespace();

        let (header_start, header) = if self.peek() == Some('(') {
            let paren_at = self.pos;
            self.bump('(');
            let start = self.pos;
            let mut nesting = 1usize;
            loop {
                match self.peek() {
                    Some('(') => {
                        nesting += 1;
                        self.bump('(');
                    }
                    Some(')') => {
                        nesting -= 1;
                        if nesting == 0 {
                            break;
                        }
                        self.bump(')');
                    }
                    Some(c) => self.bump(c),
                    None => {
                        return Err(SyntaxError::UnterminatedHeader {
                            keyword,
                            offset: paren_at,
                        })
                    }
                }
            }
            let header = &self.src[start..self.pos];
            self.bump(')');
            self.skip_whitespace();
            (start, header)
        } else {
            let start = self.pos;
            match self.src[start..].find('{') {
                Some(brace) => {
                    self.pos = start + brace;
                    (start, &self.src[start..self.pos])
                }
                None => {
                    return Err(SyntaxError::MissingBlockBrace {
                        keyword,
                        offset: self.src.len(),
                    })
                }
            }
        };

        if self.peek() != Some('{') {
            return Err(SyntaxError::MissingBlockBrace {
                keyword,
                offset: self.pos,
            });
        }
        self.bump('{');

        let segment = match kind {
            ControlKind::If => {
                let (expr, expr_offset) = trimmed_with_offset(header, header_start);
                if expr.is_empty() {
                    return Err(SyntaxError::MalformedHeader {
                        keyword,
                        offset: at,
                        detail: "empty condition".to_string(),
                    });
                }
                Segment::ControlOpen {
                    kind,
                    expr: expr.to_string(),
                    expr_offset,
                    var: None,
                    offset: at,
                }
            }
            ControlKind::Foreach => {
                let (var, expr, expr_rel) =
                    parse_foreach_header(header).map_err(|detail| SyntaxError::MalformedHeader {
                        keyword,
                        offset: at,
                        detail,
                    })?;
                Segment::ControlOpen {
                    kind,
                    expr: expr.to_string(),
                    expr_offset: header_start + expr_rel,
                    var: Some(var.to_string()),
                    offset: at,
                }
            }
        };
        self.segments.push(segment);
        self.depth += 1;

        // Whitespace right after the opening brace is block formatting.
        self.skip_whitespace();
        self.literal_start = self.pos;
        Ok(())
    }

    /// Greedy longest-match over a member-access chain: identifiers, `.`
    /// followed by an identifier start, and digit-only `[index]` brackets.
    /// The leading identifier has already been consumed.
    fn scan_expression_tail(&mut self, word_start: usize, at: usize) {
        loop {
            match self.peek() {
                Some('.') => {
                    let after_dot = &self.src[self.pos + 1..];
                    if matches!(after_dot.chars().next(), Some(c) if is_ident_start(c)) {
                        self.bump('.');
                        self.consume_ident();
                    } else {
                        break;
                    }
                }
                Some('[') => {
                    let rest = &self.src[self.pos + 1..];
                    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
                    if digits > 0 && rest.as_bytes().get(digits) == Some(&b']') {
                        self.pos += 1 + digits + 1;
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
        self.segments.push(Segment::Expression {
            source: self.src[word_start..self.pos].to_string(),
            offset: at,
        });
        self.literal_start = self.pos;
    }
}

/// Trims a slice while tracking the offset of its trimmed start.
fn trimmed_with_offset(text: &str, base: usize) -> (&str, usize) {
    let trimmed = text.trim_start();
    let offset = base + (text.len() - trimmed.len());
    (trimmed.trim_end(), offset)
}

/// Parses `[elemType] var in iterable`, returning the variable name, the
/// iterable expression, and the expression's offset within the header.
fn parse_foreach_header(header: &str) -> Result<(&str, &str, usize), String> {
    let mut cursor = HeaderCursor::new(header);

    cursor.skip_whitespace();
    let first = cursor
        .ident()
        .ok_or_else(|| "expected a loop variable".to_string())?;

    cursor.skip_whitespace();
    let second = cursor.ident();

    let var = match second {
        // `var in expr`
        Some("in") => first,
        // `type var in expr`; the element-type annotation is ignored.
        Some(name) => {
            cursor.skip_whitespace();
            match cursor.ident() {
                Some("in") => name,
                _ => return Err("expected 'in' after the loop variable".to_string()),
            }
        }
        None => return Err("expected 'in' after the loop variable".to_string()),
    };
    if var == "in" {
        return Err("expected a loop variable".to_string());
    }

    cursor.skip_whitespace();
    let expr_rel = cursor.pos;
    let expr = header[expr_rel..].trim_end();
    if expr.is_empty() {
        return Err("empty iterable expression".to_string());
    }
    Ok((var, expr, expr_rel))
}

/// Minimal cursor for picking identifiers out of a control header.
struct HeaderCursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> HeaderCursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.src[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn ident(&mut self) -> Option<&'a str> {
        let rest = &self.src[self.pos..];
        let mut chars = rest.chars();
        match chars.next() {
            Some(c) if is_ident_start(c) => {}
            _ => return None,
        }
        let len = rest
            .char_indices()
            .find(|&(_, c)| !is_ident_char(c))
            .map_or(rest.len(), |(i, _)| i);
        self.pos += len;
        Some(&rest[..len])
    }
}
