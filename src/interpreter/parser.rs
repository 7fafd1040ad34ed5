use super::ast::{Call, Program, Statement};
use super::value::{Args, CompareOp, FunctionRef, Literal, Predicate, PropertyPath, Value};
use super::{InterpreterError, Result};

/// Parse DSL source text into a [`Program`].
///
/// Statements are separated by newlines or `;`. A line that starts with `.`
/// continues the chain of the previous statement.
pub fn parse_program(source: &str) -> Result<Program> {
    let mut parser = Parser::new(source);
    let mut statements = Vec::new();
    loop {
        parser.skip_trivia();
        if parser.eof() {
            break;
        }
        statements.push(parser.parse_statement()?);
    }
    Ok(Program { statements })
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    index: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            index: 0,
        }
    }

    fn eof(&self) -> bool {
        self.index >= self.bytes.len()
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.index + offset).copied()
    }

    fn advance(&mut self) {
        if self.index < self.bytes.len() {
            self.index += 1;
        }
    }

    /// Skip spaces and tabs only; newlines are significant inside arguments
    /// only as whitespace, which [`Self::skip_trivia`] handles.
    fn skip_inline_ws(&mut self) {
        while matches!(self.current(), Some(b' ' | b'\t' | b'\r')) {
            self.advance();
        }
    }

    /// Skip whitespace, statement separators, and comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.current() {
                Some(ch) if ch.is_ascii_whitespace() || ch == b';' => self.advance(),
                Some(b'#') => self.skip_line(),
                Some(b'/') if self.peek(1) == Some(b'/') => self.skip_line(),
                _ => break,
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(ch) = self.current() {
            self.advance();
            if ch == b'\n' {
                break;
            }
        }
    }

    /// Whitespace inside parentheses and brackets, including newlines.
    fn skip_ws(&mut self) {
        while matches!(self.current(), Some(ch) if ch.is_ascii_whitespace()) {
            self.advance();
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.current() == Some(byte) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        if self.current() == Some(b'.') {
            return Err(self.error("chained call without a receiver"));
        }
        let name = self.parse_ident()?;
        let mut calls = vec![self.parse_call_tail(name)?];
        loop {
            let checkpoint = self.index;
            self.skip_ws_and_comments();
            if self.current() == Some(b'.') {
                self.advance();
                let name = self.parse_ident()?;
                calls.push(self.parse_call_tail(name)?);
            } else {
                self.index = checkpoint;
                break;
            }
        }
        self.skip_inline_ws();
        match self.current() {
            None | Some(b'\n' | b';' | b'#') => Ok(Statement { calls }),
            Some(b'/') if self.peek(1) == Some(b'/') => Ok(Statement { calls }),
            Some(_) => Err(self.error("unexpected input after statement")),
        }
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            self.skip_ws();
            match self.current() {
                Some(b'#') => self.skip_line(),
                Some(b'/') if self.peek(1) == Some(b'/') => self.skip_line(),
                _ => break,
            }
        }
    }

    fn parse_call_tail(&mut self, name: String) -> Result<Call> {
        self.skip_inline_ws();
        self.expect(b'(')?;
        let args = self.parse_args()?;
        Ok(Call::new(name, args))
    }

    /// Parse arguments up to and including the closing `)`.
    fn parse_args(&mut self) -> Result<Args> {
        let mut args = Args::new();
        self.skip_ws();
        if self.current() == Some(b')') {
            self.advance();
            return Ok(args);
        }
        loop {
            self.skip_ws();
            self.parse_arg(&mut args)?;
            self.skip_ws();
            match self.current() {
                Some(b',') => self.advance(),
                Some(b')') => {
                    self.advance();
                    return Ok(args);
                }
                None => return Err(self.error("unterminated argument list")),
                Some(_) => return Err(self.error("expected ',' or ')'")),
            }
        }
    }

    fn parse_arg(&mut self, args: &mut Args) -> Result<()> {
        let start = self.index;
        if self.current().is_some_and(is_ident_start) {
            let name = self.parse_ident()?;
            self.skip_inline_ws();
            if self.current() == Some(b'=') && self.peek(1) != Some(b'=') {
                self.advance();
                self.skip_ws();
                let value = self.parse_value()?;
                args.push_named(name, value);
                return Ok(());
            }
            self.index = start;
        }
        let value = self.parse_value()?;
        args.push_positional(value);
        Ok(())
    }

    fn parse_value(&mut self) -> Result<Value> {
        match self.current() {
            None => Err(self.error("unexpected end of input")),
            Some(b'"') => self.parse_string().map(Value::String),
            Some(b'[') => self.parse_array(),
            Some(b'@') => {
                self.advance();
                let name = self.parse_ident()?;
                Ok(Value::Function(FunctionRef {
                    name,
                    receiver: None,
                    args: None,
                }))
            }
            Some(b'-' | b'+' | b'0'..=b'9') => self.parse_number().map(Value::Number),
            Some(ch) if is_ident_start(ch) => self.parse_ident_value(),
            Some(ch) => Err(self.error(&format!("unexpected character '{}'", ch as char))),
        }
    }

    /// Identifier-led values: keywords, bare identifiers, nested calls,
    /// receiver calls, and predicates.
    fn parse_ident_value(&mut self) -> Result<Value> {
        let first = self.parse_ident()?;
        match first.as_str() {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            "none" | "null" => return Ok(Value::None),
            _ => {}
        }

        if self.current() == Some(b'(') {
            let call = self.parse_call_tail(first)?;
            return Ok(Value::Function(FunctionRef {
                name: call.name,
                receiver: None,
                args: Some(call.args),
            }));
        }

        let (variable, property) =
            if self.current() == Some(b'.') && self.peek(1).is_some_and(is_ident_start) {
                self.advance();
                let member = self.parse_ident()?;
                if self.current() == Some(b'(') {
                    let call = self.parse_call_tail(member)?;
                    return Ok(Value::Function(FunctionRef {
                        name: call.name,
                        receiver: Some(first),
                        args: Some(call.args),
                    }));
                }
                (Some(first), member)
            } else {
                (None, first)
            };

        let index = if self.current() == Some(b'[') {
            self.advance();
            self.skip_ws();
            let num = self.parse_number()?;
            self.skip_ws();
            self.expect(b']')?;
            if num < 0.0 || num.fract() != 0.0 {
                return Err(self.error("property index must be a non-negative integer"));
            }
            Some(num as usize)
        } else {
            None
        };

        let checkpoint = self.index;
        self.skip_ws();
        if let Some(op) = self.parse_operator() {
            self.skip_ws();
            let literal = self.parse_literal()?;
            return Ok(Value::Predicate(Predicate {
                path: PropertyPath {
                    variable,
                    property,
                    index,
                },
                op,
                literal,
            }));
        }
        self.index = checkpoint;

        match (variable, index) {
            (None, None) => Ok(Value::String(property)),
            _ => Err(self.error("property path must be followed by a comparison")),
        }
    }

    fn parse_operator(&mut self) -> Option<CompareOp> {
        let (op, width) = match (self.current()?, self.peek(1)) {
            (b'=', Some(b'=')) => (CompareOp::Eq, 2),
            (b'!', Some(b'=')) => (CompareOp::Ne, 2),
            (b'<', Some(b'=')) => (CompareOp::Le, 2),
            (b'>', Some(b'=')) => (CompareOp::Ge, 2),
            (b'<', _) => (CompareOp::Lt, 1),
            (b'>', _) => (CompareOp::Gt, 1),
            _ => return None,
        };
        self.index += width;
        Some(op)
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        match self.current() {
            Some(b'"') => self.parse_string().map(Literal::String),
            Some(b'-' | b'+' | b'0'..=b'9') => self.parse_number().map(Literal::Number),
            Some(ch) if is_ident_start(ch) => match self.parse_ident()?.as_str() {
                "true" => Ok(Literal::Bool(true)),
                "false" => Ok(Literal::Bool(false)),
                other => Err(self.error(&format!(
                    "predicate literal must be a string, number, or boolean, got '{other}'"
                ))),
            },
            _ => Err(self.error("expected predicate literal")),
        }
    }

    fn parse_array(&mut self) -> Result<Value> {
        self.advance(); // '['
        let mut items = Vec::new();
        self.skip_ws();
        if self.current() == Some(b']') {
            self.advance();
            return Ok(Value::Array(items));
        }
        loop {
            self.skip_ws();
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.current() {
                Some(b',') => self.advance(),
                Some(b']') => {
                    self.advance();
                    return Ok(Value::Array(items));
                }
                None => return Err(self.error("unterminated array")),
                Some(_) => return Err(self.error("expected ',' or ']'")),
            }
        }
    }

    fn parse_string(&mut self) -> Result<String> {
        // consume opening quote
        self.advance();
        let start = self.index;
        let mut buf = String::new();
        let mut segment_start = start;
        while let Some(ch) = self.current() {
            match ch {
                b'"' => {
                    buf.push_str(&self.src[segment_start..self.index]);
                    self.advance();
                    return Ok(buf);
                }
                b'\\' => {
                    buf.push_str(&self.src[segment_start..self.index]);
                    self.advance();
                    let escaped = self
                        .current()
                        .ok_or_else(|| self.error("incomplete escape"))?;
                    let value = match escaped {
                        b'"' => '"',
                        b'\\' => '\\',
                        b'n' => '\n',
                        b't' => '\t',
                        other => {
                            return Err(self.error(&format!("unknown escape: \\{}", other as char)));
                        }
                    };
                    buf.push(value);
                    self.advance();
                    segment_start = self.index;
                }
                _ => self.advance(),
            }
        }
        Err(self.error("unterminated string literal"))
    }

    fn parse_number(&mut self) -> Result<f64> {
        let start = self.index;
        if matches!(self.current(), Some(b'-' | b'+')) {
            self.advance();
        }
        let mut has_digit = false;
        while matches!(self.current(), Some(ch) if ch.is_ascii_digit()) {
            has_digit = true;
            self.advance();
        }
        if self.current() == Some(b'.') && self.peek(1).is_some_and(|ch| ch.is_ascii_digit()) {
            self.advance();
            while matches!(self.current(), Some(ch) if ch.is_ascii_digit()) {
                self.advance();
            }
        }
        if !has_digit {
            self.index = start;
            return Err(self.error("expected number"));
        }
        let text = &self.src[start..self.index];
        text.parse::<f64>().map_err(|_| {
            InterpreterError::Syntax(format!("invalid number '{}' at byte {}", text, start))
        })
    }

    fn parse_ident(&mut self) -> Result<String> {
        let start = self.index;
        if !self.current().is_some_and(is_ident_start) {
            return Err(self.error("expected identifier"));
        }
        while self.current().is_some_and(is_ident_char) {
            self.advance();
        }
        Ok(self.src[start..self.index].to_string())
    }

    fn error(&self, msg: &str) -> InterpreterError {
        InterpreterError::Syntax(format!("{} at byte {}", msg, self.index))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}
