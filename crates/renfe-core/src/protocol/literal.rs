//! Permissive object-literal grammar
//!
//! Parses the literal values embedded in remote-call replies: a superset of
//! JSON that also accepts unquoted keys, single-quoted strings, trailing
//! commas, comments, `undefined` and `new Date(<millis>)`. Nothing is ever
//! evaluated; anything outside the grammar is an error.

use std::collections::BTreeMap;

use crate::error::{RenfeError, Result};

/// Maximum nesting depth of lists and maps
const MAX_DEPTH: usize = 64;

/// Decoded literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Look up a key if this is a map
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Parse a complete literal; trailing non-whitespace is an error.
///
/// ```
/// use renfe_core::protocol::literal::{parse_literal, Value};
///
/// let v = parse_literal("{a: 'x', b: [1, 2,],}").unwrap();
/// assert_eq!(v.get("a"), Some(&Value::String("x".into())));
/// ```
pub fn parse_literal(text: &str) -> Result<Value> {
    let mut parser = Parser::new(text);
    let value = parser.parse_value()?;
    parser.skip_trivia()?;
    if !parser.at_end() {
        return Err(parser.error("trailing content after literal"));
    }
    Ok(value)
}

/// Cursor over literal text
pub(crate) struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Error mentioning only the size of the remaining fragment
    pub(crate) fn error(&self, reason: &str) -> RenfeError {
        RenfeError::protocol(reason, self.src.len().saturating_sub(self.pos))
    }

    /// Skip whitespace and `//` / `/* */` comments
    pub(crate) fn skip_trivia(&mut self) -> Result<()> {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if trimmed.starts_with("//") {
                match trimmed.find('\n') {
                    Some(end) => self.pos += end + 1,
                    None => self.pos = self.src.len(),
                }
            } else if trimmed.starts_with("/*") {
                match trimmed[2..].find("*/") {
                    Some(end) => self.pos += end + 4,
                    None => return Err(self.error("unterminated comment")),
                }
            } else {
                return Ok(());
            }
        }
    }

    /// Consume `expected` after optional trivia
    pub(crate) fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_trivia()?;
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(_) => Err(self.error("unexpected token")),
            None => Err(self.error("truncated literal")),
        }
    }

    /// Consume `expected` if it is the next token
    pub(crate) fn eat(&mut self, expected: char) -> Result<bool> {
        self.skip_trivia()?;
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn parse_value(&mut self) -> Result<Value> {
        self.skip_trivia()?;
        match self.peek() {
            None => Err(self.error("truncated literal")),
            Some('{') => self.nested(Self::parse_map),
            Some('[') => self.nested(Self::parse_list),
            Some('"') | Some('\'') => Ok(Value::String(self.parse_string()?)),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => {
                Ok(Value::Number(self.parse_number()?))
            }
            Some(c) if is_ident_start(c) => self.parse_keyword(),
            Some(_) => Err(self.error("unexpected token")),
        }
    }

    fn nested(&mut self, f: fn(&mut Self) -> Result<Value>) -> Result<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("literal nested too deeply"));
        }
        self.depth += 1;
        let value = f(self);
        self.depth -= 1;
        value
    }

    fn parse_map(&mut self) -> Result<Value> {
        self.expect('{')?;
        let mut map = BTreeMap::new();
        loop {
            if self.eat('}')? {
                return Ok(Value::Map(map));
            }
            let key = self.parse_key()?;
            self.expect(':')?;
            let value = self.parse_value()?;
            map.insert(key, value);
            if !self.eat(',')? {
                self.expect('}')?;
                return Ok(Value::Map(map));
            }
        }
    }

    fn parse_list(&mut self) -> Result<Value> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            if self.eat(']')? {
                return Ok(Value::List(items));
            }
            items.push(self.parse_value()?);
            if !self.eat(',')? {
                self.expect(']')?;
                return Ok(Value::List(items));
            }
        }
    }

    fn parse_key(&mut self) -> Result<String> {
        self.skip_trivia()?;
        match self.peek() {
            Some('"') | Some('\'') => self.parse_string(),
            Some(c) if is_ident_start(c) => Ok(self.parse_identifier().to_string()),
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
                Ok(self.src[start..self.pos].to_string())
            }
            Some(_) => Err(self.error("invalid object key")),
            None => Err(self.error("truncated literal")),
        }
    }

    pub(crate) fn parse_identifier(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn parse_keyword(&mut self) -> Result<Value> {
        let start = self.pos;
        match self.parse_identifier() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "null" | "undefined" => Ok(Value::Null),
            "NaN" => Ok(Value::Number(f64::NAN)),
            "Infinity" => Ok(Value::Number(f64::INFINITY)),
            "new" => self.parse_date(),
            _ => {
                self.pos = start;
                Err(self.error("unresolved identifier"))
            }
        }
    }

    /// `new Date(<millis>)`, yielding the millisecond count
    fn parse_date(&mut self) -> Result<Value> {
        self.skip_trivia()?;
        if self.parse_identifier() != "Date" {
            return Err(self.error("unsupported constructor"));
        }
        self.expect('(')?;
        self.skip_trivia()?;
        let millis = self.parse_number()?;
        self.expect(')')?;
        Ok(Value::Number(millis))
    }

    pub(crate) fn parse_string(&mut self) -> Result<String> {
        let quote = match self.bump() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("expected string")),
        };
        let mut out = String::new();
        loop {
            let c = self.bump().ok_or_else(|| self.error("unterminated string"))?;
            match c {
                c if c == quote => return Ok(out),
                '\\' => {
                    let esc = self.bump().ok_or_else(|| self.error("unterminated string"))?;
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'v' => out.push('\u{b}'),
                        '0' => out.push('\0'),
                        'u' => out.push(self.parse_unicode_escape()?),
                        'x' => {
                            let code = self.parse_hex(2)?;
                            out.push(char::from_u32(code).ok_or_else(|| self.error("invalid escape"))?);
                        }
                        '\n' => {}
                        other => out.push(other),
                    }
                }
                '\n' => return Err(self.error("newline in string")),
                c => out.push(c),
            }
        }
    }

    fn parse_unicode_escape(&mut self) -> Result<char> {
        let high = self.parse_hex(4)?;
        if (0xD800..0xDC00).contains(&high) && self.rest().starts_with("\\u") {
            self.pos += 2;
            let low = self.parse_hex(4)?;
            if (0xDC00..0xE000).contains(&low) {
                let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                return char::from_u32(code).ok_or_else(|| self.error("invalid escape"));
            }
            return Err(self.error("invalid surrogate pair"));
        }
        Ok(char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    fn parse_hex(&mut self, digits: usize) -> Result<u32> {
        let rest = self.rest();
        if rest.len() < digits || !rest.is_char_boundary(digits) {
            return Err(self.error("truncated escape"));
        }
        let code = u32::from_str_radix(&rest[..digits], 16)
            .map_err(|_| self.error("invalid escape"))?;
        self.pos += digits;
        Ok(code)
    }

    fn parse_number(&mut self) -> Result<f64> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }
        if self.rest().starts_with("0x") || self.rest().starts_with("0X") {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            let value = u64::from_str_radix(&self.src[digits_start..self.pos], 16)
                .map_err(|_| self.error("invalid number"))? as f64;
            return Ok(if self.src[start..].starts_with('-') { -value } else { value });
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E'))
        {
            let c = self.bump();
            if matches!(c, Some('e') | Some('E')) && matches!(self.peek(), Some('-') | Some('+')) {
                self.bump();
            }
        }
        let text = &self.src[start..self.pos];
        let text = text.strip_prefix('+').unwrap_or(text);
        match text.parse::<f64>() {
            Ok(n) => Ok(n),
            Err(_) => {
                self.pos = start;
                Err(self.error("invalid number"))
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}
