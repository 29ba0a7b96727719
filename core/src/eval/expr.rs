//! Expression parser: boolean conditions over output names.
//!
//! Expressions look like `status == ok AND NOT (retries > 3 OR log is empty)`.
//! Source text is split into tokens first, then a recursive-descent parser
//! builds `Expression` nodes that `ExprEvaluator` walks against an `Output`.
//!
//! A comparison relates one reference and one value. The left side is the
//! reference unless it is a literal, in which case the right side is read as
//! the reference instead (`3 < retries`, `"ok" == status`). A bare word on
//! the value side is text: `status == ok` compares against the string `ok`.

use std::iter::Peekable;
use std::str::CharIndices;

use serde_json::Value;


// ---------------------------------------------------------------------------
// Path
// ---------------------------------------------------------------------------

/// A dotted reference into the output map: `report.summary.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub segments: Vec<String>,
}

impl Path {
    /// Parse `"report.summary"` into a `Path`.
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        if input.is_empty() {
            return Err("empty path".into());
        }
        let mut segments = Vec::new();
        for seg in input.split('.') {
            if seg.is_empty() {
                return Err(format!("empty path segment in '{}'", input));
            }
            if !seg.chars().all(is_name_char) {
                return Err(format!("invalid identifier '{}'", input));
            }
            segments.push(seg.to_string());
        }
        Ok(Path { segments })
    }

    /// The output name this path starts from.
    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    pub fn to_string(&self) -> String {
        self.segments.join(".")
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}


// ---------------------------------------------------------------------------
// Operand / Operator
// ---------------------------------------------------------------------------

/// A value position: either a reference or a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Path(Path),
    Literal(Value),
}

impl Operand {
    /// Parse a single word. Numbers, `true`, `false`, `null` and quoted
    /// strings are literals; anything else must be a valid path.
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        if let Some(text) = unquote(input) {
            return Ok(Operand::Literal(Value::String(text.to_string())));
        }
        if let Some(value) = keyword_literal(input) {
            return Ok(Operand::Literal(value));
        }
        if input.contains(char::is_whitespace) {
            return Err(format!("expected a single name or value, got '{}'", input));
        }
        Ok(Operand::Path(Path::parse(input)?))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Operand::Literal(_))
    }

    fn path(&self) -> Option<&Path> {
        match self {
            Operand::Path(p) => Some(p),
            Operand::Literal(_) => None,
        }
    }
}

/// `true`, `false`, `null` or a number.
fn keyword_literal(word: &str) -> Option<Value> {
    match word {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }
    if let Ok(n) = word.parse::<i64>() {
        return Some(Value::from(n));
    }
    word.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

/// Strip one pair of matching single or double quotes.
fn unquote(input: &str) -> Option<&str> {
    let bytes = input.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return Some(&input[1..input.len() - 1]);
        }
    }
    None
}

/// Comparison operators supported in conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    GtEq,
    /// `<=`
    LtEq,
    /// `contains`
    Contains,
    /// `is empty`
    IsEmpty,
    /// `is not empty`
    IsNotEmpty,
}

impl Operator {
    fn from_symbol(sym: &str) -> Option<Operator> {
        match sym {
            "==" => Some(Operator::Eq),
            "!=" => Some(Operator::NotEq),
            ">" => Some(Operator::Gt),
            "<" => Some(Operator::Lt),
            ">=" => Some(Operator::GtEq),
            "<=" => Some(Operator::LtEq),
            _ => None,
        }
    }
}


// ---------------------------------------------------------------------------
// Condition / Expression
// ---------------------------------------------------------------------------

/// `left operator right`, or `left is [not] empty` with no right side.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub left: Operand,
    pub operator: Operator,
    pub right: Option<Operand>,
}

/// Logical expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Condition(Condition),
    /// A bare reference or literal; must be boolean where a truth value is
    /// required.
    Operand(Operand),
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
}

impl Expression {
    /// Parse a full expression. Connectives and the `contains`, `is`,
    /// `empty` keywords are case-insensitive; names and values are not.
    pub fn parse(input: &str) -> Result<Self, String> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err("empty expression".into());
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or_expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(Token::Close) => Err("unmatched ')'".into()),
            Some(other) => Err(format!("unexpected {}", other.describe())),
        }
    }

    /// Every output name the expression refers to.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::Condition(c) => {
                let sides = std::iter::once(&c.left).chain(c.right.as_ref());
                out.extend(sides.filter_map(Operand::path).map(Path::root));
            }
            Expression::Operand(op) => out.extend(op.path().map(Path::root)),
            Expression::And(exprs) | Expression::Or(exprs) => {
                for e in exprs {
                    e.collect_references(out);
                }
            }
            Expression::Not(inner) => inner.collect_references(out),
        }
    }
}


// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    /// Unquoted run of text: a name, number, keyword or bare value.
    Word(String),
    /// Quoted text with the quotes removed.
    Quoted(String),
    Symbol(Operator),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Open => "'('".into(),
            Token::Close => "')'".into(),
            Token::Word(w) => format!("'{}'", w),
            Token::Quoted(q) => format!("string '{}'", q),
            Token::Symbol(op) => format!("operator {:?}", op),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

fn is_symbol_char(c: char) -> bool {
    matches!(c, '=' | '!' | '<' | '>')
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '(' {
            chars.next();
            tokens.push(Token::Open);
        } else if c == ')' {
            chars.next();
            tokens.push(Token::Close);
        } else if c == '"' || c == '\'' {
            chars.next();
            tokens.push(Token::Quoted(quoted(input, start, c, &mut chars)?));
        } else if is_symbol_char(c) {
            let sym = take_while(input, start, &mut chars, is_symbol_char);
            let op = Operator::from_symbol(sym)
                .ok_or_else(|| format!("unknown operator '{}'", sym))?;
            tokens.push(Token::Symbol(op));
        } else {
            let word = take_while(input, start, &mut chars, |c| {
                !c.is_whitespace() && !matches!(c, '(' | ')' | '"' | '\'') && !is_symbol_char(c)
            });
            tokens.push(Token::Word(word.to_string()));
        }
    }
    Ok(tokens)
}

/// Consume up to and including the closing `quote`; the opening one is
/// already consumed.
fn quoted(
    input: &str,
    start: usize,
    quote: char,
    chars: &mut Peekable<CharIndices<'_>>,
) -> Result<String, String> {
    for (i, c) in chars.by_ref() {
        if c == quote {
            return Ok(input[start + 1..i].to_string());
        }
    }
    Err(format!("unterminated string starting at {}", start))
}

fn take_while<'a>(
    input: &'a str,
    start: usize,
    chars: &mut Peekable<CharIndices<'_>>,
    keep: impl Fn(char) -> bool,
) -> &'a str {
    let mut end = start;
    while let Some(&(i, c)) = chars.peek() {
        if !keep(c) {
            break;
        }
        end = i + c.len_utf8();
        chars.next();
    }
    &input[start..end]
}


// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Precedence, loosest first: `OR`, `AND`, `NOT`, then a parenthesized
/// group or a single comparison.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().map_or(false, |t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Expression, String> {
        let mut parts = vec![self.and_expr()?];
        while self.eat_keyword("OR") {
            parts.push(self.and_expr()?);
        }
        Ok(collapse(parts, Expression::Or))
    }

    fn and_expr(&mut self) -> Result<Expression, String> {
        let mut parts = vec![self.unary()?];
        while self.eat_keyword("AND") {
            parts.push(self.unary()?);
        }
        Ok(collapse(parts, Expression::And))
    }

    fn unary(&mut self) -> Result<Expression, String> {
        if self.eat_keyword("NOT") {
            return Ok(Expression::Not(Box::new(self.unary()?)));
        }
        if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            let inner = self.or_expr()?;
            return match self.next() {
                Some(Token::Close) => Ok(inner),
                _ => Err("unmatched '('".into()),
            };
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expression, String> {
        let left = self.operand()?;

        if self.eat_keyword("is") {
            let operator = if self.eat_keyword("not") {
                Operator::IsNotEmpty
            } else {
                Operator::IsEmpty
            };
            if !self.eat_keyword("empty") {
                return Err("expected 'empty' after 'is'".into());
            }
            return Ok(Expression::Condition(Condition {
                left,
                operator,
                right: None,
            }));
        }

        let operator = match self.peek() {
            Some(Token::Symbol(op)) => *op,
            Some(t) if t.is_keyword("contains") => Operator::Contains,
            _ => return Ok(Expression::Operand(left)),
        };
        self.pos += 1;
        let right = self.value(left.is_literal(), operator)?;
        Ok(Expression::Condition(Condition {
            left,
            operator,
            right: Some(right),
        }))
    }

    /// The left side of a comparison or a bare operand.
    fn operand(&mut self) -> Result<Operand, String> {
        match self.next() {
            Some(Token::Word(w)) => Operand::parse(&w),
            Some(Token::Quoted(q)) => Ok(Operand::Literal(Value::String(q))),
            Some(other) => Err(format!("expected a name or value, got {}", other.describe())),
            None => Err("missing operand".into()),
        }
    }

    /// The right side. A bare word is text, unless the left side was a
    /// literal and this side must supply the reference.
    fn value(&mut self, reference_here: bool, operator: Operator) -> Result<Operand, String> {
        match self.next() {
            Some(Token::Word(w)) if reference_here => Operand::parse(&w),
            Some(Token::Word(w)) => {
                Ok(Operand::Literal(keyword_literal(&w).unwrap_or(Value::String(w))))
            }
            Some(Token::Quoted(q)) => Ok(Operand::Literal(Value::String(q))),
            Some(other) => Err(format!(
                "expected a value after {:?}, got {}",
                operator,
                other.describe()
            )),
            None => Err(format!("missing value after {:?}", operator)),
        }
    }
}

fn collapse(mut parts: Vec<Expression>, join: fn(Vec<Expression>) -> Expression) -> Expression {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        join(parts)
    }
}
