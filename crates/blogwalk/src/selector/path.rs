// ABOUTME: Path-query parser and evaluator implementing the XPath subset used by blog templates.
// ABOUTME: Supports unions, id(), child and descendant steps, predicates and the common string functions.

//! Path queries.
//!
//! The grammar covers what template-driven schemas actually need:
//!
//! - unions: `.//embed | .//iframe`
//! - path starts: relative, `.`, `..`, `/`, `//`, `id('blog-pager')`
//! - steps: `.`, `..`, `*`, element names, separated by `/` or `//`
//! - predicates: `[@rel='tag']`, `[2]`, `[last()]`, `[not(@href)]`, `[a]`,
//!   `[contains(concat(' ', normalize-space(@class), ' '), ' post ')]`
//!
//! Expressions are evaluated with an explicit context node, so `.` always means
//! the node the caller passed in.

use std::fmt;

use ego_tree::NodeRef;
use scraper::Node;

use super::{document_order, find_by_id, normalize_whitespace, string_value, tree_root};
use crate::error::SelectorError;

type Nodes<'a> = Vec<NodeRef<'a, Node>>;

/// A compiled path query.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    paths: Vec<Path>,
}

impl PathExpr {
    /// Parses an expression, failing with `SelectorError::Syntax` on malformed input.
    pub fn parse(expression: &str) -> Result<Self, SelectorError> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser {
            expression,
            tokens,
            pos: 0,
        };
        let paths = parser.parse_union()?;
        Ok(Self { paths })
    }

    /// The `.` query.
    pub fn context() -> Self {
        Self {
            paths: vec![Path {
                start: Start::Context,
                steps: Vec::new(),
            }],
        }
    }

    /// Selects nodes relative to `context`, in document order without duplicates.
    pub fn select<'a>(&self, context: NodeRef<'a, Node>) -> Nodes<'a> {
        let mut out = Vec::new();
        for path in &self.paths {
            out.extend(path.select(context));
        }
        if self.paths.len() > 1 {
            document_order(&mut out);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Path {
    start: Start,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
enum Start {
    Context,
    Root,
    Id(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfNode,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    /// Any node (`.` and `..`).
    Node,
    /// Any element (`*`).
    Element,
    /// Element with this lower-cased name.
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Contains,
    StartsWith,
    Concat,
    NormalizeSpace,
    StringLength,
    String,
    Not,
    Last,
    Position,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Attr(String),
    Path(Path),
    Call(Func, Vec<Expr>),
}

impl Path {
    fn select<'a>(&self, context: NodeRef<'a, Node>) -> Nodes<'a> {
        let mut current: Nodes<'a> = match &self.start {
            Start::Context => vec![context],
            Start::Root => vec![tree_root(context)],
            Start::Id(id) => find_by_id(tree_root(context), id).into_iter().collect(),
        };
        for step in &self.steps {
            if current.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for node in &current {
                next.extend(step.apply(*node));
            }
            if current.len() > 1 {
                document_order(&mut next);
            }
            current = next;
        }
        current
    }
}

impl NodeTest {
    fn matches(&self, node: &NodeRef<'_, Node>) -> bool {
        match self {
            NodeTest::Node => true,
            NodeTest::Element => node.value().is_element(),
            NodeTest::Name(name) => node
                .value()
                .as_element()
                .is_some_and(|el| el.name().eq_ignore_ascii_case(name)),
        }
    }
}

impl Step {
    fn descendant_or_self() -> Self {
        Step {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::Node,
            predicates: Vec::new(),
        }
    }

    fn apply<'a>(&self, node: NodeRef<'a, Node>) -> Nodes<'a> {
        let test = |n: &NodeRef<'a, Node>| self.test.matches(n);
        let mut matched: Nodes<'a> = match self.axis {
            Axis::Child => node.children().filter(test).collect(),
            Axis::Descendant => node.descendants().skip(1).filter(test).collect(),
            Axis::DescendantOrSelf => node.descendants().filter(test).collect(),
            Axis::SelfNode => std::iter::once(node).filter(test).collect(),
            Axis::Parent => node.parent().into_iter().filter(test).collect(),
        };

        for predicate in &self.predicates {
            let size = matched.len();
            matched = matched
                .into_iter()
                .enumerate()
                .filter(|(i, n)| {
                    let ctx = EvalContext {
                        node: *n,
                        position: i + 1,
                        size,
                    };
                    match predicate.eval(&ctx) {
                        Value::Num(p) => p == (i + 1) as f64,
                        other => other.to_bool(),
                    }
                })
                .map(|(_, n)| n)
                .collect();
        }
        matched
    }
}

// ----------------------------------------------------------------------------
// Predicate evaluation
// ----------------------------------------------------------------------------

struct EvalContext<'a> {
    node: NodeRef<'a, Node>,
    position: usize,
    size: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    /// String values of a node set (attributes count as a one-element set).
    Set(Vec<String>),
}

impl Value {
    fn to_bool(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
            Value::Set(v) => !v.is_empty(),
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Str(s) => parse_number(s),
            Value::Set(v) => v.first().map(|s| parse_number(s)).unwrap_or(f64::NAN),
        }
    }

    fn into_string(self) -> String {
        match self {
            Value::Str(s) => s,
            Value::Num(n) => format_number(n),
            Value::Bool(b) => b.to_string(),
            Value::Set(v) => v.into_iter().next().unwrap_or_default(),
        }
    }
}

fn parse_number(s: &str) -> f64 {
    s.trim().parse().unwrap_or(f64::NAN)
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl CmpOp {
    fn holds(self, equal: bool) -> bool {
        match self {
            CmpOp::Eq => equal,
            CmpOp::Ne => !equal,
        }
    }
}

fn compare(left: &Value, right: &Value, op: CmpOp) -> bool {
    match (left, right) {
        (Value::Set(a), Value::Set(b)) => a
            .iter()
            .any(|x| b.iter().any(|y| op.holds(x == y))),
        (Value::Set(a), Value::Bool(b)) | (Value::Bool(b), Value::Set(a)) => {
            op.holds(!a.is_empty() == *b)
        }
        (Value::Set(a), other) | (other, Value::Set(a)) => a
            .iter()
            .any(|s| compare_scalar(&Value::Str(s.clone()), other, op)),
        _ => compare_scalar(left, right, op),
    }
}

fn compare_scalar(left: &Value, right: &Value, op: CmpOp) -> bool {
    let equal = match (left, right) {
        (Value::Bool(_), _) | (_, Value::Bool(_)) => left.to_bool() == right.to_bool(),
        (Value::Num(_), _) | (_, Value::Num(_)) => left.to_number() == right.to_number(),
        _ => left.clone().into_string() == right.clone().into_string(),
    };
    op.holds(equal)
}

impl Expr {
    fn eval(&self, ctx: &EvalContext<'_>) -> Value {
        match self {
            Expr::Or(a, b) => Value::Bool(a.eval(ctx).to_bool() || b.eval(ctx).to_bool()),
            Expr::And(a, b) => Value::Bool(a.eval(ctx).to_bool() && b.eval(ctx).to_bool()),
            Expr::Cmp(op, a, b) => Value::Bool(compare(&a.eval(ctx), &b.eval(ctx), *op)),
            Expr::Literal(s) => Value::Str(s.clone()),
            Expr::Number(n) => Value::Num(*n),
            Expr::Attr(name) => Value::Set(
                ctx.node
                    .value()
                    .as_element()
                    .and_then(|el| el.attr(name))
                    .map(|v| vec![v.to_string()])
                    .unwrap_or_default(),
            ),
            Expr::Path(path) => Value::Set(path.select(ctx.node).into_iter().map(string_value).collect()),
            Expr::Call(func, args) => func.call(args, ctx),
        }
    }
}

impl Func {
    fn call(self, args: &[Expr], ctx: &EvalContext<'_>) -> Value {
        let arg = |i: usize| {
            args.get(i)
                .map(|e| e.eval(ctx))
                .unwrap_or(Value::Str(String::new()))
        };
        // Optional single argument defaulting to the context node's string value.
        let string_or_context = || match args.first() {
            Some(e) => e.eval(ctx).into_string(),
            None => string_value(ctx.node),
        };

        match self {
            Func::Contains => Value::Bool(arg(0).into_string().contains(&arg(1).into_string())),
            Func::StartsWith => {
                Value::Bool(arg(0).into_string().starts_with(&arg(1).into_string()))
            }
            Func::Concat => Value::Str(args.iter().map(|e| e.eval(ctx).into_string()).collect()),
            Func::NormalizeSpace => Value::Str(normalize_whitespace(&string_or_context())),
            Func::StringLength => Value::Num(string_or_context().chars().count() as f64),
            Func::String => Value::Str(string_or_context()),
            Func::Not => Value::Bool(!arg(0).to_bool()),
            Func::Last => Value::Num(ctx.size as f64),
            Func::Position => Value::Num(ctx.position as f64),
            Func::Text => Value::Set(
                ctx.node
                    .children()
                    .filter_map(|n| n.value().as_text().map(|t| (**t).to_owned()))
                    .collect(),
            ),
        }
    }

    fn lookup(name: &str) -> Option<(Func, usize, usize)> {
        let entry = match name {
            "contains" => (Func::Contains, 2, 2),
            "starts-with" => (Func::StartsWith, 2, 2),
            "concat" => (Func::Concat, 2, usize::MAX),
            "normalize-space" => (Func::NormalizeSpace, 0, 1),
            "string-length" => (Func::StringLength, 0, 1),
            "string" => (Func::String, 0, 1),
            "not" => (Func::Not, 1, 1),
            "last" => (Func::Last, 0, 0),
            "position" => (Func::Position, 0, 0),
            "text" => (Func::Text, 0, 0),
            _ => return None,
        };
        Some(entry)
    }
}

// ----------------------------------------------------------------------------
// Tokenizer
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    Dot,
    DotDot,
    At,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Pipe,
    Eq,
    Ne,
    Star,
    Name(String),
    Literal(String),
    Number(f64),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Slash => write!(f, "'/'"),
            Token::DoubleSlash => write!(f, "'//'"),
            Token::Dot => write!(f, "'.'"),
            Token::DotDot => write!(f, "'..'"),
            Token::At => write!(f, "'@'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Comma => write!(f, "','"),
            Token::Pipe => write!(f, "'|'"),
            Token::Eq => write!(f, "'='"),
            Token::Ne => write!(f, "'!='"),
            Token::Star => write!(f, "'*'"),
            Token::Name(n) => write!(f, "name {:?}", n),
            Token::Literal(s) => write!(f, "literal {:?}", s),
            Token::Number(n) => write!(f, "number {}", format_number(*n)),
        }
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn tokenize(expression: &str) -> Result<Vec<(usize, Token)>, SelectorError> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        chars.next();
        let token = match c {
            '/' => {
                if chars.peek().map(|&(_, c)| c) == Some('/') {
                    chars.next();
                    Token::DoubleSlash
                } else {
                    Token::Slash
                }
            }
            '.' => match chars.peek().map(|&(_, c)| c) {
                Some('.') => {
                    chars.next();
                    Token::DotDot
                }
                Some(d) if d.is_ascii_digit() => {
                    let mut text = String::from("0.");
                    while let Some(&(_, d)) = chars.peek() {
                        if !d.is_ascii_digit() {
                            break;
                        }
                        text.push(d);
                        chars.next();
                    }
                    Token::Number(parse_number(&text))
                }
                _ => Token::Dot,
            },
            '@' => Token::At,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '|' => Token::Pipe,
            '=' => Token::Eq,
            '*' => Token::Star,
            '!' => {
                if chars.peek().map(|&(_, c)| c) == Some('=') {
                    chars.next();
                    Token::Ne
                } else {
                    return Err(SelectorError::syntax(expression, offset, "expected '=' after '!'"));
                }
            }
            '\'' | '"' => {
                let mut text = String::new();
                let mut closed = false;
                for (_, ch) in chars.by_ref() {
                    if ch == c {
                        closed = true;
                        break;
                    }
                    text.push(ch);
                }
                if !closed {
                    return Err(SelectorError::syntax(
                        expression,
                        offset,
                        "unterminated string literal",
                    ));
                }
                Token::Literal(text)
            }
            d if d.is_ascii_digit() => {
                let mut text = String::from(d);
                while let Some(&(_, d)) = chars.peek() {
                    if !(d.is_ascii_digit() || d == '.') {
                        break;
                    }
                    text.push(d);
                    chars.next();
                }
                let value = parse_number(&text);
                if value.is_nan() {
                    return Err(SelectorError::syntax(
                        expression,
                        offset,
                        format!("invalid number {:?}", text),
                    ));
                }
                Token::Number(value)
            }
            c if is_name_start(c) => {
                let mut name = String::from(c);
                while let Some(&(_, n)) = chars.peek() {
                    if !is_name_char(n) {
                        break;
                    }
                    name.push(n);
                    chars.next();
                }
                Token::Name(name)
            }
            other => {
                return Err(SelectorError::syntax(
                    expression,
                    offset,
                    format!("unexpected character {:?}", other),
                ))
            }
        };
        tokens.push((offset, token));
    }

    Ok(tokens)
}

// ----------------------------------------------------------------------------
// Parser
// ----------------------------------------------------------------------------

struct Parser<'e> {
    expression: &'e str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl<'e> Parser<'e> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .unwrap_or(self.expression.len())
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Name(n)) if n == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> SelectorError {
        SelectorError::syntax(self.expression, self.offset(), message)
    }

    fn unexpected(&self) -> SelectorError {
        match self.peek() {
            Some(t) => self.error(format!("unexpected {}", t)),
            None => self.error("unexpected end of expression"),
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), SelectorError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(match self.peek() {
                Some(found) => self.error(format!("expected {}, found {}", token, found)),
                None => self.error(format!("expected {}", token)),
            })
        }
    }

    fn parse_union(&mut self) -> Result<Vec<Path>, SelectorError> {
        let mut paths = vec![self.parse_path()?];
        while self.eat(&Token::Pipe) {
            paths.push(self.parse_path()?);
        }
        if self.peek().is_some() {
            return Err(self.unexpected());
        }
        Ok(paths)
    }

    fn parse_path(&mut self) -> Result<Path, SelectorError> {
        let mut steps = Vec::new();
        let start = match self.peek().cloned() {
            Some(Token::Slash) => {
                self.pos += 1;
                steps.push(self.parse_step(Axis::Child)?);
                Start::Root
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                self.push_descendant_step(&mut steps)?;
                Start::Root
            }
            Some(Token::Name(name)) if name == "id" && self.peek_at(1) == Some(&Token::LParen) => {
                self.pos += 2;
                let id = match self.advance() {
                    Some(Token::Literal(id)) if !id.trim().is_empty() => id.trim().to_string(),
                    _ => return Err(self.error("id() expects a non-empty string literal")),
                };
                self.expect(Token::RParen)?;
                Start::Id(id)
            }
            _ => {
                steps.push(self.parse_step(Axis::Child)?);
                Start::Context
            }
        };

        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.pos += 1;
                    steps.push(self.parse_step(Axis::Child)?);
                }
                Some(Token::DoubleSlash) => {
                    self.pos += 1;
                    self.push_descendant_step(&mut steps)?;
                }
                _ => break,
            }
        }

        Ok(Path { start, steps })
    }

    /// Parses the step after `//`.
    ///
    /// `//x[p]` is `descendant-or-self::node()/child::x[p]`: predicates see the
    /// position among each parent's children. A bare `//x` keeps the single
    /// descendant walk, which selects the same nodes.
    fn push_descendant_step(&mut self, steps: &mut Vec<Step>) -> Result<(), SelectorError> {
        let step = self.parse_step(Axis::Descendant)?;
        match step.axis {
            Axis::Descendant if step.predicates.is_empty() => steps.push(step),
            Axis::Descendant => {
                steps.push(Step::descendant_or_self());
                steps.push(Step {
                    axis: Axis::Child,
                    ..step
                });
            }
            Axis::Parent => {
                steps.push(Step::descendant_or_self());
                steps.push(step);
            }
            _ => steps.push(step),
        }
        Ok(())
    }

    fn parse_step(&mut self, axis: Axis) -> Result<Step, SelectorError> {
        let (axis, test) = match self.peek().cloned() {
            Some(Token::Dot) => {
                let axis = if axis == Axis::Descendant {
                    Axis::DescendantOrSelf
                } else {
                    Axis::SelfNode
                };
                (axis, NodeTest::Node)
            }
            Some(Token::DotDot) => (Axis::Parent, NodeTest::Node),
            Some(Token::Star) => (axis, NodeTest::Element),
            Some(Token::Name(name)) => {
                if self.peek_at(1) == Some(&Token::LParen) {
                    return Err(self.error(format!(
                        "{}() is not supported as a location step",
                        name
                    )));
                }
                (axis, NodeTest::Name(name.to_ascii_lowercase()))
            }
            Some(Token::At) => {
                return Err(self.error(
                    "attribute steps are not supported; extract attributes with a field",
                ))
            }
            Some(_) => return Err(self.unexpected()),
            None => return Err(self.error("expected a location step")),
        };
        self.pos += 1;

        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.parse_or()?);
            self.expect(Token::RBracket)?;
        }

        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_or(&mut self) -> Result<Expr, SelectorError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SelectorError> {
        let mut left = self.parse_comparison()?;
        while self.eat_keyword("and") {
            let right = self.parse_comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, SelectorError> {
        let left = self.parse_primary()?;
        let op = if self.eat(&Token::Eq) {
            CmpOp::Eq
        } else if self.eat(&Token::Ne) {
            CmpOp::Ne
        } else {
            return Ok(left);
        };
        let right = self.parse_primary()?;
        Ok(Expr::Cmp(op, Box::new(left), Box::new(right)))
    }

    fn parse_primary(&mut self) -> Result<Expr, SelectorError> {
        match self.peek().cloned() {
            Some(Token::Literal(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::At) => {
                self.pos += 1;
                match self.advance() {
                    Some(Token::Name(name)) => Ok(Expr::Attr(name.to_ascii_lowercase())),
                    _ => Err(self.error("expected attribute name after '@'")),
                }
            }
            Some(Token::Name(name))
                if name != "id" && self.peek_at(1) == Some(&Token::LParen) =>
            {
                self.parse_call(name)
            }
            Some(
                Token::Dot
                | Token::DotDot
                | Token::Star
                | Token::Slash
                | Token::DoubleSlash
                | Token::Name(_),
            ) => Ok(Expr::Path(self.parse_path()?)),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, SelectorError> {
        let Some((func, min, max)) = Func::lookup(&name) else {
            return Err(self.error(format!("unknown function {}()", name)));
        };
        // name and '('
        self.pos += 2;

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::RParen)?;
                break;
            }
        }

        if args.len() < min || args.len() > max {
            return Err(self.error(format!(
                "{}() takes {} argument(s), got {}",
                name,
                if min == max {
                    min.to_string()
                } else if max == usize::MAX {
                    format!("at least {}", min)
                } else {
                    format!("{} to {}", min, max)
                },
                args.len()
            )));
        }

        Ok(Expr::Call(func, args))
    }
}
