//! Compilation of read filters into Graphite target patterns.
//!
//! Graphite can only select series by name, so the only accepted filter is a
//! single constraint on the `name` field, either an equality (`name="a.b"`)
//! or a pattern match (`name~"a.*"`). Everything else, including any boolean
//! combination, is rejected with [`AdapterError::InvalidFilter`].

use std::iter::Peekable;
use std::str::{Chars, FromStr};

use crate::error::{AdapterError, Result};
use crate::model::TargetPattern;

/// The only field a Graphite read can filter on.
pub const NAME_FIELD: &str = "name";

/// Comparison operators a host filter tree may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Match,
    NotMatch,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    String(String),
    Number(f64),
}

/// Filter tree handed over by the host query language.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Compare {
        field: String,
        op: CompareOp,
        value: FilterValue,
    },
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
}

impl FilterExpr {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: FilterValue) -> Self {
        FilterExpr::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    /// `name="<value>"`
    pub fn name_equals(value: impl Into<String>) -> Self {
        Self::compare(NAME_FIELD, CompareOp::Eq, FilterValue::String(value.into()))
    }

    /// `name~"<pattern>"`
    pub fn name_matches(pattern: impl Into<String>) -> Self {
        Self::compare(NAME_FIELD, CompareOp::Match, FilterValue::String(pattern.into()))
    }
}

/// A compiled, validated name filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameFilter {
    Equals(String),
    Match(String),
}

impl NameFilter {
    /// Both shapes pass through verbatim: Graphite applies its own glob
    /// syntax (`.` separated segments, `*`, `{a,b}`) to the target.
    pub fn target(&self) -> TargetPattern {
        match self {
            NameFilter::Equals(name) => TargetPattern::new(name.clone()),
            NameFilter::Match(pattern) => TargetPattern::new(pattern.clone()),
        }
    }
}

/// Validates `expr` and compiles it into a [`NameFilter`].
pub fn compile(expr: &FilterExpr) -> Result<NameFilter> {
    let FilterExpr::Compare { field, op, value } = expr else {
        return Err(AdapterError::InvalidFilter);
    };
    if field != NAME_FIELD {
        return Err(AdapterError::InvalidFilter);
    }
    let FilterValue::String(value) = value else {
        return Err(AdapterError::InvalidFilter);
    };
    if value.is_empty() {
        return Err(AdapterError::InvalidFilter);
    }

    match op {
        CompareOp::Eq => Ok(NameFilter::Equals(value.clone())),
        CompareOp::Match => Ok(NameFilter::Match(value.clone())),
        _ => Err(AdapterError::InvalidFilter),
    }
}

impl FromStr for FilterExpr {
    type Err = AdapterError;

    /// Parses textual filters such as `name~"metric.*"`.
    ///
    /// Comparisons on any field, `AND`/`OR`/`NOT` and parentheses are parsed
    /// so that [`compile`] can reject them with the usual message.
    fn from_str(s: &str) -> Result<Self> {
        let mut parser = Parser {
            chars: s.chars().peekable(),
        };
        let expr = parser.parse_or()?;
        parser.skip_whitespace();
        if parser.chars.peek().is_some() {
            return Err(AdapterError::InvalidFilter);
        }
        Ok(expr)
    }
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl Parser<'_> {
    fn skip_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("OR") {
            let rhs = self.parse_and()?;
            lhs = FilterExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<FilterExpr> {
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                None | Some(')') => break,
                _ => {}
            }
            if self.peek_keyword("OR") {
                break;
            }
            // juxtaposition is an implicit AND
            self.eat_keyword("AND");
            let rhs = self.parse_unary()?;
            lhs = FilterExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<FilterExpr> {
        self.skip_whitespace();
        if self.eat_keyword("NOT") {
            return Ok(FilterExpr::Not(Box::new(self.parse_unary()?)));
        }
        if self.chars.peek() == Some(&'(') {
            self.chars.next();
            let inner = self.parse_or()?;
            self.skip_whitespace();
            if self.chars.next() != Some(')') {
                return Err(AdapterError::InvalidFilter);
            }
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<FilterExpr> {
        let field = self.identifier();
        if field.is_empty() {
            return Err(AdapterError::InvalidFilter);
        }
        self.skip_whitespace();
        let op = self.operator()?;
        self.skip_whitespace();
        let value = self.value()?;
        Ok(FilterExpr::Compare { field, op, value })
    }

    fn identifier(&mut self) -> String {
        let mut ident = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                ident.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        ident
    }

    fn operator(&mut self) -> Result<CompareOp> {
        let first = self.chars.next().ok_or(AdapterError::InvalidFilter)?;
        let second = self.chars.peek().copied();
        let op = match (first, second) {
            ('=', Some('=')) => Some(CompareOp::Eq),
            ('=', Some('~')) => Some(CompareOp::Match),
            ('!', Some('=')) => Some(CompareOp::NotEq),
            ('!', Some('~')) => Some(CompareOp::NotMatch),
            ('<', Some('=')) => Some(CompareOp::Lte),
            ('>', Some('=')) => Some(CompareOp::Gte),
            _ => None,
        };
        if let Some(op) = op {
            self.chars.next();
            return Ok(op);
        }
        match first {
            '=' => Ok(CompareOp::Eq),
            '~' => Ok(CompareOp::Match),
            '<' => Ok(CompareOp::Lt),
            '>' => Ok(CompareOp::Gt),
            _ => Err(AdapterError::InvalidFilter),
        }
    }

    fn value(&mut self) -> Result<FilterValue> {
        match self.chars.peek() {
            Some(&quote @ ('"' | '\'')) => {
                self.chars.next();
                let mut value = String::new();
                loop {
                    match self.chars.next() {
                        Some('\\') => {
                            value.push(self.chars.next().ok_or(AdapterError::InvalidFilter)?)
                        }
                        Some(c) if c == quote => return Ok(FilterValue::String(value)),
                        Some(c) => value.push(c),
                        None => return Err(AdapterError::InvalidFilter),
                    }
                }
            }
            Some(_) => {
                let raw = self.identifier();
                raw.parse::<f64>()
                    .map(FilterValue::Number)
                    .map_err(|_| AdapterError::InvalidFilter)
            }
            None => Err(AdapterError::InvalidFilter),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let mut ahead = self.chars.clone();
        for expected in keyword.chars() {
            match ahead.next() {
                Some(c) if c.eq_ignore_ascii_case(&expected) => {}
                _ => return false,
            }
        }
        ahead.next().map_or(true, |c| c.is_whitespace() || c == '(')
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        if self.peek_keyword(keyword) {
            for _ in 0..keyword.len() {
                self.chars.next();
            }
            true
        } else {
            false
        }
    }
}
