//! Compiled expression tree
//!
//! Nodes are immutable after compilation and shared through `Arc`, since a
//! sub-expression captured by a parameter list can be referenced from the
//! compile context more than once. The only mutable state is the per-subject
//! memo of `matches(...)` calls.
//!
//! `Display` renders a canonical, re-compilable form: combinators are fully
//! parenthesised and comparison operators appear as their function names.

use super::functions::{Function, ValueKind};
use super::keywords::Keyword;
use crate::subject::SubjectId;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Shared handle to a node
pub type Node = Arc<Expr>;

/// Token standing for an unbounded quantity
pub const INFINITY_TOKEN: &str = "∞";

/// Result of evaluating a node
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Number(f64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&format_number(*n)),
        }
    }
}

/// Expression node
#[derive(Debug)]
pub enum Expr {
    Literal(Value),
    Not(Node),
    Or(Vec<Node>),
    And(Vec<Node>),
    /// Exclusive-or fold; always holds two or more operands
    Xor(Vec<Node>),
    Call(FunctionCall),
}

impl Expr {
    /// Kind of value this node evaluates to
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Literal(Value::Number(_)) => ValueKind::Number,
            Self::Call(call) => call.function.result(),
            _ => ValueKind::Bool,
        }
    }

    /// Drop memoised results held for a subject
    pub fn forget(&self, subject: SubjectId) {
        match self {
            Self::Literal(_) => {}
            Self::Not(e) => e.forget(subject),
            Self::Or(es) | Self::And(es) | Self::Xor(es) => {
                for e in es {
                    e.forget(subject);
                }
            }
            Self::Call(call) => call.forget(subject),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v}"),
            Self::Not(e) => write!(f, "!({e})"),
            Self::Or(es) => write_joined(f, es, "||"),
            Self::And(es) => write_joined(f, es, "&&"),
            Self::Xor(es) => write_joined(f, es, "^"),
            Self::Call(call) => write!(f, "{call}"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, es: &[Node], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, e) in es.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{e}")?;
    }
    f.write_str(")")
}

/// A resolved function argument
#[derive(Debug, Clone)]
pub enum Operand {
    /// Quoted string literal, quotes removed
    Text(String),
    Number(f64),
    Keyword(Keyword),
    /// Bare token that is neither a number nor a keyword
    Bare(String),
    /// Nested function call
    Expr(Node),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "\"{s}\""),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::Keyword(kw) => write!(f, "{kw}"),
            Self::Bare(s) => f.write_str(s),
            Self::Expr(e) => write!(f, "{e}"),
        }
    }
}

/// Render a number so that it parses back to the same value
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_infinite() && n > 0.0 {
        INFINITY_TOKEN.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Last `matches` outcome for one subject
#[derive(Debug, Clone)]
pub(crate) struct MatchMemo {
    pub values: Arc<[String]>,
    pub matched: bool,
}

/// A call of a builtin function
#[derive(Debug)]
pub struct FunctionCall {
    pub function: Function,
    /// Name as written, which may be an alias
    pub name: String,
    pub args: Vec<Operand>,
    /// Compiled pattern of `matches`; `None` when it failed to compile
    pub(crate) pattern: Option<Regex>,
    memo: Mutex<HashMap<SubjectId, MatchMemo>>,
}

impl FunctionCall {
    #[must_use]
    pub fn new(function: Function, name: impl Into<String>, args: Vec<Operand>) -> Self {
        Self {
            function,
            name: name.into(),
            args,
            pattern: None,
            memo: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: Option<Regex>) -> Self {
        self.pattern = pattern;
        self
    }

    /// The literal text of argument `index`, if it is a quoted string
    #[must_use]
    pub fn text_arg(&self, index: usize) -> Option<&str> {
        match self.args.get(index) {
            Some(Operand::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn memo(&self, subject: SubjectId) -> Option<MatchMemo> {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&subject)
            .cloned()
    }

    pub(crate) fn remember(&self, subject: SubjectId, memo: MatchMemo) {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subject, memo);
    }

    fn forget(&self, subject: SubjectId) {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&subject);
        for arg in &self.args {
            if let Operand::Expr(e) = arg {
                e.forget(subject);
            }
        }
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::INFINITY), "∞");
    }

    #[test]
    fn test_display_nests_combinators() {
        let has = |name: &str| {
            Arc::new(Expr::Call(FunctionCall::new(
                Function::HasTag,
                "hasTag",
                vec![Operand::Text(name.into())],
            )))
        };
        let expr = Expr::Or(vec![
            Arc::new(Expr::Not(Arc::new(Expr::And(vec![has("A"), has("B")])))),
            has("C"),
        ]);
        assert_eq!(
            expr.to_string(),
            "(!((hasTag(\"A\")&&hasTag(\"B\")))||hasTag(\"C\"))"
        );
    }

    #[test]
    fn test_memo_is_per_subject() {
        let call = FunctionCall::new(Function::Matches, "matches", vec![]);
        let values: Arc<[String]> = Arc::from(vec!["x".to_string()]);
        call.remember(SubjectId(1), MatchMemo { values, matched: true });

        assert!(call.memo(SubjectId(1)).is_some());
        assert!(call.memo(SubjectId(2)).is_none());

        call.forget(SubjectId(1));
        assert!(call.memo(SubjectId(1)).is_none());
    }
}
