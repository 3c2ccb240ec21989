//! Constraint compiler
//!
//! Compilation works on flattened text. Every top-level parenthesised region
//! is first cut out and replaced by a `{N}` placeholder: a region directly
//! after an identifier is a function's raw parameter list, anything else is
//! compiled as a sub-expression. Whitespace outside quotes is dropped and
//! quotes suppress all operator and bracket recognition.
//!
//! The flattened string is then split on `||`, else `&&`, else `^`, with each
//! part compiled the same way, so `||` binds loosest. A string with no
//! combinator is desugared from a comparison operator, else negated with a
//! leading `!`, else resolved as a placeholder or a `name({N})` call.

use super::ast::{Expr, FunctionCall, INFINITY_TOKEN, Node, Operand, Value};
use super::error::CompileError;
use super::functions::{COMPARISONS, Function, Signature, ValueKind, canonical_network};
use super::keywords::{DependencyLevel, Keyword};
use super::settings;
use crate::subject::{TagId, TagStore};
use regex::RegexBuilder;
use std::sync::Arc;

/// Result of a successful compilation
#[derive(Debug)]
pub struct Compiled {
    pub expr: Node,
    /// Highest dependency level among referenced keywords
    pub level: DependencyLevel,
    /// Whether a called function follows the subject's run state
    pub depends_on_state: bool,
    /// Constrainable tags referenced through `hasTag`
    pub depends_on_tags: Vec<TagId>,
    /// Keywords referenced, in order of first appearance
    pub keywords: Vec<Keyword>,
    /// Problems that did not prevent compilation
    pub warnings: Vec<String>,
}

/// Compile constraint text without resolving tag names
///
/// # Errors
///
/// Returns a `CompileError` describing the first problem found.
pub fn compile(text: &str) -> Result<Compiled, CompileError> {
    Compiler::new().compile(text)
}

enum Slot {
    Expr(Node),
    Params(String),
}

/// Single-use compiler holding the placeholder context of one expression
pub struct Compiler<'a> {
    tags: Option<&'a dyn TagStore>,
    context: Vec<Slot>,
    level: DependencyLevel,
    depends_on_state: bool,
    depends_on_tags: Vec<TagId>,
    keywords: Vec<Keyword>,
    warnings: Vec<String>,
}

impl Default for Compiler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Compiler<'a> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tags: None,
            context: Vec::new(),
            level: DependencyLevel::Static,
            depends_on_state: false,
            depends_on_tags: Vec::new(),
            keywords: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Resolve `hasTag` names against a tag store
    #[must_use]
    pub const fn with_tags(mut self, tags: &'a dyn TagStore) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Compile a complete constraint.
    ///
    /// # Errors
    ///
    /// Returns a `CompileError` describing the first problem found.
    pub fn compile(mut self, text: &str) -> Result<Compiled, CompileError> {
        if text.trim().is_empty() {
            return Err(CompileError::Empty);
        }
        let expr = self.compile_start(text)?;
        let expr = condition(expr)?;

        Ok(Compiled {
            expr,
            level: self.level,
            depends_on_state: self.depends_on_state,
            depends_on_tags: self.depends_on_tags,
            keywords: self.keywords,
            warnings: self.warnings,
        })
    }

    fn compile_start(&mut self, text: &str) -> Result<Node, CompileError> {
        let text = text.trim();

        if text.is_empty() {
            return Err(CompileError::Empty);
        }
        if text.eq_ignore_ascii_case("true") {
            return Ok(Arc::new(Expr::Literal(Value::Bool(true))));
        }
        if text.eq_ignore_ascii_case("false") {
            return Ok(Arc::new(Expr::Literal(Value::Bool(false))));
        }

        let mut in_quote = false;
        let mut level = 0usize;
        let mut bracket_start = 0usize;
        let mut prev: Option<char> = None;
        let mut result = String::with_capacity(text.len());

        for (pos, c) in text.char_indices() {
            if is_quote(c) && prev != Some('\\') {
                in_quote = !in_quote;
            }
            prev = Some(c);

            if in_quote {
                if level == 0 {
                    result.push(c);
                }
                continue;
            }

            match c {
                '(' => {
                    level += 1;
                    if level == 1 {
                        bracket_start = pos + c.len_utf8();
                    }
                }
                ')' => {
                    if level == 0 {
                        return Err(CompileError::UnmatchedClose(text.to_string()));
                    }
                    level -= 1;
                    if level == 0 {
                        let inner = text[bracket_start..pos].trim();
                        if result.chars().last().is_some_and(char::is_alphanumeric) {
                            let key = self.push(Slot::Params(inner.to_string()));
                            result.push('(');
                            result.push_str(&key);
                            result.push(')');
                        } else {
                            let sub = self.compile_start(inner)?;
                            let key = self.push(Slot::Expr(sub));
                            result.push_str(&key);
                        }
                    }
                }
                _ if level == 0 && !c.is_whitespace() => result.push(c),
                _ => {}
            }
        }

        if level != 0 {
            return Err(CompileError::UnmatchedOpen(text.to_string()));
        }
        if in_quote {
            return Err(CompileError::UnmatchedQuote(text.to_string()));
        }

        self.compile_basic(&result)
    }

    fn compile_basic(&mut self, text: &str) -> Result<Node, CompileError> {
        if text.is_empty() {
            return Err(CompileError::Unsupported(text.to_string()));
        }

        for sep in ["||", "&&", "^"] {
            let parts = split_unquoted(text, sep);
            if parts.len() < 2 {
                continue;
            }
            if parts.iter().any(|p| p.trim().is_empty()) {
                return Err(if sep == "^" {
                    CompileError::TooFewOperands
                } else {
                    CompileError::Unsupported(text.to_string())
                });
            }
            let nodes = parts
                .iter()
                .map(|p| self.compile_basic(p.trim()).and_then(condition))
                .collect::<Result<Vec<_>, _>>()?;
            let expr = match sep {
                "||" => Expr::Or(nodes),
                "&&" => Expr::And(nodes),
                _ => Expr::Xor(nodes),
            };
            return Ok(Arc::new(expr));
        }

        if let Some((lhs, function, rhs)) = find_comparison(text) {
            let args = self.resolve_params(&format!("{lhs},{rhs}"))?;
            return self.build_call(function.name(), args);
        }

        if let Some(rest) = text.strip_prefix('!') {
            let inner = condition(self.compile_basic(rest.trim())?)?;
            return Ok(Arc::new(Expr::Not(inner)));
        }

        if text.starts_with('{') {
            return match self.slot(text) {
                Some(Slot::Expr(node)) => Ok(Arc::clone(node)),
                Some(Slot::Params(_)) => Err(CompileError::Unsupported(text.to_string())),
                None => Err(CompileError::UnresolvedPlaceholder(text.to_string())),
            };
        }

        if let Some(pos) = text.find('(')
            && pos > 0
            && text.ends_with(')')
        {
            let name = &text[..pos];
            let key = text[pos + 1..text.len() - 1].trim();
            let raw = match self.slot(key) {
                Some(Slot::Params(raw)) => raw.clone(),
                _ => return Err(CompileError::UnresolvedPlaceholder(key.to_string())),
            };
            let args = self.resolve_params(&raw)?;
            return self.build_call(name, args);
        }

        Err(CompileError::Unsupported(text.to_string()))
    }

    fn resolve_params(&mut self, raw: &str) -> Result<Vec<Operand>, CompileError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        split_params(raw)
            .iter()
            .map(|item| {
                if item.is_empty() {
                    Err(CompileError::EmptyArgument(raw.to_string()))
                } else {
                    self.resolve_item(item)
                }
            })
            .collect()
    }

    fn resolve_item(&mut self, item: &str) -> Result<Operand, CompileError> {
        if item.starts_with(is_quote) {
            let mut chars = item.chars();
            chars.next();
            return match chars.next_back() {
                Some(last) if is_quote(last) => Ok(Operand::Text(chars.as_str().to_string())),
                _ => Err(CompileError::MalformedString(item.to_string())),
            };
        }

        if item.starts_with('{') {
            return self.dereference(item);
        }

        if item.contains('(') {
            return Ok(Operand::Expr(self.compile_start(item)?));
        }

        Ok(self.bare(item))
    }

    fn dereference(&mut self, key: &str) -> Result<Operand, CompileError> {
        match self.slot(key) {
            Some(Slot::Expr(node)) => Ok(Operand::Expr(Arc::clone(node))),
            Some(Slot::Params(raw)) => {
                let raw = raw.clone();
                let mut values = self.resolve_params(&raw)?;
                if values.len() == 1 {
                    Ok(values.remove(0))
                } else {
                    Err(CompileError::AmbiguousReference(key.to_string()))
                }
            }
            None => Err(CompileError::UnresolvedPlaceholder(key.to_string())),
        }
    }

    fn bare(&mut self, token: &str) -> Operand {
        if token == INFINITY_TOKEN || token.eq_ignore_ascii_case("infinity") {
            return Operand::Number(f64::INFINITY);
        }

        if token.starts_with(|c: char| c.is_ascii_digit()) {
            let parsed = if token.contains('.') {
                token.parse::<f64>().ok()
            } else {
                token.parse::<i64>().ok().map(|n| n as f64)
            };
            return parsed.map_or_else(|| Operand::Bare(token.to_string()), Operand::Number);
        }

        match Keyword::lookup(token) {
            Some(kw) => {
                self.level = self.level.max(kw.dependency());
                if !self.keywords.contains(&kw) {
                    self.keywords.push(kw);
                }
                Operand::Keyword(kw)
            }
            None => Operand::Bare(token.to_string()),
        }
    }

    fn build_call(&mut self, name: &str, mut args: Vec<Operand>) -> Result<Node, CompileError> {
        let function =
            Function::lookup(name).ok_or_else(|| CompileError::UnknownFunction(name.to_string()))?;

        let invalid = |args: &[Operand]| CompileError::InvalidArguments {
            function: name.to_string(),
            args: args.iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
        };

        let shape_ok = match function.signature() {
            Signature::Nullary => args.is_empty(),
            Signature::Literal => args.len() == 1 && matches!(args[0], Operand::Text(_)),
            Signature::Numbers | Signature::Texts => args.len() == 2,
            Signature::Pattern => args.len() == 2 && matches!(args[1], Operand::Text(_)),
            Signature::Quantity => {
                args.len() == 1
                    && match &args[0] {
                        Operand::Number(_) | Operand::Expr(_) => true,
                        Operand::Keyword(kw) => !kw.is_textual(),
                        _ => false,
                    }
            }
        };
        if !shape_ok {
            return Err(invalid(&args));
        }

        if matches!(function.signature(), Signature::Numbers | Signature::Quantity) {
            for arg in &args {
                if let Operand::Expr(e) = arg
                    && e.kind() != ValueKind::Number
                {
                    return Err(CompileError::NotNumeric(e.to_string()));
                }
            }
        }

        let mut pattern = None;

        match function {
            Function::HasTag => {
                if let (Some(tags), Operand::Text(tag_name)) = (self.tags, &args[0]) {
                    let found = tags.tags_by_name(tag_name);
                    if found.is_empty() {
                        return Err(CompileError::UnknownTag(tag_name.clone()));
                    }
                    for tag in found.iter().filter(|t| t.constrainable) {
                        if !self.depends_on_tags.contains(&tag.id) {
                            self.depends_on_tags.push(tag.id);
                        }
                    }
                }
            }
            Function::HasNet => {
                if let Operand::Text(net) = &args[0] {
                    let canonical = canonical_network(net)
                        .ok_or_else(|| CompileError::UnknownNetwork(net.clone()))?;
                    args[0] = Operand::Text(canonical.to_string());
                }
            }
            Function::Matches => {
                if let Operand::Text(source) = &args[1] {
                    match RegexBuilder::new(source).case_insensitive(true).build() {
                        Ok(re) => pattern = Some(re),
                        Err(e) => self
                            .warnings
                            .push(format!("Invalid constraint pattern: {source}: {e}")),
                    }
                }
            }
            Function::GetConfig => {
                if let Operand::Text(key) = &args[0] {
                    let setting = settings::lookup(key)
                        .ok_or_else(|| CompileError::UnknownConfigKey(key.clone()))?;
                    args[0] = Operand::Text(setting.key.to_string());
                }
            }
            _ => {}
        }

        if function.depends_on_state() {
            self.depends_on_state = true;
        }

        let call = FunctionCall::new(function, name, args).with_pattern(pattern);
        Ok(Arc::new(Expr::Call(call)))
    }

    fn push(&mut self, slot: Slot) -> String {
        let key = format!("{{{}}}", self.context.len());
        self.context.push(slot);
        key
    }

    fn slot(&self, key: &str) -> Option<&Slot> {
        key.strip_prefix('{')
            .and_then(|k| k.strip_suffix('}'))
            .and_then(|n| n.parse::<usize>().ok())
            .and_then(|n| self.context.get(n))
    }
}

/// Reject nodes that cannot stand where a condition is expected
fn condition(node: Node) -> Result<Node, CompileError> {
    if node.kind() == ValueKind::Bool {
        Ok(node)
    } else {
        Err(CompileError::NotBoolean(node.to_string()))
    }
}

fn is_quote(c: char) -> bool {
    matches!(c, '"' | '\u{201C}' | '\u{201D}')
}

/// Split on `sep` wherever it occurs outside quotes
fn split_unquoted<'s>(text: &'s str, sep: &str) -> Vec<&'s str> {
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut prev: Option<char> = None;
    let mut start = 0;
    let mut skip_until = 0;

    for (pos, c) in text.char_indices() {
        if pos < skip_until {
            prev = Some(c);
            continue;
        }
        if is_quote(c) && prev != Some('\\') {
            in_quote = !in_quote;
        }
        prev = Some(c);
        if !in_quote && text[pos..].starts_with(sep) {
            parts.push(&text[start..pos]);
            start = pos + sep.len();
            skip_until = start;
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Locate the first comparison operator outside quotes with text on both sides
fn find_comparison(text: &str) -> Option<(&str, Function, &str)> {
    let mut in_quote = false;
    let mut prev: Option<char> = None;

    for (pos, c) in text.char_indices() {
        if is_quote(c) && prev != Some('\\') {
            in_quote = !in_quote;
        }
        prev = Some(c);
        if in_quote || pos == 0 {
            continue;
        }
        for (op, function) in COMPARISONS {
            if text[pos..].starts_with(op) {
                let rhs = &text[pos + op.len()..];
                if !rhs.is_empty() {
                    return Some((&text[..pos], *function, rhs));
                }
            }
        }
    }
    None
}

/// Split a raw parameter list on top-level commas, dropping unquoted whitespace
fn split_params(raw: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut current = String::with_capacity(raw.len());
    let mut in_quote = false;
    let mut depth = 0usize;
    let mut prev: Option<char> = None;

    for c in raw.chars() {
        if is_quote(c) && prev != Some('\\') {
            in_quote = !in_quote;
        }
        prev = Some(c);

        if !in_quote {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    params.push(std::mem::take(&mut current));
                    continue;
                }
                _ => {}
            }
        }

        if in_quote || !c.is_whitespace() {
            current.push(c);
        }
    }
    params.push(current);
    params
}
