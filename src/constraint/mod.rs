//! Constraint language
//!
//! A small boolean expression language deciding whether a subject belongs
//! to a tag.
//!
//! # Syntax
//!
//! - **Combinators**: `a || b`, `a && b`, `a ^ b`, negation `!a`, grouping `( ... )`
//! - **Comparisons**: `lhs == rhs`, `!=`, `>=`, `>`, `<=`, `<`, sugar for
//!   `isEQ(lhs,rhs)` and friends
//! - **Calls**: `hasTag("Name")`, `isComplete()`, `matches(name, "regex")`, ...
//! - **Operands**: quoted strings, numbers, `∞`, and keywords naming subject
//!   attributes (`shareratio`, `age`, `size`, `file_names`, ...)
//!
//! # Example
//!
//! ```
//! use autotag::constraint::compile;
//!
//! let compiled = compile("age > daysToSeconds(7) && isComplete()").unwrap();
//! assert_eq!(
//!     compiled.expr.to_string(),
//!     "(isGT(age,daysToSeconds(7))&&isComplete())"
//! );
//! ```

pub mod ast;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod keywords;
pub mod parser;
pub mod settings;

pub use ast::{Expr, FunctionCall, INFINITY_TOKEN, Node, Operand, Value};
pub use error::CompileError;
pub use evaluator::{Evaluator, Services};
pub use functions::{Function, Signature, ValueKind};
pub use keywords::{DependencyLevel, Keyword};
pub use parser::{Compiled, Compiler, compile};
pub use settings::SettingsCache;
