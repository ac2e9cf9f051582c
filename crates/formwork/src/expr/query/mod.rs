//! Embedded query expression language.
//!
//! A small sandboxed functional language for dynamic-property expressions:
//! field paths, literals, comparison/arithmetic/boolean operators, string
//! concatenation, conditionals and a handful of `$`-functions. Programs are
//! compiled once and interpreted against the engine's data root; every path
//! step reads through a tracked leaf, so re-evaluation is driven by exactly
//! the values an expression touched.
//!
//! Compilation never panics on malformed text: the caller receives the
//! errors and substitutes a constant-null program.

mod eval;
mod lexer;
mod parse;

use std::ops::Range;

pub use eval::evaluate;
pub use lexer::{Token, lexer};
pub use parse::parser;

use chumsky::input::Stream;
use chumsky::prelude::*;

/// Binary operators, loosest-binding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    In,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Concat,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

/// Compiled expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    /// Key path; `from_root` paths start at the data root (`$.a.b`),
    /// otherwise at the evaluating control's data node.
    Path { from_root: bool, segments: Vec<String> },
    Call { name: String, args: Vec<Expr> },
    Negate(Box<Expr>),
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
}

/// A compiled program plus the text it came from (for diagnostics).
#[derive(Debug, Clone)]
pub struct Program {
    pub source: String,
    pub expr: Expr,
}

impl Program {
    /// Constant-null replacement for malformed source text.
    pub fn null(source: &str) -> Self {
        Self { source: source.to_string(), expr: Expr::Null }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryError {
    pub message: String,
    pub span: Range<usize>,
}

/// Compile source text into a program. All lex and parse problems are
/// returned; none panic.
pub fn compile(source: &str) -> Result<Program, Vec<QueryError>> {
    let (tokens, lex_errors) = lexer().parse(source).into_output_errors();
    let mut errors: Vec<QueryError> = lex_errors
        .into_iter()
        .map(|error| QueryError {
            message: error.to_string(),
            span: error.span().into_range(),
        })
        .collect();
    let Some(tokens) = tokens else {
        return Err(errors);
    };

    let eoi = SimpleSpan::from(source.len()..source.len());
    let input = Stream::from_iter(tokens).map(eoi, |(token, span): (Token, SimpleSpan)| (token, span));
    let (expr, parse_errors) = parser().parse(input).into_output_errors();
    errors.extend(parse_errors.into_iter().map(|error| QueryError {
        message: error.to_string(),
        span: error.span().into_range(),
    }));

    match expr {
        Some(expr) if errors.is_empty() => Ok(Program { source: source.to_string(), expr }),
        _ => Err(errors),
    }
}
