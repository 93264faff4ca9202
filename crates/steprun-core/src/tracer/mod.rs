//! Step tracer
//!
//! Parses Python 3 source and walks the statement tree in pre-order, emitting
//! one [`TraceStep`] per assignment, bare expression and conditional. Nothing
//! is evaluated: both sides of every branch are reported.

mod ast;
mod fstring;
mod lexer;
mod parser;
mod unparse;

use ast::{Expr, Stmt, StmtKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One line-tagged step of a trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStep {
    /// 0-based source line
    pub line_number: usize,
    pub description: String,
}

/// Source is not valid Python
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct ParseError {
    pub message: String,
    /// 1-based
    pub line: usize,
    /// 1-based
    pub column: usize,
}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Stack for parsing and walking; nesting is bounded by the parser's limits
/// rather than by the caller's thread
const TRACE_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Trace `source`, or report why it does not parse
pub fn trace(source: &str) -> Result<Vec<TraceStep>, ParseError> {
    std::thread::scope(|scope| {
        let worker = std::thread::Builder::new()
            .name("steprun-trace".into())
            .stack_size(TRACE_STACK_SIZE)
            .spawn_scoped(scope, || trace_here(source));
        match worker {
            Ok(handle) => handle.join().unwrap_or_else(|_| {
                tracing::error!("tracer thread panicked");
                Err(ParseError::new("tracer failed", 1, 1))
            }),
            Err(e) => {
                tracing::warn!(error = %e, "cannot start tracer thread, tracing inline");
                trace_here(source)
            }
        }
    })
}

fn trace_here(source: &str) -> Result<Vec<TraceStep>, ParseError> {
    let module = parser::parse_module(source)?;
    let mut steps = Vec::new();
    walk(&module, &mut steps);
    tracing::debug!(steps = steps.len(), "trace built");
    Ok(steps)
}

fn walk(block: &[Stmt], steps: &mut Vec<TraceStep>) {
    for stmt in block {
        if let Some(description) = Traced::classify(stmt).describe() {
            steps.push(TraceStep {
                line_number: stmt.line.saturating_sub(1),
                description,
            });
        }
        for nested in stmt.blocks() {
            walk(nested, steps);
        }
    }
}

/// The statement kinds a trace reports on
enum Traced<'a> {
    Assignment { target: &'a Expr, value: &'a Expr },
    Expression(&'a Expr),
    Conditional(&'a Expr),
    Other,
}

impl<'a> Traced<'a> {
    fn classify(stmt: &'a Stmt) -> Self {
        match &stmt.kind {
            StmtKind::Assign { targets, value } => match targets.first() {
                Some(target) => Self::Assignment { target, value },
                None => Self::Other,
            },
            StmtKind::Expr(expr) => Self::Expression(expr),
            StmtKind::If { test, .. } => Self::Conditional(test),
            StmtKind::AugAssign { .. }
            | StmtKind::AnnAssign { .. }
            | StmtKind::While { .. }
            | StmtKind::For { .. }
            | StmtKind::With { .. }
            | StmtKind::Try { .. }
            | StmtKind::Match { .. }
            | StmtKind::FunctionDef { .. }
            | StmtKind::ClassDef { .. }
            | StmtKind::Return(_)
            | StmtKind::Raise { .. }
            | StmtKind::Delete(_)
            | StmtKind::Assert { .. }
            | StmtKind::Import(_)
            | StmtKind::ImportFrom { .. }
            | StmtKind::Global(_)
            | StmtKind::Nonlocal(_)
            | StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue => Self::Other,
        }
    }

    fn describe(&self) -> Option<String> {
        match self {
            Self::Assignment { target, value } => Some(format!(
                "{} = {}",
                unparse::unparse(target),
                unparse::unparse(value)
            )),
            Self::Expression(expr) => Some(unparse::unparse(expr)),
            Self::Conditional(test) => Some(format!("If {}", unparse::unparse(test))),
            Self::Other => None,
        }
    }
}
