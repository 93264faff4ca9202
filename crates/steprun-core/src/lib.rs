//! # steprun-core
//!
//! Polyglot compile/run harness for short teaching programs.
//!
//! This crate provides:
//! - Language recipes for python, c, cpp and java (`language`, `recipe`)
//! - Request-scoped temporary workspaces that clean up on every exit path
//! - Toolchain invocation as argument vectors, never through a shell
//! - A process runner with stdin feeding, bounded capture and a wall-clock timeout
//! - A Python step tracer that turns a syntax tree into line-tagged steps
//! - The request/response contract served by the daemon (`protocol`)

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod assist;
pub mod config;
pub mod error;
pub mod harness;
pub mod language;
pub mod protocol;
pub mod recipe;
pub mod result;
pub mod runner;
pub mod toolchain;
pub mod tracer;
pub mod workspace;

pub use config::HarnessConfig;
pub use error::StepError;
pub use harness::Harness;
pub use language::Language;
pub use result::{CompilationOutcome, ExecutionResult};
pub use tracer::{TraceStep, trace};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, StepError>;
