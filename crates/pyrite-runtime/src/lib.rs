//! `pyrite-runtime` executes modules compiled by `pyrite-lang`.
//!
//! Code objects run on one of two tiers: a stack machine over their light
//! instructions, or a delegate built by [`ClosureCompiler`] from the lowered
//! tree. Under [`Backend::Auto`] a code object starts light and switches to
//! its delegate once it has been invoked often enough.
//!
//! ## Examples
//!
//! ```rs
//! use pyrite_lang::ast::{BinaryOp, build::*};
//! use pyrite_runtime::{Interpreter, Value};
//!
//! let module = module(vec![
//!     assign(vec![name("x")], binary(int(40), BinaryOp::Add, int(2))),
//!     expr_stmt(call(name("print"), vec![pos(name("x"))])),
//! ]);
//! let interpreter = Interpreter::default();
//! let execution = interpreter.run(&module).unwrap();
//!
//! assert_eq!(execution.get("x"), Some(Value::Int(42)));
//! assert_eq!(interpreter.output(), "42\n");
//! ```
mod builtins;
mod call;
pub mod compiled;
mod error;
mod frame;
mod generator;
mod import;
mod interpreter;
mod iter;
mod ops;
pub mod value;
mod vm;

pub use compiled::{ClosureCompiler, Delegate};
pub use error::{ErrorKind, RuntimeError, TraceEntry, Unwind};
pub use frame::{Frame, Globals};
pub use generator::{Generator, GeneratorState};
pub use interpreter::{Backend, Execution, Interpreter, InterpreterOptions};
pub use value::{Args, Dict, Value};
