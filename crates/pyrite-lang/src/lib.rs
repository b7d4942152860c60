//! `pyrite-lang` turns a parsed module of the pyrite dynamic language into
//! executable code objects.
//!
//! The pipeline is binder, flow checker and lowering; each scope ends up as
//! a [`CodeObject`] holding an expression tree, its frame layout and the
//! execution tier it starts on.
//!
//! ## Examples
//!
//! ```rs
//! use pyrite_lang::{Compiler, CompilerOptions, ast::build::*};
//!
//! let module = module(vec![
//!     def("add", params(&["a", "b"]), vec![ret(Some(binary(name("a"), BinaryOp::Add, name("b"))))]),
//!     expr_stmt(call(name("add"), vec![pos(int(1)), pos(int(2))])),
//! ]);
//! let compiled = Compiler::new(CompilerOptions::default()).compile(&module).unwrap();
//!
//! println!("{}", compiled.code.body);
//! ```
mod arena;
pub mod ast;
pub mod backend;
pub mod binder;
pub mod code;
mod compiler;
mod config;
mod constant;
mod diagnostic;
mod error;
mod flow;
pub mod ir;
pub mod light;
pub mod lower;
mod range;
pub mod scope;

pub use backend::{DelegateCache, ExecutionMode, ExpressionCompiler};
pub use binder::{Bindings, bind};
pub use code::{CellKind, CodeObject, FrameLayout, ParamKind, ParamSpec};
pub use compiler::{CompiledModule, Compiler};
pub use config::{CompilerOptions, ConfigError};
pub use constant::Constant;
pub use diagnostic::{Diagnostic, DiagnosticSink, Severity};
pub use error::Error;
pub use light::{Instruction, LightCode};
pub use range::{LineIndex, Span};
pub use scope::{ScopeKind, Storage};
