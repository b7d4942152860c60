use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::Arc,
};

use pyrite_lang::{CodeObject, Compiler, CompilerOptions, Diagnostic, ast};
use smol_str::SmolStr;

use crate::{
    builtins, call,
    compiled::ClosureCompiler,
    error::{ErrorKind, RuntimeError, Unwind, raise},
    frame::{Frame, Globals},
    import::ModuleRegistry,
    value::{Namespace, Value},
};

#[cfg(debug_assertions)]
const DEFAULT_MAX_CALL_DEPTH: u32 = 64;
#[cfg(not(debug_assertions))]
const DEFAULT_MAX_CALL_DEPTH: u32 = 1000;

/// Which tier runs a code object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    /// Light first, compiled once the invocation threshold is reached.
    #[default]
    Auto,
    /// Light whenever a code object has light code.
    Light,
    Compiled,
}

#[derive(Debug, Clone)]
pub struct InterpreterOptions {
    /// Nested frames allowed before `RecursionError`.
    pub max_call_depth: u32,
    pub backend: Backend,
    pub compiler: CompilerOptions,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            backend: Backend::default(),
            compiler: CompilerOptions::default(),
        }
    }
}

impl InterpreterOptions {
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_call_depth(mut self, depth: u32) -> Self {
        self.max_call_depth = depth;
        self
    }
}

/// State shared by every frame of one interpreter.
pub(crate) struct Runtime {
    pub options: InterpreterOptions,
    pub compiler: Arc<ClosureCompiler>,
    pub builtins: Namespace,
    pub modules: RefCell<ModuleRegistry>,
    /// Everything `print` wrote.
    pub output: RefCell<String>,
    depth: Cell<u32>,
}

impl Runtime {
    pub fn builtin(&self, name: &str) -> Option<Value> {
        self.builtins.get(name).cloned()
    }

    /// Claims one level of call depth until the guard drops.
    pub fn enter(&self) -> Result<DepthGuard<'_>, Unwind> {
        let depth = self.depth.get();
        if depth >= self.options.max_call_depth {
            return Err(raise(ErrorKind::RecursionError, "maximum recursion depth exceeded"));
        }
        self.depth.set(depth + 1);
        Ok(DepthGuard { depth: &self.depth })
    }
}

pub(crate) struct DepthGuard<'a> {
    depth: &'a Cell<u32>,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// Runs a module body against `globals`.
pub(crate) fn execute(rt: &Rc<Runtime>, code: &Arc<CodeObject>, globals: Rc<Globals>) -> Result<Value, Unwind> {
    let mut frame = Frame::new(Rc::clone(rt), Arc::clone(code), globals, Vec::new());
    rt.enter().and_then(|_depth| call::run(&mut frame))
}

pub struct Interpreter {
    rt: Rc<Runtime>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(InterpreterOptions::default())
    }
}

impl Interpreter {
    pub fn new(options: InterpreterOptions) -> Self {
        Self {
            rt: Rc::new(Runtime {
                options,
                compiler: Arc::new(ClosureCompiler),
                builtins: builtins::namespace(),
                modules: RefCell::new(ModuleRegistry::default()),
                output: RefCell::new(String::new()),
                depth: Cell::new(0),
            }),
        }
    }

    pub fn options(&self) -> &InterpreterOptions {
        &self.rt.options
    }

    /// Makes `module` importable as `name`; it is compiled on first import.
    pub fn register_module(&self, name: impl Into<SmolStr>, module: ast::Module) {
        self.rt.modules.borrow_mut().sources.insert(name.into(), Rc::new(module));
    }

    /// Makes a module of host-provided values importable as `name`.
    pub fn register_native_module<K: Into<SmolStr>>(&self, name: impl Into<SmolStr>, items: impl IntoIterator<Item = (K, Value)>) {
        let items = items.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.rt.modules.borrow_mut().natives.insert(name.into(), items);
    }

    pub fn output(&self) -> String {
        self.rt.output.borrow().clone()
    }

    pub fn take_output(&self) -> String {
        std::mem::take(&mut *self.rt.output.borrow_mut())
    }

    /// Compiles and runs `module` as the main module.
    pub fn run(&self, module: &ast::Module) -> Result<Execution, RuntimeError> {
        let compiled = Compiler::new(self.rt.options.compiler.clone()).compile(module)?;
        for warning in &compiled.warnings {
            tracing::warn!(module = %self.rt.options.compiler.module_name, %warning, "compile warning");
        }
        // Detached: a class body that runs before its worker finishes compiles on demand.
        drop(compiled.warm_class_bodies(&self.rt.compiler));

        let globals = Globals::new(&compiled.global_names);
        let result = execute(&self.rt, &compiled.code, Rc::clone(&globals));
        if let Err(Unwind::Exception(exception)) = &result {
            tracing::debug!(exception = %exception.type_name(), "uncaught exception");
        }
        result.map_err(RuntimeError::from_unwind)?;
        Ok(Execution {
            globals,
            warnings: compiled.warnings,
            code: compiled.code,
        })
    }
}

/// A finished module run.
#[derive(Debug)]
pub struct Execution {
    globals: Rc<Globals>,
    warnings: Vec<Diagnostic>,
    code: Arc<CodeObject>,
}

impl Execution {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.globals.get(name)
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn code(&self) -> &Arc<CodeObject> {
        &self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_guard_releases_on_drop() {
        let interpreter = Interpreter::new(InterpreterOptions::default().with_max_call_depth(2));
        let rt = &interpreter.rt;
        {
            let _a = rt.enter().unwrap();
            let _b = rt.enter().unwrap();
            assert!(matches!(rt.enter(), Err(Unwind::Exception(_))));
        }
        assert_eq!(rt.depth.get(), 0);
        assert!(rt.enter().is_ok());
    }

    #[test]
    fn test_take_output_clears_buffer() {
        let interpreter = Interpreter::default();
        interpreter.rt.output.borrow_mut().push_str("hi\n");
        assert_eq!(interpreter.take_output(), "hi\n");
        assert_eq!(interpreter.output(), "");
    }
}
