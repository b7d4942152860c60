use std::{sync::Arc, thread::JoinHandle};

use smol_str::SmolStr;

use crate::{
    ast::Module,
    backend::{self, ExpressionCompiler},
    binder,
    code::CodeObject,
    config::CompilerOptions,
    diagnostic::{Diagnostic, DiagnosticSink},
    error::Error,
    lower,
};

/// Binds and lowers modules with a fixed set of options.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    options: CompilerOptions,
}

/// A module ready to run: the top-level code object plus what the runtime
/// needs to set up its globals.
#[derive(Debug)]
pub struct CompiledModule {
    pub code: Arc<CodeObject>,
    /// Module-level names in global slot order.
    pub global_names: Vec<SmolStr>,
    /// Non-fatal diagnostics.
    pub warnings: Vec<Diagnostic>,
    pub class_bodies: Vec<Arc<CodeObject>>,
    background_class_compile: bool,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    #[allow(clippy::result_large_err)]
    pub fn compile(&self, module: &Module) -> Result<CompiledModule, Error> {
        let mut sink = DiagnosticSink::new();
        let bindings = binder::bind(module, &mut sink);
        let diagnostics = sink.into_vec();
        let source = module.source.as_deref().unwrap_or_default();
        if let Some(error) = Error::from_diagnostics(source, diagnostics.clone()) {
            tracing::debug!(module = %self.options.module_name, %error, "module rejected");
            return Err(error);
        }

        let lowered = lower::lower_module(module, &bindings, &self.options);
        tracing::debug!(
            module = %self.options.module_name,
            mode = %lowered.code.mode,
            classes = lowered.class_bodies.len(),
            "module compiled"
        );
        Ok(CompiledModule {
            code: lowered.code,
            global_names: bindings.tree.global_names().to_vec(),
            warnings: diagnostics,
            class_bodies: lowered.class_bodies,
            background_class_compile: self.options.background_class_compile,
        })
    }
}

impl CompiledModule {
    /// Starts compiling class bodies on worker threads, when enabled. A
    /// class body runs exactly once, so it never reaches the tiering
    /// threshold on its own.
    pub fn warm_class_bodies<C: ExpressionCompiler>(&self, compiler: &Arc<C>) -> Vec<JoinHandle<()>> {
        if !self.background_class_compile {
            return Vec::new();
        }
        self.class_bodies
            .iter()
            .filter_map(|body| {
                backend::precompile_in_background(Arc::clone(body), Arc::clone(compiler))
                    .inspect_err(|e| tracing::warn!(code = %body.name, error = %e, "could not spawn precompile thread"))
                    .ok()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::backend::ExecutionMode;

    struct Echo;

    impl ExpressionCompiler for Echo {
        type Delegate = String;

        fn compile(&self, expr: &crate::ir::Expr) -> String {
            expr.to_string()
        }
    }

    #[test]
    fn test_compile_reports_first_error() {
        let module = module(vec![def(
            "f",
            params(&[]),
            vec![nonlocal(&["x"])],
        )]);
        let error = Compiler::default().compile(&module).unwrap_err();
        assert!(error.cause.is_fatal());
    }

    #[test]
    fn test_compile_collects_globals_and_class_bodies() {
        let module = module(vec![
            assign(vec![name("x")], int(1)),
            class("C", vec![], vec![assign(vec![name("y")], name("x"))]),
        ]);
        let compiled = Compiler::default().compile(&module).unwrap();
        assert!(compiled.global_names.iter().any(|n| n == "x"));
        assert!(compiled.global_names.iter().any(|n| n == "C"));
        assert_eq!(compiled.class_bodies.len(), 1);
        assert_eq!(compiled.code.name, "__main__");

        let handles = compiled.warm_class_bodies(&Arc::new(Echo));
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(compiled.class_bodies[0].delegate.is_compiled());
    }

    #[test]
    fn test_interpret_disabled_compiles_everything() {
        let options = CompilerOptions::default().with_interpret(false);
        let compiled = Compiler::new(options)
            .compile(&module(vec![expr_stmt(int(1))]))
            .unwrap();
        assert_eq!(compiled.code.mode, ExecutionMode::Compiled);
        assert!(compiled.code.light.is_none());
    }
}
