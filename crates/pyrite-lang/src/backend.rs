//! Backend selection, tiering and the shared compiled-delegate cache.

use std::{
    any::Any,
    fmt,
    sync::{Arc, OnceLock},
    thread::{self, JoinHandle},
};

use crate::{code::CodeObject, config::CompilerOptions, ir, light::LightCode, scope::ScopeFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Light instructions run by the interpreter until the code object is
    /// promoted.
    Light,
    /// The expression tree handed to an [`ExpressionCompiler`].
    Compiled,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Light => write!(f, "light"),
            ExecutionMode::Compiled => write!(f, "compiled"),
        }
    }
}

/// Turns lowered trees into something executable.
///
/// Implemented by the runtime; the core only decides when to call it.
pub trait ExpressionCompiler: Send + Sync + 'static {
    type Delegate: Any + Send + Sync;

    fn compile(&self, expr: &ir::Expr) -> Self::Delegate;
}

/// Single-assignment cache for a compiled delegate.
///
/// Concurrent callers of [`DelegateCache::get_or_compile`] compile at most
/// once; the first writer wins and everyone observes its result.
#[derive(Default)]
pub struct DelegateCache {
    cell: OnceLock<Arc<dyn Any + Send + Sync>>,
}

impl DelegateCache {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn get<D: Any + Send + Sync>(&self) -> Option<Arc<D>> {
        self.cell.get().and_then(|d| Arc::clone(d).downcast::<D>().ok())
    }

    pub fn get_or_compile<C: ExpressionCompiler>(&self, compiler: &C, expr: &ir::Expr) -> Arc<C::Delegate> {
        let cached = self.cell.get_or_init(|| {
            tracing::debug!(nodes = expr.size(), "compiling delegate");
            Arc::new(compiler.compile(expr))
        });

        match Arc::clone(cached).downcast::<C::Delegate>() {
            Ok(delegate) => delegate,
            Err(_) => {
                // Cached by a different compiler; serve an uncached delegate.
                tracing::debug!("delegate cache holds a foreign delegate type");
                Arc::new(compiler.compile(expr))
            }
        }
    }
}

impl fmt::Debug for DelegateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateCache")
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

/// Chooses how a code object runs.
///
/// Generators and scopes with a `for` loop are always compiled, as are
/// scopes whose light code would exceed `max_light_instructions`.
pub fn select_mode(
    name: &str,
    flags: &ScopeFlags,
    options: &CompilerOptions,
    body: &ir::Expr,
) -> (ExecutionMode, Option<LightCode>) {
    let reason = if !options.interpret {
        Some("interpretation disabled")
    } else if flags.is_generator {
        Some("generator")
    } else if flags.has_for_loop {
        Some("for loop")
    } else {
        None
    };

    if let Some(reason) = reason {
        tracing::debug!(code = name, reason, mode = %ExecutionMode::Compiled, "backend selected");
        return (ExecutionMode::Compiled, None);
    }

    let light = LightCode::compile(body);
    if light.len() > options.max_light_instructions {
        tracing::debug!(
            code = name,
            instructions = light.len(),
            mode = %ExecutionMode::Compiled,
            "backend selected"
        );
        return (ExecutionMode::Compiled, None);
    }

    tracing::debug!(code = name, instructions = light.len(), mode = %ExecutionMode::Light, "backend selected");
    (ExecutionMode::Light, Some(light))
}

/// Warms the compiled delegate of `code` on a worker thread.
///
/// The handle may be joined or dropped; a foreground caller that needs the
/// delegate first simply compiles it itself through the same cache.
pub fn precompile_in_background<C: ExpressionCompiler>(
    code: Arc<CodeObject>,
    compiler: Arc<C>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("pyrite-precompile-{}", code.name))
        .spawn(move || {
            let already = code.delegate.is_compiled();
            code.compiled(&*compiler);
            tracing::debug!(code = %code.name, already, "background precompile finished");
        })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::rstest;

    use super::*;
    use crate::constant::Constant;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl ExpressionCompiler for Counting {
        type Delegate = String;

        fn compile(&self, expr: &ir::Expr) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            expr.to_string()
        }
    }

    #[test]
    fn test_delegate_compiled_once() {
        let cache = DelegateCache::new();
        let compiler = Counting::default();
        let expr = ir::Expr::Constant(Constant::Int(7));

        assert!(!cache.is_compiled());
        let first = cache.get_or_compile(&compiler, &expr);
        let second = cache.get_or_compile(&compiler, &expr);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, "7");
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get::<String>().as_deref().map(String::as_str), Some("7"));
        assert!(cache.get::<u32>().is_none());
    }

    #[test]
    fn test_delegate_compiled_once_across_threads() {
        let cache = Arc::new(DelegateCache::new());
        let compiler = Arc::new(Counting::default());
        let expr = Arc::new(ir::Expr::Constant(Constant::str("x")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (cache, compiler, expr) = (cache.clone(), compiler.clone(), expr.clone());
                thread::spawn(move || cache.get_or_compile(&*compiler, &expr))
            })
            .collect();
        for handle in handles {
            assert_eq!(*handle.join().unwrap(), "'x'");
        }
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[case::default(ScopeFlags::default(), CompilerOptions::default(), ExecutionMode::Light)]
    #[case::generator(
        ScopeFlags { is_generator: true, ..Default::default() },
        CompilerOptions::default(),
        ExecutionMode::Compiled
    )]
    #[case::for_loop(
        ScopeFlags { has_for_loop: true, ..Default::default() },
        CompilerOptions::default(),
        ExecutionMode::Compiled
    )]
    #[case::interpret_off(ScopeFlags::default(), CompilerOptions::default().with_interpret(false), ExecutionMode::Compiled)]
    #[case::too_large(
        ScopeFlags::default(),
        CompilerOptions { max_light_instructions: 0, ..Default::default() },
        ExecutionMode::Compiled
    )]
    fn test_select_mode(#[case] flags: ScopeFlags, #[case] options: CompilerOptions, #[case] expected: ExecutionMode) {
        let body = ir::Expr::Return(Box::new(ir::Expr::none()));
        let (mode, light) = select_mode("f", &flags, &options, &body);
        assert_eq!(mode, expected);
        assert_eq!(light.is_some(), expected == ExecutionMode::Light);
    }
}
