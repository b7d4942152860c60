//! Module registry and the import operations.

use std::rc::Rc;

use pyrite_lang::{Compiler, ast};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::{
    error::{ErrorKind, Unwind, raise, type_error},
    frame::{Frame, Globals},
    interpreter,
    iter,
    value::{Module, Namespace, Value},
};

/// Sources the host registered plus every module loaded so far.
#[derive(Default)]
pub(crate) struct ModuleRegistry {
    pub sources: FxHashMap<SmolStr, Rc<ast::Module>>,
    pub natives: FxHashMap<SmolStr, Namespace>,
    pub loaded: FxHashMap<SmolStr, Value>,
}

impl ModuleRegistry {
    fn knows(&self, name: &str) -> bool {
        self.loaded.contains_key(name) || self.sources.contains_key(name) || self.natives.contains_key(name)
    }

    /// A package is any registered name with registered submodules.
    fn is_package(&self, name: &str) -> bool {
        self.sources
            .keys()
            .chain(self.natives.keys())
            .any(|k| k.strip_prefix(name).is_some_and(|rest| rest.starts_with('.')))
    }
}

enum Source {
    Native(Namespace),
    Ast(Rc<ast::Module>),
}

fn import_error(message: impl Into<String>) -> Unwind {
    raise(ErrorKind::ImportError, message)
}

/// Absolute module name for an import at `level` leading dots.
fn resolve(frame: &Frame, name: &str, level: u32) -> Result<SmolStr, Unwind> {
    if level == 0 {
        return Ok(name.into());
    }
    let current = frame
        .globals
        .get("__name__")
        .and_then(|v| v.as_str().cloned())
        .filter(|n| n.as_str() != "__main__");
    let Some(current) = current else {
        return Err(import_error("attempted relative import with no known parent package"));
    };
    let registry = frame.rt.modules.borrow();
    let mut package = if registry.is_package(&current) {
        current.as_str()
    } else {
        current.rsplit_once('.').map(|(parent, _)| parent).unwrap_or_default()
    };
    if package.is_empty() {
        return Err(import_error("attempted relative import with no known parent package"));
    }
    for _ in 1..level {
        package = match package.rsplit_once('.') {
            Some((parent, _)) => parent,
            None => return Err(import_error("attempted relative import beyond top-level package")),
        };
    }
    Ok(if name.is_empty() {
        package.into()
    } else {
        format!("{package}.{name}").into()
    })
}

/// `import a.b.c`: loads every dotted prefix and links each child into its
/// parent. Yields `a` when `top` is set, `a.b.c` otherwise.
pub fn import(frame: &mut Frame, name: &str, level: u32, top: bool) -> Result<Value, Unwind> {
    let absolute = resolve(frame, name, level)?;
    let mut current: Option<Value> = None;
    let mut first: Option<Value> = None;
    let mut prefix = String::with_capacity(absolute.len());
    for part in absolute.split('.') {
        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(part);
        let child = load_module(frame, &prefix)?;
        if let Some(Value::Module(parent)) = &current {
            parent.globals.set(&part.into(), child.clone());
        }
        first.get_or_insert_with(|| child.clone());
        current = Some(child);
    }
    let module = if top { first } else { current };
    Ok(module.unwrap_or_default())
}

fn load_module(frame: &mut Frame, name: &str) -> Result<Value, Unwind> {
    let source = {
        let registry = frame.rt.modules.borrow();
        if let Some(module) = registry.loaded.get(name) {
            return Ok(module.clone());
        }
        if let Some(items) = registry.natives.get(name) {
            Source::Native(items.clone())
        } else if let Some(module) = registry.sources.get(name) {
            Source::Ast(Rc::clone(module))
        } else {
            return Err(import_error(format!("No module named '{name}'")));
        }
    };

    let (globals, code) = match source {
        Source::Native(items) => {
            let globals = Globals::new(&[]);
            globals.set(&"__name__".into(), Value::str(name));
            for (key, value) in items {
                globals.set(&key, value);
            }
            let module = new_module(name, globals);
            frame.rt.modules.borrow_mut().loaded.insert(name.into(), module.clone());
            return Ok(module);
        }
        Source::Ast(module) => {
            let mut options = frame.rt.options.compiler.clone().with_module_name(name);
            options.filename = format!("{}.py", name.replace('.', "/")).into();
            let compiled = Compiler::new(options)
                .compile(&module)
                .map_err(|e| import_error(format!("cannot compile module '{name}': {e}")))?;
            for warning in &compiled.warnings {
                tracing::warn!(module = %name, %warning, "compile warning");
            }
            (Globals::new(&compiled.global_names), compiled.code)
        }
    };

    let module = new_module(name, Rc::clone(&globals));
    // Registered before running so import cycles see the partial module.
    frame.rt.modules.borrow_mut().loaded.insert(name.into(), module.clone());
    let rt = Rc::clone(&frame.rt);
    match interpreter::execute(&rt, &code, globals) {
        Ok(_) => {
            tracing::debug!(module = %name, "module imported");
            Ok(module)
        }
        Err(e) => {
            rt.modules.borrow_mut().loaded.remove(name);
            Err(e)
        }
    }
}

fn new_module(name: &str, globals: Rc<Globals>) -> Value {
    Value::Module(Rc::new(Module {
        name: name.into(),
        globals,
    }))
}

/// `from m import name`, falling back to a submodule `m.name`.
pub fn import_from(frame: &mut Frame, module: &Value, name: &str) -> Result<Value, Unwind> {
    let Value::Module(m) = module else {
        return Err(type_error(format!(
            "cannot import from '{}' object",
            module.type_name()
        )));
    };
    if let Some(value) = m.globals.get(name) {
        return Ok(value);
    }
    let qualified = format!("{}.{name}", m.name);
    if !frame.rt.modules.borrow().knows(&qualified) {
        return Err(import_error(format!("cannot import name '{name}' from '{}'", m.name)));
    }
    let submodule = load_module(frame, &qualified)?;
    m.globals.set(&name.into(), submodule.clone());
    Ok(submodule)
}

/// `from m import *`: the names in `__all__`, or every public name.
pub fn import_star(frame: &mut Frame, module: &Value) -> Result<(), Unwind> {
    let Value::Module(m) = module else {
        return Err(type_error(format!(
            "cannot import from '{}' object",
            module.type_name()
        )));
    };
    let items: Vec<(SmolStr, Value)> = match m.globals.get("__all__") {
        Some(all) => {
            let mut items = Vec::new();
            for name in iter::collect(frame, &all)? {
                let Value::Str(name) = name else {
                    return Err(type_error(format!(
                        "Item in {}.__all__ must be str, not {}",
                        m.name,
                        name.type_name()
                    )));
                };
                let value = m.globals.get(&name).ok_or_else(|| {
                    raise(
                        ErrorKind::AttributeError,
                        format!("module '{}' has no attribute '{name}'", m.name),
                    )
                })?;
                items.push((name, value));
            }
            items
        }
        None => m
            .globals
            .items()
            .into_iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .collect(),
    };
    match &frame.namespace {
        Some(namespace) => namespace.borrow_mut().extend(items),
        None => {
            for (name, value) in items {
                frame.globals.set(&name, value);
            }
        }
    }
    Ok(())
}
