//! Calling convention: argument binding, frame creation and tier dispatch.

use std::{cell::RefCell, rc::Rc, sync::Arc};

use pyrite_lang::{CodeObject, ExecutionMode, ParamKind, ir::ArgKind};
use rustc_hash::FxHashSet;
use smol_str::SmolStr;

use crate::{
    builtins,
    error::{ErrorKind, Unwind, raise, type_error},
    frame::{Captured, Frame},
    generator::Generator,
    interpreter::Backend,
    iter,
    value::{Args, Class, Dict, Function, Instance, Namespace, Native, Value},
    vm,
};

pub fn call(frame: &mut Frame, callee: &Value, mut args: Args) -> Result<Value, Unwind> {
    let result = match callee {
        Value::Function(function) => call_function(frame, function, args),
        Value::Builtin(builtin) => (builtin.func)(frame, args),
        Value::BoundMethod(method) => {
            args.positional.insert(0, method.receiver.clone());
            call(frame, &method.function, args)
        }
        Value::Class(class) => instantiate(frame, class, args),
        Value::Instance(instance) => match instance.class.lookup("__call__") {
            Some(method) => {
                args.positional.insert(0, callee.clone());
                call(frame, &method, args)
            }
            None => Err(not_callable(callee)),
        },
        other => Err(not_callable(other)),
    };
    result.map_err(|e| frame.failed(e))
}

fn not_callable(value: &Value) -> Unwind {
    type_error(format!("'{}' object is not callable", value.type_name()))
}

/// Calls `receiver.name(*args)` when the class defines `name`; `Ok(None)`
/// when it does not.
pub fn call_method(frame: &mut Frame, receiver: &Value, name: &str, args: Vec<Value>) -> Result<Option<Value>, Unwind> {
    let method = match receiver {
        Value::Instance(instance) => instance.class.lookup(name),
        _ => None,
    };
    let Some(method) = method else {
        return Ok(None);
    };
    let mut positional = Vec::with_capacity(args.len() + 1);
    positional.push(receiver.clone());
    positional.extend(args);
    call(frame, &method, Args::positional(positional)).map(Some)
}

fn call_function(frame: &Frame, function: &Rc<Function>, args: Args) -> Result<Value, Unwind> {
    let mut callee = Frame::new(
        Rc::clone(&frame.rt),
        Arc::clone(&function.code),
        Rc::clone(&function.globals),
        function.closure.clone(),
    );
    bind_arguments(&mut callee, function, args)?;
    if function.code.is_generator() {
        return Ok(Value::Generator(Generator::new(callee)));
    }
    let rt = Rc::clone(&frame.rt);
    let _depth = rt.enter()?;
    run(&mut callee)
}

/// Writes call arguments into the parameter storage of a fresh frame.
fn bind_arguments(frame: &mut Frame, function: &Function, args: Args) -> Result<(), Unwind> {
    let code = Arc::clone(&function.code);
    let name = &function.name;
    let params = &code.params;
    let positional_params: Vec<_> = params.iter().filter(|p| p.kind == ParamKind::Positional).collect();
    let has_varargs = params.iter().any(|p| p.kind == ParamKind::VarArgs);
    let has_kwargs = params.iter().any(|p| p.kind == ParamKind::KwArgs);

    let Args {
        mut positional,
        keywords,
    } = args;
    if positional.len() > positional_params.len() && !has_varargs {
        return Err(type_error(format!(
            "{name}() takes {} positional argument{} but {} {} given",
            positional_params.len(),
            if positional_params.len() == 1 { "" } else { "s" },
            positional.len(),
            if positional.len() == 1 { "was" } else { "were" },
        )));
    }
    let mut extra = positional.split_off(positional.len().min(positional_params.len()));

    let mut values: Vec<Option<Value>> = vec![None; params.len()];
    let mut slot_of_positional = params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.kind == ParamKind::Positional)
        .map(|(i, _)| i);
    for value in positional {
        if let Some(slot) = slot_of_positional.next() {
            values[slot] = Some(value);
        }
    }

    let mut overflow = Dict::new();
    for (keyword, value) in keywords {
        let target = params
            .iter()
            .position(|p| p.name == keyword && matches!(p.kind, ParamKind::Positional | ParamKind::KwOnly));
        match target {
            Some(slot) if values[slot].is_some() => {
                return Err(type_error(format!("{name}() got multiple values for argument '{keyword}'")));
            }
            Some(slot) => values[slot] = Some(value),
            None if has_kwargs => overflow.insert(Value::Str(keyword), value)?,
            None => {
                return Err(type_error(format!("{name}() got an unexpected keyword argument '{keyword}'")));
            }
        }
    }

    let first_default = positional_params.len().saturating_sub(function.defaults.len());
    let mut missing = Vec::new();
    let mut positional_index: usize = 0;
    for (slot, param) in params.iter().enumerate() {
        if values[slot].is_some() {
            if param.kind == ParamKind::Positional {
                positional_index += 1;
            }
            continue;
        }
        values[slot] = match param.kind {
            ParamKind::Positional => {
                let default = positional_index
                    .checked_sub(first_default)
                    .and_then(|i| function.defaults.get(i))
                    .cloned();
                positional_index += 1;
                if default.is_none() {
                    missing.push(param.name.clone());
                }
                default
            }
            ParamKind::KwOnly => {
                let default = function
                    .kw_defaults
                    .iter()
                    .find(|(n, _)| *n == param.name)
                    .map(|(_, v)| v.clone());
                if default.is_none() {
                    missing.push(param.name.clone());
                }
                default
            }
            ParamKind::VarArgs => Some(Value::tuple(std::mem::take(&mut extra))),
            ParamKind::KwArgs => Some(Value::dict(std::mem::take(&mut overflow))),
        };
    }
    if !missing.is_empty() {
        return Err(type_error(format!(
            "{name}() missing {} required argument{}: {}",
            missing.len(),
            if missing.len() == 1 { "" } else { "s" },
            missing.iter().map(|m| format!("'{m}'")).collect::<Vec<_>>().join(", "),
        )));
    }

    for (param, value) in params.iter().zip(values) {
        if let Some(value) = value {
            let var = pyrite_lang::ir::VarAccess::new(param.name.clone(), param.storage);
            frame.store(&var, value)?;
        }
    }
    Ok(())
}

/// Runs a non-generator frame on the tier its code object selects.
pub(crate) fn run(frame: &mut Frame) -> Result<Value, Unwind> {
    let code = Arc::clone(&frame.code);
    let rt = Rc::clone(&frame.rt);
    let mode = match rt.options.backend {
        Backend::Auto => code.record_invocation(),
        Backend::Light if code.light.is_some() => ExecutionMode::Light,
        Backend::Light | Backend::Compiled => ExecutionMode::Compiled,
    };
    let result = match (&code.light, mode) {
        (Some(light), ExecutionMode::Light) => vm::run(light, frame),
        _ => code.compiled(&*rt.compiler).run(frame),
    };
    match result {
        Ok(value) | Err(Unwind::Return(value)) => Ok(value),
        Err(Unwind::Exception(exception)) => {
            frame.record_traceback(&exception);
            Err(Unwind::Exception(exception))
        }
        Err(Unwind::Break(_) | Unwind::Continue(_)) => {
            Err(raise(ErrorKind::SystemError, format!("loop exit escaped '{}'", code.name)))
        }
        Err(Unwind::Suspend { .. }) => Err(raise(
            ErrorKind::SystemError,
            format!("suspension outside a generator in '{}'", code.name),
        )),
    }
}

pub(crate) fn make_function(
    frame: &Frame,
    code: &Arc<CodeObject>,
    defaults: Vec<Value>,
    kw_defaults: Vec<(SmolStr, Value)>,
    annotations: Vec<(SmolStr, Value)>,
) -> Result<Value, Unwind> {
    let closure = code
        .layout
        .closure_map
        .iter()
        .map(|&i| {
            frame
                .closure
                .get(i as usize)
                .cloned()
                .ok_or_else(|| raise(ErrorKind::SystemError, format!("closure index {i} out of range")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut attrs = Namespace::default();
    attrs.insert("__name__".into(), Value::Str(code.name.clone()));
    attrs.insert(
        "__doc__".into(),
        code.docstring.clone().map(Value::Str).unwrap_or_default(),
    );
    if !annotations.is_empty() {
        let mut dict = Dict::new();
        for (name, value) in annotations {
            dict.insert(Value::Str(name), value)?;
        }
        attrs.insert("__annotations__".into(), Value::dict(dict));
    }
    Ok(Value::Function(Rc::new(Function {
        name: code.name.clone(),
        code: Arc::clone(code),
        globals: Rc::clone(&frame.globals),
        closure,
        defaults,
        kw_defaults,
        attrs: RefCell::new(attrs),
    })))
}

/// Runs the class body in a fresh namespace and builds the class from it.
pub(crate) fn make_class(
    frame: &Frame,
    name: &SmolStr,
    body: &Arc<CodeObject>,
    bases: Vec<Value>,
    self_attrs: &[SmolStr],
) -> Result<Value, Unwind> {
    let bases = if bases.is_empty() {
        vec![builtins::native_class(Native::Object)]
    } else {
        bases
            .iter()
            .map(|b| {
                b.as_class()
                    .cloned()
                    .ok_or_else(|| type_error(format!("bases must be classes, not '{}'", b.type_name())))
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    let mut seen = FxHashSet::default();
    if !bases.iter().all(|b| seen.insert(Rc::as_ptr(b))) {
        return Err(type_error(format!("duplicate base class in '{name}'")));
    }

    let closure = body
        .layout
        .closure_map
        .iter()
        .filter_map(|&i| frame.closure.get(i as usize).cloned())
        .collect();
    let mut class_frame = Frame::new(Rc::clone(&frame.rt), Arc::clone(body), Rc::clone(&frame.globals), closure);
    {
        let rt = Rc::clone(&frame.rt);
        let _depth = rt.enter()?;
        run(&mut class_frame)?;
    }

    let namespace = class_frame
        .namespace
        .as_ref()
        .map(|ns| ns.borrow().clone())
        .unwrap_or_default();
    let class = Class::new(name.clone(), bases, namespace, self_attrs.to_vec(), None);
    if let Some(cell) = body.layout.class_cell
        && let Some(Captured::Cell(cell)) = class_frame.closure.get(cell as usize)
    {
        *cell.borrow_mut() = Some(Value::Class(Rc::clone(&class)));
    }
    tracing::debug!(class = %name, attrs = class.dict.borrow().len(), "class created");
    Ok(Value::Class(class))
}

fn instantiate(frame: &mut Frame, class: &Rc<Class>, args: Args) -> Result<Value, Unwind> {
    match class.native {
        Some(Native::Object | Native::Exception) | None => {}
        Some(native) => return builtins::construct(frame, native, args),
    }
    let instance = Instance::new(Rc::clone(class));
    if instance.is_exception() {
        instance.set("args", Value::tuple(args.positional.clone()));
    }
    let value = Value::Instance(instance);
    if let Some(init) = class.lookup("__init__") {
        let mut args = args;
        args.positional.insert(0, value.clone());
        let result = call(frame, &init, args)?;
        if !result.is_none() {
            return Err(type_error(format!(
                "__init__() should return None, not '{}'",
                result.type_name()
            )));
        }
    }
    Ok(value)
}

/// Expands star and double-star arguments in source order.
pub(crate) fn collect_args<'k>(
    frame: &mut Frame,
    items: impl IntoIterator<Item = (&'k ArgKind, Value)>,
) -> Result<Args, Unwind> {
    let mut args = Args::default();
    for (kind, value) in items {
        match kind {
            ArgKind::Positional => args.positional.push(value),
            ArgKind::Star => args.positional.extend(iter::collect(frame, &value)?),
            ArgKind::Keyword(name) => args.keywords.push((name.clone(), value)),
            ArgKind::DoubleStar => {
                let Value::Dict(dict) = &value else {
                    return Err(type_error(format!(
                        "argument after ** must be a mapping, not {}",
                        value.type_name()
                    )));
                };
                for (key, item) in dict.borrow().iter() {
                    let Value::Str(key) = key else {
                        return Err(type_error("keywords must be strings"));
                    };
                    args.keywords.push((key.clone(), item.clone()));
                }
            }
        }
    }
    Ok(args)
}
