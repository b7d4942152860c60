//! Builtin classes, functions and methods of builtin values.

use std::{cell::RefCell, rc::Rc};

use pyrite_lang::ast::BinaryOp;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::{
    call::{self, call_method},
    error::{ErrorKind, Unwind, raise, type_error},
    frame::Frame,
    iter::{self, Iter},
    ops,
    value::{Args, BoundMethod, Builtin, BuiltinFn, Class, Dict, Instance, Key, Namespace, Native, Super, Value},
};

/// Builtin class objects, shared by every interpreter on a thread.
struct Types {
    natives: Vec<Rc<Class>>,
    exceptions: Vec<Rc<Class>>,
    other: RefCell<FxHashMap<SmolStr, Rc<Class>>>,
}

const NATIVES: [(Native, &str); 11] = [
    (Native::Object, "object"),
    (Native::Type, "type"),
    (Native::NoneType, "NoneType"),
    (Native::Int, "int"),
    (Native::Bool, "bool"),
    (Native::Float, "float"),
    (Native::Str, "str"),
    (Native::Tuple, "tuple"),
    (Native::List, "list"),
    (Native::Dict, "dict"),
    (Native::Set, "set"),
];

impl Types {
    fn new() -> Types {
        let mut object_dict = Namespace::default();
        object_dict.insert("__init__".into(), builtin("__init__", object_init));
        let object = Class::new("object".into(), Vec::new(), object_dict, Vec::new(), Some(Native::Object));

        let mut natives = vec![Rc::clone(&object)];
        for (native, name) in NATIVES.iter().skip(1) {
            let base = match native {
                Native::Bool => natives.iter().find(|c: &&Rc<Class>| c.native == Some(Native::Int)).cloned(),
                _ => None,
            }
            .unwrap_or_else(|| Rc::clone(&object));
            natives.push(Class::new((*name).into(), vec![base], Namespace::default(), Vec::new(), Some(*native)));
        }

        let mut exceptions: Vec<Rc<Class>> = Vec::with_capacity(ErrorKind::ALL.len());
        for kind in ErrorKind::ALL {
            let base = match kind.base() {
                Some(base) => Rc::clone(&exceptions[base as usize]),
                None => Rc::clone(&object),
            };
            let mut dict = Namespace::default();
            if kind == ErrorKind::BaseException {
                dict.insert("__init__".into(), builtin("__init__", exception_init));
            }
            exceptions.push(Class::new(kind.name().into(), vec![base], dict, Vec::new(), Some(Native::Exception)));
        }

        Types {
            natives,
            exceptions,
            other: RefCell::new(FxHashMap::default()),
        }
    }

    fn native(&self, native: Native) -> Rc<Class> {
        if native == Native::Exception {
            return Rc::clone(&self.exceptions[ErrorKind::BaseException as usize]);
        }
        self.natives
            .iter()
            .find(|c| c.native == Some(native))
            .cloned()
            .unwrap_or_else(|| Rc::clone(&self.natives[0]))
    }
}

thread_local! {
    static TYPES: Types = Types::new();
}

fn builtin(name: &'static str, func: BuiltinFn) -> Value {
    Value::Builtin(Rc::new(Builtin { name, func }))
}

pub fn native_class(native: Native) -> Rc<Class> {
    TYPES.with(|types| types.native(native))
}

pub fn exception_class(kind: ErrorKind) -> Rc<Class> {
    TYPES.with(|types| Rc::clone(&types.exceptions[kind as usize]))
}

pub fn new_exception(kind: ErrorKind, message: String) -> Value {
    let args = if message.is_empty() {
        Vec::new()
    } else {
        vec![Value::str(message)]
    };
    exception_with_args(kind, args)
}

pub fn exception_with_args(kind: ErrorKind, args: Vec<Value>) -> Value {
    let instance = Instance::new(exception_class(kind));
    instance.set("args", Value::tuple(args));
    Value::Instance(instance)
}

/// The text after `Class: ` in a traceback.
pub fn exception_message(exception: &Value) -> String {
    match exception.as_instance() {
        Some(instance) if is_instance_of(exception, ErrorKind::KeyError) => match instance.args().as_slice() {
            [key] => key.repr(),
            _ => exception.to_string(),
        },
        _ => exception.to_string(),
    }
}

pub fn is_instance_of(value: &Value, kind: ErrorKind) -> bool {
    value
        .as_instance()
        .is_some_and(|instance| instance.class.is_subclass(&exception_class(kind)))
}

pub fn class_of(value: &Value) -> Rc<Class> {
    let native = match value {
        Value::Instance(instance) => return Rc::clone(&instance.class),
        Value::None => Native::NoneType,
        Value::Bool(_) => Native::Bool,
        Value::Int(_) => Native::Int,
        Value::Float(_) => Native::Float,
        Value::Str(_) => Native::Str,
        Value::Tuple(_) => Native::Tuple,
        Value::List(_) => Native::List,
        Value::Dict(_) => Native::Dict,
        Value::Set(_) => Native::Set,
        Value::Class(_) => Native::Type,
        other => {
            let name = other.type_name();
            return TYPES.with(|types| {
                let mut other = types.other.borrow_mut();
                let object = Rc::clone(&types.natives[0]);
                Rc::clone(
                    other
                        .entry(name.clone())
                        .or_insert_with(|| Class::new(name, vec![object], Namespace::default(), Vec::new(), None)),
                )
            });
        }
    };
    native_class(native)
}

/// The builtins namespace every module resolves unbound globals against.
pub fn namespace() -> Namespace {
    let mut ns = Namespace::default();
    let functions: [(&'static str, BuiltinFn); 33] = [
        ("print", print),
        ("len", len),
        ("repr", repr),
        ("range", range),
        ("isinstance", isinstance),
        ("issubclass", issubclass),
        ("iter", iter_),
        ("next", next),
        ("locals", locals),
        ("super", super_),
        ("slice", slice),
        ("getattr", getattr),
        ("hasattr", hasattr),
        ("setattr", setattr),
        ("delattr", delattr),
        ("abs", abs),
        ("min", min),
        ("max", max),
        ("sum", sum),
        ("sorted", sorted),
        ("enumerate", enumerate),
        ("zip", zip),
        ("callable", callable),
        ("any", any),
        ("all", all),
        ("reversed", reversed),
        ("ord", ord),
        ("chr", chr),
        ("hash", hash),
        ("divmod", divmod),
        ("round", round),
        ("format", format),
        ("pow", pow),
    ];
    for (name, func) in functions {
        ns.insert(name.into(), builtin(name, func));
    }
    TYPES.with(|types| {
        for class in types.natives.iter().chain(&types.exceptions) {
            if class.name != "NoneType" {
                ns.insert(class.name.clone(), Value::Class(Rc::clone(class)));
            }
        }
    });
    ns.insert("True".into(), Value::Bool(true));
    ns.insert("False".into(), Value::Bool(false));
    ns.insert("None".into(), Value::None);
    ns
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

fn arity_error(name: &str, given: usize, min: usize, max: usize) -> Unwind {
    let expected = if min == max {
        format!("exactly {min} argument{}", plural(min))
    } else if max == usize::MAX {
        format!("at least {min} argument{}", plural(min))
    } else if min == 0 {
        format!("at most {max} argument{}", plural(max))
    } else {
        format!("from {min} to {max} arguments")
    };
    type_error(format!("{name}() takes {expected} ({given} given)"))
}

fn no_keywords(name: &str, args: &Args) -> Result<(), Unwind> {
    match args.keywords.first() {
        Some((keyword, _)) => Err(type_error(format!(
            "{name}() got an unexpected keyword argument '{keyword}'"
        ))),
        None => Ok(()),
    }
}

/// Positional arguments of a builtin, checked against an arity range.
fn expect(name: &str, args: Args, min: usize, max: usize) -> Result<Vec<Value>, Unwind> {
    no_keywords(name, &args)?;
    let given = args.positional.len();
    if given < min || given > max {
        return Err(arity_error(name, given, min, max));
    }
    Ok(args.positional)
}

/// Like [`expect`], for a method whose receiver is the first argument.
fn expect_method(name: &str, args: Args, min: usize, max: usize) -> Result<(Value, Vec<Value>), Unwind> {
    no_keywords(name, &args)?;
    let mut positional = args.positional.into_iter();
    let receiver = positional.next().unwrap_or_default();
    let rest: Vec<Value> = positional.collect();
    if rest.len() < min || rest.len() > max {
        return Err(arity_error(name, rest.len(), min, max));
    }
    Ok((receiver, rest))
}

/// Splits the named keywords out of `args`, rejecting any other.
fn take_keywords<const N: usize>(name: &str, args: &mut Args, names: [&str; N]) -> Result<[Option<Value>; N], Unwind> {
    let mut found: [Option<Value>; N] = std::array::from_fn(|_| None);
    for (keyword, value) in std::mem::take(&mut args.keywords) {
        match names.iter().position(|n| *n == keyword.as_str()) {
            Some(i) => found[i] = Some(value),
            None => {
                return Err(type_error(format!(
                    "{name}() got an unexpected keyword argument '{keyword}'"
                )));
            }
        }
    }
    Ok(found)
}

fn int_arg(value: &Value) -> Result<i64, Unwind> {
    value.as_int().ok_or_else(|| {
        type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn object_init(_: &mut Frame, _: Args) -> Result<Value, Unwind> {
    Ok(Value::None)
}

fn exception_init(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let mut positional = args.positional.into_iter();
    if let Some(Value::Instance(instance)) = positional.next() {
        instance.set("args", Value::tuple(positional.collect()));
    }
    Ok(Value::None)
}

/// Calls a builtin class.
pub fn construct(frame: &mut Frame, native: Native, mut args: Args) -> Result<Value, Unwind> {
    match native {
        Native::Type => {
            let args = expect("type", args, 1, 1)?;
            Ok(Value::Class(class_of(&args[0])))
        }
        Native::NoneType => {
            expect("NoneType", args, 0, 0)?;
            Ok(Value::None)
        }
        Native::Bool => match expect("bool", args, 0, 1)?.first() {
            Some(value) => ops::truthy(frame, value).map(Value::Bool),
            None => Ok(Value::Bool(false)),
        },
        Native::Int => construct_int(frame, args),
        Native::Float => match expect("float", args, 0, 1)?.first() {
            None => Ok(Value::Float(0.0)),
            Some(text @ Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                raise(
                    ErrorKind::ValueError,
                    format!("could not convert string to float: {}", text.repr()),
                )
            }),
            Some(value @ Value::Instance(_)) => match call_method(frame, value, "__float__", Vec::new())? {
                Some(result) => Ok(result),
                None => Err(type_error(format!(
                    "float() argument must be a string or a number, not '{}'",
                    value.type_name()
                ))),
            },
            Some(value) => value.as_float().map(Value::Float).ok_or_else(|| {
                type_error(format!(
                    "float() argument must be a string or a number, not '{}'",
                    value.type_name()
                ))
            }),
        },
        Native::Str => match expect("str", args, 0, 1)?.first() {
            Some(value) => ops::to_str(frame, value).map(Value::str),
            None => Ok(Value::str("")),
        },
        Native::Tuple => match expect("tuple", args, 0, 1)?.first() {
            Some(value) => iter::collect(frame, value).map(Value::tuple),
            None => Ok(Value::tuple(Vec::new())),
        },
        Native::List => match expect("list", args, 0, 1)?.first() {
            Some(value) => iter::collect(frame, value).map(Value::list),
            None => Ok(Value::list(Vec::new())),
        },
        Native::Set => {
            let mut set = Dict::new();
            if let Some(value) = expect("set", args, 0, 1)?.first() {
                for item in iter::collect(frame, value)? {
                    set.insert(item, Value::None)?;
                }
            }
            Ok(Value::set(set))
        }
        Native::Dict => {
            let keywords = std::mem::take(&mut args.keywords);
            let positional = expect("dict", args, 0, 1)?;
            let mut dict = Dict::new();
            if let Some(source) = positional.first() {
                update_dict(frame, &mut dict, source)?;
            }
            for (key, value) in keywords {
                dict.insert(Value::Str(key), value)?;
            }
            Ok(Value::dict(dict))
        }
        Native::Object | Native::Exception => Ok(Value::Instance(Instance::new(native_class(native)))),
    }
}

fn construct_int(frame: &mut Frame, mut args: Args) -> Result<Value, Unwind> {
    let [base_keyword] = take_keywords("int", &mut args, ["base"])?;
    let mut positional = expect("int", args, 0, 2)?.into_iter();
    let value = positional.next();
    let base = positional.next().or(base_keyword);
    match (value, base) {
        (None, _) => Ok(Value::Int(0)),
        (Some(Value::Str(s)), base) => {
            let base = base.as_ref().map(int_arg).transpose()?.unwrap_or(10);
            if !(2..=36).contains(&base) {
                return Err(raise(ErrorKind::ValueError, "int() base must be >= 2 and <= 36"));
            }
            let text = s.trim().replace('_', "");
            i64::from_str_radix(&text, base as u32).map(Value::Int).map_err(|_| {
                raise(
                    ErrorKind::ValueError,
                    format!("invalid literal for int() with base {base}: {}", Value::Str(s.clone()).repr()),
                )
            })
        }
        (Some(_), Some(_)) => Err(type_error("int() can't convert non-string with explicit base")),
        (Some(Value::Float(f)), None) => {
            if f.is_nan() {
                Err(raise(ErrorKind::ValueError, "cannot convert float NaN to integer"))
            } else if f.is_infinite() || f.abs() >= i64::MAX as f64 {
                Err(raise(ErrorKind::OverflowError, "cannot convert float infinity to integer"))
            } else {
                Ok(Value::Int(f.trunc() as i64))
            }
        }
        (Some(value @ Value::Instance(_)), None) => match call_method(frame, &value, "__int__", Vec::new())? {
            Some(result) => Ok(result),
            None => Err(int_conversion_error(&value)),
        },
        (Some(value), None) => value.as_int().map(Value::Int).ok_or_else(|| int_conversion_error(&value)),
    }
}

fn int_conversion_error(value: &Value) -> Unwind {
    type_error(format!(
        "int() argument must be a string or a number, not '{}'",
        value.type_name()
    ))
}

fn update_dict(frame: &mut Frame, dict: &mut Dict, source: &Value) -> Result<(), Unwind> {
    if let Value::Dict(other) = source {
        let entries: Vec<_> = other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (key, value) in entries {
            dict.insert(key, value)?;
        }
        return Ok(());
    }
    for (i, pair) in iter::collect(frame, source)?.into_iter().enumerate() {
        let pair = iter::collect(frame, &pair)?;
        let [key, value] = <[Value; 2]>::try_from(pair).map_err(|pair| {
            raise(
                ErrorKind::ValueError,
                format!(
                    "dictionary update sequence element #{i} has length {}; 2 is required",
                    pair.len()
                ),
            )
        })?;
        dict.insert(key, value)?;
    }
    Ok(())
}

fn print(frame: &mut Frame, mut args: Args) -> Result<Value, Unwind> {
    let [sep, end] = take_keywords("print", &mut args, ["sep", "end"])?;
    let text = |frame: &mut Frame, value: Option<Value>, default: &str| match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(value) => ops::to_str(frame, &value),
    };
    let sep = text(frame, sep, " ")?;
    let end = text(frame, end, "\n")?;
    let mut line = String::new();
    for (i, value) in args.positional.iter().enumerate() {
        if i > 0 {
            line.push_str(&sep);
        }
        line.push_str(&ops::to_str(frame, value)?);
    }
    line.push_str(&end);
    frame.rt.output.borrow_mut().push_str(&line);
    Ok(Value::None)
}

fn len(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("len", args, 1, 1)?;
    ops::len(frame, &args[0]).map(|n| Value::Int(n as i64))
}

fn repr(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("repr", args, 1, 1)?;
    ops::repr(frame, &args[0]).map(Value::str)
}

fn range(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("range", args, 1, 3)?;
    let ints = args.iter().map(int_arg).collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step, ..] => (*start, *stop, *step),
        [] => (0, 0, 1),
    };
    if step == 0 {
        return Err(raise(ErrorKind::ValueError, "range() arg 3 must not be zero"));
    }
    Ok(Value::Iterator(Iter::range(start, stop, step)))
}

fn classes(value: &Value, function: &str) -> Result<Vec<Rc<Class>>, Unwind> {
    match value {
        Value::Class(class) => Ok(vec![Rc::clone(class)]),
        Value::Tuple(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.extend(classes(item, function)?);
            }
            Ok(out)
        }
        _ => Err(type_error(format!(
            "{function}() arg 2 must be a type or tuple of types"
        ))),
    }
}

fn isinstance(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("isinstance", args, 2, 2)?;
    let class = class_of(&args[0]);
    let candidates = classes(&args[1], "isinstance")?;
    Ok(Value::Bool(candidates.iter().any(|c| class.is_subclass(c))))
}

fn issubclass(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("issubclass", args, 2, 2)?;
    let Some(class) = args[0].as_class() else {
        return Err(type_error("issubclass() arg 1 must be a class"));
    };
    let candidates = classes(&args[1], "issubclass")?;
    Ok(Value::Bool(candidates.iter().any(|c| class.is_subclass(c))))
}

fn iter_(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("iter", args, 1, 1)?;
    match &args[0] {
        generator @ Value::Generator(_) => Ok(generator.clone()),
        value => iter::iterate(frame, value).map(Value::Iterator),
    }
}

fn next(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let mut args = expect("next", args, 1, 2)?.into_iter();
    let target = args.next().unwrap_or_default();
    let default = args.next();
    let item = match &target {
        Value::Generator(generator) => generator.resume(Value::None, None)?,
        Value::Iterator(it) => iter::next_item(frame, it)?,
        Value::Instance(_) => match call_method(frame, &target, "__next__", Vec::new()) {
            Ok(Some(item)) => Some(item),
            Ok(None) => return Err(not_iterator(&target)),
            Err(Unwind::Exception(e)) if default.is_some() && is_instance_of(&e, ErrorKind::StopIteration) => None,
            Err(e) => return Err(e),
        },
        other => return Err(not_iterator(other)),
    };
    item.or(default).ok_or_else(|| raise(ErrorKind::StopIteration, ""))
}

fn not_iterator(value: &Value) -> Unwind {
    type_error(format!("'{}' object is not an iterator", value.type_name()))
}

fn locals(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    expect("locals", args, 0, 0)?;
    let mut dict = Dict::new();
    for (name, value) in frame.locals_snapshot() {
        dict.insert(Value::Str(name), value)?;
    }
    Ok(Value::dict(dict))
}

fn super_(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("super", args, 0, 2)?;
    match args.as_slice() {
        [] => Err(raise(ErrorKind::RuntimeError, "super(): no arguments")),
        [Value::None, _] => Err(raise(ErrorKind::RuntimeError, "super(): __class__ cell not found")),
        [Value::Class(class), receiver] => {
            let related = match receiver {
                Value::Class(c) => c.is_subclass(class),
                other => class_of(other).is_subclass(class),
            };
            if !related {
                return Err(type_error("super(type, obj): obj must be an instance or subtype of type"));
            }
            Ok(Value::Super(Rc::new(Super {
                class: Rc::clone(class),
                receiver: receiver.clone(),
            })))
        }
        [_] => Err(type_error("super() without a receiver is not supported")),
        _ => Err(type_error("super() argument 1 must be a type")),
    }
}

fn slice(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("slice", args, 1, 3)?;
    let parts = match args.as_slice() {
        [stop] => [Value::None, stop.clone(), Value::None],
        [start, stop] => [start.clone(), stop.clone(), Value::None],
        [start, stop, step, ..] => [start.clone(), stop.clone(), step.clone()],
        [] => Default::default(),
    };
    Ok(Value::Slice(Rc::new(parts)))
}

fn attribute_name(value: &Value) -> Result<SmolStr, Unwind> {
    value
        .as_str()
        .cloned()
        .ok_or_else(|| type_error("attribute name must be string"))
}

fn getattr(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("getattr", args, 2, 3)?;
    let name = attribute_name(&args[1])?;
    match (ops::get_attr(frame, &args[0], &name), args.get(2)) {
        (Err(Unwind::Exception(e)), Some(default)) if is_instance_of(&e, ErrorKind::AttributeError) => {
            Ok(default.clone())
        }
        (result, _) => result,
    }
}

fn hasattr(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("hasattr", args, 2, 2)?;
    let name = attribute_name(&args[1])?;
    match ops::get_attr(frame, &args[0], &name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(Unwind::Exception(e)) if is_instance_of(&e, ErrorKind::AttributeError) => Ok(Value::Bool(false)),
        Err(e) => Err(e),
    }
}

fn setattr(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let mut args = expect("setattr", args, 3, 3)?;
    let value = args.pop().unwrap_or_default();
    ops::set_attr(&args[0], &attribute_name(&args[1])?, value)?;
    Ok(Value::None)
}

fn delattr(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("delattr", args, 2, 2)?;
    ops::del_attr(&args[0], &attribute_name(&args[1])?)?;
    Ok(Value::None)
}

fn abs(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("abs", args, 1, 1)?;
    match &args[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        value @ (Value::Int(_) | Value::Bool(_)) => value
            .as_int()
            .and_then(i64::checked_abs)
            .map(Value::Int)
            .ok_or_else(|| raise(ErrorKind::OverflowError, "integer overflow")),
        value => match call_method(frame, value, "__abs__", Vec::new())? {
            Some(result) => Ok(result),
            None => Err(type_error(format!(
                "bad operand type for abs(): '{}'",
                value.type_name()
            ))),
        },
    }
}

fn key_of(frame: &mut Frame, key: Option<&Value>, item: &Value) -> Result<Value, Unwind> {
    match key {
        Some(key) if !key.is_none() => call::call(frame, key, Args::positional(vec![item.clone()])),
        _ => Ok(item.clone()),
    }
}

fn extremum(frame: &mut Frame, name: &'static str, mut args: Args, largest: bool) -> Result<Value, Unwind> {
    let [key, default] = take_keywords(name, &mut args, ["key", "default"])?;
    let items = match args.positional.len() {
        0 => return Err(arity_error(name, 0, 1, usize::MAX)),
        1 => iter::collect(frame, &args.positional[0])?,
        _ if default.is_some() => {
            return Err(type_error(format!(
                "Cannot specify a default for {name}() with multiple positional arguments"
            )));
        }
        _ => args.positional,
    };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = key_of(frame, key.as_ref(), &item)?;
        let better = match &best {
            None => true,
            Some((best_key, _)) if largest => ops::less_than(frame, best_key, &k)?,
            Some((best_key, _)) => ops::less_than(frame, &k, best_key)?,
        };
        if better {
            best = Some((k, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(raise(
            ErrorKind::ValueError,
            format!("{name}() arg is an empty sequence"),
        )),
    }
}

fn min(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    extremum(frame, "min", args, false)
}

fn max(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    extremum(frame, "max", args, true)
}

fn sum(frame: &mut Frame, mut args: Args) -> Result<Value, Unwind> {
    let [start_keyword] = take_keywords("sum", &mut args, ["start"])?;
    let args = expect("sum", args, 1, 2)?;
    let mut total = args.get(1).cloned().or(start_keyword).unwrap_or(Value::Int(0));
    if let Value::Str(_) = total {
        return Err(type_error("sum() can't sum strings [use ''.join(seq) instead]"));
    }
    for item in iter::collect(frame, &args[0])? {
        total = ops::binary(frame, BinaryOp::Add, &total, &item)?;
    }
    Ok(total)
}

/// Stable sort with a comparison that may raise.
fn sort_values(frame: &mut Frame, items: Vec<Value>, key: Option<&Value>, reverse: bool) -> Result<Vec<Value>, Unwind> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        keyed.push((key_of(frame, key, &item)?, item));
    }
    let sorted = merge_sort(frame, keyed, reverse)?;
    Ok(sorted.into_iter().map(|(_, item)| item).collect())
}

fn merge_sort(frame: &mut Frame, mut items: Vec<(Value, Value)>, reverse: bool) -> Result<Vec<(Value, Value)>, Unwind> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(frame, items, reverse)?;
    let right = merge_sort(frame, right, reverse)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some((l, _)), Some((r, _))) if reverse => ops::less_than(frame, l, r)?,
            (Some((l, _)), Some((r, _))) => ops::less_than(frame, r, l)?,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        out.extend(if take_right { right.next() } else { left.next() });
    }
    Ok(out)
}

fn sort_options(name: &str, args: &mut Args) -> Result<(Option<Value>, bool), Unwind> {
    let [key, reverse] = take_keywords(name, args, ["key", "reverse"])?;
    Ok((key, reverse.is_some_and(|r| r.is_truthy())))
}

fn sorted(frame: &mut Frame, mut args: Args) -> Result<Value, Unwind> {
    let (key, reverse) = sort_options("sorted", &mut args)?;
    let args = expect("sorted", args, 1, 1)?;
    let items = iter::collect(frame, &args[0])?;
    sort_values(frame, items, key.as_ref(), reverse).map(Value::list)
}

fn enumerate(frame: &mut Frame, mut args: Args) -> Result<Value, Unwind> {
    let [start_keyword] = take_keywords("enumerate", &mut args, ["start"])?;
    let args = expect("enumerate", args, 1, 2)?;
    let start = match args.get(1).or(start_keyword.as_ref()) {
        Some(start) => int_arg(start)?,
        None => 0,
    };
    let items = iter::collect(frame, &args[0])?;
    let pairs = (start..).zip(items).map(|(i, item)| Value::tuple(vec![Value::Int(i), item]));
    Ok(Value::Iterator(Iter::over(pairs.collect())))
}

fn zip(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("zip", args, 0, usize::MAX)?;
    let mut iterators = Vec::with_capacity(args.len());
    for arg in &args {
        iterators.push(iter::iterate(frame, arg)?);
    }
    let mut rows = Vec::new();
    if !iterators.is_empty() {
        'rows: loop {
            let mut row = Vec::with_capacity(iterators.len());
            for it in &iterators {
                match iter::next_item(frame, it)? {
                    Some(item) => row.push(item),
                    None => break 'rows,
                }
            }
            rows.push(Value::tuple(row));
        }
    }
    Ok(Value::Iterator(Iter::over(rows)))
}

fn callable(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("callable", args, 1, 1)?;
    Ok(Value::Bool(match &args[0] {
        Value::Function(_) | Value::Builtin(_) | Value::BoundMethod(_) | Value::Class(_) => true,
        Value::Instance(instance) => instance.class.lookup("__call__").is_some(),
        _ => false,
    }))
}

fn any_or_all(frame: &mut Frame, name: &str, args: Args, any: bool) -> Result<Value, Unwind> {
    let args = expect(name, args, 1, 1)?;
    let iterator = iter::iterate(frame, &args[0])?;
    while let Some(item) = iter::next_item(frame, &iterator)? {
        if ops::truthy(frame, &item)? == any {
            return Ok(Value::Bool(any));
        }
    }
    Ok(Value::Bool(!any))
}

fn any(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    any_or_all(frame, "any", args, true)
}

fn all(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    any_or_all(frame, "all", args, false)
}

fn reversed(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("reversed", args, 1, 1)?;
    let mut items = iter::collect(frame, &args[0])?;
    items.reverse();
    Ok(Value::Iterator(Iter::over(items)))
}

fn ord(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("ord", args, 1, 1)?;
    let text = args[0].as_str().ok_or_else(|| {
        type_error(format!(
            "ord() expected string of length 1, but {} found",
            args[0].type_name()
        ))
    })?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => Err(type_error(format!(
            "ord() expected a character, but string of length {} found",
            text.chars().count()
        ))),
    }
}

fn chr(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("chr", args, 1, 1)?;
    let code = int_arg(&args[0])?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::str(c.to_string()))
        .ok_or_else(|| raise(ErrorKind::ValueError, "chr() arg not in range(0x110000)"))
}

fn hash(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    use std::hash::{BuildHasher, Hash, Hasher};

    let args = expect("hash", args, 1, 1)?;
    let key = args[0].key()?;
    if let Key::Int(i) = key {
        return Ok(Value::Int(i));
    }
    let mut hasher = rustc_hash::FxBuildHasher.build_hasher();
    key.hash(&mut hasher);
    Ok(Value::Int(hasher.finish() as i64))
}

fn divmod(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("divmod", args, 2, 2)?;
    let quotient = ops::binary(frame, BinaryOp::FloorDiv, &args[0], &args[1])?;
    let remainder = ops::binary(frame, BinaryOp::Mod, &args[0], &args[1])?;
    Ok(Value::tuple(vec![quotient, remainder]))
}

fn round(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("round", args, 1, 2)?;
    let digits = match args.get(1) {
        None | Some(Value::None) => None,
        Some(d) => Some(int_arg(d)?),
    };
    match (&args[0], digits) {
        (Value::Int(_) | Value::Bool(_), _) => Ok(Value::Int(args[0].as_int().unwrap_or_default())),
        (Value::Float(f), None) => {
            // Ties go to the even neighbour.
            let rounded = f.round();
            let rounded = if (f - f.trunc()).abs() == 0.5 { 2.0 * (f / 2.0).round() } else { rounded };
            if rounded.is_finite() {
                Ok(Value::Int(rounded as i64))
            } else {
                Err(raise(ErrorKind::OverflowError, "cannot convert float infinity to integer"))
            }
        }
        (Value::Float(f), Some(digits)) => {
            let scale = 10f64.powi(digits.clamp(-308, 308) as i32);
            Ok(Value::Float((f * scale).round() / scale))
        }
        (other, _) => Err(type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn format(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("format", args, 1, 2)?;
    match args.get(1).and_then(Value::as_str) {
        None => ops::to_str(frame, &args[0]).map(Value::str),
        Some(spec) if spec.is_empty() => ops::to_str(frame, &args[0]).map(Value::str),
        Some(spec) => format_spec(frame, &args[0], spec).map(Value::str),
    }
}

fn pow(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let args = expect("pow", args, 2, 2)?;
    ops::binary(frame, BinaryOp::Pow, &args[0], &args[1])
}

/// `format()` specs: an optional precision followed by one of `d f x s %`.
fn format_spec(frame: &mut Frame, value: &Value, spec: &str) -> Result<String, Unwind> {
    let (precision, kind) = match spec.strip_prefix('.') {
        Some(rest) => {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            (digits.parse::<usize>().ok(), &rest[digits.len()..])
        }
        None => (None, spec),
    };
    let invalid = || raise(ErrorKind::ValueError, format!("Invalid format specifier '{spec}'"));
    match kind {
        "f" | "" if value.as_float().is_some() => {
            let f = value.as_float().unwrap_or_default();
            Ok(format!("{f:.*}", precision.unwrap_or(6)))
        }
        "%" => {
            let f = value.as_float().ok_or_else(invalid)?;
            Ok(format!("{:.*}%", precision.unwrap_or(6), f * 100.0))
        }
        "d" => value.as_int().map(|i| i.to_string()).ok_or_else(invalid),
        "x" => value.as_int().map(|i| format!("{i:x}")).ok_or_else(invalid),
        "s" => ops::to_str(frame, value),
        _ => Err(invalid()),
    }
}

/// `format % args`.
pub fn percent_format(frame: &mut Frame, format: &str, args: &Value) -> Result<String, Unwind> {
    let values = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut values = values.into_iter();
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.next_if(char::is_ascii_digit) {
                digits.push(d);
            }
            precision = digits.parse::<usize>().ok();
        }
        let Some(conversion) = chars.next() else {
            return Err(raise(ErrorKind::ValueError, "incomplete format"));
        };
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let value = values
            .next()
            .ok_or_else(|| type_error("not enough arguments for format string"))?;
        let number = |value: &Value| {
            value.as_float().ok_or_else(|| {
                type_error(format!(
                    "%{conversion} format: a real number is required, not {}",
                    value.type_name()
                ))
            })
        };
        match conversion {
            's' => out.push_str(&ops::to_str(frame, &value)?),
            'r' => out.push_str(&ops::repr(frame, &value)?),
            'd' | 'i' => {
                let n = match value.as_int() {
                    Some(i) => i,
                    None => number(&value)?.trunc() as i64,
                };
                out.push_str(&n.to_string());
            }
            'f' => out.push_str(&format!("{:.*}", precision.unwrap_or(6), number(&value)?)),
            'x' => match value.as_int() {
                Some(i) => out.push_str(&format!("{i:x}")),
                None => {
                    return Err(type_error(format!(
                        "%x format: an integer is required, not {}",
                        value.type_name()
                    )));
                }
            },
            other => {
                return Err(raise(
                    ErrorKind::ValueError,
                    format!("unsupported format character '{other}'"),
                ));
            }
        }
    }
    if values.next().is_some() {
        return Err(type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

/// A builtin method bound to a builtin receiver.
pub fn method(receiver: &Value, name: &str) -> Option<Value> {
    let (name, func): (&'static str, BuiltinFn) = match (receiver, name) {
        (Value::List(_), "append") => ("append", list_append),
        (Value::List(_), "extend") => ("extend", list_extend),
        (Value::List(_), "pop") => ("pop", list_pop),
        (Value::List(_), "insert") => ("insert", list_insert),
        (Value::List(_), "remove") => ("remove", list_remove),
        (Value::List(_), "index") => ("index", sequence_index),
        (Value::List(_), "count") => ("count", sequence_count),
        (Value::List(_), "reverse") => ("reverse", list_reverse),
        (Value::List(_), "sort") => ("sort", list_sort),
        (Value::List(_), "copy") => ("copy", list_copy),
        (Value::List(_), "clear") => ("clear", list_clear),
        (Value::Tuple(_), "index") => ("index", sequence_index),
        (Value::Tuple(_), "count") => ("count", sequence_count),
        (Value::Dict(_), "get") => ("get", dict_get),
        (Value::Dict(_), "keys") => ("keys", dict_keys),
        (Value::Dict(_), "values") => ("values", dict_values),
        (Value::Dict(_), "items") => ("items", dict_items),
        (Value::Dict(_), "pop") => ("pop", dict_pop),
        (Value::Dict(_), "setdefault") => ("setdefault", dict_setdefault),
        (Value::Dict(_), "update") => ("update", dict_update),
        (Value::Dict(_) | Value::Set(_), "copy") => ("copy", mapping_copy),
        (Value::Dict(_) | Value::Set(_), "clear") => ("clear", mapping_clear),
        (Value::Set(_), "add") => ("add", set_add),
        (Value::Set(_), "remove") => ("remove", set_remove),
        (Value::Set(_), "discard") => ("discard", set_discard),
        (Value::Str(_), "join") => ("join", str_join),
        (Value::Str(_), "upper") => ("upper", str_upper),
        (Value::Str(_), "lower") => ("lower", str_lower),
        (Value::Str(_), "strip") => ("strip", str_strip),
        (Value::Str(_), "split") => ("split", str_split),
        (Value::Str(_), "startswith") => ("startswith", str_startswith),
        (Value::Str(_), "endswith") => ("endswith", str_endswith),
        (Value::Str(_), "replace") => ("replace", str_replace),
        (Value::Str(_), "format") => ("format", str_format),
        (Value::Str(_), "find") => ("find", str_find),
        (Value::Generator(_), "send") => ("send", generator_send),
        (Value::Generator(_), "throw") => ("throw", generator_throw),
        (Value::Generator(_), "close") => ("close", generator_close),
        (Value::Generator(_) | Value::Iterator(_), "__next__") => ("__next__", iterator_next),
        (Value::Generator(_) | Value::Iterator(_), "__iter__") => ("__iter__", iterator_self),
        _ => return None,
    };
    Some(Value::BoundMethod(Rc::new(BoundMethod {
        receiver: receiver.clone(),
        function: builtin(name, func),
    })))
}

fn as_list(value: &Value) -> Result<Rc<RefCell<Vec<Value>>>, Unwind> {
    match value {
        Value::List(list) => Ok(Rc::clone(list)),
        other => Err(descriptor_error("list", other)),
    }
}

fn as_mapping(value: &Value) -> Result<Rc<RefCell<Dict>>, Unwind> {
    match value {
        Value::Dict(dict) | Value::Set(dict) => Ok(Rc::clone(dict)),
        other => Err(descriptor_error("dict", other)),
    }
}

fn as_text(value: &Value) -> Result<SmolStr, Unwind> {
    value.as_str().cloned().ok_or_else(|| descriptor_error("str", value))
}

fn descriptor_error(expected: &str, value: &Value) -> Unwind {
    type_error(format!(
        "descriptor requires a '{expected}' object but received a '{}'",
        value.type_name()
    ))
}

fn list_append(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (list, mut rest) = expect_method("append", args, 1, 1)?;
    as_list(&list)?.borrow_mut().push(rest.pop().unwrap_or_default());
    Ok(Value::None)
}

fn list_extend(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (list, rest) = expect_method("extend", args, 1, 1)?;
    let items = iter::collect(frame, &rest[0])?;
    as_list(&list)?.borrow_mut().extend(items);
    Ok(Value::None)
}

fn list_pop(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (list, rest) = expect_method("pop", args, 0, 1)?;
    let list = as_list(&list)?;
    let mut items = list.borrow_mut();
    if items.is_empty() {
        return Err(raise(ErrorKind::IndexError, "pop from empty list"));
    }
    let index = match rest.first() {
        Some(i) => int_arg(i)?,
        None => -1,
    };
    let resolved = if index < 0 { index + items.len() as i64 } else { index };
    if resolved < 0 || resolved >= items.len() as i64 {
        return Err(raise(ErrorKind::IndexError, "pop index out of range"));
    }
    Ok(items.remove(resolved as usize))
}

fn list_insert(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (list, mut rest) = expect_method("insert", args, 2, 2)?;
    let value = rest.pop().unwrap_or_default();
    let index = int_arg(&rest[0])?;
    let list = as_list(&list)?;
    let mut items = list.borrow_mut();
    let len = items.len() as i64;
    let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
    items.insert(at as usize, value);
    Ok(Value::None)
}

fn position(frame: &mut Frame, items: &[Value], needle: &Value) -> Result<Option<usize>, Unwind> {
    for (i, item) in items.iter().enumerate() {
        if item.is(needle) || ops::equals(frame, item, needle)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn list_remove(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (list, rest) = expect_method("remove", args, 1, 1)?;
    let list = as_list(&list)?;
    let snapshot = list.borrow().clone();
    match position(frame, &snapshot, &rest[0])? {
        Some(i) => {
            let mut items = list.borrow_mut();
            if i < items.len() {
                items.remove(i);
            }
            Ok(Value::None)
        }
        None => Err(raise(ErrorKind::ValueError, "list.remove(x): x not in list")),
    }
}

fn sequence_items(value: &Value) -> Result<Vec<Value>, Unwind> {
    match value {
        Value::List(list) => Ok(list.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        other => Err(descriptor_error("list", other)),
    }
}

fn sequence_index(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (sequence, rest) = expect_method("index", args, 1, 1)?;
    let items = sequence_items(&sequence)?;
    match position(frame, &items, &rest[0])? {
        Some(i) => Ok(Value::Int(i as i64)),
        None => Err(raise(
            ErrorKind::ValueError,
            format!("{} is not in {}", ops::repr(frame, &rest[0])?, sequence.type_name()),
        )),
    }
}

fn sequence_count(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (sequence, rest) = expect_method("count", args, 1, 1)?;
    let mut count = 0;
    for item in sequence_items(&sequence)? {
        if item.is(&rest[0]) || ops::equals(frame, &item, &rest[0])? {
            count += 1;
        }
    }
    Ok(Value::Int(count))
}

fn list_reverse(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (list, _) = expect_method("reverse", args, 0, 0)?;
    as_list(&list)?.borrow_mut().reverse();
    Ok(Value::None)
}

fn list_sort(frame: &mut Frame, mut args: Args) -> Result<Value, Unwind> {
    let (key, reverse) = sort_options("sort", &mut args)?;
    let (list, _) = expect_method("sort", args, 0, 0)?;
    let list = as_list(&list)?;
    let items = list.borrow().clone();
    let sorted = sort_values(frame, items, key.as_ref(), reverse)?;
    *list.borrow_mut() = sorted;
    Ok(Value::None)
}

fn list_copy(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (list, _) = expect_method("copy", args, 0, 0)?;
    let items = as_list(&list)?.borrow().clone();
    Ok(Value::list(items))
}

fn list_clear(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (list, _) = expect_method("clear", args, 0, 0)?;
    as_list(&list)?.borrow_mut().clear();
    Ok(Value::None)
}

fn dict_get(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (dict, rest) = expect_method("get", args, 1, 2)?;
    let found = as_mapping(&dict)?.borrow().get(&rest[0])?;
    Ok(found.or_else(|| rest.get(1).cloned()).unwrap_or_default())
}

fn dict_keys(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (dict, _) = expect_method("keys", args, 0, 0)?;
    let keys = as_mapping(&dict)?.borrow().keys();
    Ok(Value::list(keys))
}

fn dict_values(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (dict, _) = expect_method("values", args, 0, 0)?;
    let values = as_mapping(&dict)?.borrow().values();
    Ok(Value::list(values))
}

fn dict_items(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (dict, _) = expect_method("items", args, 0, 0)?;
    let items = as_mapping(&dict)?.borrow().items();
    Ok(Value::list(items))
}

fn dict_pop(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (dict, rest) = expect_method("pop", args, 1, 2)?;
    let removed = as_mapping(&dict)?.borrow_mut().remove(&rest[0])?;
    match (removed, rest.get(1)) {
        (Some(value), _) => Ok(value),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(Unwind::Exception(exception_with_args(
            ErrorKind::KeyError,
            vec![rest[0].clone()],
        ))),
    }
}

fn dict_setdefault(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (dict, rest) = expect_method("setdefault", args, 1, 2)?;
    let dict = as_mapping(&dict)?;
    let existing = dict.borrow().get(&rest[0])?;
    match existing {
        Some(value) => Ok(value),
        None => {
            let value = rest.get(1).cloned().unwrap_or_default();
            dict.borrow_mut().insert(rest[0].clone(), value.clone())?;
            Ok(value)
        }
    }
}

fn dict_update(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let keywords = args.keywords.clone();
    let (dict, rest) = expect_method("update", Args::positional(args.positional), 0, 1)?;
    let dict = as_mapping(&dict)?;
    let mut updated = dict.borrow().clone();
    if let Some(source) = rest.first() {
        update_dict(frame, &mut updated, source)?;
    }
    for (key, value) in keywords {
        updated.insert(Value::Str(key), value)?;
    }
    *dict.borrow_mut() = updated;
    Ok(Value::None)
}

fn mapping_copy(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (mapping, _) = expect_method("copy", args, 0, 0)?;
    let copy = as_mapping(&mapping)?.borrow().clone();
    Ok(match mapping {
        Value::Set(_) => Value::set(copy),
        _ => Value::dict(copy),
    })
}

fn mapping_clear(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (mapping, _) = expect_method("clear", args, 0, 0)?;
    *as_mapping(&mapping)?.borrow_mut() = Dict::new();
    Ok(Value::None)
}

fn set_add(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (set, mut rest) = expect_method("add", args, 1, 1)?;
    as_mapping(&set)?.borrow_mut().insert(rest.pop().unwrap_or_default(), Value::None)?;
    Ok(Value::None)
}

fn set_remove(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (set, rest) = expect_method("remove", args, 1, 1)?;
    match as_mapping(&set)?.borrow_mut().remove(&rest[0])? {
        Some(_) => Ok(Value::None),
        None => Err(Unwind::Exception(exception_with_args(
            ErrorKind::KeyError,
            vec![rest[0].clone()],
        ))),
    }
}

fn set_discard(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (set, rest) = expect_method("discard", args, 1, 1)?;
    as_mapping(&set)?.borrow_mut().remove(&rest[0])?;
    Ok(Value::None)
}

fn str_join(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (separator, rest) = expect_method("join", args, 1, 1)?;
    let separator = as_text(&separator)?;
    let mut parts = Vec::new();
    for (i, item) in iter::collect(frame, &rest[0])?.into_iter().enumerate() {
        match item {
            Value::Str(s) => parts.push(s),
            other => {
                return Err(type_error(format!(
                    "sequence item {i}: expected str instance, {} found",
                    other.type_name()
                )));
            }
        }
    }
    Ok(Value::str(parts.join(separator.as_str())))
}

fn str_upper(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (text, _) = expect_method("upper", args, 0, 0)?;
    Ok(Value::str(as_text(&text)?.to_uppercase()))
}

fn str_lower(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (text, _) = expect_method("lower", args, 0, 0)?;
    Ok(Value::str(as_text(&text)?.to_lowercase()))
}

fn str_strip(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (text, rest) = expect_method("strip", args, 0, 1)?;
    let text = as_text(&text)?;
    Ok(Value::str(match rest.first() {
        None | Some(Value::None) => text.trim(),
        Some(chars) => {
            let chars = as_text(chars)?;
            text.trim_matches(|c| chars.contains(c))
        }
    }))
}

fn str_split(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (text, rest) = expect_method("split", args, 0, 1)?;
    let text = as_text(&text)?;
    let parts: Vec<Value> = match rest.first() {
        None | Some(Value::None) => text.split_whitespace().map(Value::str).collect(),
        Some(separator) => {
            let separator = as_text(separator)?;
            if separator.is_empty() {
                return Err(raise(ErrorKind::ValueError, "empty separator"));
            }
            text.split(separator.as_str()).map(Value::str).collect()
        }
    };
    Ok(Value::list(parts))
}

fn affix(name: &str, args: Args, test: fn(&str, &str) -> bool) -> Result<Value, Unwind> {
    let (text, rest) = expect_method(name, args, 1, 1)?;
    let text = as_text(&text)?;
    let candidates = match &rest[0] {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    for candidate in &candidates {
        if test(&text, &as_text(candidate)?) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn str_startswith(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    affix("startswith", args, |text, prefix| text.starts_with(prefix))
}

fn str_endswith(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    affix("endswith", args, |text, suffix| text.ends_with(suffix))
}

fn str_replace(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (text, rest) = expect_method("replace", args, 2, 2)?;
    let (old, new) = (as_text(&rest[0])?, as_text(&rest[1])?);
    Ok(Value::str(as_text(&text)?.replace(old.as_str(), &new)))
}

fn str_find(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (text, rest) = expect_method("find", args, 1, 1)?;
    let text = as_text(&text)?;
    let needle = as_text(&rest[0])?;
    Ok(Value::Int(match text.find(needle.as_str()) {
        Some(byte) => text[..byte].chars().count() as i64,
        None => -1,
    }))
}

/// `str.format` with `{}`, `{0}`, `{name}` fields and an optional `:spec`.
fn str_format(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let Args { positional, keywords } = args;
    let mut positional = positional.into_iter();
    let template = as_text(&positional.next().unwrap_or_default())?;
    let positional: Vec<Value> = positional.collect();

    let mut out = String::with_capacity(template.len());
    let mut automatic = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(raise(ErrorKind::ValueError, "expected '}' before end of string")),
                    }
                }
                let (name, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let value = if name.is_empty() {
                    automatic += 1;
                    positional.get(automatic - 1)
                } else if let Ok(i) = name.parse::<usize>() {
                    positional.get(i)
                } else {
                    keywords.iter().find(|(k, _)| k.as_str() == name).map(|(_, v)| v)
                };
                let Some(value) = value else {
                    return Err(if name.is_empty() || name.parse::<usize>().is_ok() {
                        raise(
                            ErrorKind::IndexError,
                            "Replacement index out of range for positional args tuple",
                        )
                    } else {
                        Unwind::Exception(exception_with_args(ErrorKind::KeyError, vec![Value::str(name)]))
                    });
                };
                let value = value.clone();
                if spec.is_empty() {
                    out.push_str(&ops::to_str(frame, &value)?);
                } else {
                    out.push_str(&format_spec(frame, &value, spec)?);
                }
            }
            '}' => return Err(raise(ErrorKind::ValueError, "Single '}' encountered in format string")),
            c => out.push(c),
        }
    }
    Ok(Value::str(out))
}

fn generator_of(value: &Value) -> Result<Rc<crate::generator::Generator>, Unwind> {
    match value {
        Value::Generator(generator) => Ok(Rc::clone(generator)),
        other => Err(descriptor_error("generator", other)),
    }
}

fn generator_send(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (generator, mut rest) = expect_method("send", args, 1, 1)?;
    generator_of(&generator)?.send(rest.pop().unwrap_or_default())
}

fn generator_throw(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (generator, mut rest) = expect_method("throw", args, 1, 1)?;
    let exception = ops::make_exception(frame, rest.pop().unwrap_or_default())?;
    generator_of(&generator)?.throw(exception)
}

fn generator_close(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (generator, _) = expect_method("close", args, 0, 0)?;
    generator_of(&generator)?.close()?;
    Ok(Value::None)
}

fn iterator_next(frame: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (target, _) = expect_method("__next__", args, 0, 0)?;
    next(frame, Args::positional(vec![target]))
}

fn iterator_self(_: &mut Frame, args: Args) -> Result<Value, Unwind> {
    let (target, _) = expect_method("__iter__", args, 0, 0)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::zero_division(ErrorKind::ZeroDivisionError, ErrorKind::ArithmeticError)]
    #[case::key(ErrorKind::KeyError, ErrorKind::Exception)]
    #[case::exit(ErrorKind::GeneratorExit, ErrorKind::BaseException)]
    #[case::recursion(ErrorKind::RecursionError, ErrorKind::RuntimeError)]
    fn test_exception_hierarchy(#[case] kind: ErrorKind, #[case] ancestor: ErrorKind) {
        assert!(exception_class(kind).is_subclass(&exception_class(ancestor)));
        assert!(is_instance_of(&new_exception(kind, String::new()), ancestor));
    }

    #[test]
    fn test_generator_exit_is_not_an_exception() {
        let exit = new_exception(ErrorKind::GeneratorExit, String::new());
        assert!(!is_instance_of(&exit, ErrorKind::Exception));
    }

    #[test]
    fn test_bool_is_an_int() {
        let bool_class = class_of(&Value::Bool(true));
        assert_eq!(bool_class.name, "bool");
        assert!(bool_class.is_subclass(&native_class(Native::Int)));
        assert!(!native_class(Native::Int).is_subclass(&bool_class));
    }

    #[test]
    fn test_class_of_is_shared_per_type_name() {
        let a = class_of(&Value::Slice(Rc::new(Default::default())));
        let b = class_of(&Value::Slice(Rc::new(Default::default())));
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.name, "slice");
    }

    #[rstest]
    #[case::key_error(exception_with_args(ErrorKind::KeyError, vec![Value::str("k")]), "'k'")]
    #[case::message(new_exception(ErrorKind::ValueError, "bad".to_string()), "bad")]
    #[case::empty(new_exception(ErrorKind::StopIteration, String::new()), "")]
    #[case::many(exception_with_args(ErrorKind::TypeError, vec![1.into(), "x".into()]), "(1, 'x')")]
    fn test_exception_message(#[case] exception: Value, #[case] expected: &str) {
        assert_eq!(exception_message(&exception), expected);
    }

    #[rstest]
    #[case::exact(1, 1, "f() takes exactly 1 argument (2 given)")]
    #[case::range(1, 3, "f() takes from 1 to 3 arguments (2 given)")]
    #[case::at_least(3, usize::MAX, "f() takes at least 3 arguments (2 given)")]
    #[case::at_most(0, 1, "f() takes at most 1 argument (2 given)")]
    fn test_arity_error(#[case] min: usize, #[case] max: usize, #[case] expected: &str) {
        let Unwind::Exception(exception) = arity_error("f", 2, min, max) else {
            panic!("expected an exception");
        };
        assert_eq!(exception_message(&exception), expected);
    }

    #[test]
    fn test_namespace_exposes_types_and_functions() {
        let ns = namespace();
        assert!(matches!(ns.get("print"), Some(Value::Builtin(_))));
        assert!(matches!(ns.get("ValueError"), Some(Value::Class(_))));
        assert!(matches!(ns.get("int"), Some(Value::Class(_))));
        assert!(!ns.contains_key("NoneType"));
    }

    #[test]
    fn test_methods_bind_to_matching_receivers() {
        assert!(method(&Value::list(Vec::new()), "append").is_some());
        assert!(method(&Value::str("x"), "append").is_none());
        assert!(method(&Value::tuple(Vec::new()), "count").is_some());
    }
}
