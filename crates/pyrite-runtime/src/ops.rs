//! The runtime operations lowered code calls into.

use std::{cell::RefCell, cmp::Ordering, rc::Rc};

use itertools::Itertools;
use pyrite_lang::{
    ast::{BinaryOp, CompareOp, UnaryOp},
    ir::RuntimeOp,
};
use smallvec::SmallVec;

use crate::{
    builtins,
    call::{self, call_method},
    error::{ErrorKind, Unwind, raise, type_error},
    frame::Frame,
    import,
    iter::{self, Iter},
    value::{Args, BoundMethod, Dict, Instance, Native, Value},
};

struct Operands(smallvec::IntoIter<[Value; 4]>);

impl Operands {
    fn next(&mut self) -> Value {
        self.0.next().unwrap_or_default()
    }

    fn rest(self) -> Vec<Value> {
        self.0.collect()
    }
}

pub fn apply(frame: &mut Frame, op: &RuntimeOp, args: SmallVec<[Value; 4]>) -> Result<Value, Unwind> {
    let mut operands = Operands(args.into_iter());
    match op {
        RuntimeOp::GetAttr(name) => get_attr(frame, &operands.next(), name),
        RuntimeOp::SetAttr(name) => {
            let (object, value) = (operands.next(), operands.next());
            set_attr(&object, name, value)?;
            Ok(Value::None)
        }
        RuntimeOp::DelAttr(name) => {
            del_attr(&operands.next(), name)?;
            Ok(Value::None)
        }
        RuntimeOp::GetItem => {
            let (object, index) = (operands.next(), operands.next());
            get_item(frame, &object, &index)
        }
        RuntimeOp::SetItem => {
            let (object, index, value) = (operands.next(), operands.next(), operands.next());
            set_item(frame, &object, &index, value)?;
            Ok(Value::None)
        }
        RuntimeOp::DelItem => {
            let (object, index) = (operands.next(), operands.next());
            del_item(frame, &object, &index)?;
            Ok(Value::None)
        }
        RuntimeOp::GetSlice => {
            let object = operands.next();
            let slice = slice_of(&mut operands);
            get_item(frame, &object, &slice)
        }
        RuntimeOp::SetSlice => {
            let object = operands.next();
            let slice = slice_of(&mut operands);
            set_item(frame, &object, &slice, operands.next())?;
            Ok(Value::None)
        }
        RuntimeOp::DelSlice => {
            let object = operands.next();
            let slice = slice_of(&mut operands);
            del_item(frame, &object, &slice)?;
            Ok(Value::None)
        }
        RuntimeOp::GetIndex(_) => {
            let object = operands.next();
            get_item(frame, &object, &Value::tuple(operands.rest()))
        }
        RuntimeOp::SetIndex(_) => {
            let object = operands.next();
            let mut rest = operands.rest();
            let value = rest.pop().unwrap_or_default();
            set_item(frame, &object, &Value::tuple(rest), value)?;
            Ok(Value::None)
        }
        RuntimeOp::DelIndex(_) => {
            let object = operands.next();
            del_item(frame, &object, &Value::tuple(operands.rest()))?;
            Ok(Value::None)
        }
        RuntimeOp::Binary(op) => {
            let (left, right) = (operands.next(), operands.next());
            binary(frame, *op, &left, &right)
        }
        RuntimeOp::InPlace(op) => {
            let (left, right) = (operands.next(), operands.next());
            in_place(frame, *op, &left, &right)
        }
        RuntimeOp::Unary(op) => unary(frame, *op, &operands.next()),
        RuntimeOp::Compare(op) => {
            let (left, right) = (operands.next(), operands.next());
            compare(frame, *op, &left, &right).map(Value::Bool)
        }
        RuntimeOp::IsTrue => truthy(frame, &operands.next()).map(Value::Bool),
        RuntimeOp::Not => truthy(frame, &operands.next()).map(|b| Value::Bool(!b)),
        RuntimeOp::BuildTuple => Ok(Value::tuple(operands.rest())),
        RuntimeOp::BuildList => Ok(Value::list(operands.rest())),
        RuntimeOp::BuildSet => {
            let mut set = Dict::new();
            for item in operands.rest() {
                set.insert(item, Value::None)?;
            }
            Ok(Value::set(set))
        }
        RuntimeOp::BuildDict => {
            let mut dict = Dict::new();
            for (key, value) in operands.rest().into_iter().tuples() {
                dict.insert(key, value)?;
            }
            Ok(Value::dict(dict))
        }
        RuntimeOp::ListFromConstant => match operands.next() {
            Value::Tuple(items) => Ok(Value::list(items.to_vec())),
            other => Ok(Value::list(vec![other])),
        },
        RuntimeOp::Unpack(count) => {
            let items = iter::collect(frame, &operands.next())?;
            let count = *count as usize;
            match items.len().cmp(&count) {
                Ordering::Equal => Ok(Value::tuple(items)),
                Ordering::Less => Err(raise(
                    ErrorKind::ValueError,
                    format!("not enough values to unpack (expected {count}, got {})", items.len()),
                )),
                Ordering::Greater => Err(raise(
                    ErrorKind::ValueError,
                    format!("too many values to unpack (expected {count})"),
                )),
            }
        }
        RuntimeOp::UnpackStarred { before, after } => {
            let mut items = iter::collect(frame, &operands.next())?;
            let (before, after) = (*before as usize, *after as usize);
            if items.len() < before + after {
                return Err(raise(
                    ErrorKind::ValueError,
                    format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        before + after,
                        items.len()
                    ),
                ));
            }
            let tail = items.split_off(items.len() - after);
            let middle = items.split_off(before);
            items.push(Value::list(middle));
            items.extend(tail);
            Ok(Value::tuple(items))
        }
        RuntimeOp::GetEnumerator => iter::iterate(frame, &operands.next()).map(Value::Iterator),
        RuntimeOp::NeedsDisposal => Ok(Value::Bool(iter::needs_disposal(&iterator(&operands.next())?))),
        RuntimeOp::MoveNext => {
            let it = iterator(&operands.next())?;
            iter::move_next(frame, &it).map(Value::Bool)
        }
        RuntimeOp::Current => {
            let it = iterator(&operands.next())?;
            let current = it.borrow().current();
            current.ok_or_else(|| raise(ErrorKind::SystemError, "iterator has no current item"))
        }
        RuntimeOp::Dispose => {
            let it = iterator(&operands.next())?;
            iter::dispose(frame, &it)?;
            Ok(Value::None)
        }
        RuntimeOp::ExceptionMatches => {
            let (exception, pattern) = (operands.next(), operands.next());
            exception_matches(&exception, &pattern).map(Value::Bool)
        }
        RuntimeOp::MakeException => make_exception(frame, operands.next()),
        RuntimeOp::SetCause => {
            let (exception, cause) = (operands.next(), operands.next());
            let cause = if cause.is_none() {
                cause
            } else {
                make_exception(frame, cause)?
            };
            if let Some(instance) = exception.as_instance() {
                instance.set("__cause__", cause);
            }
            Ok(exception)
        }
        RuntimeOp::TypeOf => Ok(Value::Class(builtins::class_of(&operands.next()))),
        RuntimeOp::Import { name, level, top } => import::import(frame, name, *level, *top),
        RuntimeOp::ImportFrom(name) => import::import_from(frame, &operands.next(), name),
        RuntimeOp::ImportStar => {
            import::import_star(frame, &operands.next())?;
            Ok(Value::None)
        }
        RuntimeOp::ListAppend => {
            let (list, value) = (operands.next(), operands.next());
            match list {
                Value::List(items) => items.borrow_mut().push(value),
                other => return Err(type_error(format!("cannot append to '{}'", other.type_name()))),
            }
            Ok(Value::None)
        }
        RuntimeOp::SetAdd => {
            let (set, value) = (operands.next(), operands.next());
            match set {
                Value::Set(items) => items.borrow_mut().insert(value, Value::None)?,
                other => return Err(type_error(format!("cannot add to '{}'", other.type_name()))),
            }
            Ok(Value::None)
        }
        RuntimeOp::DictSet => {
            let (dict, key, value) = (operands.next(), operands.next(), operands.next());
            set_item(frame, &dict, &key, value)?;
            Ok(Value::None)
        }
        RuntimeOp::JoinStr(_) => {
            let mut out = String::new();
            for part in operands.rest() {
                out.push_str(&to_str(frame, &part)?);
            }
            Ok(Value::str(out))
        }
    }
}

fn slice_of(operands: &mut Operands) -> Value {
    Value::Slice(Rc::new([operands.next(), operands.next(), operands.next()]))
}

fn iterator(value: &Value) -> Result<Rc<RefCell<Iter>>, Unwind> {
    match value {
        Value::Iterator(it) => Ok(Rc::clone(it)),
        other => Err(raise(
            ErrorKind::SystemError,
            format!("expected an iterator, got '{}'", other.type_name()),
        )),
    }
}

fn user_method(value: &Value, name: &str) -> bool {
    value.as_instance().is_some_and(|i| i.class.lookup(name).is_some())
}

/// Truthiness, honouring `__bool__` and `__len__`.
pub fn truthy(frame: &mut Frame, value: &Value) -> Result<bool, Unwind> {
    if let Value::Instance(_) = value {
        if let Some(result) = call_method(frame, value, "__bool__", Vec::new())? {
            return match result {
                Value::Bool(b) => Ok(b),
                other => Err(type_error(format!(
                    "__bool__ should return bool, returned {}",
                    other.type_name()
                ))),
            };
        }
        if user_method(value, "__len__") {
            return Ok(len(frame, value)? != 0);
        }
    }
    Ok(value.is_truthy())
}

pub fn len(frame: &mut Frame, value: &Value) -> Result<usize, Unwind> {
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::Tuple(items) => Ok(items.len()),
        Value::List(items) => Ok(items.borrow().len()),
        Value::Dict(d) | Value::Set(d) => Ok(d.borrow().len()),
        Value::Instance(_) => match call_method(frame, value, "__len__", Vec::new())? {
            Some(Value::Int(n)) if n >= 0 => Ok(n as usize),
            Some(Value::Int(_)) => Err(raise(ErrorKind::ValueError, "__len__() should return >= 0")),
            Some(other) => Err(type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))),
            None => Err(no_len(value)),
        },
        other => Err(no_len(other)),
    }
}

fn no_len(value: &Value) -> Unwind {
    type_error(format!("object of type '{}' has no len()", value.type_name()))
}

/// `str()` of a value.
pub fn to_str(frame: &mut Frame, value: &Value) -> Result<String, Unwind> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        Value::Instance(instance) => {
            if let Some(s) = string_method(frame, value, "__str__")? {
                return Ok(s);
            }
            if instance.is_exception() {
                return Ok(value.to_string());
            }
            repr(frame, value)
        }
        Value::List(_) | Value::Tuple(_) | Value::Dict(_) | Value::Set(_) => repr(frame, value),
        other => Ok(other.to_string()),
    }
}

/// `repr()` of a value, recursing into containers.
pub fn repr(frame: &mut Frame, value: &Value) -> Result<String, Unwind> {
    match value {
        Value::Instance(_) => match string_method(frame, value, "__repr__")? {
            Some(s) => Ok(s),
            None => Ok(value.repr()),
        },
        Value::List(items) => {
            let items = items.borrow().clone();
            Ok(format!("[{}]", repr_all(frame, &items)?.join(", ")))
        }
        Value::Tuple(items) if items.len() == 1 => Ok(format!("({},)", repr(frame, &items[0])?)),
        Value::Tuple(items) => Ok(format!("({})", repr_all(frame, items)?.join(", "))),
        Value::Dict(d) => {
            let entries: Vec<_> = d.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let mut parts = Vec::with_capacity(entries.len());
            for (key, value) in &entries {
                parts.push(format!("{}: {}", repr(frame, key)?, repr(frame, value)?));
            }
            Ok(format!("{{{}}}", parts.join(", ")))
        }
        Value::Set(d) if !d.borrow().is_empty() => {
            let keys = d.borrow().keys();
            Ok(format!("{{{}}}", repr_all(frame, &keys)?.join(", ")))
        }
        other => Ok(other.repr()),
    }
}

fn repr_all(frame: &mut Frame, items: &[Value]) -> Result<Vec<String>, Unwind> {
    items.iter().map(|item| repr(frame, item)).collect()
}

fn string_method(frame: &mut Frame, value: &Value, name: &str) -> Result<Option<String>, Unwind> {
    match call_method(frame, value, name, Vec::new())? {
        Some(Value::Str(s)) => Ok(Some(s.to_string())),
        Some(other) => Err(type_error(format!(
            "{name} returned non-string (type {})",
            other.type_name()
        ))),
        None => Ok(None),
    }
}

fn bind(value: Value, receiver: &Value) -> Value {
    match value {
        Value::Function(_) | Value::Builtin(_) => Value::BoundMethod(Rc::new(BoundMethod {
            receiver: receiver.clone(),
            function: value,
        })),
        other => other,
    }
}

fn no_attribute(value: &Value, name: &str) -> Unwind {
    let message = match value {
        Value::Class(class) => format!("type object '{}' has no attribute '{name}'", class.name),
        Value::Module(module) => format!("module '{}' has no attribute '{name}'", module.name),
        other => format!("'{}' object has no attribute '{name}'", other.type_name()),
    };
    raise(ErrorKind::AttributeError, message)
}

pub fn get_attr(frame: &mut Frame, object: &Value, name: &str) -> Result<Value, Unwind> {
    let found = match object {
        Value::Instance(instance) => {
            if let Some(value) = instance.get(name) {
                return Ok(value);
            }
            if let Some(value) = instance.class.lookup(name) {
                return Ok(bind(value, object));
            }
            match name {
                "__class__" => Some(Value::Class(Rc::clone(&instance.class))),
                "__dict__" => {
                    let mut dict = Dict::new();
                    for (key, value) in instance.attrs.borrow().iter() {
                        dict.insert(Value::Str(key.clone()), value.clone())?;
                    }
                    Some(Value::dict(dict))
                }
                "__cause__" | "__context__" if instance.is_exception() => Some(Value::None),
                _ if user_method(object, "__getattr__") => {
                    return call_method(frame, object, "__getattr__", vec![Value::str(name)])
                        .map(Option::unwrap_or_default);
                }
                _ => None,
            }
        }
        Value::Class(class) => match name {
            "__name__" => Some(Value::Str(class.name.clone())),
            "__bases__" => Some(Value::tuple(class.bases.iter().cloned().map(Value::Class).collect())),
            "__mro__" => Some(Value::tuple(
                std::iter::once(Rc::clone(class))
                    .chain(class.mro.iter().cloned())
                    .map(Value::Class)
                    .collect(),
            )),
            _ => class.lookup(name),
        },
        Value::Module(module) => module.globals.get(name),
        Value::Super(sup) => {
            let start = sup
                .receiver
                .as_instance()
                .map(|i| Rc::clone(&i.class))
                .or_else(|| sup.receiver.as_class().cloned());
            start
                .and_then(|class| class.lookup_after(&sup.class, name))
                .map(|value| bind(value, &sup.receiver))
        }
        Value::Function(function) => function.attrs.borrow().get(name).cloned(),
        Value::BoundMethod(method) => match name {
            "__self__" => Some(method.receiver.clone()),
            "__func__" => Some(method.function.clone()),
            _ => None,
        },
        other => builtins::method(other, name),
    };
    found.ok_or_else(|| no_attribute(object, name))
}

pub fn set_attr(object: &Value, name: &str, value: Value) -> Result<(), Unwind> {
    match object {
        Value::Instance(instance) => instance.set(name, value),
        Value::Class(class) => {
            class.dict.borrow_mut().insert(name.into(), value);
        }
        Value::Function(function) => {
            function.attrs.borrow_mut().insert(name.into(), value);
        }
        Value::Module(module) => module.globals.set(&name.into(), value),
        other => return Err(no_attribute(other, name)),
    }
    Ok(())
}

pub fn del_attr(object: &Value, name: &str) -> Result<(), Unwind> {
    let removed = match object {
        Value::Instance(instance) => instance.attrs.borrow_mut().remove(name).is_some(),
        Value::Class(class) => class.dict.borrow_mut().remove(name).is_some(),
        Value::Function(function) => function.attrs.borrow_mut().remove(name).is_some(),
        Value::Module(module) => module.globals.remove(name),
        _ => false,
    };
    if removed { Ok(()) } else { Err(no_attribute(object, name)) }
}

fn index(value: &Value, len: usize, what: &str) -> Result<usize, Unwind> {
    let Some(i) = value.as_int() else {
        return Err(type_error(format!(
            "{what} indices must be integers or slices, not {}",
            value.type_name()
        )));
    };
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(raise(ErrorKind::IndexError, format!("{what} index out of range")));
    }
    Ok(resolved as usize)
}

fn slice_bound(value: &Value) -> Result<Option<i64>, Unwind> {
    match value {
        Value::None => Ok(None),
        other => other
            .as_int()
            .map(Some)
            .ok_or_else(|| type_error("slice indices must be integers or None")),
    }
}

/// `(start, stop, step)` clamped to a sequence of `len` items.
fn slice_bounds(parts: &[Value; 3], len: usize) -> Result<(i64, i64, i64), Unwind> {
    let step = slice_bound(&parts[2])?.unwrap_or(1);
    if step == 0 {
        return Err(raise(ErrorKind::ValueError, "slice step cannot be zero"));
    }
    let len = len as i64;
    let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |bound: Option<i64>, default: i64| match bound {
        None => default,
        Some(b) if b < 0 => (b + len).max(lower),
        Some(b) => b.min(upper),
    };
    let start = clamp(slice_bound(&parts[0])?, if step > 0 { lower } else { upper });
    let stop = clamp(slice_bound(&parts[1])?, if step > 0 { upper } else { lower });
    Ok((start, stop, step))
}

fn slice_indices(parts: &[Value; 3], len: usize) -> Result<Vec<usize>, Unwind> {
    let (start, stop, step) = slice_bounds(parts, len)?;
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    Ok(out)
}

fn pick<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().filter_map(|&i| items.get(i).cloned()).collect()
}

fn key_error(key: &Value) -> Unwind {
    Unwind::Exception(builtins::exception_with_args(ErrorKind::KeyError, vec![key.clone()]))
}

pub fn get_item(frame: &mut Frame, object: &Value, key: &Value) -> Result<Value, Unwind> {
    match (object, key) {
        (Value::List(items), Value::Slice(parts)) => {
            let items = items.borrow();
            Ok(Value::list(pick(&items, &slice_indices(parts, items.len())?)))
        }
        (Value::List(items), _) => {
            let items = items.borrow();
            Ok(items[index(key, items.len(), "list")?].clone())
        }
        (Value::Tuple(items), Value::Slice(parts)) => {
            Ok(Value::tuple(pick(items, &slice_indices(parts, items.len())?)))
        }
        (Value::Tuple(items), _) => Ok(items[index(key, items.len(), "tuple")?].clone()),
        (Value::Str(s), _) => {
            let chars: Vec<char> = s.chars().collect();
            match key {
                Value::Slice(parts) => Ok(Value::str(
                    pick(&chars, &slice_indices(parts, chars.len())?)
                        .into_iter()
                        .collect::<String>(),
                )),
                _ => Ok(Value::str(chars[index(key, chars.len(), "string")?].to_string())),
            }
        }
        (Value::Dict(d), _) => {
            let found = d.borrow().get(key)?;
            found.ok_or_else(|| key_error(key))
        }
        (Value::Instance(_), _) if user_method(object, "__getitem__") => {
            call_method(frame, object, "__getitem__", vec![key.clone()]).map(Option::unwrap_or_default)
        }
        (other, _) => Err(type_error(format!("'{}' object is not subscriptable", other.type_name()))),
    }
}

pub fn set_item(frame: &mut Frame, object: &Value, key: &Value, value: Value) -> Result<(), Unwind> {
    match (object, key) {
        (Value::List(items), Value::Slice(parts)) => {
            let values = iter::collect(frame, &value)?;
            let mut items = items.borrow_mut();
            let (start, stop, step) = slice_bounds(parts, items.len())?;
            if step == 1 {
                let (start, stop) = (start as usize, stop.max(start) as usize);
                items.splice(start..stop, values);
                return Ok(());
            }
            let indices = slice_indices(parts, items.len())?;
            if indices.len() != values.len() {
                return Err(raise(
                    ErrorKind::ValueError,
                    format!(
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        values.len(),
                        indices.len()
                    ),
                ));
            }
            for (i, v) in indices.into_iter().zip(values) {
                items[i] = v;
            }
            Ok(())
        }
        (Value::List(items), _) => {
            let mut items = items.borrow_mut();
            let i = index(key, items.len(), "list assignment")?;
            items[i] = value;
            Ok(())
        }
        (Value::Dict(d), _) => d.borrow_mut().insert(key.clone(), value),
        (Value::Instance(_), _) if user_method(object, "__setitem__") => {
            call_method(frame, object, "__setitem__", vec![key.clone(), value]).map(|_| ())
        }
        (other, _) => Err(type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub fn del_item(frame: &mut Frame, object: &Value, key: &Value) -> Result<(), Unwind> {
    match (object, key) {
        (Value::List(items), Value::Slice(parts)) => {
            let mut items = items.borrow_mut();
            let mut indices = slice_indices(parts, items.len())?;
            indices.sort_unstable_by(|a, b| b.cmp(a));
            for i in indices {
                items.remove(i);
            }
            Ok(())
        }
        (Value::List(items), _) => {
            let mut items = items.borrow_mut();
            let i = index(key, items.len(), "list assignment")?;
            items.remove(i);
            Ok(())
        }
        (Value::Dict(d), _) => match d.borrow_mut().remove(key)? {
            Some(_) => Ok(()),
            None => Err(key_error(key)),
        },
        (Value::Instance(_), _) if user_method(object, "__delitem__") => {
            call_method(frame, object, "__delitem__", vec![key.clone()]).map(|_| ())
        }
        (other, _) => Err(type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

/// Forward, reflected and in-place method names of an operator.
fn dunders(op: BinaryOp) -> [&'static str; 3] {
    match op {
        BinaryOp::Add => ["__add__", "__radd__", "__iadd__"],
        BinaryOp::Sub => ["__sub__", "__rsub__", "__isub__"],
        BinaryOp::Mult => ["__mul__", "__rmul__", "__imul__"],
        BinaryOp::Div => ["__truediv__", "__rtruediv__", "__itruediv__"],
        BinaryOp::FloorDiv => ["__floordiv__", "__rfloordiv__", "__ifloordiv__"],
        BinaryOp::Mod => ["__mod__", "__rmod__", "__imod__"],
        BinaryOp::Pow => ["__pow__", "__rpow__", "__ipow__"],
        BinaryOp::LShift => ["__lshift__", "__rlshift__", "__ilshift__"],
        BinaryOp::RShift => ["__rshift__", "__rrshift__", "__irshift__"],
        BinaryOp::BitOr => ["__or__", "__ror__", "__ior__"],
        BinaryOp::BitXor => ["__xor__", "__rxor__", "__ixor__"],
        BinaryOp::BitAnd => ["__and__", "__rand__", "__iand__"],
    }
}

pub fn binary(frame: &mut Frame, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Unwind> {
    let [forward, reflected, _] = dunders(op);
    if let Some(result) = call_method(frame, left, forward, vec![right.clone()])? {
        return Ok(result);
    }
    if let Some(result) = call_method(frame, right, reflected, vec![left.clone()])? {
        return Ok(result);
    }
    if let (BinaryOp::Mod, Value::Str(format)) = (op, left) {
        return builtins::percent_format(frame, format, right).map(Value::str);
    }
    native_binary(op, left, right).unwrap_or_else(|| {
        Err(type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        )))
    })
}

fn in_place(frame: &mut Frame, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Unwind> {
    let [_, _, inplace] = dunders(op);
    if let Some(result) = call_method(frame, left, inplace, vec![right.clone()])? {
        return Ok(result);
    }
    match (op, left) {
        (BinaryOp::Add, Value::List(items)) => {
            let extra = iter::collect(frame, right)?;
            items.borrow_mut().extend(extra);
            Ok(left.clone())
        }
        (BinaryOp::Mult, Value::List(items)) if right.as_int().is_some() => {
            let mut items = items.borrow_mut();
            let times = repeat_count(items.len(), right.as_int().unwrap_or_default())?;
            let repeated: Vec<Value> = items.iter().cloned().cycle().take(items.len() * times).collect();
            *items = repeated;
            Ok(left.clone())
        }
        (BinaryOp::BitOr | BinaryOp::BitAnd | BinaryOp::BitXor | BinaryOp::Sub, Value::Set(set))
            if matches!(right, Value::Set(_)) =>
        {
            if let Some(result) = native_binary(op, left, right) {
                let Value::Set(result) = result? else {
                    return Err(raise(ErrorKind::SystemError, "set operation produced a non-set"));
                };
                let result = result.borrow().clone();
                *set.borrow_mut() = result;
            }
            Ok(left.clone())
        }
        _ => binary(frame, op, left, right),
    }
}

fn overflow() -> Unwind {
    raise(ErrorKind::OverflowError, "integer overflow")
}

fn int_binary(op: BinaryOp, x: i64, y: i64) -> Option<Result<Value, Unwind>> {
    let zero_division = || raise(ErrorKind::ZeroDivisionError, "integer division or modulo by zero");
    let result = match op {
        BinaryOp::Add => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
        BinaryOp::Sub => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
        BinaryOp::Mult => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
        BinaryOp::Div if y == 0 => Err(raise(ErrorKind::ZeroDivisionError, "division by zero")),
        BinaryOp::Div => Ok(Value::Float(x as f64 / y as f64)),
        BinaryOp::FloorDiv if y == 0 => Err(zero_division()),
        BinaryOp::FloorDiv => x
            .checked_div(y)
            .map(|q| if x % y != 0 && (x < 0) != (y < 0) { q - 1 } else { q })
            .map(Value::Int)
            .ok_or_else(overflow),
        BinaryOp::Mod if y == 0 => Err(zero_division()),
        BinaryOp::Mod => x
            .checked_rem(y)
            .map(|r| if r != 0 && (r < 0) != (y < 0) { r + y } else { r })
            .map(Value::Int)
            .ok_or_else(overflow),
        BinaryOp::Pow if y < 0 => Ok(Value::Float((x as f64).powf(y as f64))),
        BinaryOp::Pow => u32::try_from(y)
            .ok()
            .and_then(|y| x.checked_pow(y))
            .map(Value::Int)
            .ok_or_else(overflow),
        BinaryOp::LShift | BinaryOp::RShift if y < 0 => Err(raise(ErrorKind::ValueError, "negative shift count")),
        BinaryOp::LShift if x == 0 => Ok(Value::Int(0)),
        BinaryOp::LShift => u32::try_from(y)
            .ok()
            .filter(|&y| y < 63)
            .and_then(|y| x.checked_shl(y).filter(|shifted| shifted >> y == x))
            .map(Value::Int)
            .ok_or_else(overflow),
        BinaryOp::RShift => Ok(Value::Int(if y >= 64 { if x < 0 { -1 } else { 0 } } else { x >> y })),
        BinaryOp::BitOr => Ok(Value::Int(x | y)),
        BinaryOp::BitXor => Ok(Value::Int(x ^ y)),
        BinaryOp::BitAnd => Ok(Value::Int(x & y)),
    };
    Some(result)
}

fn float_binary(op: BinaryOp, x: f64, y: f64) -> Option<Result<Value, Unwind>> {
    let result = match op {
        BinaryOp::Add => Ok(x + y),
        BinaryOp::Sub => Ok(x - y),
        BinaryOp::Mult => Ok(x * y),
        BinaryOp::Div if y == 0.0 => Err(raise(ErrorKind::ZeroDivisionError, "float division by zero")),
        BinaryOp::Div => Ok(x / y),
        BinaryOp::FloorDiv if y == 0.0 => Err(raise(ErrorKind::ZeroDivisionError, "float floor division by zero")),
        BinaryOp::FloorDiv => Ok((x / y).floor()),
        BinaryOp::Mod if y == 0.0 => Err(raise(ErrorKind::ZeroDivisionError, "float modulo")),
        BinaryOp::Mod => {
            let r = x % y;
            Ok(if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r })
        }
        BinaryOp::Pow => Ok(x.powf(y)),
        _ => return None,
    };
    Some(result.map(Value::Float))
}

/// Upper bound on the length of a repeated sequence.
const MAX_REPEAT_LEN: usize = 1 << 28;

fn repeat_count(len: usize, times: i64) -> Result<usize, Unwind> {
    let times = usize::try_from(times.max(0)).unwrap_or(usize::MAX);
    match len.checked_mul(times) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(times),
        _ => Err(raise(ErrorKind::OverflowError, "repeated sequence is too long")),
    }
}

fn repeat<T: Clone>(items: &[T], times: &Value) -> Option<Result<Vec<T>, Unwind>> {
    let times = times.as_int()?;
    Some(repeat_count(items.len(), times).map(|times| items.iter().cloned().cycle().take(items.len() * times).collect()))
}

fn set_binary(op: BinaryOp, a: &Dict, b: &Dict) -> Option<Result<Value, Unwind>> {
    let mut out = Dict::new();
    let result = match op {
        BinaryOp::BitOr => a.keys().into_iter().chain(b.keys()).try_for_each(|k| out.insert(k, Value::None)),
        BinaryOp::BitAnd => a
            .keys()
            .into_iter()
            .filter(|k| b.contains(k))
            .try_for_each(|k| out.insert(k, Value::None)),
        BinaryOp::Sub => a
            .keys()
            .into_iter()
            .filter(|k| !b.contains(k))
            .try_for_each(|k| out.insert(k, Value::None)),
        BinaryOp::BitXor => a
            .keys()
            .into_iter()
            .filter(|k| !b.contains(k))
            .chain(b.keys().into_iter().filter(|k| !a.contains(k)))
            .try_for_each(|k| out.insert(k, Value::None)),
        _ => return None,
    };
    Some(result.map(|()| Value::set(out)))
}

fn native_binary(op: BinaryOp, left: &Value, right: &Value) -> Option<Result<Value, Unwind>> {
    match (left, right) {
        (Value::Bool(x), Value::Bool(y)) if matches!(op, BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::BitAnd) => {
            Some(Ok(Value::Bool(match op {
                BinaryOp::BitOr => x | y,
                BinaryOp::BitXor => x ^ y,
                _ => x & y,
            })))
        }
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            int_binary(op, left.as_int()?, right.as_int()?)
        }
        (Value::Float(_), Value::Int(_) | Value::Bool(_) | Value::Float(_))
        | (Value::Int(_) | Value::Bool(_), Value::Float(_)) => float_binary(op, left.as_float()?, right.as_float()?),
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => Some(Ok(Value::str(format!("{a}{b}")))),
        (Value::Str(s), n) | (n, Value::Str(s)) if op == BinaryOp::Mult => {
            let times = n.as_int()?;
            Some(repeat_count(s.len(), times).map(|times| Value::str(s.repeat(times))))
        }
        (Value::List(a), Value::List(b)) if op == BinaryOp::Add => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Some(Ok(Value::list(items)))
        }
        (Value::List(items), n) | (n, Value::List(items)) if op == BinaryOp::Mult => {
            Some(repeat(&items.borrow(), n)?.map(Value::list))
        }
        (Value::Tuple(a), Value::Tuple(b)) if op == BinaryOp::Add => {
            Some(Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect())))
        }
        (Value::Tuple(items), n) | (n, Value::Tuple(items)) if op == BinaryOp::Mult => {
            Some(repeat(items, n)?.map(Value::tuple))
        }
        (Value::Set(a), Value::Set(b)) => set_binary(op, &a.borrow(), &b.borrow()),
        _ => None,
    }
}

fn unary(frame: &mut Frame, op: UnaryOp, operand: &Value) -> Result<Value, Unwind> {
    let method = match op {
        UnaryOp::Not => return truthy(frame, operand).map(|b| Value::Bool(!b)),
        UnaryOp::Neg => "__neg__",
        UnaryOp::Pos => "__pos__",
        UnaryOp::Invert => "__invert__",
    };
    if let Some(result) = call_method(frame, operand, method, Vec::new())? {
        return Ok(result);
    }
    let result = match (op, operand) {
        (UnaryOp::Neg, Value::Float(f)) => Some(Value::Float(-f)),
        (UnaryOp::Neg, Value::Int(_) | Value::Bool(_)) => {
            Some(Value::Int(operand.as_int().unwrap_or_default().checked_neg().ok_or_else(overflow)?))
        }
        (UnaryOp::Pos, Value::Float(_)) => Some(operand.clone()),
        (UnaryOp::Pos, Value::Int(_) | Value::Bool(_)) => operand.as_int().map(Value::Int),
        (UnaryOp::Invert, Value::Int(_) | Value::Bool(_)) => operand.as_int().map(|i| Value::Int(!i)),
        _ => None,
    };
    result.ok_or_else(|| {
        type_error(format!(
            "bad operand type for unary {}: '{}'",
            match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            },
            operand.type_name()
        ))
    })
}

pub fn compare(frame: &mut Frame, op: CompareOp, left: &Value, right: &Value) -> Result<bool, Unwind> {
    match op {
        CompareOp::Is => Ok(left.is(right)),
        CompareOp::IsNot => Ok(!left.is(right)),
        CompareOp::In => contains(frame, right, left),
        CompareOp::NotIn => contains(frame, right, left).map(|b| !b),
        CompareOp::Eq => equals(frame, left, right),
        CompareOp::NotEq => {
            if let Some(result) = call_method(frame, left, "__ne__", vec![right.clone()])? {
                return truthy(frame, &result);
            }
            equals(frame, left, right).map(|b| !b)
        }
        CompareOp::Lt | CompareOp::LtE | CompareOp::Gt | CompareOp::GtE => order(frame, op, left, right),
    }
}

pub fn equals(frame: &mut Frame, left: &Value, right: &Value) -> Result<bool, Unwind> {
    if let Some(result) = call_method(frame, left, "__eq__", vec![right.clone()])? {
        return truthy(frame, &result);
    }
    if let Some(result) = call_method(frame, right, "__eq__", vec![left.clone()])? {
        return truthy(frame, &result);
    }
    let (a, b) = match (left, right) {
        (Value::List(a), Value::List(b)) => (a.borrow().clone(), b.borrow().clone()),
        (Value::Tuple(a), Value::Tuple(b)) => (a.to_vec(), b.to_vec()),
        _ => return Ok(left == right),
    };
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(&b) {
        if !x.is(y) && !equals(frame, x, y)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn order(frame: &mut Frame, op: CompareOp, left: &Value, right: &Value) -> Result<bool, Unwind> {
    let (forward, reflected) = match op {
        CompareOp::Lt => ("__lt__", "__gt__"),
        CompareOp::LtE => ("__le__", "__ge__"),
        CompareOp::Gt => ("__gt__", "__lt__"),
        _ => ("__ge__", "__le__"),
    };
    if let Some(result) = call_method(frame, left, forward, vec![right.clone()])? {
        return truthy(frame, &result);
    }
    if let Some(result) = call_method(frame, right, reflected, vec![left.clone()])? {
        return truthy(frame, &result);
    }
    let ordering = match (number(left), number(right)) {
        // NaN compares false both ways.
        (Some(x), Some(y)) => match x.compare(&y) {
            Some(ordering) => Some(ordering),
            None => return Ok(false),
        },
        _ => ordering(frame, left, right)?,
    };
    let Some(ordering) = ordering else {
        return Err(type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        )));
    };
    Ok(match op {
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::LtE => ordering.is_le(),
        CompareOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

/// Numbers compare across int, bool and float.
enum Number {
    Int(i64),
    Float(f64),
}

fn number(value: &Value) -> Option<Number> {
    match value {
        Value::Int(_) | Value::Bool(_) => value.as_int().map(Number::Int),
        Value::Float(f) => Some(Number::Float(*f)),
        _ => None,
    }
}

impl Number {
    fn compare(&self, other: &Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(b)),
            (Number::Int(a), Number::Float(b)) => (*a as f64).partial_cmp(b),
            (Number::Float(a), Number::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Number::Float(a), Number::Float(b)) => a.partial_cmp(b),
        }
    }
}

/// Total order between two builtin values, when one exists.
fn ordering(frame: &mut Frame, left: &Value, right: &Value) -> Result<Option<Ordering>, Unwind> {
    if let (Some(x), Some(y)) = (number(left), number(right)) {
        return Ok(x.compare(&y));
    }
    let (a, b) = match (left, right) {
        (Value::Str(a), Value::Str(b)) => return Ok(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => (a.borrow().clone(), b.borrow().clone()),
        (Value::Tuple(a), Value::Tuple(b)) => (a.to_vec(), b.to_vec()),
        (Value::Instance(_), _) | (_, Value::Instance(_))
            if user_method(left, "__lt__") || user_method(right, "__gt__") =>
        {
            return Ok(if order(frame, CompareOp::Lt, left, right)? {
                Some(Ordering::Less)
            } else if order(frame, CompareOp::Lt, right, left)? {
                Some(Ordering::Greater)
            } else {
                Some(Ordering::Equal)
            });
        }
        _ => return Ok(None),
    };
    for (x, y) in a.iter().zip(&b) {
        if !equals(frame, x, y)? {
            return ordering(frame, x, y);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

pub fn less_than(frame: &mut Frame, left: &Value, right: &Value) -> Result<bool, Unwind> {
    order(frame, CompareOp::Lt, left, right)
}

pub fn contains(frame: &mut Frame, container: &Value, item: &Value) -> Result<bool, Unwind> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_str())),
            other => Err(type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Dict(d) | Value::Set(d) => {
            item.key()?;
            Ok(d.borrow().contains(item))
        }
        Value::Instance(_) if user_method(container, "__contains__") => {
            let result = call_method(frame, container, "__contains__", vec![item.clone()])?.unwrap_or_default();
            truthy(frame, &result)
        }
        _ => {
            let iterator = iter::iterate(frame, container)?;
            while let Some(candidate) = iter::next_item(frame, &iterator)? {
                if candidate.is(item) || equals(frame, &candidate, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

/// Instance for `raise`: classes are instantiated, instances pass through.
pub fn make_exception(frame: &mut Frame, value: Value) -> Result<Value, Unwind> {
    match &value {
        Value::Class(class) if class.native_base() == Some(Native::Exception) => {
            call::call(frame, &value, Args::default())
        }
        Value::Instance(instance) if instance.is_exception() => Ok(value),
        _ => Err(type_error("exceptions must derive from BaseException")),
    }
}

fn exception_matches(exception: &Value, pattern: &Value) -> Result<bool, Unwind> {
    match pattern {
        Value::Class(class) if class.native_base() == Some(Native::Exception) => {
            Ok(exception.as_instance().is_some_and(|i: &Rc<Instance>| i.class.is_subclass(class)))
        }
        Value::Tuple(patterns) => {
            for pattern in patterns.iter() {
                if exception_matches(exception, pattern)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn slice(start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> [Value; 3] {
        let v = |b: Option<i64>| b.map(Value::Int).unwrap_or_default();
        [v(start), v(stop), v(step)]
    }

    #[rstest]
    #[case::all(slice(None, None, None), vec![0, 1, 2, 3, 4])]
    #[case::middle(slice(Some(1), Some(3), None), vec![1, 2])]
    #[case::negative_start(slice(Some(-2), None, None), vec![3, 4])]
    #[case::reversed(slice(None, None, Some(-1)), vec![4, 3, 2, 1, 0])]
    #[case::stepped(slice(Some(0), Some(5), Some(2)), vec![0, 2, 4])]
    #[case::past_end(slice(Some(3), Some(100), None), vec![3, 4])]
    #[case::empty(slice(Some(4), Some(1), None), vec![])]
    fn test_slice_indices(#[case] parts: [Value; 3], #[case] expected: Vec<usize>) {
        assert_eq!(slice_indices(&parts, 5).unwrap(), expected);
    }

    #[rstest]
    #[case::floor_div(BinaryOp::FloorDiv, -7, 2, Value::Int(-4))]
    #[case::modulo(BinaryOp::Mod, -7, 2, Value::Int(1))]
    #[case::modulo_negative_divisor(BinaryOp::Mod, 7, -2, Value::Int(-1))]
    #[case::true_div(BinaryOp::Div, 7, 2, Value::Float(3.5))]
    #[case::pow(BinaryOp::Pow, 2, 10, Value::Int(1024))]
    #[case::negative_pow(BinaryOp::Pow, 2, -1, Value::Float(0.5))]
    #[case::shift(BinaryOp::LShift, 1, 4, Value::Int(16))]
    #[case::arithmetic_shift(BinaryOp::RShift, -8, 1, Value::Int(-4))]
    fn test_int_binary(#[case] op: BinaryOp, #[case] x: i64, #[case] y: i64, #[case] expected: Value) {
        assert_eq!(int_binary(op, x, y).unwrap().unwrap(), expected);
    }

    #[rstest]
    #[case::add_overflow(BinaryOp::Add, i64::MAX, 1)]
    #[case::mod_zero(BinaryOp::Mod, 1, 0)]
    #[case::div_zero(BinaryOp::Div, 1, 0)]
    #[case::negative_shift(BinaryOp::LShift, 1, -1)]
    #[case::shift_overflow(BinaryOp::LShift, 1, 70)]
    fn test_int_binary_raises(#[case] op: BinaryOp, #[case] x: i64, #[case] y: i64) {
        assert!(matches!(int_binary(op, x, y), Some(Err(Unwind::Exception(_)))));
    }

    #[test]
    fn test_native_binary_sequences() {
        let list = Value::list(vec![1.into()]);
        assert_eq!(
            native_binary(BinaryOp::Mult, &list, &Value::Int(3)).unwrap().unwrap(),
            Value::list(vec![1.into(), 1.into(), 1.into()])
        );
        assert_eq!(
            native_binary(BinaryOp::Add, &Value::str("a"), &Value::str("b")).unwrap().unwrap(),
            Value::str("ab")
        );
        assert!(native_binary(BinaryOp::Add, &Value::str("a"), &Value::Int(1)).is_none());
        assert_eq!(
            native_binary(BinaryOp::BitAnd, &Value::Bool(true), &Value::Bool(false)).unwrap().unwrap(),
            Value::Bool(false)
        );
    }

    #[rstest]
    #[case::str(Value::str("ab"), i64::MAX)]
    #[case::list(Value::list(vec![1.into(), 2.into()]), 1 << 40)]
    #[case::tuple(Value::tuple(vec![1.into()]), i64::MAX)]
    fn test_huge_repetition_raises(#[case] sequence: Value, #[case] times: i64) {
        let result = native_binary(BinaryOp::Mult, &sequence, &Value::Int(times)).unwrap();
        let Err(Unwind::Exception(exception)) = result else {
            panic!("expected an exception, got {result:?}");
        };
        assert_eq!(exception.type_name(), "OverflowError");
    }

    #[rstest]
    #[case::negative(3, -5, 0)]
    #[case::empty_sequence(0, i64::MAX, usize::MAX)]
    #[case::at_limit(1, MAX_REPEAT_LEN as i64, MAX_REPEAT_LEN)]
    fn test_repeat_count(#[case] len: usize, #[case] times: i64, #[case] expected: usize) {
        assert_eq!(repeat_count(len, times).unwrap(), expected);
    }

    #[test]
    fn test_set_operations() {
        let set = |items: &[i64]| {
            let mut d = Dict::new();
            for i in items {
                d.insert(Value::Int(*i), Value::None).unwrap();
            }
            d
        };
        let (a, b) = (set(&[1, 2, 3]), set(&[2, 3, 4]));
        let result = set_binary(BinaryOp::Sub, &a, &b).unwrap().unwrap();
        assert_eq!(result, Value::set(set(&[1])));
        let result = set_binary(BinaryOp::BitXor, &a, &b).unwrap().unwrap();
        assert_eq!(result, Value::set(set(&[1, 4])));
    }
}
